//! Blocklist-aware issuance and validation of access credentials.

use std::sync::Arc;

use access_token::AccessTokenClaims;
use tracing::error;

use super::error::AuthError;
use super::models::User;
use super::now_unix;
use super::repository::{KeySource, Repository};

/// Sentinel session id for credentials minted before session tracking.
///
/// Such credentials skip the blocklist check entirely; this is a deliberate
/// backward-compatibility carve-out, not an inference from an empty string.
pub const LEGACY_SESSION_ID: &str = "legacy-session";

/// Signs and verifies short-lived access credentials that carry a session
/// id, and rejects credentials whose session has been blocked.
pub struct TokenService {
    repo: Arc<dyn Repository>,
    keys: Arc<dyn KeySource>,
    issuer: String,
    audience: String,
    token_ttl_seconds: i64,
}

impl TokenService {
    pub fn new(
        repo: Arc<dyn Repository>,
        keys: Arc<dyn KeySource>,
        issuer: impl Into<String>,
        audience: impl Into<String>,
        token_ttl_seconds: i64,
    ) -> Self {
        Self {
            repo,
            keys,
            issuer: issuer.into(),
            audience: audience.into(),
            token_ttl_seconds,
        }
    }

    #[must_use]
    pub fn token_ttl_seconds(&self) -> i64 {
        self.token_ttl_seconds
    }

    /// Build the claim set for a user under a session id.
    #[must_use]
    pub fn build_claims(
        &self,
        user: &User,
        org_ids: Vec<String>,
        session_id: &str,
        now: i64,
    ) -> AccessTokenClaims {
        AccessTokenClaims {
            sub: user.id.clone(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now,
            exp: now + self.token_ttl_seconds,
            user_id: user.id.clone(),
            email: user.email.clone(),
            name: user.display_name.clone(),
            provider: user.provider.clone(),
            org_ids,
            session_id: Some(session_id.to_string()),
        }
    }

    /// Sign a claim set with the service's private key.
    ///
    /// # Errors
    ///
    /// [`AuthError::KeySourceUnavailable`] when the key cannot be produced;
    /// this is fatal for the whole operation, never retried inline.
    pub fn issue(&self, claims: &AccessTokenClaims) -> Result<String, AuthError> {
        let private_key = self
            .keys
            .private_key()
            .map_err(AuthError::KeySourceUnavailable)?;
        access_token::sign_rs256(&private_key, claims).map_err(AuthError::from)
    }

    /// Verify a credential and check its session against the blocklist.
    ///
    /// Credentials without a session claim are treated as
    /// [`LEGACY_SESSION_ID`] and skip the blocklist check. For everything
    /// else an unreachable blocklist fails closed: an unknown answer is a
    /// denial, because treating it as "not blocked" would let a rotated-out
    /// credential keep working.
    ///
    /// # Errors
    ///
    /// Signature, algorithm, and expiry failures surface as
    /// [`AuthError::InvalidAccessToken`]; a blocked session as
    /// [`AuthError::SessionInvalidated`]; a blocklist lookup failure as
    /// [`AuthError::UpstreamUnavailable`].
    pub async fn validate(&self, token: &str) -> Result<AccessTokenClaims, AuthError> {
        let public_key = self
            .keys
            .public_key()
            .map_err(AuthError::KeySourceUnavailable)?;

        let mut claims = access_token::verify_rs256(token, &public_key, now_unix())?;

        let session_id = claims
            .session_id
            .clone()
            .unwrap_or_else(|| LEGACY_SESSION_ID.to_string());

        if session_id != LEGACY_SESSION_ID {
            match self.repo.is_session_blocked(&session_id).await {
                Ok(true) => return Err(AuthError::SessionInvalidated),
                Ok(false) => {}
                Err(err) => {
                    error!(%session_id, "failed to check session blocklist: {err}");
                    return Err(AuthError::UpstreamUnavailable(err));
                }
            }
        }

        claims.session_id = Some(session_id);
        Ok(claims)
    }
}
