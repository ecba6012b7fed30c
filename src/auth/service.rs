//! Auth orchestrator: login-start, callback, refresh rotation, logout.
//!
//! Ordering is the load-bearing part of this module. The refresh protocol
//! does the security-critical write (blocking the old session id) before any
//! cleanup write, and cleanup failures are logged and swallowed because the
//! invariant they serve was already secured.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{RngCore, rngs::OsRng};
use tracing::{error, warn};
use url::Url;
use uuid::Uuid;

use access_token::AccessTokenClaims;

use super::error::AuthError;
use super::models::{
    AuthResponse, AuthState, CallbackRequest, EventLevel, LoginRequest, SecurityEvent, Session,
    SessionDescription, TokenPair, User,
};
use super::now_unix;
use super::refresh;
use super::repository::{AuthUrlParams, KeySource, OAuthClient, Repository};
use super::token_hash;
use super::tokens::TokenService;

const TOKEN_TYPE_BEARER: &str = "Bearer";
const STATE_BYTES: usize = 32;

const DEFAULT_ISSUER: &str = "https://api.sesamo.dev";
const DEFAULT_AUDIENCE: &str = "sesamo-api";
const DEFAULT_AUTH_STATE_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_SESSION_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    issuer: String,
    audience: String,
    auth_state_ttl_seconds: i64,
    access_token_ttl_seconds: i64,
    session_ttl_seconds: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: DEFAULT_ISSUER.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
            auth_state_ttl_seconds: DEFAULT_AUTH_STATE_TTL_SECONDS,
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
        }
    }
}

impl AuthConfig {
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = audience.into();
        self
    }

    #[must_use]
    pub fn with_auth_state_ttl_seconds(mut self, seconds: i64) -> Self {
        self.auth_state_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }
}

/// Drives the OAuth state machine: issue authorization request, verify
/// callback, mint session and tokens, rotate on refresh, invalidate on
/// logout.
pub struct AuthService {
    repo: Arc<dyn Repository>,
    oauth: Arc<dyn OAuthClient>,
    tokens: TokenService,
    config: AuthConfig,
}

impl AuthService {
    pub fn new(
        repo: Arc<dyn Repository>,
        oauth: Arc<dyn OAuthClient>,
        keys: Arc<dyn KeySource>,
        config: AuthConfig,
    ) -> Self {
        let tokens = TokenService::new(
            Arc::clone(&repo),
            keys,
            config.issuer.clone(),
            config.audience.clone(),
            config.access_token_ttl_seconds,
        );
        Self {
            repo,
            oauth,
            tokens,
            config,
        }
    }

    /// The token service, for callers that only need validation.
    #[must_use]
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Start a login attempt: persist a single-use state record and return
    /// the provider authorization URL together with the state value.
    ///
    /// # Errors
    ///
    /// [`AuthError::Provider`] when the OAuth client rejects the provider
    /// name; store failures pass through.
    pub async fn get_auth_url(&self, req: &LoginRequest) -> Result<(String, String), AuthError> {
        if !req.redirect_url.is_empty() && Url::parse(&req.redirect_url).is_err() {
            return Err(AuthError::InvalidRedirectUrl);
        }

        let now = now_unix();
        let state = generate_state()?;

        let code_challenge = req.code_challenge.clone().filter(|c| !c.is_empty());
        let auth_state = AuthState {
            state: state.clone(),
            provider: req.provider.clone(),
            redirect_url: req.redirect_url.clone(),
            code_challenge: code_challenge.clone(),
            client_ip: String::new(),
            user_agent: String::new(),
            expires_at: now + self.config.auth_state_ttl_seconds,
            created_at: now,
        };
        self.repo.store_auth_state(&auth_state).await?;

        let params = AuthUrlParams {
            code_challenge_method: code_challenge.as_ref().map(|_| {
                req.code_challenge_method
                    .clone()
                    .unwrap_or_else(|| "S256".to_string())
            }),
            code_challenge,
        };
        let url = self
            .oauth
            .auth_url(&req.provider, &state, &params)
            .map_err(|err| {
                warn!(provider = %req.provider, "oauth client rejected provider: {err}");
                AuthError::Provider(req.provider.clone())
            })?;

        Ok((url, state))
    }

    /// Handle the provider callback: consume the state, verify PKCE,
    /// resolve the user, and mint a session with its token pair.
    ///
    /// # Errors
    ///
    /// State, PKCE, and provider failures per the protocol; store failures
    /// pass through.
    pub async fn handle_callback(
        &self,
        req: &CallbackRequest,
        client_ip: &str,
        user_agent: &str,
    ) -> Result<AuthResponse, AuthError> {
        let now = now_unix();

        let auth_state = self
            .repo
            .get_auth_state(&req.state)
            .await?
            .ok_or(AuthError::StateNotFound)?;

        if auth_state.is_expired(now) {
            if let Err(err) = self.repo.delete_auth_state(&req.state).await {
                error!("failed to delete expired auth state: {err}");
            }
            return Err(AuthError::StateExpired);
        }

        // Consume the state before any further validation: a state value is
        // single-use even when the rest of the callback fails.
        self.repo.delete_auth_state(&req.state).await?;

        if let Some(challenge) = &auth_state.code_challenge {
            let Some(verifier) = req.code_verifier.as_deref().filter(|v| !v.is_empty()) else {
                warn!(client_ip, "PKCE verifier missing");
                self.log_security_event(
                    "",
                    "pkce_missing_verifier",
                    "client did not provide a code_verifier despite a code_challenge being set",
                    client_ip,
                    user_agent,
                    EventLevel::Warning,
                )
                .await;
                return Err(AuthError::PkceRequired);
            };

            if !super::pkce::verify_s256(challenge, verifier) {
                warn!(client_ip, "PKCE verification failed");
                self.log_security_event(
                    "",
                    "pkce_verification_failed",
                    "code_verifier did not match the stored code_challenge",
                    client_ip,
                    user_agent,
                    EventLevel::Warning,
                )
                .await;
                return Err(AuthError::PkceVerificationFailed);
            }
        }

        let provider_token = self
            .oauth
            .exchange_code(&auth_state.provider, &req.code)
            .await
            .map_err(AuthError::UpstreamAuth)?;

        let user_info = self
            .oauth
            .get_user_info(&auth_state.provider, &provider_token)
            .await
            .map_err(AuthError::UpstreamAuth)?;

        let user = match self
            .repo
            .get_user_by_external_id(&user_info.id, &auth_state.provider)
            .await?
        {
            Some(user) => {
                if let Err(err) = self.repo.update_last_login(&user.id, now).await {
                    error!(user_id = %user.id, "failed to update last login: {err}");
                }
                user
            }
            None => {
                let user = User {
                    id: Uuid::new_v4().to_string(),
                    external_id: user_info.id.clone(),
                    provider: auth_state.provider.clone(),
                    email: user_info.email.clone(),
                    display_name: user_info.name.clone(),
                    avatar_url: user_info.picture.clone(),
                    created_at: now,
                    updated_at: now,
                    last_login_at: now,
                };
                self.repo.create_user(&user).await?;
                self.log_security_event(
                    &user.id,
                    "user_created",
                    "new user created via OAuth login",
                    client_ip,
                    user_agent,
                    EventLevel::Info,
                )
                .await;
                user
            }
        };

        let org_ids = self.user_organizations(&user.id).await;

        let session_id = Uuid::new_v4().to_string();
        let claims = self.tokens.build_claims(&user, org_ids, &session_id, now);
        let token_pair = self.mint_token_pair(&claims)?;

        self.create_session(
            &session_id,
            &user.id,
            &token_pair.refresh_token,
            None,
            client_ip,
            user_agent,
        )
        .await?;

        self.log_security_event(
            &user.id,
            "login_success",
            "successful OAuth login",
            client_ip,
            user_agent,
            EventLevel::Info,
        )
        .await;

        let TokenPair {
            access_token,
            refresh_token,
            token_type,
            expires_in,
        } = token_pair;
        Ok(AuthResponse {
            user,
            access_token,
            refresh_token,
            token_type,
            expires_in,
        })
    }

    /// Rotate a refresh token.
    ///
    /// After success the old refresh token can never mint tokens again and
    /// every access token issued under the old session id is unusable.
    /// Blacklisting the old refresh token is best-effort (its verifier is
    /// already consumed); blocking the old session id is mandatory and
    /// aborts the rotation when it cannot be confirmed.
    ///
    /// # Errors
    ///
    /// Protocol errors per the state machine; [`AuthError::RotationFailed`]
    /// when the old session id cannot be blocked.
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        client_ip: &str,
        user_agent: &str,
    ) -> Result<TokenPair, AuthError> {
        let now = now_unix();

        if self
            .repo
            .is_refresh_token_blacklisted(refresh_token)
            .await?
        {
            return Err(AuthError::TokenInvalid);
        }

        let session = self.session_by_refresh_token(refresh_token).await?;

        if session.is_expired(now) {
            return Err(AuthError::SessionExpired);
        }

        let user = self
            .repo
            .get_user(&session.user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        let old_session_id = session.id.clone();
        // A fresh session id is what invalidates the old access tokens.
        let new_session_id = Uuid::new_v4().to_string();

        let org_ids = self.user_organizations(&user.id).await;
        let claims = self
            .tokens
            .build_claims(&user, org_ids, &new_session_id, now);
        let token_pair = self.mint_token_pair(&claims)?;

        // Best-effort: the verifier has already been consumed and cannot be
        // replayed even if blacklisting lags.
        if let Err(err) = self
            .repo
            .blacklist_refresh_token(refresh_token, session.expires_at)
            .await
        {
            error!(
                session_id = %old_session_id,
                "failed to blacklist old refresh token: {err}"
            );
        }

        // Mandatory: without a confirmed block, the pre-rotation access
        // tokens would stay usable until they expire.
        if let Err(err) = self
            .repo
            .block_session(&old_session_id, session.expires_at)
            .await
        {
            return Err(AuthError::RotationFailed(err));
        }

        let parts = refresh::parse_refresh_token(&token_pair.refresh_token)?;
        let (refresh_token_hash, salt) = self.hash_verifier(&parts.verifier)?;
        let new_session = Session {
            id: new_session_id.clone(),
            user_id: session.user_id.clone(),
            refresh_token_hash,
            refresh_token_selector: parts.selector,
            salt,
            device_id: session.device_id.clone(),
            ip_address: client_ip.to_string(),
            user_agent: user_agent.to_string(),
            expires_at: session.expires_at,
            created_at: now,
            last_used_at: now,
            revoked: false,
        };
        self.repo.create_session(&new_session).await?;

        // Best-effort: the blocklist entry above is the real authority for
        // the old session.
        if let Err(err) = self.repo.delete_session(&old_session_id).await {
            error!(
                session_id = %old_session_id,
                "failed to delete old session: {err}"
            );
        }

        self.log_security_event(
            &user.id,
            "token_refreshed",
            &format!(
                "access token refreshed, old session {old_session_id} replaced with {new_session_id}"
            ),
            client_ip,
            user_agent,
            EventLevel::Info,
        )
        .await;

        Ok(token_pair)
    }

    /// Verify an access credential; see [`TokenService::validate`].
    ///
    /// # Errors
    ///
    /// See [`TokenService::validate`].
    pub async fn validate_access_token(
        &self,
        access_token: &str,
    ) -> Result<AccessTokenClaims, AuthError> {
        self.tokens.validate(access_token).await
    }

    /// Invalidate a session id. Idempotent: an unknown session is treated
    /// as already invalidated.
    ///
    /// The session row is left in place; the blocklist is the authority for
    /// access-token validity.
    ///
    /// # Errors
    ///
    /// Store failures pass through.
    pub async fn invalidate_session(&self, session_id: &str) -> Result<(), AuthError> {
        let Some(session) = self.repo.get_session(session_id).await? else {
            warn!(session_id, "session not found during invalidation");
            return Ok(());
        };

        self.repo
            .block_session(session_id, session.expires_at)
            .await?;

        self.log_security_event(
            &session.user_id,
            "session_invalidated",
            "session manually invalidated",
            "",
            "",
            EventLevel::Info,
        )
        .await;

        Ok(())
    }

    /// Persist a new session for a freshly minted refresh token.
    ///
    /// # Errors
    ///
    /// Malformed refresh tokens and store failures.
    pub async fn create_session(
        &self,
        session_id: &str,
        user_id: &str,
        refresh_token: &str,
        device_id: Option<&str>,
        client_ip: &str,
        user_agent: &str,
    ) -> Result<Session, AuthError> {
        let parts = refresh::parse_refresh_token(refresh_token)?;
        refresh::validate_selector(&parts.selector)?;

        let (refresh_token_hash, salt) = self.hash_verifier(&parts.verifier)?;

        let now = now_unix();
        let session = Session {
            id: session_id.to_string(),
            user_id: user_id.to_string(),
            refresh_token_hash,
            refresh_token_selector: parts.selector,
            salt,
            device_id: device_id.map(ToString::to_string),
            ip_address: client_ip.to_string(),
            user_agent: user_agent.to_string(),
            expires_at: now + self.config.session_ttl_seconds,
            created_at: now,
            last_used_at: now,
            revoked: false,
        };
        self.repo.create_session(&session).await?;

        Ok(session)
    }

    /// Active sessions for a user, shaped for display.
    ///
    /// # Errors
    ///
    /// Store failures pass through.
    pub async fn user_sessions(&self, user_id: &str) -> Result<Vec<SessionDescription>, AuthError> {
        let sessions = self.repo.list_user_sessions(user_id).await?;
        Ok(sessions.iter().map(SessionDescription::from).collect())
    }

    /// Revoke one of the user's sessions.
    ///
    /// # Errors
    ///
    /// [`AuthError::SessionNotFound`] for unknown ids,
    /// [`AuthError::Unauthorized`] when the session belongs to another user.
    pub async fn revoke_session(&self, user_id: &str, session_id: &str) -> Result<(), AuthError> {
        let session = self
            .repo
            .get_session(session_id)
            .await?
            .ok_or(AuthError::SessionNotFound)?;

        if session.user_id != user_id {
            return Err(AuthError::Unauthorized);
        }

        self.repo
            .block_session(session_id, session.expires_at)
            .await?;

        if let Err(err) = self.repo.delete_session(session_id).await {
            error!(session_id, "failed to delete revoked session: {err}");
        }

        self.log_security_event(
            user_id,
            "session_revoked",
            &format!("session {session_id} revoked"),
            "",
            "",
            EventLevel::Info,
        )
        .await;

        Ok(())
    }

    /// Revoke every session of the user except one.
    ///
    /// # Errors
    ///
    /// Store failures pass through; blocking is mandatory per session.
    pub async fn revoke_all_sessions(
        &self,
        user_id: &str,
        except_session_id: &str,
    ) -> Result<(), AuthError> {
        let sessions = self.repo.list_user_sessions(user_id).await?;

        for session in &sessions {
            if session.id != except_session_id {
                self.repo
                    .block_session(&session.id, session.expires_at)
                    .await?;
            }
        }

        self.repo
            .delete_user_sessions(user_id, except_session_id)
            .await?;

        self.log_security_event(
            user_id,
            "all_sessions_revoked",
            "all sessions revoked except current",
            "",
            "",
            EventLevel::Warning,
        )
        .await;

        Ok(())
    }

    /// Blacklist a refresh token without rotating it.
    ///
    /// # Errors
    ///
    /// [`AuthError::SessionNotFound`] when the token does not resolve to a
    /// live session.
    pub async fn revoke_refresh_token(&self, refresh_token: &str) -> Result<(), AuthError> {
        let session = self.session_by_refresh_token(refresh_token).await?;
        self.repo
            .blacklist_refresh_token(refresh_token, session.expires_at)
            .await?;
        Ok(())
    }

    async fn session_by_refresh_token(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let parts = refresh::parse_refresh_token(refresh_token)?;
        refresh::validate_selector(&parts.selector)?;

        let Some(session) = self.repo.get_session_by_selector(&parts.selector).await? else {
            return Err(AuthError::SessionNotFound);
        };

        // Wrong verifier and unknown selector intentionally collapse into
        // the same error so the API is not a selector-guessing oracle.
        if !session.salt.is_empty()
            && self.verify_verifier(&parts.verifier, &session.refresh_token_hash, &session.salt)
        {
            Ok(session)
        } else {
            Err(AuthError::SessionNotFound)
        }
    }

    fn mint_token_pair(&self, claims: &AccessTokenClaims) -> Result<TokenPair, AuthError> {
        let access_token = self.tokens.issue(claims)?;
        let refresh_token = refresh::generate_refresh_token()?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: TOKEN_TYPE_BEARER.to_string(),
            expires_in: claims.exp - claims.iat,
        })
    }

    async fn user_organizations(&self, user_id: &str) -> Vec<String> {
        match self.repo.get_user_organizations(user_id).await {
            Ok(org_ids) => org_ids,
            Err(err) => {
                warn!(user_id, "failed to load user organizations: {err}");
                Vec::new()
            }
        }
    }

    fn hash_verifier(&self, verifier: &str) -> Result<(String, String), AuthError> {
        if verifier.len() < 8 {
            return Err(anyhow!("refresh token verifier too short to hash").into());
        }

        let (hashed, salt) = self.repo.hash_token(verifier)?;

        if hashed.len() != token_hash::ENCODED_LEN || salt.len() != token_hash::ENCODED_LEN {
            return Err(anyhow!("hash generation failed length validation").into());
        }

        Ok((hashed, salt))
    }

    fn verify_verifier(&self, plain: &str, hashed: &str, salt: &str) -> bool {
        if plain.len() < 8 {
            return false;
        }
        if hashed.len() != token_hash::ENCODED_LEN || salt.len() != token_hash::ENCODED_LEN {
            return false;
        }
        self.repo.verify_token(plain, hashed, salt)
    }

    async fn log_security_event(
        &self,
        user_id: &str,
        event_type: &str,
        description: &str,
        ip_address: &str,
        user_agent: &str,
        level: EventLevel,
    ) {
        let event = SecurityEvent {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            event_type: event_type.to_string(),
            description: description.to_string(),
            ip_address: ip_address.to_string(),
            user_agent: user_agent.to_string(),
            level,
            created_at: now_unix(),
        };

        if let Err(err) = self.repo.create_security_event(&event).await {
            error!(event_type, "failed to record security event: {err}");
        }
    }
}

fn generate_state() -> Result<String> {
    let mut bytes = [0u8; STATE_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate state")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}
