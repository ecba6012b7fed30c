//! Injected capabilities consumed by the auth core.
//!
//! Everything the core needs from the outside world is expressed as a trait
//! so transports wire in real stores and tests substitute in-memory fakes.
//! Backend failures are reported as plain `anyhow` errors; "not found" is an
//! `Ok(None)`, never an error.

use anyhow::Result;
use async_trait::async_trait;

use super::models::{AuthState, SecurityEvent, Session, User, UserInfo};

/// Persistence capability: users, sessions, auth states, the blocklists,
/// verifier hashing, and the audit log.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn create_user(&self, user: &User) -> Result<()>;
    async fn get_user(&self, user_id: &str) -> Result<Option<User>>;
    async fn get_user_by_external_id(
        &self,
        external_id: &str,
        provider: &str,
    ) -> Result<Option<User>>;
    async fn update_last_login(&self, user_id: &str, now: i64) -> Result<()>;
    async fn get_user_organizations(&self, user_id: &str) -> Result<Vec<String>>;

    async fn create_session(&self, session: &Session) -> Result<()>;
    async fn get_session(&self, session_id: &str) -> Result<Option<Session>>;
    /// O(1) lookup by the non-secret selector half of a refresh token.
    async fn get_session_by_selector(&self, selector: &str) -> Result<Option<Session>>;
    async fn update_session(&self, session: &Session) -> Result<()>;
    async fn delete_session(&self, session_id: &str) -> Result<()>;
    async fn list_user_sessions(&self, user_id: &str) -> Result<Vec<Session>>;
    async fn delete_user_sessions(&self, user_id: &str, except_session_id: &str) -> Result<()>;

    async fn store_auth_state(&self, state: &AuthState) -> Result<()>;
    async fn get_auth_state(&self, state: &str) -> Result<Option<AuthState>>;
    async fn delete_auth_state(&self, state: &str) -> Result<()>;

    async fn blacklist_refresh_token(&self, refresh_token: &str, expires_at: i64) -> Result<()>;
    async fn is_refresh_token_blacklisted(&self, refresh_token: &str) -> Result<bool>;
    async fn block_session(&self, session_id: &str, expires_at: i64) -> Result<()>;
    async fn is_session_blocked(&self, session_id: &str) -> Result<bool>;

    /// Hash a verifier with a fresh salt; returns `(hash, salt)`, both
    /// fixed-length encoded digests.
    fn hash_token(&self, token: &str) -> Result<(String, String)>;
    /// Verify a plain verifier against a stored hash and salt. A mismatch is
    /// `false`, never an error.
    fn verify_token(&self, plain: &str, hashed: &str, salt: &str) -> bool;

    async fn create_security_event(&self, event: &SecurityEvent) -> Result<()>;
}

/// PKCE parameters forwarded to the provider when building the
/// authorization URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthUrlParams {
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// OAuth provider client. Implemented elsewhere; the core only drives it.
#[async_trait]
pub trait OAuthClient: Send + Sync {
    /// Build the provider authorization URL for a login attempt.
    ///
    /// # Errors
    ///
    /// Fails when the provider name is not known to the client.
    fn auth_url(&self, provider: &str, state: &str, params: &AuthUrlParams) -> Result<String>;

    async fn exchange_code(&self, provider: &str, code: &str) -> Result<String>;
    async fn get_user_info(&self, provider: &str, provider_token: &str) -> Result<UserInfo>;
}

/// Source of the signing key pair used for access credentials.
pub trait KeySource: Send + Sync {
    /// PEM or DER encoded private signing key.
    ///
    /// # Errors
    ///
    /// Fails when the key material cannot be produced; callers treat this as
    /// fatal for the whole operation.
    fn private_key(&self) -> Result<Vec<u8>>;

    /// PEM or DER encoded public verification key.
    ///
    /// # Errors
    ///
    /// Fails when the key material cannot be produced.
    fn public_key(&self) -> Result<Vec<u8>>;
}

/// Fixed key pair held in memory, loaded once at startup.
pub struct StaticKeySource {
    private_pem: Vec<u8>,
    public_pem: Vec<u8>,
}

impl StaticKeySource {
    /// Build from a private key, deriving the public half.
    ///
    /// # Errors
    ///
    /// Fails when the private key cannot be parsed.
    pub fn from_private_key(private_pem_or_der: &[u8]) -> Result<Self> {
        let public_pem = access_token::derive_public_key_pem(private_pem_or_der)
            .map_err(|err| anyhow::anyhow!("failed to derive public key: {err}"))?;
        Ok(Self {
            private_pem: private_pem_or_der.to_vec(),
            public_pem: public_pem.into_bytes(),
        })
    }
}

impl KeySource for StaticKeySource {
    fn private_key(&self) -> Result<Vec<u8>> {
        Ok(self.private_pem.clone())
    }

    fn public_key(&self) -> Result<Vec<u8>> {
        Ok(self.public_pem.clone())
    }
}

/// Shared store backing the session limiter: a mutual-exclusion lock and an
/// expiring per-user set, both TTL-based.
#[async_trait]
pub trait SessionLimiterStore: Send + Sync {
    /// Try to take the lock; `value` identifies the holder for safe
    /// self-release. Returns `false` when the lock is already held.
    async fn acquire_lock(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<bool>;

    /// Release the lock if `value` still matches the holder.
    ///
    /// # Errors
    ///
    /// Fails when the lock is not held or the value does not match.
    async fn release_lock(&self, key: &str, value: &str) -> Result<()>;

    async fn add_member(&self, key: &str, member: &str, ttl_seconds: u64) -> Result<()>;
    async fn remove_member(&self, key: &str, member: &str) -> Result<()>;
    async fn count_members(&self, key: &str) -> Result<usize>;
}
