//! Claims and session model shared by the auth core.

use serde::{Deserialize, Serialize};

pub use access_token::AccessTokenClaims;

/// Stable identity record resolved from an OAuth provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub external_id: String,
    pub provider: String,
    pub email: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_login_at: i64,
}

/// Ephemeral record created per login attempt and consumed exactly once at
/// callback time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthState {
    pub state: String,
    pub provider: String,
    pub redirect_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    pub client_ip: String,
    pub user_agent: String,
    pub expires_at: i64,
    pub created_at: i64,
}

impl AuthState {
    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }
}

/// The unit of revocable trust.
///
/// Refresh tokens use the selector/verifier split: `refresh_token_selector`
/// is the indexed, non-secret lookup key, and only the salted hash of the
/// secret verifier half is ever stored. Rotation replaces the whole row
/// rather than mutating selector or hash in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    /// Salted hash of the refresh token verifier, 64 hex chars.
    pub refresh_token_hash: String,
    pub refresh_token_selector: String,
    /// Salt used for the verifier hash, 64 hex chars.
    pub salt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub ip_address: String,
    pub user_agent: String,
    pub expires_at: i64,
    pub created_at: i64,
    pub last_used_at: i64,
    pub revoked: bool,
}

impl Session {
    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }

    #[must_use]
    pub fn is_valid(&self, now: i64) -> bool {
        !self.revoked && !self.is_expired(now)
    }
}

/// Access/refresh token pair returned to the caller. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Severity of a security event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warning,
    Critical,
}

impl EventLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// Append-only audit record. Written by the core, never read back for
/// control decisions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecurityEvent {
    pub id: String,
    pub user_id: String,
    pub event_type: String,
    pub description: String,
    pub ip_address: String,
    pub user_agent: String,
    pub level: EventLevel,
    pub created_at: i64,
}

/// Profile data returned by the OAuth provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserInfo {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

/// Login-start request.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub provider: String,
    #[serde(default)]
    pub redirect_url: String,
    #[serde(default)]
    pub code_challenge: Option<String>,
    #[serde(default)]
    pub code_challenge_method: Option<String>,
}

/// OAuth callback request.
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackRequest {
    pub code: String,
    pub state: String,
    #[serde(default)]
    pub code_verifier: Option<String>,
}

/// Successful login response.
#[derive(Debug, Clone, Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Session description for "active sessions" listings.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionDescription {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub ip_address: String,
    pub user_agent: String,
    pub created_at: i64,
    pub last_used_at: i64,
}

impl From<&Session> for SessionDescription {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            device_id: session.device_id.clone(),
            ip_address: session.ip_address.clone(),
            user_agent: session.user_agent.clone(),
            created_at: session.created_at,
            last_used_at: session.last_used_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(selector: &str) -> Session {
        Session {
            id: "s1".to_string(),
            user_id: "u1".to_string(),
            refresh_token_hash: "h".repeat(64),
            refresh_token_selector: selector.to_string(),
            salt: "s".repeat(64),
            device_id: None,
            ip_address: "127.0.0.1".to_string(),
            user_agent: "test".to_string(),
            expires_at: 200,
            created_at: 100,
            last_used_at: 100,
            revoked: false,
        }
    }

    #[test]
    fn session_expiry_bounds() {
        let s = session("selector-1");
        assert!(!s.is_expired(200));
        assert!(s.is_expired(201));
        assert!(s.is_valid(150));

        let mut revoked = s;
        revoked.revoked = true;
        assert!(!revoked.is_valid(150));
    }

    #[test]
    fn auth_state_expiry_is_inclusive() {
        let state = AuthState {
            state: "abc".to_string(),
            provider: "github".to_string(),
            redirect_url: String::new(),
            code_challenge: None,
            client_ip: String::new(),
            user_agent: String::new(),
            expires_at: 600,
            created_at: 0,
        };
        assert!(!state.is_expired(600));
        assert!(state.is_expired(601));
    }

    #[test]
    fn event_level_serializes_lowercase() {
        let json = serde_json::to_string(&EventLevel::Warning).expect("serialize");
        assert_eq!(json, "\"warning\"");
        assert_eq!(EventLevel::Critical.as_str(), "critical");
    }
}
