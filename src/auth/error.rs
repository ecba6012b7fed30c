//! Error taxonomy for the auth core.
//!
//! Input/protocol errors and security outcomes are reported to the caller
//! as-is; dependency failures fail closed. Which side effects are
//! best-effort is decided at the call sites, not here.

use thiserror::Error;

/// Internal cause of a [`AuthError::TooManySessions`] rejection.
///
/// The caller-visible error is intentionally the same for both causes; the
/// cause is carried so a future product decision to distinguish them is a
/// one-line change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLimitCause {
    /// The per-user session count reached the configured maximum.
    LimitExceeded,
    /// The per-user admission lock was held by a concurrent request.
    LockContention,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("auth state not found")]
    StateNotFound,

    #[error("auth state expired")]
    StateExpired,

    #[error("code_verifier is required")]
    PkceRequired,

    #[error("PKCE verification failed")]
    PkceVerificationFailed,

    #[error("unknown provider: {0}")]
    Provider(String),

    #[error("invalid redirect URL")]
    InvalidRedirectUrl,

    #[error("upstream authentication failed")]
    UpstreamAuth(#[source] anyhow::Error),

    #[error("user not found")]
    UserNotFound,

    #[error("invalid refresh token format")]
    MalformedRefreshToken,

    #[error("refresh token is invalid")]
    TokenInvalid,

    #[error("session not found")]
    SessionNotFound,

    #[error("session has expired")]
    SessionExpired,

    #[error("session has been invalidated")]
    SessionInvalidated,

    #[error("not authorized for this session")]
    Unauthorized,

    #[error("token rotation failed")]
    RotationFailed(#[source] anyhow::Error),

    #[error("concurrent session limit exceeded")]
    TooManySessions(SessionLimitCause),

    #[error("signing key unavailable")]
    KeySourceUnavailable(#[source] anyhow::Error),

    #[error("could not verify session validity: upstream service unavailable")]
    UpstreamUnavailable(#[source] anyhow::Error),

    #[error("invalid access token")]
    InvalidAccessToken(#[from] access_token::Error),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_causes_share_a_message() {
        let limit = AuthError::TooManySessions(SessionLimitCause::LimitExceeded);
        let contention = AuthError::TooManySessions(SessionLimitCause::LockContention);
        assert_eq!(limit.to_string(), contention.to_string());
    }

    #[test]
    fn session_lookup_failures_are_indistinguishable() {
        // Wrong verifier and unknown selector must map to the same message so
        // the API is not an oracle for selector guessing.
        assert_eq!(AuthError::SessionNotFound.to_string(), "session not found");
    }
}
