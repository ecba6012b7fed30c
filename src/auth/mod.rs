//! Session and token lifecycle core.
//!
//! Everything here is driven by the transport layer and talks to the outside
//! world through the capabilities in [`repository`]: the persistence store,
//! the OAuth provider client, the signing key source, and the limiter store.

pub mod error;
pub mod memory;
pub mod models;
pub mod pkce;
pub mod postgres;
pub mod refresh;
pub mod repository;
pub mod service;
pub mod session_limit;
pub mod token_hash;
pub mod tokens;

#[cfg(test)]
mod tests;

pub use error::{AuthError, SessionLimitCause};
pub use service::{AuthConfig, AuthService};
pub use session_limit::{SessionLimiter, SessionLimiterConfig};
pub use tokens::{LEGACY_SESSION_ID, TokenService};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as unix seconds.
///
/// Expiry comparisons across the core are done in unix seconds so stored
/// rows and signed claims use the same scale.
#[must_use]
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}
