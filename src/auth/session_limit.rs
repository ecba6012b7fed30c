//! Per-user concurrent session admission control.
//!
//! "Count then insert" is not atomic against concurrent creates for the same
//! user, so admission runs inside a per-user distributed lock taken on the
//! shared limiter store. A timed-out or contended acquisition is "could not
//! admit", never "admitted".

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use super::error::{AuthError, SessionLimitCause};
use super::repository::SessionLimiterStore;

const DEFAULT_MAX_CONCURRENT_SESSIONS: usize = 3;
const DEFAULT_SESSION_TTL_SECONDS: u64 = 30 * 60;
const DEFAULT_LOCK_TTL_SECONDS: u64 = 5;

#[derive(Debug, Clone)]
pub struct SessionLimiterConfig {
    max_concurrent_sessions: usize,
    session_ttl_seconds: u64,
    lock_ttl_seconds: u64,
}

impl Default for SessionLimiterConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: DEFAULT_MAX_CONCURRENT_SESSIONS,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            lock_ttl_seconds: DEFAULT_LOCK_TTL_SECONDS,
        }
    }
}

impl SessionLimiterConfig {
    #[must_use]
    pub fn with_max_concurrent_sessions(mut self, max: usize) -> Self {
        self.max_concurrent_sessions = max;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: u64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_lock_ttl_seconds(mut self, seconds: u64) -> Self {
        self.lock_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn max_concurrent_sessions(&self) -> usize {
        self.max_concurrent_sessions
    }
}

/// Caps concurrent sessions per user against a shared store.
pub struct SessionLimiter {
    store: Arc<dyn SessionLimiterStore>,
    config: SessionLimiterConfig,
}

impl SessionLimiter {
    pub fn new(store: Arc<dyn SessionLimiterStore>, config: SessionLimiterConfig) -> Self {
        Self { store, config }
    }

    /// Record a new session for the user if the limit allows it.
    ///
    /// Lock contention and an exhausted limit both surface as
    /// [`AuthError::TooManySessions`]; the internal cause distinguishes
    /// them for callers that need to.
    ///
    /// # Errors
    ///
    /// [`AuthError::TooManySessions`] on contention or an exhausted limit;
    /// store failures pass through as [`AuthError::Store`].
    pub async fn create_session(&self, user_id: &str, session_id: &str) -> Result<(), AuthError> {
        let lock_key = lock_key(user_id);
        let lock_value = Uuid::new_v4().to_string();

        let acquired = self
            .store
            .acquire_lock(&lock_key, &lock_value, self.config.lock_ttl_seconds)
            .await?;
        if !acquired {
            return Err(AuthError::TooManySessions(
                SessionLimitCause::LockContention,
            ));
        }

        // Admission decision happens while the lock is held; the lock is
        // released on every exit path rather than left to its TTL.
        let decision = self.admit(user_id, session_id).await;

        if let Err(err) = self.store.release_lock(&lock_key, &lock_value).await {
            warn!(user_id, "failed to release session admission lock: {err}");
        }

        decision
    }

    async fn admit(&self, user_id: &str, session_id: &str) -> Result<(), AuthError> {
        let key = set_key(user_id);

        let count = self.store.count_members(&key).await?;
        if count >= self.config.max_concurrent_sessions {
            return Err(AuthError::TooManySessions(SessionLimitCause::LimitExceeded));
        }

        self.store
            .add_member(&key, session_id, self.config.session_ttl_seconds)
            .await?;

        Ok(())
    }

    /// Remove a session from the user's active set. Removing an absent
    /// member is not an error.
    ///
    /// # Errors
    ///
    /// Store failures pass through as [`AuthError::Store`].
    pub async fn delete_session(&self, user_id: &str, session_id: &str) -> Result<(), AuthError> {
        self.store
            .remove_member(&set_key(user_id), session_id)
            .await?;
        Ok(())
    }

    /// Current cardinality of the user's active-session set.
    ///
    /// Display only; the admission decision is made exclusively inside the
    /// locked section of [`SessionLimiter::create_session`].
    ///
    /// # Errors
    ///
    /// Store failures pass through as [`AuthError::Store`].
    pub async fn active_session_count(&self, user_id: &str) -> Result<usize, AuthError> {
        let count = self.store.count_members(&set_key(user_id)).await?;
        Ok(count)
    }
}

fn lock_key(user_id: &str) -> String {
    format!("session_create_lock:{user_id}")
}

fn set_key(user_id: &str) -> String {
    format!("user_sessions:{user_id}")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::memory::MemoryLimiterStore;
    use super::*;

    fn limiter(store: &Arc<MemoryLimiterStore>) -> SessionLimiter {
        let shared: Arc<dyn SessionLimiterStore> = store.clone();
        SessionLimiter::new(shared, SessionLimiterConfig::default())
    }

    #[tokio::test]
    async fn admits_up_to_the_limit() {
        let store = Arc::new(MemoryLimiterStore::new());
        let limiter = limiter(&store);

        for n in 0..3 {
            limiter
                .create_session("u1", &format!("session-{n}"))
                .await
                .expect("admit");
        }
        assert_eq!(limiter.active_session_count("u1").await.expect("count"), 3);
    }

    #[tokio::test]
    async fn fourth_session_is_rejected_without_mutation() {
        let store = Arc::new(MemoryLimiterStore::new());
        let limiter = limiter(&store);

        for n in 0..3 {
            limiter
                .create_session("u1", &format!("session-{n}"))
                .await
                .expect("admit");
        }

        let result = limiter.create_session("u1", "session-3").await;
        assert!(matches!(
            result,
            Err(AuthError::TooManySessions(SessionLimitCause::LimitExceeded))
        ));

        // Exactly the first three members, the rejected id absent.
        let members = store.members("user_sessions:u1").await;
        assert_eq!(members.len(), 3);
        assert!(!members.contains(&"session-3".to_string()));
    }

    #[tokio::test]
    async fn third_session_grows_the_set() {
        let store = Arc::new(MemoryLimiterStore::new());
        let limiter = limiter(&store);

        limiter.create_session("u1", "s-0").await.expect("admit");
        limiter.create_session("u1", "s-1").await.expect("admit");
        limiter.create_session("u1", "s-2").await.expect("admit");

        let members = store.members("user_sessions:u1").await;
        assert_eq!(members.len(), 3);
        assert!(members.contains(&"s-2".to_string()));
    }

    #[tokio::test]
    async fn contended_lock_reports_too_many_sessions() {
        let store = Arc::new(MemoryLimiterStore::new());
        let limiter = limiter(&store);

        // Hold the per-user lock from "another request".
        assert!(
            store
                .acquire_lock("session_create_lock:u1", "other-holder", 30)
                .await
                .expect("acquire")
        );

        let result = limiter.create_session("u1", "s-0").await;
        assert!(matches!(
            result,
            Err(AuthError::TooManySessions(
                SessionLimitCause::LockContention
            ))
        ));
        assert_eq!(store.members("user_sessions:u1").await.len(), 0);
    }

    #[tokio::test]
    async fn lock_is_released_on_rejection() {
        let store = Arc::new(MemoryLimiterStore::new());
        let limiter = limiter(&store);

        for n in 0..3 {
            limiter
                .create_session("u1", &format!("session-{n}"))
                .await
                .expect("admit");
        }
        let result = limiter.create_session("u1", "session-3").await;
        assert!(result.is_err());

        // A follow-up acquisition succeeds immediately, proving the lock was
        // not left to rot until its TTL.
        assert!(
            store
                .acquire_lock("session_create_lock:u1", "probe", 5)
                .await
                .expect("acquire")
        );
    }

    #[tokio::test]
    async fn limits_are_per_user() {
        let store = Arc::new(MemoryLimiterStore::new());
        let limiter = limiter(&store);

        for n in 0..3 {
            limiter
                .create_session("u1", &format!("session-{n}"))
                .await
                .expect("admit");
        }
        limiter.create_session("u2", "other").await.expect("admit");
        assert_eq!(limiter.active_session_count("u2").await.expect("count"), 1);
    }

    #[tokio::test]
    async fn delete_session_is_idempotent() {
        let store = Arc::new(MemoryLimiterStore::new());
        let limiter = limiter(&store);

        limiter.create_session("u1", "s-0").await.expect("admit");
        limiter.delete_session("u1", "s-0").await.expect("delete");
        limiter.delete_session("u1", "s-0").await.expect("delete");
        limiter.delete_session("u1", "missing").await.expect("delete");
        assert_eq!(limiter.active_session_count("u1").await.expect("count"), 0);
    }

    #[tokio::test]
    async fn freed_slot_can_be_reused() {
        let store = Arc::new(MemoryLimiterStore::new());
        let limiter = limiter(&store);

        for n in 0..3 {
            limiter
                .create_session("u1", &format!("session-{n}"))
                .await
                .expect("admit");
        }
        limiter.delete_session("u1", "session-0").await.expect("delete");
        limiter
            .create_session("u1", "session-3")
            .await
            .expect("admit after free");
    }
}
