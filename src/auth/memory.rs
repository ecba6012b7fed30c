//! In-memory implementations of the store capabilities.
//!
//! Single-process stand-ins for the shared stores: good enough for tests
//! and single-node deployments. Expiry is enforced lazily on access, the
//! same way the persistent backends treat their TTL columns.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::models::{AuthState, SecurityEvent, Session, User};
use super::now_unix;
use super::repository::{Repository, SessionLimiterStore};
use super::token_hash::{self, token_digest};

#[derive(Default)]
struct MemoryState {
    users: HashMap<String, User>,
    user_orgs: HashMap<String, Vec<String>>,
    sessions: HashMap<String, Session>,
    auth_states: HashMap<String, AuthState>,
    // Token digest -> unix expiry. Raw refresh tokens are never stored.
    blacklisted_tokens: HashMap<String, i64>,
    blocked_sessions: HashMap<String, i64>,
    events: Vec<SecurityEvent>,
}

/// In-memory [`Repository`].
#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<MemoryState>,
}

impl MemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded security events, oldest first.
    pub async fn security_events(&self) -> Vec<SecurityEvent> {
        self.state.lock().await.events.clone()
    }

    /// Set the organization memberships returned for a user.
    pub async fn set_user_organizations(&self, user_id: &str, org_ids: Vec<String>) {
        self.state
            .lock()
            .await
            .user_orgs
            .insert(user_id.to_string(), org_ids);
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_user(&self, user: &User) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.users.contains_key(&user.id) {
            bail!("user {} already exists", user.id);
        }
        state.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        Ok(self.state.lock().await.users.get(user_id).cloned())
    }

    async fn get_user_by_external_id(
        &self,
        external_id: &str,
        provider: &str,
    ) -> Result<Option<User>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|u| u.external_id == external_id && u.provider == provider)
            .cloned())
    }

    async fn update_last_login(&self, user_id: &str, now: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(user_id)
            .ok_or_else(|| anyhow!("user {user_id} not found"))?;
        user.last_login_at = now;
        user.updated_at = now;
        Ok(())
    }

    async fn get_user_organizations(&self, user_id: &str) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state.user_orgs.get(user_id).cloned().unwrap_or_default())
    }

    async fn create_session(&self, session: &Session) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.sessions.contains_key(&session.id) {
            bail!("session {} already exists", session.id);
        }
        state.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.state.lock().await.sessions.get(session_id).cloned())
    }

    async fn get_session_by_selector(&self, selector: &str) -> Result<Option<Session>> {
        let state = self.state.lock().await;
        Ok(state
            .sessions
            .values()
            .find(|s| s.refresh_token_selector == selector)
            .cloned())
    }

    async fn update_session(&self, session: &Session) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.sessions.contains_key(&session.id) {
            bail!("session {} not found", session.id);
        }
        state.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.state.lock().await.sessions.remove(session_id);
        Ok(())
    }

    async fn list_user_sessions(&self, user_id: &str) -> Result<Vec<Session>> {
        let state = self.state.lock().await;
        let mut sessions: Vec<Session> = state
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    async fn delete_user_sessions(&self, user_id: &str, except_session_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .sessions
            .retain(|id, s| s.user_id != user_id || id == except_session_id);
        Ok(())
    }

    async fn store_auth_state(&self, auth_state: &AuthState) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .auth_states
            .insert(auth_state.state.clone(), auth_state.clone());
        Ok(())
    }

    async fn get_auth_state(&self, state_value: &str) -> Result<Option<AuthState>> {
        Ok(self
            .state
            .lock()
            .await
            .auth_states
            .get(state_value)
            .cloned())
    }

    async fn delete_auth_state(&self, state_value: &str) -> Result<()> {
        self.state.lock().await.auth_states.remove(state_value);
        Ok(())
    }

    async fn blacklist_refresh_token(&self, refresh_token: &str, expires_at: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .blacklisted_tokens
            .insert(token_digest(refresh_token), expires_at);
        Ok(())
    }

    async fn is_refresh_token_blacklisted(&self, refresh_token: &str) -> Result<bool> {
        let now = now_unix();
        let mut state = self.state.lock().await;
        state.blacklisted_tokens.retain(|_, expiry| *expiry > now);
        Ok(state
            .blacklisted_tokens
            .contains_key(&token_digest(refresh_token)))
    }

    async fn block_session(&self, session_id: &str, expires_at: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .blocked_sessions
            .insert(session_id.to_string(), expires_at);
        Ok(())
    }

    async fn is_session_blocked(&self, session_id: &str) -> Result<bool> {
        let now = now_unix();
        let mut state = self.state.lock().await;
        state.blocked_sessions.retain(|_, expiry| *expiry > now);
        Ok(state.blocked_sessions.contains_key(session_id))
    }

    fn hash_token(&self, token: &str) -> Result<(String, String)> {
        token_hash::hash_token(token)
    }

    fn verify_token(&self, plain: &str, hashed: &str, salt: &str) -> bool {
        token_hash::verify_token(plain, hashed, salt)
    }

    async fn create_security_event(&self, event: &SecurityEvent) -> Result<()> {
        self.state.lock().await.events.push(event.clone());
        Ok(())
    }
}

struct LockEntry {
    value: String,
    expires_at: Instant,
}

/// In-memory [`SessionLimiterStore`]: a TTL lock table plus expiring
/// per-key sets.
#[derive(Default)]
pub struct MemoryLimiterStore {
    locks: Mutex<HashMap<String, LockEntry>>,
    sets: Mutex<HashMap<String, HashMap<String, Instant>>>,
}

impl MemoryLimiterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Live members of a set, unordered.
    pub async fn members(&self, key: &str) -> Vec<String> {
        let now = Instant::now();
        let mut sets = self.sets.lock().await;
        let Some(set) = sets.get_mut(key) else {
            return Vec::new();
        };
        set.retain(|_, expiry| *expiry > now);
        set.keys().cloned().collect()
    }
}

#[async_trait]
impl SessionLimiterStore for MemoryLimiterStore {
    async fn acquire_lock(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<bool> {
        let now = Instant::now();
        let mut locks = self.locks.lock().await;
        locks.retain(|_, entry| entry.expires_at > now);

        if locks.contains_key(key) {
            return Ok(false);
        }

        locks.insert(
            key.to_string(),
            LockEntry {
                value: value.to_string(),
                expires_at: now + Duration::from_secs(ttl_seconds),
            },
        );
        Ok(true)
    }

    async fn release_lock(&self, key: &str, value: &str) -> Result<()> {
        let mut locks = self.locks.lock().await;
        match locks.get(key) {
            Some(entry) if entry.value == value => {
                locks.remove(key);
                Ok(())
            }
            _ => bail!("lock not held or value mismatch"),
        }
    }

    async fn add_member(&self, key: &str, member: &str, ttl_seconds: u64) -> Result<()> {
        let mut sets = self.sets.lock().await;
        sets.entry(key.to_string()).or_default().insert(
            member.to_string(),
            Instant::now() + Duration::from_secs(ttl_seconds),
        );
        Ok(())
    }

    async fn remove_member(&self, key: &str, member: &str) -> Result<()> {
        let mut sets = self.sets.lock().await;
        if let Some(set) = sets.get_mut(key) {
            set.remove(member);
            if set.is_empty() {
                sets.remove(key);
            }
        }
        Ok(())
    }

    async fn count_members(&self, key: &str) -> Result<usize> {
        let now = Instant::now();
        let mut sets = self.sets.lock().await;
        let Some(set) = sets.get_mut(key) else {
            return Ok(0);
        };
        set.retain(|_, expiry| *expiry > now);
        Ok(set.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_is_exclusive_until_released() {
        let store = MemoryLimiterStore::new();

        assert!(store.acquire_lock("lock:u1", "a", 5).await.expect("acquire"));
        assert!(!store.acquire_lock("lock:u1", "b", 5).await.expect("acquire"));

        store.release_lock("lock:u1", "a").await.expect("release");
        assert!(store.acquire_lock("lock:u1", "b", 5).await.expect("acquire"));
    }

    #[tokio::test]
    async fn release_requires_matching_value() {
        let store = MemoryLimiterStore::new();
        assert!(store.acquire_lock("lock:u1", "a", 5).await.expect("acquire"));
        assert!(store.release_lock("lock:u1", "other").await.is_err());
        // The original holder can still release.
        store.release_lock("lock:u1", "a").await.expect("release");
        assert!(store.release_lock("lock:u1", "a").await.is_err());
    }

    #[tokio::test]
    async fn expired_lock_can_be_reacquired() {
        let store = MemoryLimiterStore::new();
        assert!(store.acquire_lock("lock:u1", "a", 0).await.expect("acquire"));
        assert!(store.acquire_lock("lock:u1", "b", 5).await.expect("acquire"));
    }

    #[tokio::test]
    async fn set_members_expire_lazily() {
        let store = MemoryLimiterStore::new();
        store.add_member("k", "live", 60).await.expect("add");
        store.add_member("k", "dead", 0).await.expect("add");

        assert_eq!(store.count_members("k").await.expect("count"), 1);
        assert_eq!(store.members("k").await, vec!["live".to_string()]);
    }

    #[tokio::test]
    async fn remove_member_is_idempotent() {
        let store = MemoryLimiterStore::new();
        store.add_member("k", "m", 60).await.expect("add");
        store.remove_member("k", "m").await.expect("remove");
        store.remove_member("k", "m").await.expect("remove");
        store.remove_member("other", "m").await.expect("remove");
        assert_eq!(store.count_members("k").await.expect("count"), 0);
    }

    #[tokio::test]
    async fn blacklist_respects_expiry() {
        let repo = MemoryRepository::new();
        let now = now_unix();

        repo.blacklist_refresh_token("sel.ver", now + 60)
            .await
            .expect("blacklist");
        repo.blacklist_refresh_token("old.token", now - 1)
            .await
            .expect("blacklist");

        assert!(
            repo.is_refresh_token_blacklisted("sel.ver")
                .await
                .expect("check")
        );
        assert!(
            !repo
                .is_refresh_token_blacklisted("old.token")
                .await
                .expect("check")
        );
    }

    #[tokio::test]
    async fn delete_user_sessions_keeps_exception() {
        let repo = MemoryRepository::new();
        for id in ["s1", "s2", "s3"] {
            let session = Session {
                id: id.to_string(),
                user_id: "u1".to_string(),
                refresh_token_hash: "h".repeat(64),
                refresh_token_selector: format!("selector-{id}"),
                salt: "s".repeat(64),
                device_id: None,
                ip_address: String::new(),
                user_agent: String::new(),
                expires_at: now_unix() + 60,
                created_at: now_unix(),
                last_used_at: now_unix(),
                revoked: false,
            };
            repo.create_session(&session).await.expect("create");
        }

        repo.delete_user_sessions("u1", "s2").await.expect("delete");

        let remaining = repo.list_user_sessions("u1").await.expect("list");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "s2");
    }
}
