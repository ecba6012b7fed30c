//! Postgres-backed repository.
//!
//! Timestamps are stored as unix seconds (`BIGINT`) so rows compare on the
//! same scale as signed claims. Blocklist entries key on a token digest;
//! raw refresh tokens never reach the database.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::Instrument;

use super::models::{AuthState, SecurityEvent, Session, User};
use super::now_unix;
use super::repository::Repository;
use super::token_hash::{self, token_digest};

/// [`Repository`] over a Postgres pool.
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn query_span(operation: &'static str, statement: &'static str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn user_from_row(row: &PgRow) -> User {
    User {
        id: row.get("id"),
        external_id: row.get("external_id"),
        provider: row.get("provider"),
        email: row.get("email"),
        display_name: row.get("display_name"),
        avatar_url: row.get("avatar_url"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        last_login_at: row.get("last_login_at"),
    }
}

fn session_from_row(row: &PgRow) -> Session {
    Session {
        id: row.get("id"),
        user_id: row.get("user_id"),
        refresh_token_hash: row.get("refresh_token_hash"),
        refresh_token_selector: row.get("refresh_token_selector"),
        salt: row.get("salt"),
        device_id: row.get("device_id"),
        ip_address: row.get("ip_address"),
        user_agent: row.get("user_agent"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
        last_used_at: row.get("last_used_at"),
        revoked: row.get("revoked"),
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn create_user(&self, user: &User) -> Result<()> {
        let query = r"
            INSERT INTO users
                (id, external_id, provider, email, display_name, avatar_url,
                 created_at, updated_at, last_login_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ";
        sqlx::query(query)
            .bind(&user.id)
            .bind(&user.external_id)
            .bind(&user.provider)
            .bind(&user.email)
            .bind(&user.display_name)
            .bind(&user.avatar_url)
            .bind(user.created_at)
            .bind(user.updated_at)
            .bind(user.last_login_at)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to insert user")?;
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let query = "SELECT * FROM users WHERE id = $1";
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup user")?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn get_user_by_external_id(
        &self,
        external_id: &str,
        provider: &str,
    ) -> Result<Option<User>> {
        let query = "SELECT * FROM users WHERE external_id = $1 AND provider = $2";
        let row = sqlx::query(query)
            .bind(external_id)
            .bind(provider)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup user by external id")?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn update_last_login(&self, user_id: &str, now: i64) -> Result<()> {
        let query = "UPDATE users SET last_login_at = $2, updated_at = $2 WHERE id = $1";
        sqlx::query(query)
            .bind(user_id)
            .bind(now)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update last login")?;
        Ok(())
    }

    async fn get_user_organizations(&self, user_id: &str) -> Result<Vec<String>> {
        let query = "SELECT organization_id FROM organization_members WHERE user_id = $1";
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to list user organizations")?;
        Ok(rows.iter().map(|row| row.get("organization_id")).collect())
    }

    async fn create_session(&self, session: &Session) -> Result<()> {
        let query = r"
            INSERT INTO sessions
                (id, user_id, refresh_token_hash, refresh_token_selector, salt,
                 device_id, ip_address, user_agent, expires_at, created_at,
                 last_used_at, revoked)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ";
        sqlx::query(query)
            .bind(&session.id)
            .bind(&session.user_id)
            .bind(&session.refresh_token_hash)
            .bind(&session.refresh_token_selector)
            .bind(&session.salt)
            .bind(&session.device_id)
            .bind(&session.ip_address)
            .bind(&session.user_agent)
            .bind(session.expires_at)
            .bind(session.created_at)
            .bind(session.last_used_at)
            .bind(session.revoked)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to insert session")?;
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let query = "SELECT * FROM sessions WHERE id = $1";
        let row = sqlx::query(query)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup session")?;
        Ok(row.as_ref().map(session_from_row))
    }

    async fn get_session_by_selector(&self, selector: &str) -> Result<Option<Session>> {
        // The selector column is indexed; this is the O(1) lookup half of
        // the selector/verifier scheme.
        let query = "SELECT * FROM sessions WHERE refresh_token_selector = $1 AND NOT revoked";
        let row = sqlx::query(query)
            .bind(selector)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup session by selector")?;
        Ok(row.as_ref().map(session_from_row))
    }

    async fn update_session(&self, session: &Session) -> Result<()> {
        let query = r"
            UPDATE sessions
            SET ip_address = $2, user_agent = $3, expires_at = $4,
                last_used_at = $5, revoked = $6
            WHERE id = $1
        ";
        sqlx::query(query)
            .bind(&session.id)
            .bind(&session.ip_address)
            .bind(&session.user_agent)
            .bind(session.expires_at)
            .bind(session.last_used_at)
            .bind(session.revoked)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update session")?;
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        let query = "DELETE FROM sessions WHERE id = $1";
        sqlx::query(query)
            .bind(session_id)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to delete session")?;
        Ok(())
    }

    async fn list_user_sessions(&self, user_id: &str) -> Result<Vec<Session>> {
        let query = "SELECT * FROM sessions WHERE user_id = $1 ORDER BY created_at";
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to list user sessions")?;
        Ok(rows.iter().map(session_from_row).collect())
    }

    async fn delete_user_sessions(&self, user_id: &str, except_session_id: &str) -> Result<()> {
        let query = "DELETE FROM sessions WHERE user_id = $1 AND id <> $2";
        sqlx::query(query)
            .bind(user_id)
            .bind(except_session_id)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to delete user sessions")?;
        Ok(())
    }

    async fn store_auth_state(&self, state: &AuthState) -> Result<()> {
        let query = r"
            INSERT INTO auth_states
                (state, provider, redirect_url, code_challenge, client_ip,
                 user_agent, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ";
        sqlx::query(query)
            .bind(&state.state)
            .bind(&state.provider)
            .bind(&state.redirect_url)
            .bind(&state.code_challenge)
            .bind(&state.client_ip)
            .bind(&state.user_agent)
            .bind(state.expires_at)
            .bind(state.created_at)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to store auth state")?;
        Ok(())
    }

    async fn get_auth_state(&self, state: &str) -> Result<Option<AuthState>> {
        let query = "SELECT * FROM auth_states WHERE state = $1";
        let row = sqlx::query(query)
            .bind(state)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup auth state")?;
        Ok(row.map(|row| AuthState {
            state: row.get("state"),
            provider: row.get("provider"),
            redirect_url: row.get("redirect_url"),
            code_challenge: row.get("code_challenge"),
            client_ip: row.get("client_ip"),
            user_agent: row.get("user_agent"),
            expires_at: row.get("expires_at"),
            created_at: row.get("created_at"),
        }))
    }

    async fn delete_auth_state(&self, state: &str) -> Result<()> {
        let query = "DELETE FROM auth_states WHERE state = $1";
        sqlx::query(query)
            .bind(state)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to delete auth state")?;
        Ok(())
    }

    async fn blacklist_refresh_token(&self, refresh_token: &str, expires_at: i64) -> Result<()> {
        let query = r"
            INSERT INTO refresh_token_blacklist (token_digest, expires_at)
            VALUES ($1, $2)
            ON CONFLICT (token_digest) DO UPDATE SET expires_at = EXCLUDED.expires_at
        ";
        sqlx::query(query)
            .bind(token_digest(refresh_token))
            .bind(expires_at)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to blacklist refresh token")?;
        Ok(())
    }

    async fn is_refresh_token_blacklisted(&self, refresh_token: &str) -> Result<bool> {
        let query = r"
            SELECT EXISTS(
                SELECT 1 FROM refresh_token_blacklist
                WHERE token_digest = $1 AND expires_at > $2
            ) AS blacklisted
        ";
        let row = sqlx::query(query)
            .bind(token_digest(refresh_token))
            .bind(now_unix())
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to check refresh token blacklist")?;
        Ok(row.get("blacklisted"))
    }

    async fn block_session(&self, session_id: &str, expires_at: i64) -> Result<()> {
        let query = r"
            INSERT INTO blocked_sessions (session_id, expires_at)
            VALUES ($1, $2)
            ON CONFLICT (session_id) DO UPDATE SET expires_at = EXCLUDED.expires_at
        ";
        sqlx::query(query)
            .bind(session_id)
            .bind(expires_at)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to block session")?;
        Ok(())
    }

    async fn is_session_blocked(&self, session_id: &str) -> Result<bool> {
        let query = r"
            SELECT EXISTS(
                SELECT 1 FROM blocked_sessions
                WHERE session_id = $1 AND expires_at > $2
            ) AS blocked
        ";
        let row = sqlx::query(query)
            .bind(session_id)
            .bind(now_unix())
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to check session blocklist")?;
        Ok(row.get("blocked"))
    }

    fn hash_token(&self, token: &str) -> Result<(String, String)> {
        token_hash::hash_token(token)
    }

    fn verify_token(&self, plain: &str, hashed: &str, salt: &str) -> bool {
        token_hash::verify_token(plain, hashed, salt)
    }

    async fn create_security_event(&self, event: &SecurityEvent) -> Result<()> {
        let query = r"
            INSERT INTO security_events
                (id, user_id, event_type, description, ip_address, user_agent,
                 level, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ";
        sqlx::query(query)
            .bind(&event.id)
            .bind(&event.user_id)
            .bind(&event.event_type)
            .bind(&event.description)
            .bind(&event.ip_address)
            .bind(&event.user_agent)
            .bind(event.level.as_str())
            .bind(event.created_at)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to insert security event")?;
        Ok(())
    }
}
