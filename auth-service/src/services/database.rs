//! PostgreSQL implementation of the user and session stores.
//!
//! Uses sqlx runtime queries; schema lives in `migrations/`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use uuid::Uuid;

use super::lockout::LockoutState;
use super::store::{SessionStore, StoreError, UserStore};
use crate::models::{normalize_email, select_evictions, Session, TerminationReason, User};

const USER_COLUMNS: &str = r#"
    user_id, email, password_hash, display_name, avatar_url, external_id, role_code,
    email_verified, is_deleted, deleted_utc, failed_login_attempts, lock_until_utc,
    lockout_version, email_verification_hash, email_verification_expires_utc,
    password_reset_hash, password_reset_expires_utc, last_login_utc, created_utc, updated_utc
"#;

const SESSION_COLUMNS: &str = r#"
    session_id, user_id, refresh_token_hash, user_agent, ip_address, device_type_code,
    client_name, is_active, last_activity_utc, expires_utc, terminated_utc,
    termination_reason_code, created_utc
"#;

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database wrapper from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn find_user_where(
        &self,
        predicate: &str,
        value: &str,
    ) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {predicate}");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?)
    }
}

#[async_trait]
impl UserStore for Database {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.find_user_where("LOWER(email) = $1", &normalize_email(email))
            .await
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = $1");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<User>, StoreError> {
        self.find_user_where("external_id = $1", external_id).await
    }

    async fn find_by_email_verification_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<User>, StoreError> {
        self.find_user_where("email_verification_hash = $1", token_hash)
            .await
    }

    async fn find_by_password_reset_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<User>, StoreError> {
        self.find_user_where("password_reset_hash = $1", token_hash)
            .await
    }

    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (
                user_id, email, password_hash, display_name, avatar_url, external_id, role_code,
                email_verified, is_deleted, deleted_utc, failed_login_attempts, lock_until_utc,
                lockout_version, email_verification_hash, email_verification_expires_utc,
                password_reset_hash, password_reset_expires_utc, last_login_utc, created_utc, updated_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            "#,
        )
        .bind(user.user_id)
        .bind(normalize_email(&user.email))
        .bind(&user.password_hash)
        .bind(&user.display_name)
        .bind(&user.avatar_url)
        .bind(&user.external_id)
        .bind(&user.role_code)
        .bind(user.email_verified)
        .bind(user.is_deleted)
        .bind(user.deleted_utc)
        .bind(user.failed_login_attempts)
        .bind(user.lock_until_utc)
        .bind(user.lockout_version)
        .bind(&user.email_verification_hash)
        .bind(user.email_verification_expires_utc)
        .bind(&user.password_reset_hash)
        .bind(user.password_reset_expires_utc)
        .bind(user.last_login_utc)
        .bind(user.created_utc)
        .bind(user.updated_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save(&self, user: &User) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users SET
                email = $2,
                password_hash = $3,
                display_name = $4,
                avatar_url = $5,
                external_id = $6,
                role_code = $7,
                email_verified = $8,
                is_deleted = $9,
                deleted_utc = $10,
                email_verification_hash = $11,
                email_verification_expires_utc = $12,
                password_reset_hash = $13,
                password_reset_expires_utc = $14,
                last_login_utc = $15,
                updated_utc = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user.user_id)
        .bind(normalize_email(&user.email))
        .bind(&user.password_hash)
        .bind(&user.display_name)
        .bind(&user.avatar_url)
        .bind(&user.external_id)
        .bind(&user.role_code)
        .bind(user.email_verified)
        .bind(user.is_deleted)
        .bind(user.deleted_utc)
        .bind(&user.email_verification_hash)
        .bind(user.email_verification_expires_utc)
        .bind(&user.password_reset_hash)
        .bind(user.password_reset_expires_utc)
        .bind(user.last_login_utc)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Other(anyhow::anyhow!(
                "User {} not found",
                user.user_id
            )));
        }
        Ok(())
    }

    async fn update_lockout(
        &self,
        user_id: Uuid,
        expected_version: i64,
        state: &LockoutState,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET failed_login_attempts = $3,
                lock_until_utc = $4,
                lockout_version = lockout_version + 1
            WHERE user_id = $1 AND lockout_version = $2
            "#,
        )
        .bind(user_id)
        .bind(expected_version)
        .bind(state.failed_attempts)
        .bind(state.lock_until)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Health check - ping the database.
    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(|e| {
            tracing::error!("Database health check failed: {}", e);
            StoreError::from(e)
        })?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for Database {
    async fn insert_with_cap(
        &self,
        session: &Session,
        cap: usize,
    ) -> Result<Vec<Uuid>, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Serializes concurrent logins of the same user on the user row.
        sqlx::query("SELECT user_id FROM users WHERE user_id = $1 FOR UPDATE")
            .bind(session.user_id)
            .execute(&mut *tx)
            .await?;

        let sql = format!(
            r#"
            SELECT {SESSION_COLUMNS} FROM sessions
            WHERE user_id = $1 AND is_active AND expires_utc > NOW()
            ORDER BY last_activity_utc ASC, created_utc ASC
            "#
        );
        let active = sqlx::query_as::<_, Session>(&sql)
            .bind(session.user_id)
            .fetch_all(&mut *tx)
            .await?;

        let evicted = select_evictions(&active, cap);
        if !evicted.is_empty() {
            sqlx::query(
                r#"
                UPDATE sessions
                SET is_active = FALSE, terminated_utc = NOW(), termination_reason_code = $2
                WHERE session_id = ANY($1)
                "#,
            )
            .bind(&evicted)
            .bind(TerminationReason::SessionLimit.as_str())
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO sessions (
                session_id, user_id, refresh_token_hash, user_agent, ip_address, device_type_code,
                client_name, is_active, last_activity_utc, expires_utc, terminated_utc,
                termination_reason_code, created_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(session.session_id)
        .bind(session.user_id)
        .bind(&session.refresh_token_hash)
        .bind(&session.user_agent)
        .bind(&session.ip_address)
        .bind(&session.device_type_code)
        .bind(&session.client_name)
        .bind(session.is_active)
        .bind(session.last_activity_utc)
        .bind(session.expires_utc)
        .bind(session.terminated_utc)
        .bind(&session.termination_reason_code)
        .bind(session.created_utc)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(evicted)
    }

    async fn touch_active_by_hash(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        let sql = format!(
            r#"
            UPDATE sessions SET last_activity_utc = $2
            WHERE refresh_token_hash = $1 AND is_active AND expires_utc > $2
            RETURNING {SESSION_COLUMNS}
            "#
        );
        Ok(sqlx::query_as::<_, Session>(&sql)
            .bind(token_hash)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn rotate_hash(
        &self,
        old_hash: &str,
        new_hash: &str,
        new_expires_utc: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        // Single conditional UPDATE: a second caller with the same old hash
        // matches zero rows.
        let sql = format!(
            r#"
            UPDATE sessions
            SET refresh_token_hash = $2, expires_utc = $3, last_activity_utc = $4
            WHERE refresh_token_hash = $1 AND is_active AND expires_utc > $4
            RETURNING {SESSION_COLUMNS}
            "#
        );
        Ok(sqlx::query_as::<_, Session>(&sql)
            .bind(old_hash)
            .bind(new_hash)
            .bind(new_expires_utc)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn deactivate_by_hash(
        &self,
        token_hash: &str,
        reason: TerminationReason,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET is_active = FALSE, terminated_utc = $3, termination_reason_code = $2
            WHERE refresh_token_hash = $1 AND is_active
            "#,
        )
        .bind(token_hash)
        .bind(reason.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn deactivate_all_for_user(
        &self,
        user_id: Uuid,
        reason: TerminationReason,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET is_active = FALSE, terminated_utc = $3, termination_reason_code = $2
            WHERE user_id = $1 AND is_active
            "#,
        )
        .bind(user_id)
        .bind(reason.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list_active(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError> {
        let sql = format!(
            r#"
            SELECT {SESSION_COLUMNS} FROM sessions
            WHERE user_id = $1 AND is_active AND expires_utc > $2
            ORDER BY last_activity_utc DESC
            "#
        );
        Ok(sqlx::query_as::<_, Session>(&sql)
            .bind(user_id)
            .bind(now)
            .fetch_all(&self.pool)
            .await?)
    }
}
