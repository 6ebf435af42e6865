//! Persistence seams for principals and sessions.
//!
//! `Database` implements both traits over Postgres; `InMemoryStore` backs
//! tests and local runs without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::lockout::LockoutState;
use crate::models::{Session, TerminationReason, User};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record already exists")]
    Duplicate,

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate,
            _ => StoreError::Database(err),
        }
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Case-insensitive lookup. Includes soft-deleted users.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError>;

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_email_verification_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<User>, StoreError>;

    async fn find_by_password_reset_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<User>, StoreError>;

    /// Fails with `Duplicate` when the email or external id is taken.
    async fn insert(&self, user: &User) -> Result<(), StoreError>;

    /// Persist profile and credential fields.
    ///
    /// Lockout fields are owned by `update_lockout` and are never written
    /// here, so a concurrent failed login cannot be overwritten.
    async fn save(&self, user: &User) -> Result<(), StoreError>;

    /// Compare-and-swap on `lockout_version`. Returns `false` when another
    /// writer got there first.
    async fn update_lockout(
        &self,
        user_id: Uuid,
        expected_version: i64,
        state: &LockoutState,
    ) -> Result<bool, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert `session`, first terminating the least recently active sessions
    /// of the same user so that at most `cap` remain valid.
    ///
    /// Atomic per user. Returns the ids of the evicted sessions.
    async fn insert_with_cap(&self, session: &Session, cap: usize)
        -> Result<Vec<Uuid>, StoreError>;

    /// Find the valid session holding `token_hash` and bump its activity.
    async fn touch_active_by_hash(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError>;

    /// Swap `old_hash` for `new_hash` on a valid session. At most one caller
    /// can succeed for a given `old_hash`.
    async fn rotate_hash(
        &self,
        old_hash: &str,
        new_hash: &str,
        new_expires_utc: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError>;

    async fn deactivate_by_hash(
        &self,
        token_hash: &str,
        reason: TerminationReason,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Returns the number of sessions terminated.
    async fn deactivate_all_for_user(
        &self,
        user_id: Uuid,
        reason: TerminationReason,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Valid sessions, most recently active first.
    async fn list_active(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError>;
}
