//! Bounded per-user registry of refresh-token sessions.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use super::store::{SessionStore, StoreError};
use crate::models::{ClientInfo, Session, TerminationReason};
use crate::utils::hash_token;

/// Enough of a token hash to correlate log lines.
fn hash_prefix(hash: &str) -> &str {
    &hash[..hash.len().min(16)]
}

#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn SessionStore>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn SessionStore>, max_sessions: usize) -> Self {
        Self {
            store,
            max_sessions: max_sessions.max(1),
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Record a new session for `refresh_token`, evicting the least recently
    /// active sessions beyond the cap.
    pub async fn create_session(
        &self,
        user_id: Uuid,
        refresh_token: &str,
        client: &ClientInfo,
        expires_utc: DateTime<Utc>,
    ) -> Result<Session, StoreError> {
        let session = Session::new(user_id, hash_token(refresh_token), client, expires_utc);
        let evicted = self
            .store
            .insert_with_cap(&session, self.max_sessions)
            .await?;

        for session_id in &evicted {
            tracing::info!(
                user_id = %user_id,
                session_id = %session_id,
                reason = TerminationReason::SessionLimit.as_str(),
                "Session evicted"
            );
        }
        tracing::debug!(
            user_id = %user_id,
            session_id = %session.session_id,
            device = session.device_type_code.as_str(),
            "Session created"
        );
        Ok(session)
    }

    /// The valid session holding `refresh_token`, with its activity bumped.
    /// Activity does not extend the absolute expiry.
    pub async fn validate_and_touch(
        &self,
        refresh_token: &str,
    ) -> Result<Option<Session>, StoreError> {
        self.store
            .touch_active_by_hash(&hash_token(refresh_token), Utc::now())
            .await
    }

    /// Swap the session's token hash from `old_refresh_token` to
    /// `new_refresh_token`. `None` means no valid session held the old token,
    /// including when a concurrent rotation already consumed it.
    pub async fn rotate(
        &self,
        old_refresh_token: &str,
        new_refresh_token: &str,
        new_expires_utc: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        let old_hash = hash_token(old_refresh_token);
        let rotated = self
            .store
            .rotate_hash(
                &old_hash,
                &hash_token(new_refresh_token),
                new_expires_utc,
                Utc::now(),
            )
            .await?;

        if rotated.is_none() {
            tracing::warn!(
                token_hash = hash_prefix(&old_hash),
                "Refresh token rotation matched no active session"
            );
        }
        Ok(rotated)
    }

    pub async fn invalidate(&self, refresh_token: &str) -> Result<bool, StoreError> {
        self.store
            .deactivate_by_hash(
                &hash_token(refresh_token),
                TerminationReason::UserLogout,
                Utc::now(),
            )
            .await
    }

    pub async fn invalidate_all(
        &self,
        user_id: Uuid,
        reason: TerminationReason,
    ) -> Result<u64, StoreError> {
        let count = self
            .store
            .deactivate_all_for_user(user_id, reason, Utc::now())
            .await?;
        tracing::info!(user_id = %user_id, count, reason = reason.as_str(), "Sessions invalidated");
        Ok(count)
    }

    pub async fn list_active(&self, user_id: Uuid) -> Result<Vec<Session>, StoreError> {
        self.store.list_active(user_id, Utc::now()).await
    }
}
