use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::lockout::LockoutState;
use super::store::{SessionStore, StoreError, UserStore};
use crate::models::{normalize_email, select_evictions, Session, TerminationReason, User};

/// Process-local implementation of both stores.
///
/// Each map sits behind one mutex, which makes every operation atomic.
#[derive(Default)]
pub struct InMemoryStore {
    users: Mutex<HashMap<Uuid, User>>,
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn users(&self) -> Result<MutexGuard<'_, HashMap<Uuid, User>>, StoreError> {
        self.users
            .lock()
            .map_err(|_| StoreError::Other(anyhow::anyhow!("user store lock poisoned")))
    }

    fn sessions(&self) -> Result<MutexGuard<'_, HashMap<Uuid, Session>>, StoreError> {
        self.sessions
            .lock()
            .map_err(|_| StoreError::Other(anyhow::anyhow!("session store lock poisoned")))
    }

    /// Every session ever created for `user_id`, active or not.
    pub fn sessions_for(&self, user_id: Uuid) -> Result<Vec<Session>, StoreError> {
        Ok(self
            .sessions()?
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    fn find_user<P>(&self, predicate: P) -> Result<Option<User>, StoreError>
    where
        P: Fn(&User) -> bool,
    {
        Ok(self.users()?.values().find(|u| predicate(u)).cloned())
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let email = normalize_email(email);
        self.find_user(|u| u.email == email)
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users()?.get(&user_id).cloned())
    }

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<User>, StoreError> {
        self.find_user(|u| u.external_id.as_deref() == Some(external_id))
    }

    async fn find_by_email_verification_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<User>, StoreError> {
        self.find_user(|u| u.email_verification_hash.as_deref() == Some(token_hash))
    }

    async fn find_by_password_reset_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<User>, StoreError> {
        self.find_user(|u| u.password_reset_hash.as_deref() == Some(token_hash))
    }

    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        let mut users = self.users()?;
        let email = normalize_email(&user.email);
        let taken = users.values().any(|u| {
            u.email == email
                || (user.external_id.is_some() && u.external_id == user.external_id)
        });
        if taken || users.contains_key(&user.user_id) {
            return Err(StoreError::Duplicate);
        }

        let mut user = user.clone();
        user.email = email;
        users.insert(user.user_id, user);
        Ok(())
    }

    async fn save(&self, user: &User) -> Result<(), StoreError> {
        let mut users = self.users()?;

        let external_taken = user.external_id.is_some()
            && users
                .values()
                .any(|u| u.user_id != user.user_id && u.external_id == user.external_id);
        if external_taken {
            return Err(StoreError::Duplicate);
        }

        let existing = users
            .get_mut(&user.user_id)
            .ok_or_else(|| anyhow::anyhow!("User {} not found", user.user_id))?;

        let lockout = LockoutState::of(existing);
        let version = existing.lockout_version;

        *existing = user.clone();
        existing.failed_login_attempts = lockout.failed_attempts;
        existing.lock_until_utc = lockout.lock_until;
        existing.lockout_version = version;
        existing.updated_utc = Utc::now();
        Ok(())
    }

    async fn update_lockout(
        &self,
        user_id: Uuid,
        expected_version: i64,
        state: &LockoutState,
    ) -> Result<bool, StoreError> {
        let mut users = self.users()?;
        let Some(user) = users.get_mut(&user_id) else {
            return Ok(false);
        };
        if user.lockout_version != expected_version {
            return Ok(false);
        }

        user.failed_login_attempts = state.failed_attempts;
        user.lock_until_utc = state.lock_until;
        user.lockout_version += 1;
        Ok(true)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.users().map(|_| ())
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn insert_with_cap(
        &self,
        session: &Session,
        cap: usize,
    ) -> Result<Vec<Uuid>, StoreError> {
        let mut sessions = self.sessions()?;
        let now = Utc::now();

        let active: Vec<Session> = sessions
            .values()
            .filter(|s| s.user_id == session.user_id && s.is_valid(now))
            .cloned()
            .collect();

        let evicted = select_evictions(&active, cap);
        for session_id in &evicted {
            if let Some(s) = sessions.get_mut(session_id) {
                s.terminate(TerminationReason::SessionLimit, now);
            }
        }

        sessions.insert(session.session_id, session.clone());
        Ok(evicted)
    }

    async fn touch_active_by_hash(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        let mut sessions = self.sessions()?;
        let found = sessions
            .values_mut()
            .find(|s| s.refresh_token_hash == token_hash && s.is_valid(now));

        Ok(found.map(|s| {
            s.last_activity_utc = now;
            s.clone()
        }))
    }

    async fn rotate_hash(
        &self,
        old_hash: &str,
        new_hash: &str,
        new_expires_utc: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        let mut sessions = self.sessions()?;
        let found = sessions
            .values_mut()
            .find(|s| s.refresh_token_hash == old_hash && s.is_valid(now));

        Ok(found.map(|s| {
            s.refresh_token_hash = new_hash.to_string();
            s.expires_utc = new_expires_utc;
            s.last_activity_utc = now;
            s.clone()
        }))
    }

    async fn deactivate_by_hash(
        &self,
        token_hash: &str,
        reason: TerminationReason,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut sessions = self.sessions()?;
        match sessions
            .values_mut()
            .find(|s| s.refresh_token_hash == token_hash && s.is_active)
        {
            Some(s) => {
                s.terminate(reason, now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn deactivate_all_for_user(
        &self,
        user_id: Uuid,
        reason: TerminationReason,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut sessions = self.sessions()?;
        let mut count = 0;
        for s in sessions
            .values_mut()
            .filter(|s| s.user_id == user_id && s.is_active)
        {
            s.terminate(reason, now);
            count += 1;
        }
        Ok(count)
    }

    async fn list_active(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError> {
        let mut active: Vec<Session> = self
            .sessions()?
            .values()
            .filter(|s| s.user_id == user_id && s.is_valid(now))
            .cloned()
            .collect();
        active.sort_by(|a, b| b.last_activity_utc.cmp(&a.last_activity_utc));
        Ok(active)
    }
}
