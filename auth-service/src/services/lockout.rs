//! Failed-login counter with a time-boxed lock.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use super::store::{StoreError, UserStore};
use crate::config::LockoutConfig;
use crate::models::User;

/// Attempts to win the version race before giving up.
const MAX_CAS_RETRIES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub max_attempts: u32,
    pub lock_duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lock_duration: Duration::hours(2),
        }
    }
}

impl From<&LockoutConfig> for LockoutPolicy {
    fn from(config: &LockoutConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            lock_duration: Duration::minutes(config.lock_duration_minutes),
        }
    }
}

/// Persisted lockout fields of a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockoutState {
    pub failed_attempts: i32,
    pub lock_until: Option<DateTime<Utc>>,
}

impl LockoutState {
    pub fn of(user: &User) -> Self {
        Self {
            failed_attempts: user.failed_login_attempts,
            lock_until: user.lock_until_utc,
        }
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.lock_until.is_some_and(|until| until > now)
    }

    /// State after one more failed password check.
    ///
    /// An expired lock starts a fresh count. Reaching the threshold locks the
    /// account for the policy duration. A lock still in force keeps its
    /// original expiry.
    pub fn after_failure(&self, policy: &LockoutPolicy, now: DateTime<Utc>) -> Self {
        let attempts = match self.lock_until {
            Some(until) if until <= now => 1,
            _ => self.failed_attempts.saturating_add(1),
        };

        let lock_until = match self.lock_until {
            Some(until) if until > now => Some(until),
            _ if attempts >= policy.max_attempts as i32 => Some(now + policy.lock_duration),
            _ => None,
        };

        Self {
            failed_attempts: attempts,
            lock_until,
        }
    }

    /// State after a correct password, or `None` while a lock is in force.
    pub fn after_success(&self, now: DateTime<Utc>) -> Option<Self> {
        (!self.is_locked(now)).then(Self::cleared)
    }

    pub fn cleared() -> Self {
        Self::default()
    }

    pub fn is_clear(&self) -> bool {
        self.failed_attempts == 0 && self.lock_until.is_none()
    }
}

/// Applies lockout transitions through `UserStore::update_lockout`.
#[derive(Clone)]
pub struct LockoutGuard {
    users: Arc<dyn UserStore>,
    policy: LockoutPolicy,
}

impl LockoutGuard {
    pub fn new(users: Arc<dyn UserStore>, policy: LockoutPolicy) -> Self {
        Self { users, policy }
    }

    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    pub fn is_locked(&self, user: &User) -> bool {
        LockoutState::of(user).is_locked(Utc::now())
    }

    pub async fn record_failure(&self, user: &User) -> Result<LockoutState, StoreError> {
        let policy = self.policy;
        self.apply(user, move |state, now| Some(state.after_failure(&policy, now)))
            .await?
            .ok_or_else(|| StoreError::Other(anyhow::anyhow!("Failure transition refused")))
    }

    /// Reset the counter after a correct password.
    ///
    /// Returns `None` when the account is locked in the store, which happens
    /// when a concurrent failure locked it after `user` was read. The caller
    /// must then refuse the login.
    pub async fn record_success(&self, user: &User) -> Result<Option<LockoutState>, StoreError> {
        let current = self.reload(user).await?;
        self.apply(&current, |state, now| state.after_success(now))
            .await
    }

    /// Unconditionally lift any lock, e.g. after a password reset.
    pub async fn clear(&self, user: &User) -> Result<LockoutState, StoreError> {
        let current = self.reload(user).await?;
        self.apply(&current, |_, _| Some(LockoutState::cleared()))
            .await?
            .ok_or_else(|| StoreError::Other(anyhow::anyhow!("Clear transition refused")))
    }

    async fn reload(&self, user: &User) -> Result<User, StoreError> {
        Ok(self
            .users
            .find_by_id(user.user_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("User {} disappeared during lockout update", user.user_id))?)
    }

    /// Run `transition` against the stored state until the CAS lands. A
    /// transition returning `None` aborts without writing.
    async fn apply<F>(&self, user: &User, transition: F) -> Result<Option<LockoutState>, StoreError>
    where
        F: Fn(&LockoutState, DateTime<Utc>) -> Option<LockoutState>,
    {
        let mut current = user.clone();

        for _ in 0..MAX_CAS_RETRIES {
            let now = Utc::now();
            let state = LockoutState::of(&current);
            let Some(next) = transition(&state, now) else {
                return Ok(None);
            };
            if next == state {
                return Ok(Some(next));
            }

            if self
                .users
                .update_lockout(current.user_id, current.lockout_version, &next)
                .await?
            {
                if next.is_locked(now) && !state.is_locked(now) {
                    tracing::warn!(
                        user_id = %current.user_id,
                        attempts = next.failed_attempts,
                        "Account locked after repeated failed logins"
                    );
                }
                return Ok(Some(next));
            }

            current = self.reload(&current).await?;
        }

        Err(StoreError::Other(anyhow::anyhow!(
            "Lockout update for user {} lost {} version races",
            user.user_id,
            MAX_CAS_RETRIES
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> LockoutPolicy {
        LockoutPolicy::default()
    }

    #[test]
    fn counts_up_to_threshold_then_locks() {
        let now = Utc::now();
        let mut state = LockoutState::default();
        for expected in 1..5 {
            state = state.after_failure(&policy(), now);
            assert_eq!(state.failed_attempts, expected);
            assert!(!state.is_locked(now));
        }

        state = state.after_failure(&policy(), now);
        assert_eq!(state.failed_attempts, 5);
        assert!(state.is_locked(now));
        assert_eq!(state.lock_until, Some(now + Duration::hours(2)));
    }

    #[test]
    fn expired_lock_restarts_count() {
        let now = Utc::now();
        let state = LockoutState {
            failed_attempts: 5,
            lock_until: Some(now - Duration::minutes(1)),
        };
        assert!(!state.is_locked(now));

        let next = state.after_failure(&policy(), now);
        assert_eq!(next.failed_attempts, 1);
        assert_eq!(next.lock_until, None);
    }

    #[test]
    fn threshold_of_one_locks_immediately() {
        let now = Utc::now();
        let strict = LockoutPolicy {
            max_attempts: 1,
            lock_duration: Duration::minutes(10),
        };
        let state = LockoutState::default().after_failure(&strict, now);
        assert!(state.is_locked(now));
    }

    #[test]
    fn cleared_state() {
        assert!(LockoutState::cleared().is_clear());
        let state = LockoutState {
            failed_attempts: 2,
            lock_until: None,
        };
        assert!(!state.is_clear());
    }

    #[test]
    fn failure_during_lock_keeps_original_expiry() {
        let now = Utc::now();
        let until = now + Duration::minutes(30);
        let state = LockoutState {
            failed_attempts: 5,
            lock_until: Some(until),
        };

        let next = state.after_failure(&policy(), now);
        assert_eq!(next.lock_until, Some(until));
        assert_eq!(next.failed_attempts, 6);
    }

    #[test]
    fn success_is_refused_while_locked() {
        let now = Utc::now();
        let locked = LockoutState {
            failed_attempts: 5,
            lock_until: Some(now + Duration::minutes(5)),
        };
        assert_eq!(locked.after_success(now), None);

        let expired = LockoutState {
            failed_attempts: 5,
            lock_until: Some(now - Duration::minutes(5)),
        };
        assert_eq!(expired.after_success(now), Some(LockoutState::cleared()));
    }
}
