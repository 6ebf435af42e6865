//! User model - credential-store principals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Static roles carried in access tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "admin" => Some(Role::Admin),
            "user" => Some(Role::User),
            _ => None,
        }
    }
}

/// Principal entity.
///
/// `password_hash` is absent for accounts created through federated sign-in;
/// such accounts can never authenticate by password.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
    pub password_hash: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub external_id: Option<String>,
    pub role_code: String,
    pub email_verified: bool,
    pub is_deleted: bool,
    pub deleted_utc: Option<DateTime<Utc>>,
    pub failed_login_attempts: i32,
    pub lock_until_utc: Option<DateTime<Utc>>,
    /// Bumped on every lockout write; guards the counter against lost updates.
    pub lockout_version: i64,
    pub email_verification_hash: Option<String>,
    pub email_verification_expires_utc: Option<DateTime<Utc>>,
    pub password_reset_hash: Option<String>,
    pub password_reset_expires_utc: Option<DateTime<Utc>>,
    pub last_login_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl User {
    /// Create a new user with a normalized email and the `user` role.
    pub fn new(email: &str, password_hash: Option<String>, display_name: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: Uuid::new_v4(),
            email: normalize_email(email),
            password_hash,
            display_name,
            avatar_url: None,
            external_id: None,
            role_code: Role::User.as_str().to_string(),
            email_verified: false,
            is_deleted: false,
            deleted_utc: None,
            failed_login_attempts: 0,
            lock_until_utc: None,
            lockout_version: 0,
            email_verification_hash: None,
            email_verification_expires_utc: None,
            password_reset_hash: None,
            password_reset_expires_utc: None,
            last_login_utc: None,
            created_utc: now,
            updated_utc: now,
        }
    }

    /// Unknown role codes degrade to the least privileged role.
    pub fn role(&self) -> Role {
        Role::from_code(&self.role_code).unwrap_or(Role::User)
    }

    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.lock_until_utc.is_some_and(|until| until > now)
    }

    /// Mark the user as deleted. Users are never hard-deleted.
    pub fn soft_delete(&mut self) {
        let now = Utc::now();
        self.is_deleted = true;
        self.deleted_utc = Some(now);
        self.updated_utc = now;
    }

    /// Convert to sanitized response (no sensitive fields).
    pub fn sanitized(&self) -> UserResponse {
        UserResponse::from(self)
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// User response (sanitized, no credential or lockout state).
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserResponse {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub role: Role,
    pub email_verified: bool,
    pub has_password: bool,
    pub created_utc: DateTime<Utc>,
}

impl From<&User> for UserResponse {
    fn from(u: &User) -> Self {
        Self {
            user_id: u.user_id,
            email: u.email.clone(),
            display_name: u.display_name.clone(),
            avatar_url: u.avatar_url.clone(),
            role: u.role(),
            email_verified: u.email_verified,
            has_password: u.has_password(),
            created_utc: u.created_utc,
        }
    }
}
