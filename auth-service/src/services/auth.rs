use chrono::{Duration, Utc};
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

use super::{
    blacklist::TokenBlacklist,
    email::{EmailProvider, EmailTemplate},
    error::ServiceError,
    identity::IdentityProvider,
    jwt::{AccessTokenClaims, JwtService, TokenPair},
    lockout::LockoutGuard,
    sessions::SessionRegistry,
    store::UserStore,
};
use crate::{
    models::{normalize_email, ClientInfo, Session, TerminationReason, User},
    utils::{
        generate_secure_token, hash_password, hash_token, validate_password_policy,
        verify_password, Password, PasswordHashString,
    },
};

const EMAIL_VERIFICATION_TTL_HOURS: i64 = 24;
const PASSWORD_RESET_TTL_HOURS: i64 = 1;

/// Result of every flow that signs a principal in.
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub user: User,
    pub tokens: TokenPair,
    /// `None` when session bookkeeping failed; the tokens are still valid.
    pub session_id: Option<Uuid>,
    /// The principal was created by this call.
    pub created: bool,
}

/// Caller identity resolved from a bearer access token.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub claims: AccessTokenClaims,
    pub user: User,
}

/// Composes the credential store, token codec, session registry, lockout
/// guard and blacklist into the sign-in protocols.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    sessions: SessionRegistry,
    lockout: LockoutGuard,
    blacklist: Arc<dyn TokenBlacklist>,
    jwt: JwtService,
    email: Arc<dyn EmailProvider>,
    identity: Arc<dyn IdentityProvider>,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        sessions: SessionRegistry,
        lockout: LockoutGuard,
        blacklist: Arc<dyn TokenBlacklist>,
        jwt: JwtService,
        email: Arc<dyn EmailProvider>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            users,
            sessions,
            lockout,
            blacklist,
            jwt,
            email,
            identity,
        }
    }

    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: Option<String>,
        client: &ClientInfo,
    ) -> Result<AuthOutcome, ServiceError> {
        validate_password_policy(password).map_err(ServiceError::ValidationFailed)?;

        let email = normalize_email(email);
        if self.users.find_by_email(&email).await?.is_some() {
            return Err(ServiceError::Conflict(
                "User already exists with this email".to_string(),
            ));
        }

        let password_hash = hash_secret(password.to_string()).await?;
        let mut user = User::new(&email, Some(password_hash), display_name);
        let verification_token = issue_email_verification(&mut user);

        // The unique index still catches a concurrent registration.
        self.users.insert(&user).await?;
        tracing::info!(user_id = %user.user_id, "User registered");

        self.send_best_effort(
            &user.email,
            EmailTemplate::Verification {
                name: user.display_name.clone(),
                token: verification_token,
            },
        )
        .await;

        self.sign_in(user, client, true).await
    }

    /// Password login.
    ///
    /// A locked account is refused before the password is checked, so
    /// attempts during the lock window neither count nor reveal whether the
    /// password was right.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        client: &ClientInfo,
    ) -> Result<AuthOutcome, ServiceError> {
        let user = self
            .users
            .find_by_email(email)
            .await?
            .filter(|u| !u.is_deleted);

        let Some(mut user) = user else {
            burn_verification(password.to_string()).await;
            return Err(ServiceError::InvalidCredentials);
        };

        if self.lockout.is_locked(&user) {
            tracing::warn!(user_id = %user.user_id, "Login attempt on locked account");
            return Err(ServiceError::AccountLocked);
        }

        // Federated-only accounts never reach the lockout counter.
        let Some(stored_hash) = user.password_hash.clone() else {
            return Err(ServiceError::InvalidCredentials);
        };

        if !verify_secret(password.to_string(), stored_hash).await? {
            let state = self.lockout.record_failure(&user).await?;
            tracing::info!(
                user_id = %user.user_id,
                attempts = state.failed_attempts,
                "Failed login attempt"
            );
            return Err(ServiceError::InvalidCredentials);
        }

        // A concurrent failure may have locked the account after the read above.
        if self.lockout.record_success(&user).await?.is_none() {
            tracing::warn!(user_id = %user.user_id, "Account locked during login");
            return Err(ServiceError::AccountLocked);
        }
        user.last_login_utc = Some(Utc::now());
        self.users.save(&user).await?;

        tracing::info!(user_id = %user.user_id, "User logged in");
        self.sign_in(user, client, false).await
    }

    /// Sign in with an identity token from the external provider, linking by
    /// external id first and email second, creating the principal otherwise.
    pub async fn federated_sign_in(
        &self,
        id_token: &str,
        client: &ClientInfo,
    ) -> Result<AuthOutcome, ServiceError> {
        let identity = self.identity.verify(id_token).await?;

        if let Some(user) = self.users.find_by_external_id(&identity.external_id).await? {
            ensure_not_deleted(&user)?;
            return self.sign_in(user, client, false).await;
        }

        if let Some(mut user) = self.users.find_by_email(&identity.email).await? {
            ensure_not_deleted(&user)?;
            user.external_id = Some(identity.external_id.clone());
            if identity.avatar_url.is_some() {
                user.avatar_url = identity.avatar_url.clone();
            }
            user.email_verified = true;
            self.users.save(&user).await?;
            tracing::info!(user_id = %user.user_id, "Linked federated identity to existing user");
            return self.sign_in(user, client, false).await;
        }

        let name = identity.name.clone().or_else(|| {
            identity
                .email
                .split('@')
                .next()
                .map(|local| local.to_string())
        });
        let mut user = User::new(&identity.email, None, name);
        user.external_id = Some(identity.external_id.clone());
        user.avatar_url = identity.avatar_url.clone();
        user.email_verified = true;

        self.users.insert(&user).await?;
        tracing::info!(user_id = %user.user_id, "User created from federated identity");

        self.send_best_effort(
            &user.email,
            EmailTemplate::Welcome {
                name: user.display_name.clone(),
            },
        )
        .await;

        self.sign_in(user, client, true).await
    }

    /// Exchange a refresh token for a new pair, rotating the session.
    ///
    /// Replaying a rotated token, or losing a race against a concurrent
    /// refresh of the same token, fails with `InvalidSession` and the freshly
    /// minted tokens are dropped.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ServiceError> {
        let session = self
            .sessions
            .validate_and_touch(refresh_token)
            .await?
            .ok_or(ServiceError::InvalidSession)?;

        let claims = self
            .jwt
            .verify_refresh(refresh_token)
            .map_err(|_| ServiceError::InvalidSession)?;

        if claims.sub != session.user_id {
            tracing::warn!(
                session_id = %session.session_id,
                "Refresh token subject does not match session owner"
            );
            return Err(ServiceError::InvalidSession);
        }

        let user = self
            .users
            .find_by_id(claims.sub)
            .await?
            .filter(|u| !u.is_deleted)
            .ok_or(ServiceError::InvalidSession)?;

        let tokens = self.jwt.issue_pair(user.user_id, user.role())?;

        self.sessions
            .rotate(refresh_token, &tokens.refresh_token, tokens.refresh_expires_utc)
            .await?
            .ok_or(ServiceError::InvalidSession)?;

        tracing::debug!(user_id = %user.user_id, session_id = %session.session_id, "Session rotated");
        Ok(tokens)
    }

    /// Revoke the access token and end the session of the refresh token.
    /// Both steps are independent and best-effort.
    pub async fn logout(&self, access_token: Option<&str>, refresh_token: Option<&str>) {
        if let Some(token) = access_token {
            let expires_at = self.jwt.expiry_of(token);
            if let Err(e) = self.blacklist.revoke(token, expires_at).await {
                tracing::warn!(error = %e, "Failed to revoke access token on logout");
            }
        }

        if let Some(token) = refresh_token {
            match self.sessions.invalidate(token).await {
                Ok(true) => {}
                Ok(false) => tracing::debug!("Logout refresh token matched no active session"),
                Err(e) => tracing::warn!(error = %e, "Failed to invalidate session on logout"),
            }
        }
    }

    /// End every session of the user. Access tokens already handed out stay
    /// valid until they expire.
    pub async fn logout_all(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        Ok(self
            .sessions
            .invalidate_all(user_id, TerminationReason::ForcedLogout)
            .await?)
    }

    pub async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<Session>, ServiceError> {
        Ok(self.sessions.list_active(user_id).await?)
    }

    pub async fn me(&self, user_id: Uuid) -> Result<User, ServiceError> {
        self.users
            .find_by_id(user_id)
            .await?
            .filter(|u| !u.is_deleted)
            .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))
    }

    pub async fn request_email_verification(&self, email: &str) -> Result<(), ServiceError> {
        let mut user = self
            .users
            .find_by_email(email)
            .await?
            .filter(|u| !u.is_deleted)
            .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))?;

        if user.email_verified {
            return Err(ServiceError::ValidationFailed(
                "Email is already verified".to_string(),
            ));
        }

        let token = issue_email_verification(&mut user);
        self.users.save(&user).await?;

        self.email
            .send(
                &user.email,
                EmailTemplate::Verification {
                    name: user.display_name.clone(),
                    token,
                },
            )
            .await
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Failed to send verification email: {}", e)))
    }

    pub async fn confirm_email_verification(&self, token: &str) -> Result<User, ServiceError> {
        let now = Utc::now();
        let mut user = self
            .users
            .find_by_email_verification_hash(&hash_token(token))
            .await?
            .filter(|u| !u.is_deleted)
            .filter(|u| u.email_verification_expires_utc.is_some_and(|exp| exp > now))
            .ok_or_else(|| ServiceError::ValidationFailed("Invalid or expired token".to_string()))?;

        user.email_verified = true;
        user.email_verification_hash = None;
        user.email_verification_expires_utc = None;
        self.users.save(&user).await?;

        tracing::info!(user_id = %user.user_id, "Email verified");
        Ok(user)
    }

    /// Always succeeds for unknown addresses so callers cannot discover which
    /// emails are registered.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), ServiceError> {
        let Some(mut user) = self
            .users
            .find_by_email(email)
            .await?
            .filter(|u| !u.is_deleted)
        else {
            tracing::debug!("Password reset requested for unknown email");
            return Ok(());
        };

        let token = generate_secure_token();
        user.password_reset_hash = Some(hash_token(&token));
        user.password_reset_expires_utc = Some(Utc::now() + Duration::hours(PASSWORD_RESET_TTL_HOURS));
        self.users.save(&user).await?;

        self.send_best_effort(
            &user.email,
            EmailTemplate::PasswordReset {
                name: user.display_name.clone(),
                token,
            },
        )
        .await;
        Ok(())
    }

    /// Set a new password from a reset link. Every existing session is
    /// terminated and the caller is signed in on a fresh one.
    pub async fn confirm_password_reset(
        &self,
        token: &str,
        new_password: &str,
        client: &ClientInfo,
    ) -> Result<AuthOutcome, ServiceError> {
        validate_password_policy(new_password).map_err(ServiceError::ValidationFailed)?;

        let now = Utc::now();
        let mut user = self
            .users
            .find_by_password_reset_hash(&hash_token(token))
            .await?
            .filter(|u| !u.is_deleted)
            .filter(|u| u.password_reset_expires_utc.is_some_and(|exp| exp > now))
            .ok_or_else(|| ServiceError::ValidationFailed("Invalid or expired token".to_string()))?;

        user.password_hash = Some(hash_secret(new_password.to_string()).await?);
        user.password_reset_hash = None;
        user.password_reset_expires_utc = None;
        self.users.save(&user).await?;

        // Proving control of the mailbox also lifts a lockout.
        self.lockout.clear(&user).await?;
        self.sessions
            .invalidate_all(user.user_id, TerminationReason::ForcedLogout)
            .await?;

        tracing::info!(user_id = %user.user_id, "Password reset completed");
        self.sign_in(user, client, false).await
    }

    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), ServiceError> {
        let mut user = self.me(user_id).await?;

        let Some(stored_hash) = user.password_hash.clone() else {
            return Err(ServiceError::UnsupportedOperation(
                "Accounts created with social sign-in have no password to change".to_string(),
            ));
        };

        if !verify_secret(current_password.to_string(), stored_hash).await? {
            return Err(ServiceError::InvalidCredentials);
        }

        validate_password_policy(new_password).map_err(ServiceError::ValidationFailed)?;

        user.password_hash = Some(hash_secret(new_password.to_string()).await?);
        self.users.save(&user).await?;

        tracing::info!(user_id = %user.user_id, "Password changed");
        Ok(())
    }

    /// Resolve a bearer access token. The blacklist is consulted first and
    /// its failures reject the request.
    pub async fn authenticate(&self, access_token: &str) -> Result<Authenticated, ServiceError> {
        let revoked = self.blacklist.is_revoked(access_token).await.map_err(|e| {
            ServiceError::Internal(anyhow::anyhow!("Blacklist lookup failed: {}", e))
        })?;
        if revoked {
            return Err(ServiceError::TokenRevoked);
        }

        let claims = self.jwt.verify_access(access_token)?;

        let user = self
            .users
            .find_by_id(claims.sub)
            .await?
            .ok_or(ServiceError::InvalidSession)?;
        ensure_not_deleted(&user)?;

        Ok(Authenticated { claims, user })
    }

    pub async fn health_check(&self) -> Result<(), ServiceError> {
        self.users.health_check().await?;
        self.blacklist.health_check().await?;
        Ok(())
    }

    /// Issue a token pair and record the session. A failed session write is
    /// logged and the sign-in still succeeds.
    async fn sign_in(
        &self,
        user: User,
        client: &ClientInfo,
        created: bool,
    ) -> Result<AuthOutcome, ServiceError> {
        let tokens = self.jwt.issue_pair(user.user_id, user.role())?;

        let session_id = match self
            .sessions
            .create_session(
                user.user_id,
                &tokens.refresh_token,
                client,
                tokens.refresh_expires_utc,
            )
            .await
        {
            Ok(session) => Some(session.session_id),
            Err(e) => {
                tracing::warn!(user_id = %user.user_id, error = %e, "Session creation failed");
                None
            }
        };

        Ok(AuthOutcome {
            user,
            tokens,
            session_id,
            created,
        })
    }

    async fn send_best_effort(&self, to: &str, template: EmailTemplate) {
        let kind = template.kind();
        if let Err(e) = self.email.send(to, template).await {
            tracing::warn!(error = %e, kind, "Failed to send email");
        }
    }
}

fn ensure_not_deleted(user: &User) -> Result<(), ServiceError> {
    if user.is_deleted {
        return Err(ServiceError::Forbidden(
            "Account is no longer active".to_string(),
        ));
    }
    Ok(())
}

/// Attach a fresh verification token to `user` and return the raw value.
fn issue_email_verification(user: &mut User) -> String {
    let token = generate_secure_token();
    user.email_verification_hash = Some(hash_token(&token));
    user.email_verification_expires_utc =
        Some(Utc::now() + Duration::hours(EMAIL_VERIFICATION_TTL_HOURS));
    token
}

async fn hash_secret(password: String) -> Result<String, ServiceError> {
    tokio::task::spawn_blocking(move || hash_password(&Password::new(password)))
        .await
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Password hashing task failed: {}", e)))?
        .map(PasswordHashString::into_string)
        .map_err(ServiceError::Internal)
}

async fn verify_secret(password: String, hash: String) -> Result<bool, ServiceError> {
    tokio::task::spawn_blocking(move || {
        verify_password(&Password::new(password), &PasswordHashString::new(hash)).is_ok()
    })
    .await
    .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Password verification task failed: {}", e)))
}

/// Spend a password verification on a throwaway hash so unknown emails take
/// as long as wrong passwords.
async fn burn_verification(password: String) {
    static DUMMY_HASH: OnceLock<Option<String>> = OnceLock::new();
    let dummy = DUMMY_HASH
        .get_or_init(|| {
            hash_password(&Password::new("timing-equalizer-password".to_string()))
                .ok()
                .map(PasswordHashString::into_string)
        })
        .clone();

    if let Some(hash) = dummy {
        let _ = verify_secret(password, hash).await;
    }
}
