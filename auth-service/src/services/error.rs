use service_core::error::AppError;
use thiserror::Error;

use super::identity::IdentityError;
use super::jwt::TokenError;
use super::store::StoreError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    ValidationFailed(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Account is temporarily locked due to too many failed login attempts")]
    AccountLocked,

    #[error("Invalid or expired session")]
    InvalidSession,

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    TokenMalformed,

    #[error("Wrong token type")]
    WrongTokenType,

    #[error("Token has been revoked")]
    TokenRevoked,

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Identity verification failed")]
    IdentityVerificationFailed,

    #[error("{0}")]
    UnsupportedOperation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<TokenError> for ServiceError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Malformed => ServiceError::TokenMalformed,
            TokenError::Expired => ServiceError::TokenExpired,
            TokenError::WrongType => ServiceError::WrongTokenType,
            TokenError::MissingSecret(_) | TokenError::Signing(_) => {
                ServiceError::Internal(anyhow::Error::new(err))
            }
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate => ServiceError::Conflict("Email already registered".into()),
            StoreError::Database(e) => ServiceError::Database(e),
            StoreError::Other(e) => ServiceError::Internal(e),
        }
    }
}

impl From<IdentityError> for ServiceError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Rejected(reason) => {
                tracing::info!(reason = %reason, "Identity token rejected");
            }
            IdentityError::Unavailable(reason) => {
                tracing::error!(reason = %reason, "Identity provider unavailable");
            }
        }
        ServiceError::IdentityVerificationFailed
    }
}

impl ServiceError {
    /// Failures that are the caller's fault and carry a safe message.
    pub fn is_operational(&self) -> bool {
        !matches!(self, ServiceError::Database(_) | ServiceError::Internal(_))
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::ValidationFailed(_) | ServiceError::UnsupportedOperation(_) => {
                AppError::BadRequest(anyhow::anyhow!(message))
            }
            ServiceError::InvalidCredentials
            | ServiceError::InvalidSession
            | ServiceError::TokenExpired
            | ServiceError::TokenMalformed
            | ServiceError::WrongTokenType
            | ServiceError::TokenRevoked
            | ServiceError::IdentityVerificationFailed => {
                AppError::Unauthorized(anyhow::anyhow!(message))
            }
            ServiceError::AccountLocked | ServiceError::Forbidden(_) => {
                AppError::Forbidden(anyhow::anyhow!(message))
            }
            ServiceError::Conflict(_) => AppError::Conflict(anyhow::anyhow!(message)),
            ServiceError::NotFound(_) => AppError::NotFound(anyhow::anyhow!(message)),
            ServiceError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}
