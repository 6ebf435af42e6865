//! Services layer for auth-service.
//!
//! The session and token lifecycle engine plus the outbound collaborators
//! (mail delivery and the federated identity provider).

mod auth;
pub mod blacklist;
mod database;
mod email;
pub mod error;
mod identity;
mod jwt;
pub mod lockout;
mod memory;
pub mod redis;
mod sessions;
pub mod store;

pub use auth::{AuthOutcome, AuthService, Authenticated};
pub use blacklist::{spawn_sweeper, InMemoryBlacklist, TokenBlacklist};
pub use database::Database;
pub use email::{EmailProvider, EmailService, EmailTemplate, MockEmailService, RenderedEmail};
pub use error::ServiceError;
pub use identity::{
    FederatedIdentity, GoogleIdentityProvider, IdentityError, IdentityProvider,
    MockIdentityProvider,
};
pub use jwt::{
    AccessTokenClaims, JwtService, RefreshTokenClaims, TokenError, TokenPair, TokenType,
};
pub use lockout::{LockoutGuard, LockoutPolicy, LockoutState};
pub use memory::InMemoryStore;
pub use redis::RedisBlacklist;
pub use sessions::SessionRegistry;
pub use store::{SessionStore, StoreError, UserStore};
