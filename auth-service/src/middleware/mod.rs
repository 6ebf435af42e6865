pub mod auth;
pub mod client;

pub use auth::{auth_middleware, AuthUser};
