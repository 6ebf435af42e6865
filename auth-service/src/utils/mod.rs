pub mod password;
pub mod token;
pub mod validation;

pub use password::{
    hash_password, validate_password_policy, verify_password, Password, PasswordHashString,
};
pub use token::{generate_secure_token, hash_token};
pub use validation::ValidatedJson;
