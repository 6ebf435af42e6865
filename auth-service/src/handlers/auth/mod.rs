pub mod password;
pub mod registration;
pub mod session;
pub mod social;

pub use password::{change_password, forgot_password, reset_password};
pub use registration::{register, resend_verification, verify_email};
pub use session::{list_sessions, login, logout, logout_all, refresh};
pub use social::google_sign_in;
