pub mod session;
pub mod user;

pub use session::{
    select_evictions, ClientInfo, DeviceType, Session, SessionInfo, TerminationReason,
};
pub use user::{normalize_email, Role, User, UserResponse};
