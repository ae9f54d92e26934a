pub mod auth_manager;
pub mod session_store;

pub use auth_manager::{AuthManager, AuthSettings};
pub use session_store::SessionStore;
