pub mod browser;
pub mod core;
pub mod features;
pub mod login;

// --- Primary exports ---
pub use browser::{AuthContext, AuthPage, Locator};
pub use core::types::*;
pub use core::{load_config, AppConfig, Clock, TokioClock};
pub use features::{AuthManager, AuthSettings, SessionStore};
pub use login::{
    LoginError, LoginState, LoginStateMachine, LoginStatusDetector, MachineDiagnostic,
    ManualLoginWatcher,
};
