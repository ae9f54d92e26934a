pub mod clock;
pub mod config;
pub mod types;

pub use clock::{Clock, TokioClock};
pub use config::{load_config, AppConfig};
pub use types::{Cookie, Credentials, OriginStorage, SessionSnapshot, StorageEntry};
