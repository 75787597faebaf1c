pub mod config;
pub mod error;
pub mod paths;
pub mod types;

pub use config::{ApiConfig, Config, PollConfig};
pub use error::{Error, Result};
pub use paths::Paths;
pub use types::{PollSnapshot, RunResult, Session, SessionMessage, SessionStatus, TaskRequest};
