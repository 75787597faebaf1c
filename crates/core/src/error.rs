use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Session creation failed: {0}")]
    CreationFailed(String),

    #[error("Request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("Session failed: {0}")]
    SessionFailed(String),

    #[error("Session cancelled: {0}")]
    SessionCancelled(String),

    #[error("Timed out after {polls} polls ({elapsed_secs}s)")]
    TimedOut { polls: u32, elapsed_secs: u64 },

    #[error("Interrupted: {0}")]
    Interrupted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for a not-found class rejection (HTTP 404).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Rejected { status: 404, .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
