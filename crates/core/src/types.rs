use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Canonical status of a remote session.
///
/// The remote service reports status as an open string vocabulary;
/// `from_remote` folds it into this closed set. Unknown values map to
/// `Working` so the polling loop keeps waiting instead of crashing when
/// the service grows new states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Synthetic pre-poll state, only ever seen in the first snapshot.
    Initializing,
    /// The remote agent is still making progress.
    Working,
    /// The session finished and may carry a structured result.
    Succeeded,
    /// Terminal without error: the agent is idle awaiting a human decision.
    NeedsInput,
    /// The session was cancelled, stopped or terminated remotely.
    Cancelled,
    /// The remote agent reported failure.
    Failed,
    /// The polling loop exhausted its bounds; the remote task may still run.
    TimedOut,
}

impl SessionStatus {
    /// Map a raw remote status onto the canonical set. The mapping is total
    /// and case-insensitive; anything unrecognized counts as in progress.
    pub fn from_remote(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "finished" | "completed" => SessionStatus::Succeeded,
            "blocked" => SessionStatus::NeedsInput,
            "cancelled" | "stopped" | "terminated" => SessionStatus::Cancelled,
            "failed" | "error" => SessionStatus::Failed,
            _ => SessionStatus::Working,
        }
    }

    /// Whether the polling loop stops on this status.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Initializing | SessionStatus::Working)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Initializing => write!(f, "initializing"),
            SessionStatus::Working => write!(f, "working"),
            SessionStatus::Succeeded => write!(f, "succeeded"),
            SessionStatus::NeedsInput => write!(f, "needs_input"),
            SessionStatus::Cancelled => write!(f, "cancelled"),
            SessionStatus::Failed => write!(f, "failed"),
            SessionStatus::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// One progress message reported by the remote session.
///
/// The service has used both `message` and `content` for the text field,
/// so both decode into `message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default, alias = "content")]
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Outbound task intent: the instruction text sent to the remote service
/// plus the structured context it was rendered from. Only the instruction
/// travels on the wire; the context rides along for callers and logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl TaskRequest {
    /// Build a request. An empty (or whitespace-only) instruction is
    /// rejected before anything touches the network.
    pub fn new(instruction: impl Into<String>, context: Option<Value>) -> Result<Self> {
        let instruction = instruction.into();
        if instruction.trim().is_empty() {
            return Err(Error::InvalidRequest(
                "instruction must not be empty".to_string(),
            ));
        }
        Ok(Self {
            instruction,
            context,
        })
    }
}

/// The unit of remote work as tracked by one polling loop.
///
/// Owned exclusively by the lifecycle client for the duration of a run;
/// the bookkeeping fields only ever advance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Opaque identifier assigned by the remote service at creation.
    pub id: String,
    /// Human-facing locator. Filled from the first response that carries
    /// one and replaced only by a newer non-empty value, never cleared.
    #[serde(default)]
    pub entry_url: Option<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_polled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub poll_count: u32,
    #[serde(default)]
    pub elapsed_secs: u64,
    /// Open record attached by the remote service on success.
    #[serde(default)]
    pub structured_result: Option<Value>,
    /// Append-only log of remote-reported progress messages.
    #[serde(default)]
    pub messages: Vec<SessionMessage>,
}

impl Session {
    pub fn new(id: impl Into<String>, entry_url: Option<String>) -> Self {
        Self {
            id: id.into(),
            entry_url,
            status: SessionStatus::Initializing,
            created_at: Utc::now(),
            last_polled_at: None,
            poll_count: 0,
            elapsed_secs: 0,
            structured_result: None,
            messages: Vec::new(),
        }
    }

    /// Absorb the remote message list, appending only entries beyond the
    /// locally known count. Existing entries are never rewritten.
    pub fn absorb_messages(&mut self, remote: &[SessionMessage]) {
        if remote.len() > self.messages.len() {
            self.messages
                .extend_from_slice(&remote[self.messages.len()..]);
        }
    }

    /// Record a non-empty entry URL, keeping the last known value.
    pub fn observe_url(&mut self, url: Option<&str>) {
        if let Some(u) = url {
            if !u.trim().is_empty() {
                self.entry_url = Some(u.to_string());
            }
        }
    }
}

/// Read-only view delivered to a progress observer on each poll cycle
/// (and once, synthetically, right after creation). Never persisted
/// beyond the callback invocation.
#[derive(Debug, Clone, Serialize)]
pub struct PollSnapshot {
    pub session_id: String,
    pub entry_url: Option<String>,
    /// Status string exactly as reported by the remote service.
    pub raw_status: String,
    pub status: SessionStatus,
    pub poll_count: u32,
    pub elapsed_secs: u64,
    pub polled_at: DateTime<Utc>,
    pub messages: Vec<SessionMessage>,
}

impl PollSnapshot {
    /// The synthetic snapshot emitted immediately after creation, before
    /// the first real poll.
    pub fn initializing(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            entry_url: session.entry_url.clone(),
            raw_status: "initializing".to_string(),
            status: SessionStatus::Initializing,
            poll_count: 0,
            elapsed_secs: 0,
            polled_at: Utc::now(),
            messages: Vec::new(),
        }
    }

    /// Snapshot of the session as of the poll that just completed.
    pub fn of_poll(session: &Session, raw_status: impl Into<String>) -> Self {
        Self {
            session_id: session.id.clone(),
            entry_url: session.entry_url.clone(),
            raw_status: raw_status.into(),
            status: session.status,
            poll_count: session.poll_count,
            elapsed_secs: session.elapsed_secs,
            polled_at: session.last_polled_at.unwrap_or_else(Utc::now),
            messages: session.messages.clone(),
        }
    }

    /// Latest remote message text, if any.
    pub fn latest_message(&self) -> Option<&str> {
        self.messages.last().map(|m| m.message.as_str())
    }
}

/// Normalized terminal outcome of a run. `status` is `Succeeded` or
/// `NeedsInput`; every other terminal classification surfaces as an error.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub session_id: String,
    pub entry_url: Option<String>,
    pub status: SessionStatus,
    pub messages: Vec<SessionMessage>,
    /// `None` means the remote service attached no structured record.
    pub structured_result: Option<Value>,
}

impl From<Session> for RunResult {
    fn from(session: Session) -> Self {
        Self {
            session_id: session.id,
            entry_url: session.entry_url,
            status: session.status,
            messages: session.messages,
            structured_result: session.structured_result,
        }
    }
}
