use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use drover_core::Result;

use crate::transport::Transport;

/// Statuses that mark a listed session as still doing work. Only these
/// are swept by `stop_all`; paused, blocked, and terminal sessions are
/// left alone.
const ACTIVE_STATUSES: [&str; 3] = ["running", "active", "working"];

fn is_active(raw_status: &str) -> bool {
    let status = raw_status.trim().to_ascii_lowercase();
    ACTIVE_STATUSES.contains(&status.as_str())
}

/// How a stop request was honored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// The session accepted a graceful pause.
    Paused,
    /// The session had to be hard-terminated.
    Terminated,
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopOutcome::Paused => write!(f, "paused"),
            StopOutcome::Terminated => write!(f, "terminated"),
        }
    }
}

/// Tally of one `stop_all` sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StopReport {
    pub paused: u32,
    pub terminated: u32,
    pub failed: u32,
    /// Sessions in an active status that the sweep attempted. Listed
    /// sessions that were already paused or terminal are not counted.
    pub considered: u32,
}

/// Stops sessions, preferring a graceful pause and escalating to
/// termination only when pausing is not available.
pub struct CancelManager {
    transport: Arc<dyn Transport>,
}

impl CancelManager {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Stop one session: pause first, fall back to patching the status
    /// when the pause endpoint is missing, terminate as the last resort.
    /// Only a failed termination is an error.
    pub async fn stop(&self, id: &str) -> Result<StopOutcome> {
        match self.transport.pause_session(id).await {
            Ok(()) => {
                info!(session_id = %id, "Session paused");
                return Ok(StopOutcome::Paused);
            }
            Err(e) if e.is_not_found() => {
                warn!(session_id = %id, "Pause endpoint missing; patching status directly");
                match self.transport.mark_paused(id).await {
                    Ok(()) => {
                        info!(session_id = %id, "Session marked paused");
                        return Ok(StopOutcome::Paused);
                    }
                    Err(e) => {
                        warn!(
                            session_id = %id,
                            error = %e,
                            "Status patch failed; falling back to terminate"
                        );
                    }
                }
            }
            Err(e) => {
                warn!(session_id = %id, error = %e, "Pause failed; falling back to terminate");
            }
        }

        self.transport.terminate_session(id).await?;
        info!(session_id = %id, "Session terminated");
        Ok(StopOutcome::Terminated)
    }

    /// Sweep every listed session that is still active. Per-session
    /// failures are tallied, not propagated; only a failed listing makes
    /// the sweep itself fail.
    pub async fn stop_all(&self) -> Result<StopReport> {
        let sessions = self.transport.list_sessions().await?;
        let mut report = StopReport::default();

        for summary in &sessions {
            if !is_active(summary.effective_status()) {
                continue;
            }
            report.considered += 1;

            let id = match summary.effective_id() {
                Some(id) => id.to_string(),
                None => {
                    warn!("Active session listed without an id; skipping");
                    report.failed += 1;
                    continue;
                }
            };

            match self.stop(&id).await {
                Ok(StopOutcome::Paused) => report.paused += 1,
                Ok(StopOutcome::Terminated) => report.terminated += 1,
                Err(e) => {
                    warn!(session_id = %id, error = %e, "Failed to stop session");
                    report.failed += 1;
                }
            }
        }

        info!(
            considered = report.considered,
            paused = report.paused,
            terminated = report.terminated,
            failed = report.failed,
            "Stop-all sweep complete"
        );
        Ok(report)
    }
}
