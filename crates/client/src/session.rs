use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use drover_core::{
    Config, Error, PollConfig, PollSnapshot, Result, RunResult, Session, SessionStatus,
    TaskRequest,
};

use crate::cancel::{CancelManager, StopOutcome, StopReport};
use crate::observer::{ObserverBridge, ProgressObserver};
use crate::transport::{HttpTransport, SessionSummary, StatusResponse, Transport};

/// Pacing and bounds for one polling loop. Both bounds apply: the loop
/// ends at `max_polls` attempts or `max_duration` wall clock, whichever
/// comes first.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_polls: u32,
    pub max_duration: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from_config(&PollConfig::default())
    }
}

impl PollPolicy {
    pub fn from_config(poll: &PollConfig) -> Self {
        Self {
            interval: Duration::from_secs(poll.interval_secs),
            max_polls: poll.max_polls,
            max_duration: Duration::from_secs(poll.max_duration_secs),
        }
    }
}

/// Drives one session from creation through polling to a terminal
/// classification. Stateless between runs; any number of runs may share
/// one runner.
pub struct SessionRunner {
    transport: Arc<dyn Transport>,
    policy: PollPolicy,
}

impl SessionRunner {
    pub fn new(transport: Arc<dyn Transport>, policy: PollPolicy) -> Self {
        Self { transport, policy }
    }

    /// Run without external cancellation. The private sender is held for
    /// the whole call, so the loop can only end through the lifecycle
    /// itself.
    pub async fn run(
        &self,
        request: &TaskRequest,
        observer: Option<Arc<dyn ProgressObserver>>,
        timeout: Option<Duration>,
    ) -> Result<RunResult> {
        let (_guard, shutdown) = broadcast::channel(1);
        self.run_with_shutdown(request, observer, timeout, shutdown)
            .await
    }

    /// Run with a caller-held shutdown channel. A message on the channel
    /// interrupts the loop at its next await point and the run ends with
    /// `Error::Interrupted`; dropping the sender counts as shutdown too.
    ///
    /// `timeout` overrides the policy's wall-clock bound for this run
    /// only. The poll-count bound still applies.
    pub async fn run_with_shutdown(
        &self,
        request: &TaskRequest,
        observer: Option<Arc<dyn ProgressObserver>>,
        timeout: Option<Duration>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<RunResult> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let max_duration = timeout.unwrap_or(self.policy.max_duration);

        let created = match self.transport.create_session(request).await {
            Ok(created) => created,
            Err(e @ Error::CreationFailed(_)) => return Err(e),
            Err(e) => return Err(Error::CreationFailed(e.to_string())),
        };
        info!(
            run_id = %run_id,
            session_id = %created.id,
            is_new = created.is_new,
            "Session created"
        );

        let mut session = Session::new(created.id, created.entry_url);
        let mut bridge = ObserverBridge::new(observer);

        // The first notification goes out before the first poll, so an
        // observer learns the session exists even if every poll fails.
        bridge.notify(PollSnapshot::initializing(&session)).await;

        for attempt in 1..=self.policy.max_polls {
            let elapsed = started.elapsed();
            if elapsed >= max_duration {
                warn!(
                    session_id = %session.id,
                    polls = session.poll_count,
                    elapsed_secs = elapsed.as_secs(),
                    "Session exceeded its time budget"
                );
                return Err(Error::TimedOut {
                    polls: session.poll_count,
                    elapsed_secs: elapsed.as_secs(),
                });
            }

            let polled = tokio::select! {
                result = self.transport.session_status(&session.id) => result,
                _ = shutdown.recv() => {
                    return Err(Error::Interrupted(
                        "shutdown during status poll".to_string(),
                    ));
                }
            };

            match polled {
                Ok(response) => {
                    session.poll_count = attempt;
                    session.last_polled_at = Some(Utc::now());
                    session.elapsed_secs = started.elapsed().as_secs();
                    session.observe_url(response.url.as_deref());
                    session.absorb_messages(&response.messages);

                    let raw_status = response.effective_status().to_string();
                    session.status = SessionStatus::from_remote(&raw_status);
                    debug!(
                        session_id = %session.id,
                        poll = attempt,
                        raw_status = %raw_status,
                        status = %session.status,
                        "Status poll"
                    );

                    // Notified before the terminal check so the final
                    // snapshot is always delivered.
                    bridge
                        .notify(PollSnapshot::of_poll(&session, raw_status.as_str()))
                        .await;

                    match session.status {
                        SessionStatus::Succeeded => {
                            session.structured_result = response.structured_output.clone();
                            info!(
                                session_id = %session.id,
                                polls = session.poll_count,
                                "Session finished"
                            );
                            return Ok(session.into());
                        }
                        SessionStatus::NeedsInput => {
                            info!(
                                session_id = %session.id,
                                polls = session.poll_count,
                                "Session is blocked waiting for caller input"
                            );
                            return Ok(session.into());
                        }
                        SessionStatus::Cancelled => {
                            return Err(Error::SessionCancelled(format!(
                                "session {} reported status \"{}\"",
                                session.id, raw_status
                            )));
                        }
                        SessionStatus::Failed => {
                            let detail = session
                                .messages
                                .last()
                                .map(|m| m.message.clone())
                                .filter(|m| !m.trim().is_empty())
                                .unwrap_or_else(|| format!("status \"{}\"", raw_status));
                            return Err(Error::SessionFailed(format!(
                                "session {}: {}",
                                session.id, detail
                            )));
                        }
                        SessionStatus::Initializing
                        | SessionStatus::Working
                        | SessionStatus::TimedOut => {}
                    }
                }
                Err(e) => {
                    warn!(
                        session_id = %session.id,
                        poll = attempt,
                        error = %e,
                        "Status poll failed; retrying next tick"
                    );
                }
            }

            if attempt < self.policy.max_polls {
                tokio::select! {
                    _ = sleep(self.policy.interval) => {}
                    _ = shutdown.recv() => {
                        return Err(Error::Interrupted(
                            "shutdown between polls".to_string(),
                        ));
                    }
                }
            }
        }

        let elapsed = started.elapsed();
        warn!(
            session_id = %session.id,
            polls = self.policy.max_polls,
            elapsed_secs = elapsed.as_secs(),
            "Session never reached a terminal status"
        );
        Err(Error::TimedOut {
            polls: self.policy.max_polls,
            elapsed_secs: elapsed.as_secs(),
        })
    }
}

/// High-level entry point: one shared transport behind the runner, the
/// cancellation manager, and the one-shot queries.
pub struct SessionClient {
    transport: Arc<dyn Transport>,
    runner: SessionRunner,
    cancel: CancelManager,
}

impl SessionClient {
    pub fn new(config: &Config) -> Result<Self> {
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config.api)?);
        Ok(Self::with_transport(
            transport,
            PollPolicy::from_config(&config.poll),
        ))
    }

    /// Build over any transport. Tests and embedders use this to swap
    /// the wire out.
    pub fn with_transport(transport: Arc<dyn Transport>, policy: PollPolicy) -> Self {
        Self {
            runner: SessionRunner::new(transport.clone(), policy),
            cancel: CancelManager::new(transport.clone()),
            transport,
        }
    }

    pub async fn create_and_run(
        &self,
        request: &TaskRequest,
        observer: Option<Arc<dyn ProgressObserver>>,
        timeout: Option<Duration>,
    ) -> Result<RunResult> {
        self.runner.run(request, observer, timeout).await
    }

    pub async fn create_and_run_with_shutdown(
        &self,
        request: &TaskRequest,
        observer: Option<Arc<dyn ProgressObserver>>,
        timeout: Option<Duration>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<RunResult> {
        self.runner
            .run_with_shutdown(request, observer, timeout, shutdown)
            .await
    }

    pub async fn status(&self, id: &str) -> Result<StatusResponse> {
        self.transport.session_status(id).await
    }

    pub async fn list(&self) -> Result<Vec<SessionSummary>> {
        self.transport.list_sessions().await
    }

    pub async fn stop(&self, id: &str) -> Result<StopOutcome> {
        self.cancel.stop(id).await
    }

    pub async fn stop_all(&self) -> Result<StopReport> {
        self.cancel.stop_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::FnObserver;
    use crate::transport::CreatedSession;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<StatusResponse>>>,
        polls_served: AtomicU32,
        create_url: Option<String>,
        fail_create: bool,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<StatusResponse>>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().collect()),
                polls_served: AtomicU32::new(0),
                create_url: Some("https://agent.example.com/sessions/s-test".to_string()),
                fail_create: false,
            }
        }

        fn polls_served(&self) -> u32 {
            self.polls_served.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn create_session(&self, _request: &TaskRequest) -> Result<CreatedSession> {
            if self.fail_create {
                return Err(Error::Unavailable("connection refused".to_string()));
            }
            Ok(CreatedSession {
                id: "s-test".to_string(),
                entry_url: self.create_url.clone(),
                is_new: true,
            })
        }

        async fn session_status(&self, _id: &str) -> Result<StatusResponse> {
            self.polls_served.fetch_add(1, Ordering::SeqCst);
            match self.script.lock().unwrap().pop_front() {
                Some(step) => step,
                None => Ok(remote("running")),
            }
        }

        async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
            unimplemented!("not exercised by runner tests")
        }

        async fn pause_session(&self, _id: &str) -> Result<()> {
            unimplemented!("not exercised by runner tests")
        }

        async fn mark_paused(&self, _id: &str) -> Result<()> {
            unimplemented!("not exercised by runner tests")
        }

        async fn terminate_session(&self, _id: &str) -> Result<()> {
            unimplemented!("not exercised by runner tests")
        }
    }

    fn remote(raw: &str) -> StatusResponse {
        StatusResponse {
            session_id: Some("s-test".to_string()),
            status_enum: Some(raw.to_string()),
            ..Default::default()
        }
    }

    fn remote_with_output(raw: &str, output: serde_json::Value) -> StatusResponse {
        StatusResponse {
            structured_output: Some(output),
            ..remote(raw)
        }
    }

    fn remote_with_message(raw: &str, message: &str) -> StatusResponse {
        StatusResponse {
            messages: vec![drover_core::SessionMessage {
                kind: Some("agent".to_string()),
                message: message.to_string(),
                timestamp: None,
            }],
            ..remote(raw)
        }
    }

    struct Recorder {
        snapshots: Mutex<Vec<PollSnapshot>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                snapshots: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ProgressObserver for Recorder {
        async fn on_snapshot(&self, snapshot: &PollSnapshot) {
            self.snapshots.lock().unwrap().push(snapshot.clone());
        }
    }

    fn fast_policy(max_polls: u32) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            max_polls,
            max_duration: Duration::from_secs(600),
        }
    }

    fn request() -> TaskRequest {
        TaskRequest::new("remove the dark-mode flag", None).unwrap()
    }

    #[test]
    fn test_policy_defaults_follow_config_defaults() {
        let policy = PollPolicy::default();
        assert_eq!(policy.interval, Duration::from_secs(3));
        assert_eq!(policy.max_polls, 200);
        assert_eq!(policy.max_duration, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_run_succeeds_after_polling() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(remote("running")),
            Ok(remote("running")),
            Ok(remote_with_output("finished", json!({"pr_number": 7}))),
        ]));
        let runner = SessionRunner::new(transport.clone(), fast_policy(20));
        let recorder = Recorder::new();

        let result = runner
            .run(&request(), Some(recorder.clone()), None)
            .await
            .unwrap();

        assert_eq!(result.status, SessionStatus::Succeeded);
        assert_eq!(result.session_id, "s-test");
        assert_eq!(result.structured_result.unwrap()["pr_number"], 7);
        assert_eq!(transport.polls_served(), 3);

        let snapshots = recorder.snapshots.lock().unwrap();
        assert_eq!(snapshots.len(), 4);
        assert_eq!(snapshots[0].raw_status, "initializing");
        assert_eq!(snapshots[0].poll_count, 0);
        assert_eq!(snapshots[3].raw_status, "finished");
        assert_eq!(snapshots[3].status, SessionStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_first_notification_precedes_first_poll() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(remote("finished"))]));
        let runner = SessionRunner::new(transport.clone(), fast_policy(5));

        let transport_probe = transport.clone();
        let first_seen = Arc::new(Mutex::new(None::<u32>));
        let first_seen_in_closure = first_seen.clone();
        let observer = Arc::new(FnObserver::new(move |_: &PollSnapshot| {
            let mut first = first_seen_in_closure.lock().unwrap();
            if first.is_none() {
                *first = Some(transport_probe.polls_served());
            }
        }));

        runner.run(&request(), Some(observer), None).await.unwrap();

        assert_eq!(*first_seen.lock().unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_blocked_resolves_without_error() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(remote("running")),
            Ok(remote("blocked")),
        ]));
        let runner = SessionRunner::new(transport.clone(), fast_policy(20));

        let result = runner.run(&request(), None, None).await.unwrap();

        assert_eq!(result.status, SessionStatus::NeedsInput);
        assert!(result.structured_result.is_none());
        assert_eq!(transport.polls_served(), 2);
    }

    #[tokio::test]
    async fn test_failed_carries_remote_detail() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(remote("running")),
            Ok(remote_with_message(
                "failed",
                "compile step exited with status 1",
            )),
        ]));
        let runner = SessionRunner::new(transport, fast_policy(5));

        let err = runner.run(&request(), None, None).await.unwrap_err();

        match err {
            Error::SessionFailed(detail) => {
                assert!(
                    detail.contains("compile step exited with status 1"),
                    "got {detail}"
                );
            }
            other => panic!("expected SessionFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stopped_maps_to_cancelled() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(remote("stopped"))]));
        let runner = SessionRunner::new(transport, fast_policy(5));

        let err = runner.run(&request(), None, None).await.unwrap_err();
        assert!(matches!(err, Error::SessionCancelled(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_poll_budget_exhaustion_times_out() {
        // Empty script: every poll reports "running".
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let runner = SessionRunner::new(transport.clone(), fast_policy(200));
        let recorder = Recorder::new();

        let err = runner
            .run(&request(), Some(recorder.clone()), None)
            .await
            .unwrap_err();

        match err {
            Error::TimedOut { polls, .. } => assert_eq!(polls, 200),
            other => panic!("expected TimedOut, got {other:?}"),
        }
        assert_eq!(transport.polls_served(), 200);
        // Initial snapshot plus one per poll.
        assert_eq!(recorder.snapshots.lock().unwrap().len(), 201);
    }

    #[tokio::test]
    async fn test_poll_errors_are_absorbed() {
        let mut script: Vec<Result<StatusResponse>> = Vec::new();
        for _ in 0..4 {
            script.push(Ok(remote("running")));
        }
        script.push(Err(Error::Unavailable("gateway hiccup".to_string())));
        for _ in 0..4 {
            script.push(Ok(remote("running")));
        }
        script.push(Ok(remote("finished")));

        let transport = Arc::new(ScriptedTransport::new(script));
        let runner = SessionRunner::new(transport.clone(), fast_policy(20));
        let recorder = Recorder::new();

        let result = runner
            .run(&request(), Some(recorder.clone()), None)
            .await
            .unwrap();

        assert_eq!(result.status, SessionStatus::Succeeded);
        assert_eq!(transport.polls_served(), 10);
        // The failed poll produced no snapshot: initial plus 9 successes.
        assert_eq!(recorder.snapshots.lock().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_entry_url_backfilled_from_later_poll() {
        let mut transport = ScriptedTransport::new(vec![
            Ok(remote("running")),
            Ok(StatusResponse {
                url: Some("https://agent.example.com/sessions/s-test".to_string()),
                ..remote("running")
            }),
            Ok(remote("finished")),
        ]);
        transport.create_url = None;
        let transport = Arc::new(transport);
        let runner = SessionRunner::new(transport, fast_policy(20));
        let recorder = Recorder::new();

        let result = runner
            .run(&request(), Some(recorder.clone()), None)
            .await
            .unwrap();

        assert_eq!(
            result.entry_url.as_deref(),
            Some("https://agent.example.com/sessions/s-test")
        );
        let snapshots = recorder.snapshots.lock().unwrap();
        assert!(snapshots[0].entry_url.is_none());
        assert!(snapshots[1].entry_url.is_none());
        assert_eq!(
            snapshots[2].entry_url.as_deref(),
            Some("https://agent.example.com/sessions/s-test")
        );
        // The url sticks on the final snapshot even though that poll
        // omitted it.
        assert_eq!(
            snapshots[3].entry_url.as_deref(),
            Some("https://agent.example.com/sessions/s-test")
        );
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_sleep() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let policy = PollPolicy {
            interval: Duration::from_secs(60),
            max_polls: 10,
            max_duration: Duration::from_secs(600),
        };
        let runner = SessionRunner::new(transport, policy);
        let (tx, rx) = broadcast::channel(1);

        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            let _ = tx.send(());
        });

        let request = request();
        let run = runner.run_with_shutdown(&request, None, None, rx);
        let err = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("run did not stop after shutdown")
            .unwrap_err();
        assert!(matches!(err, Error::Interrupted(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_creation_failure_aborts_run() {
        let mut transport = ScriptedTransport::new(Vec::new());
        transport.fail_create = true;
        let transport = Arc::new(transport);
        let runner = SessionRunner::new(transport.clone(), fast_policy(5));

        let err = runner.run(&request(), None, None).await.unwrap_err();

        assert!(matches!(err, Error::CreationFailed(_)), "got {err:?}");
        assert_eq!(transport.polls_served(), 0);
    }

    #[tokio::test]
    async fn test_zero_budget_times_out_without_polling() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let runner = SessionRunner::new(transport.clone(), fast_policy(5));

        let err = runner
            .run(&request(), None, Some(Duration::ZERO))
            .await
            .unwrap_err();

        match err {
            Error::TimedOut { polls, .. } => assert_eq!(polls, 0),
            other => panic!("expected TimedOut, got {other:?}"),
        }
        assert_eq!(transport.polls_served(), 0);
    }

    #[tokio::test]
    async fn test_client_facade_runs_over_shared_transport() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(remote("finished"))]));
        let client = SessionClient::with_transport(transport.clone(), fast_policy(5));

        let result = client.create_and_run(&request(), None, None).await.unwrap();
        assert_eq!(result.status, SessionStatus::Succeeded);

        let status = client.status("s-test").await.unwrap();
        assert_eq!(status.effective_status(), "running");
        assert_eq!(transport.polls_served(), 2);
    }
}
