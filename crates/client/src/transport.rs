use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error};

use drover_core::{ApiConfig, Error, Result, SessionMessage, TaskRequest};

/// Remote session API as seen by the lifecycle client and the cancellation
/// manager. One shared instance serves any number of concurrent polling
/// loops; implementations carry no mutable state.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a session for the request's instruction.
    async fn create_session(&self, request: &TaskRequest) -> Result<CreatedSession>;
    /// Fetch the current status of one session.
    async fn session_status(&self, id: &str) -> Result<StatusResponse>;
    /// Enumerate all sessions the credential can see.
    async fn list_sessions(&self) -> Result<Vec<SessionSummary>>;
    /// Ask the service to pause a session gracefully.
    async fn pause_session(&self, id: &str) -> Result<()>;
    /// Fallback pause: patch the session status directly.
    async fn mark_paused(&self, id: &str) -> Result<()>;
    /// Hard-terminate a session. Destructive and irreversible.
    async fn terminate_session(&self, id: &str) -> Result<()>;
}

/// Result of opening a session, normalized from the wire shape.
#[derive(Debug, Clone)]
pub struct CreatedSession {
    pub id: String,
    pub entry_url: Option<String>,
    /// False when the service deduplicated onto an existing session.
    pub is_new: bool,
}

#[derive(Debug, Deserialize)]
struct CreateSessionWire {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    is_new_session: bool,
}

fn parse_created(raw: &str) -> Result<CreatedSession> {
    let wire: CreateSessionWire = serde_json::from_str(raw)?;
    let id = wire
        .session_id
        .or(wire.id)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            Error::CreationFailed("creation response carried no session id".to_string())
        })?;
    Ok(CreatedSession {
        id,
        entry_url: wire.url.filter(|u| !u.is_empty()),
        is_new: wire.is_new_session,
    })
}

/// One session's status as reported by the service.
///
/// Field names have drifted across service versions (`status_enum` vs
/// `status`, `session_id` vs `id`), so the shape is deliberately loose and
/// read through the `effective_*` helpers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub status_enum: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub structured_output: Option<Value>,
    #[serde(default)]
    pub messages: Vec<SessionMessage>,
}

impl StatusResponse {
    /// `status_enum` wins over `status`; blank values fall through. With
    /// neither present this reads "unknown", which the classifier treats
    /// as still in progress.
    pub fn effective_status(&self) -> &str {
        effective_status(self.status_enum.as_deref(), self.status.as_deref())
    }

    pub fn effective_id(&self) -> Option<&str> {
        effective_id(self.session_id.as_deref(), self.id.as_deref())
    }
}

/// Listing entry from `GET /sessions`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionSummary {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub status_enum: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl SessionSummary {
    pub fn effective_status(&self) -> &str {
        effective_status(self.status_enum.as_deref(), self.status.as_deref())
    }

    pub fn effective_id(&self) -> Option<&str> {
        effective_id(self.session_id.as_deref(), self.id.as_deref())
    }
}

fn effective_status<'a>(status_enum: Option<&'a str>, status: Option<&'a str>) -> &'a str {
    status_enum
        .filter(|s| !s.is_empty())
        .or_else(|| status.filter(|s| !s.is_empty()))
        .unwrap_or("unknown")
}

fn effective_id<'a>(session_id: Option<&'a str>, id: Option<&'a str>) -> Option<&'a str> {
    session_id
        .filter(|s| !s.is_empty())
        .or_else(|| id.filter(|s| !s.is_empty()))
}

/// The service has answered `GET /sessions` both as a bare array and as a
/// wrapped object; accept either.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SessionListWire {
    Wrapped { sessions: Vec<SessionSummary> },
    Bare(Vec<SessionSummary>),
}

fn parse_session_list(raw: &str) -> Result<Vec<SessionSummary>> {
    let wire: SessionListWire = serde_json::from_str(raw)?;
    Ok(match wire {
        SessionListWire::Wrapped { sessions } => sessions,
        SessionListWire::Bare(list) => list,
    })
}

/// HTTP implementation of `Transport` backed by `reqwest`.
pub struct HttpTransport {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpTransport {
    /// Build from config. A missing credential is rejected here, before
    /// anything can touch the network.
    pub fn new(api: &ApiConfig) -> Result<Self> {
        Self::with_credential(
            &api.base_url,
            &api.api_key,
            Duration::from_secs(api.request_timeout_secs),
        )
    }

    /// Build from explicit values (the per-call credential path).
    pub fn with_credential(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(Error::Config(
                "api key not configured (set apiKey in config or DROVER_API_KEY)".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send one request and classify the response: 2xx returns the raw
    /// body, 4xx becomes `Rejected` with the remote payload, 5xx and
    /// network failures become `Unavailable`. No retries at this layer.
    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<String> {
        let url = format!("{}{}", self.base_url, path);
        debug!(method = %method, url = %url, "Agent API request");

        let mut request = self
            .client
            .request(method, &url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Unavailable(format!("{}: {}", url, e)))?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();

        if status.is_client_error() {
            error!(status = %status, body = %raw_body, "Agent API rejected request");
            return Err(Error::Rejected {
                status: status.as_u16(),
                body: raw_body,
            });
        }
        if !status.is_success() {
            error!(status = %status, body = %raw_body, "Agent API error");
            return Err(Error::Unavailable(format!(
                "API error {}: {}",
                status, raw_body
            )));
        }
        Ok(raw_body)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn create_session(&self, request: &TaskRequest) -> Result<CreatedSession> {
        let body = serde_json::json!({ "prompt": request.instruction });
        let raw = self.send(Method::POST, "/sessions", Some(&body)).await?;
        parse_created(&raw)
    }

    async fn session_status(&self, id: &str) -> Result<StatusResponse> {
        let path = format!("/sessions/{}", urlencoding::encode(id));
        let raw = self.send(Method::GET, &path, None).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let raw = self.send(Method::GET, "/sessions", None).await?;
        parse_session_list(&raw)
    }

    async fn pause_session(&self, id: &str) -> Result<()> {
        let path = format!("/sessions/{}/pause", urlencoding::encode(id));
        self.send(Method::POST, &path, None).await?;
        Ok(())
    }

    async fn mark_paused(&self, id: &str) -> Result<()> {
        let path = format!("/sessions/{}", urlencoding::encode(id));
        let body = serde_json::json!({ "status": "paused" });
        self.send(Method::PATCH, &path, Some(&body)).await?;
        Ok(())
    }

    async fn terminate_session(&self, id: &str) -> Result<()> {
        let path = format!("/sessions/{}", urlencoding::encode(id));
        self.send(Method::DELETE, &path, None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_credential_is_config_error() {
        let err = HttpTransport::with_credential(
            "https://api.example.com/v1",
            "   ",
            Duration::from_secs(5),
        )
        .err()
        .expect("blank credential must be rejected");
        assert!(matches!(err, Error::Config(_)), "got {err:?}");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let transport = HttpTransport::with_credential(
            "https://api.example.com/v1/",
            "key",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(transport.base_url(), "https://api.example.com/v1");
    }

    #[test]
    fn test_new_from_config_trims_base_url() {
        let api = ApiConfig {
            base_url: "https://api.example.com/v1/".to_string(),
            api_key: "k-123".to_string(),
            ..ApiConfig::default()
        };
        let transport = HttpTransport::new(&api).unwrap();
        assert_eq!(transport.base_url(), "https://api.example.com/v1");
    }

    #[test]
    fn test_parse_created_prefers_session_id() {
        let created =
            parse_created(r#"{"session_id":"s-1","url":"https://a/s-1","is_new_session":true}"#)
                .unwrap();
        assert_eq!(created.id, "s-1");
        assert_eq!(created.entry_url.as_deref(), Some("https://a/s-1"));
        assert!(created.is_new);

        // Older shape: bare "id", no url.
        let older = parse_created(r#"{"id":"s-2"}"#).unwrap();
        assert_eq!(older.id, "s-2");
        assert!(older.entry_url.is_none());
        assert!(!older.is_new);
    }

    #[test]
    fn test_parse_created_without_id_fails() {
        let err = parse_created(r#"{"url":"https://a/b"}"#).unwrap_err();
        assert!(matches!(err, Error::CreationFailed(_)), "got {err:?}");
    }

    #[test]
    fn test_effective_status_precedence() {
        let both = StatusResponse {
            status: Some("enum_deprecated".to_string()),
            status_enum: Some("working".to_string()),
            ..Default::default()
        };
        assert_eq!(both.effective_status(), "working");

        let blank_enum = StatusResponse {
            status: Some("running".to_string()),
            status_enum: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(blank_enum.effective_status(), "running");

        assert_eq!(StatusResponse::default().effective_status(), "unknown");
    }

    #[test]
    fn test_status_decodes_loose_payload() {
        let response: StatusResponse = serde_json::from_str(
            r#"{
  "session_id": "s-1",
  "status_enum": "finished",
  "structured_output": {"pr_number": 12},
  "messages": [{"type": "agent", "message": "Step 1 complete"}]
}"#,
        )
        .unwrap();
        assert_eq!(response.effective_id(), Some("s-1"));
        assert_eq!(response.effective_status(), "finished");
        assert_eq!(response.messages.len(), 1);
        assert_eq!(
            response.structured_output.as_ref().unwrap()["pr_number"],
            12
        );

        // A minimal body still decodes.
        let minimal: StatusResponse = serde_json::from_str("{}").unwrap();
        assert!(minimal.messages.is_empty());
    }

    #[test]
    fn test_session_list_accepts_both_shapes() {
        let bare = parse_session_list(r#"[{"session_id":"a"},{"id":"b"}]"#).unwrap();
        assert_eq!(bare.len(), 2);
        assert_eq!(bare[0].effective_id(), Some("a"));
        assert_eq!(bare[1].effective_id(), Some("b"));

        let wrapped =
            parse_session_list(r#"{"sessions":[{"session_id":"c","status":"running"}]}"#).unwrap();
        assert_eq!(wrapped.len(), 1);
        assert_eq!(wrapped[0].effective_status(), "running");
    }
}
