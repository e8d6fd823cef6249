//! HTTP client for masterd.
//!
//! Communicates with masterd via its Admin HTTP surface (Section 6).

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use scan_core::{Project, Stage, Workflow};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("daemon not running at {addr}\n  → start with: masterd\n  → or set MASTERD_ADDR if using a different address")]
    ConnectionFailed { addr: String },

    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: check MASTERD_TOKEN env var or --token flag")]
    Unauthorized,

    #[error(
        "daemon not ready after {timeout_ms}ms at {addr}\n  → ensure masterd is running\n  → check MASTERD_TOKEN if auth is enabled"
    )]
    DaemonNotReady { addr: String, timeout_ms: u64 },
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            let addr = e
                .url()
                .map(|u| u.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            ClientError::ConnectionFailed { addr }
        } else {
            ClientError::HttpError {
                status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                message: e.to_string(),
            }
        }
    }
}

/// Envelope every masterd response is wrapped in (Section 6).
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[allow(dead_code)]
    code: u16,
    #[allow(dead_code)]
    status: String,
    message: String,
    data: Option<T>,
}

/// Request payload for creating a project.
#[derive(Debug, Serialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub owner: String,
}

/// Request payload for creating a workflow (POST .../workflows).
#[derive(Debug, Serialize)]
pub struct CreateWorkflowRequest {
    pub project_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_type: Option<String>,
    pub steps: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

/// Response shape for create/get workflow: the workflow fields flattened
/// alongside the stages derived from its steps.
#[derive(Debug, Deserialize)]
pub struct WorkflowDetail {
    #[serde(flatten)]
    pub workflow: Workflow,
    pub stages: Vec<Stage>,
}

/// Request payload for updating a workflow's mutable admin fields.
#[derive(Debug, Serialize)]
pub struct UpdateWorkflowRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReplayDlqResponse {
    pub replayed_count: usize,
}

/// HTTP client for masterd's Admin surface.
pub struct Client {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

/// Default total timeout for daemon readiness probe.
const DEFAULT_READY_TIMEOUT_MS: u64 = 5000;

/// Initial backoff delay for readiness probe.
const INITIAL_BACKOFF_MS: u64 = 200;

impl Client {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            http: reqwest::Client::new(),
        }
    }

    /// Returns the daemon address (for error messages).
    pub fn addr(&self) -> &str {
        &self.base_url
    }

    /// Probes `/health`. Returns Ok(true) if healthy, Err on connection failure.
    pub async fn check_health(&self) -> Result<bool, ClientError> {
        let url = format!("{}/health", self.base_url);
        let response = self.http.get(&url).headers(self.headers()).send().await?;
        Ok(response.status().is_success())
    }

    /// Waits for the daemon to answer `/health`, retrying with exponential
    /// backoff starting at 200ms over a 5s window.
    pub async fn wait_for_ready(&self) -> Result<(), ClientError> {
        self.wait_for_ready_with_timeout(DEFAULT_READY_TIMEOUT_MS)
            .await
    }

    pub async fn wait_for_ready_with_timeout(&self, timeout_ms: u64) -> Result<(), ClientError> {
        let start = std::time::Instant::now();
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            match self.check_health().await {
                Ok(true) => return Ok(()),
                Ok(false) | Err(_) => {
                    let elapsed = start.elapsed().as_millis() as u64;
                    if elapsed >= timeout_ms {
                        return Err(ClientError::DaemonNotReady {
                            addr: self.base_url.clone(),
                            timeout_ms,
                        });
                    }

                    eprintln!(
                        "waiting for daemon at {} (retrying in {}ms)",
                        self.base_url, backoff_ms
                    );

                    let remaining = timeout_ms.saturating_sub(elapsed);
                    let sleep_ms = backoff_ms.min(remaining);
                    tokio::time::sleep(std::time::Duration::from_millis(sleep_ms)).await;
                    backoff_ms = backoff_ms.saturating_mul(2);
                }
            }
        }
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = &self.token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }

    async fn handle_error(&self, response: reqwest::Response) -> ClientError {
        let status = response.status().as_u16();

        if status == 401 {
            return ClientError::Unauthorized;
        }
        if status == 404 {
            return ClientError::NotFound("resource not found".to_string());
        }

        let message = response
            .json::<Envelope<()>>()
            .await
            .map(|e| e.message)
            .unwrap_or_else(|_| "unknown error".to_string());

        ClientError::HttpError { status, message }
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }
        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        envelope
            .data
            .ok_or_else(|| ClientError::InvalidResponse("response carried no data".to_string()))
    }

    /// POST /api/v1/scan-config/projects
    pub async fn create_project(&self, req: CreateProjectRequest) -> Result<Project, ClientError> {
        let url = format!("{}/api/v1/scan-config/projects", self.base_url);
        let response = self
            .http
            .post(&url)
            .headers(self.headers())
            .json(&req)
            .send()
            .await?;
        self.send_json(response).await
    }

    /// GET /api/v1/scan-config/projects
    pub async fn list_projects(&self) -> Result<Vec<Project>, ClientError> {
        let url = format!("{}/api/v1/scan-config/projects", self.base_url);
        let response = self.http.get(&url).headers(self.headers()).send().await?;
        self.send_json(response).await
    }

    /// GET /api/v1/scan-config/projects/{id}
    pub async fn get_project(&self, id: &str) -> Result<Project, ClientError> {
        let url = format!("{}/api/v1/scan-config/projects/{}", self.base_url, id);
        let response = self.http.get(&url).headers(self.headers()).send().await?;
        self.send_json(response).await
    }

    /// POST /api/v1/scan-config/workflows
    pub async fn create_workflow(&self, req: CreateWorkflowRequest) -> Result<WorkflowDetail, ClientError> {
        let url = format!("{}/api/v1/scan-config/workflows", self.base_url);
        let response = self
            .http
            .post(&url)
            .headers(self.headers())
            .json(&req)
            .send()
            .await?;
        self.send_json(response).await
    }

    /// GET /api/v1/scan-config/workflows?project_id=...
    pub async fn list_workflows(&self, project_id: &str) -> Result<Vec<Workflow>, ClientError> {
        let url = format!(
            "{}/api/v1/scan-config/workflows?project_id={}",
            self.base_url,
            urlencoding::encode(project_id)
        );
        let response = self.http.get(&url).headers(self.headers()).send().await?;
        self.send_json(response).await
    }

    /// GET /api/v1/scan-config/workflows/{id}
    pub async fn get_workflow(&self, id: &str) -> Result<WorkflowDetail, ClientError> {
        let url = format!("{}/api/v1/scan-config/workflows/{}", self.base_url, id);
        let response = self.http.get(&url).headers(self.headers()).send().await?;
        self.send_json(response).await
    }

    /// PUT /api/v1/scan-config/workflows/{id}
    pub async fn update_workflow(
        &self,
        id: &str,
        req: UpdateWorkflowRequest,
    ) -> Result<Workflow, ClientError> {
        let url = format!("{}/api/v1/scan-config/workflows/{}", self.base_url, id);
        let response = self
            .http
            .put(&url)
            .headers(self.headers())
            .json(&req)
            .send()
            .await?;
        self.send_json(response).await
    }

    /// DELETE /api/v1/scan-config/workflows/{id}
    pub async fn delete_workflow(&self, id: &str) -> Result<(), ClientError> {
        let url = format!("{}/api/v1/scan-config/workflows/{}", self.base_url, id);
        let response = self
            .http
            .delete(&url)
            .headers(self.headers())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }
        Ok(())
    }

    /// Fires a workflow control action (execute/stop/pause/resume/retry/
    /// enable/disable). These endpoints answer with an empty data object,
    /// so the only signal the client needs is a non-error status.
    async fn post_action(&self, id: &str, action: &str) -> Result<(), ClientError> {
        let url = format!(
            "{}/api/v1/scan-config/workflows/{}/{}",
            self.base_url, id, action
        );
        let response = self.http.post(&url).headers(self.headers()).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }
        Ok(())
    }

    pub async fn execute_workflow(&self, id: &str) -> Result<(), ClientError> {
        self.post_action(id, "execute").await
    }

    pub async fn stop_workflow(&self, id: &str) -> Result<(), ClientError> {
        self.post_action(id, "stop").await
    }

    pub async fn pause_workflow(&self, id: &str) -> Result<(), ClientError> {
        self.post_action(id, "pause").await
    }

    pub async fn resume_workflow(&self, id: &str) -> Result<(), ClientError> {
        self.post_action(id, "resume").await
    }

    pub async fn retry_workflow(&self, id: &str) -> Result<(), ClientError> {
        self.post_action(id, "retry").await
    }

    pub async fn enable_workflow(&self, id: &str) -> Result<(), ClientError> {
        self.post_action(id, "enable").await
    }

    pub async fn disable_workflow(&self, id: &str) -> Result<(), ClientError> {
        self.post_action(id, "disable").await
    }

    /// POST /api/v1/asset/etl/errors/replay
    pub async fn replay_dlq(&self) -> Result<usize, ClientError> {
        let url = format!("{}/api/v1/asset/etl/errors/replay", self.base_url);
        let response = self.http.post(&url).headers(self.headers()).send().await?;
        let body: ReplayDlqResponse = self.send_json(response).await?;
        Ok(body.replayed_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_trims_trailing_slash() {
        let client = Client::new("http://localhost:7800/", None);
        assert_eq!(client.base_url, "http://localhost:7800");
    }

    #[test]
    fn client_preserves_url_without_trailing_slash() {
        let client = Client::new("http://localhost:7800", None);
        assert_eq!(client.base_url, "http://localhost:7800");
    }

    #[test]
    fn client_stores_auth_token() {
        let client = Client::new("http://localhost:7800", Some("my-secret-token"));
        assert_eq!(client.token, Some("my-secret-token".to_string()));
    }

    #[test]
    fn client_headers_include_content_type() {
        let client = Client::new("http://localhost:7800", None);
        let headers = client.headers();
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
    }

    #[test]
    fn client_headers_include_auth_when_token_set() {
        let client = Client::new("http://localhost:7800", Some("test-token"));
        let headers = client.headers();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer test-token");
    }

    #[test]
    fn client_headers_omit_auth_when_no_token() {
        let client = Client::new("http://localhost:7800", None);
        let headers = client.headers();
        assert!(headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn client_addr_returns_base_url() {
        let client = Client::new("http://localhost:7800", None);
        assert_eq!(client.addr(), "http://localhost:7800");
    }

    #[tokio::test]
    async fn check_health_fails_when_daemon_not_running() {
        let client = Client::new("http://127.0.0.1:19998", None);
        let result = client.check_health().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn wait_for_ready_times_out_when_daemon_not_running() {
        let client = Client::new("http://127.0.0.1:19998", None);
        let result = client.wait_for_ready_with_timeout(100).await;

        match result {
            Err(ClientError::DaemonNotReady { addr, timeout_ms }) => {
                assert_eq!(addr, "http://127.0.0.1:19998");
                assert_eq!(timeout_ms, 100);
            }
            _ => panic!("expected DaemonNotReady error"),
        }
    }

    #[test]
    fn daemon_not_ready_error_message_includes_hint() {
        let err = ClientError::DaemonNotReady {
            addr: "http://127.0.0.1:7800".to_string(),
            timeout_ms: 5000,
        };
        let msg = err.to_string();
        assert!(msg.contains("127.0.0.1:7800"));
        assert!(msg.contains("5000ms"));
        assert!(msg.contains("MASTERD_TOKEN"));
    }

    #[test]
    fn connection_failed_error_suggests_start_command() {
        let err = ClientError::ConnectionFailed {
            addr: "http://127.0.0.1:7800".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("masterd"));
        assert!(msg.contains("MASTERD_ADDR"));
    }

    #[test]
    fn unauthorized_error_suggests_token_options() {
        let err = ClientError::Unauthorized;
        let msg = err.to_string();
        assert!(msg.contains("MASTERD_TOKEN"));
        assert!(msg.contains("--token"));
    }
}
