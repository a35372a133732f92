//! HTTP client for a running symdex service

use crate::config::DEFAULT_PORT;
use crate::query::{MatchResults, Reference};
use crate::server::routes::{ErrorResponse, RegisterResponse, ServiceStatus};
use crate::live::BufferSnapshot;
use crate::project::ProjectState;
use crate::symbol::{Location, Occurrence};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Non-2xx answer from the service
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("API error {status}: {message}")]
pub struct ApiError {
    pub status: u16,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("No symdex service at {0}")]
    NotRunning(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to start the service: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct SymdexClient {
    client: Client,
    base_url: String,
    port: u16,
}

impl Default for SymdexClient {
    fn default() -> Self {
        Self::new("127.0.0.1", DEFAULT_PORT)
    }
}

impl SymdexClient {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            client: Client::new(),
            base_url: format!("http://{}:{}", host, port),
            port,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn classify(&self, e: reqwest::Error) -> ClientError {
        if e.is_connect() {
            ClientError::NotRunning(self.base_url.clone())
        } else {
            ClientError::Http(e)
        }
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&text)
            .map(|body| body.error)
            .unwrap_or(text);
        Err(ApiError {
            status: status.as_u16(),
            message,
        }
        .into())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> ClientResult<T> {
        let response = self
            .client
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        Self::decode(response).await
    }

    /// `Ok(true)` when a service answers
    pub async fn ping(&self) -> ClientResult<bool> {
        match self.client.get(self.url("")).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => match self.classify(e) {
                ClientError::NotRunning(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    /// Start `program serve` in the background unless a service already
    /// answers. Returns whether a new process was started.
    pub async fn ensure_running(&self, program: &Path, timeout: Duration) -> ClientResult<bool> {
        if self.ping().await? {
            return Ok(false);
        }

        Command::new(program)
            .arg("serve")
            .arg("--port")
            .arg(self.port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.ping().await? {
                return Ok(true);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        Err(ClientError::NotRunning(self.base_url.clone()))
    }

    pub async fn register(&self, library_path: &str, project_root: &str) -> ClientResult<RegisterResponse> {
        self.get(
            "register",
            &[
                ("library_path", library_path.to_string()),
                ("project_root", project_root.to_string()),
            ],
        )
        .await
    }

    /// Reparse `file_name`, or sweep the whole project when `None`
    pub async fn parse(&self, file_name: Option<&str>) -> ClientResult<bool> {
        let query: Vec<(&str, String)> = file_name
            .map(|f| vec![("file_name", f.to_string())])
            .unwrap_or_default();
        self.get("parse", &query).await
    }

    /// Start a background sweep. On a project that was never swept, wait up
    /// to `timeout` for it to finish so the first query sees an index.
    /// Returns the last observed state.
    pub async fn ensure_indexed(&self, timeout: Duration) -> ClientResult<ProjectState> {
        let before = self.status().await?.state;
        self.parse(None).await?;
        if before != ProjectState::Ready {
            return Ok(before);
        }

        let deadline = Instant::now() + timeout;
        loop {
            let state = self.status().await?.state;
            if state == ProjectState::Idle || Instant::now() >= deadline {
                return Ok(state);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn queue_size(&self) -> ClientResult<usize> {
        self.get("queue_size", &[]).await
    }

    pub async fn raw_range_search(&self, starts_with: &str) -> ClientResult<Vec<(String, String)>> {
        self.get("raw_range_search", &[("starts_with", starts_with.to_string())]).await
    }

    pub async fn match_prefix(&self, prefix: &str, limit: usize) -> ClientResult<MatchResults> {
        self.get("match", &[("prefix", prefix.to_string()), ("limit", limit.to_string())])
            .await
    }

    pub async fn builtin_header_path(&self) -> ClientResult<String> {
        self.get("builtin_header_path", &[]).await
    }

    pub async fn file_args(&self, file_name: &str) -> ClientResult<Option<Vec<String>>> {
        self.get("file_args", &[("file_name", file_name.to_string())]).await
    }

    pub async fn definition(&self, symbol_id: &str) -> ClientResult<Option<Occurrence>> {
        self.get("definition", &[("symbol_id", symbol_id.to_string())]).await
    }

    pub async fn references(&self, symbol_id: &str) -> ClientResult<Vec<Reference>> {
        self.get("references", &[("symbol_id", symbol_id.to_string())]).await
    }

    pub async fn buffer(&self, file_name: &str, content: &str) -> ClientResult<bool> {
        let response = self
            .client
            .post(self.url("buffer"))
            .json(&BufferSnapshot::new(file_name, content))
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        Self::decode(response).await
    }

    fn cursor(file_name: &str, line: u32, col: u32) -> [(&'static str, String); 3] {
        [
            ("file_name", file_name.to_string()),
            ("line", line.to_string()),
            ("col", col.to_string()),
        ]
    }

    pub async fn goto_definition(&self, file_name: &str, line: u32, col: u32) -> ClientResult<Option<Location>> {
        self.get("goto_definition", &Self::cursor(file_name, line, col)).await
    }

    pub async fn find_references(&self, file_name: &str, line: u32, col: u32) -> ClientResult<Vec<Reference>> {
        self.get("find_references", &Self::cursor(file_name, line, col)).await
    }

    pub async fn current_scope(&self, file_name: &str, line: u32) -> ClientResult<Option<String>> {
        self.get(
            "current_scope",
            &[("file_name", file_name.to_string()), ("line", line.to_string())],
        )
        .await
    }

    pub async fn unload(&self, file_name: &str) -> ClientResult<bool> {
        self.get("unload", &[("file_name", file_name.to_string())]).await
    }

    pub async fn status(&self) -> ClientResult<ServiceStatus> {
        self.get("status", &[]).await
    }
}
