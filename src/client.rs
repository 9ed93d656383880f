//! HTTP client for a remote OpenDesk server.
//!
//! Configuration is via environment variable or explicit host/port:
//! - `OPENDESK_URL` - Base URL (default: `http://localhost:9212`)

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::DEFAULT_PORT;

/// HTTP client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Server error: {0}")]
    Server(String),
}

/// HTTP client for the task API.
#[derive(Debug, Clone)]
pub struct OpenDeskClient {
    base_url: String,
    client: Client,
}

impl OpenDeskClient {
    /// Create client from `OPENDESK_URL`, falling back to localhost.
    pub fn from_env() -> Self {
        let base_url = std::env::var("OPENDESK_URL")
            .unwrap_or_else(|_| format!("http://localhost:{DEFAULT_PORT}"));
        Self::new(base_url)
    }

    /// Client for `http://{host}:{port}`.
    pub fn for_host(host: &str, port: u16) -> Self {
        Self::new(format!("http://{host}:{port}"))
    }

    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.get(format!("{}{}", self.base_url, path))
    }

    async fn error_for(response: reqwest::Response) -> ClientError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => ClientError::NotFound(body),
            StatusCode::BAD_REQUEST => ClientError::BadRequest(body),
            _ => ClientError::Server(format!("{}: {}", status, body)),
        }
    }

    async fn handle_json<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(Self::error_for(response).await)
        }
    }

    // ============================================================
    // Operations
    // ============================================================

    /// Display names of the available tasks, ordered by id.
    pub async fn list_scripts(&self) -> Result<Vec<String>, ClientError> {
        let response = self.get("/scripts").send().await?;
        Self::handle_json(response).await
    }

    /// Run a task by display name or filename and return its output.
    pub async fn run_script(&self, name: &str) -> Result<String, ClientError> {
        let path = format!("/scripts/{}", urlencoding::encode(name));
        let response = self.get(&path).send().await?;
        if response.status().is_success() {
            Ok(response.text().await?)
        } else {
            Err(Self::error_for(response).await)
        }
    }

    /// Check that the server is reachable.
    pub async fn health(&self) -> Result<(), ClientError> {
        let response = self.get("/health").send().await?;
        Self::handle_json::<serde_json::Value>(response)
            .await
            .map(|_| ())
    }
}
