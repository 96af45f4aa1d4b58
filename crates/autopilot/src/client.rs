//! Client for the control API of a running scheduler

use anyhow::{Context, Result};
use autopilot_lib::{ExecutionResult, SchedulerStatus};
use reqwest::{Client, StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;

/// Reply to enable/disable requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToggleResponse {
    pub task: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownResponse {
    pub status: String,
}

/// Error body returned by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// `addr` is `host:port` as configured for the API server
    pub fn new(addr: &str) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(2))
            // execute can run a whole job
            .timeout(Duration::from_secs(300))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(&format!("http://{addr}/")).context("Invalid API address")?;

        Ok(Self { client, base_url })
    }

    /// Whether a scheduler answers on the configured address
    pub async fn is_reachable(&self) -> bool {
        let Ok(url) = self.base_url.join("healthz") else {
            return false;
        };
        self.client
            .get(url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .is_ok()
    }

    pub async fn status(&self) -> Result<SchedulerStatus> {
        self.get("status")
            .await?
            .context("Status endpoint not found")
    }

    /// `None` when the task name is unknown
    pub async fn enable(&self, name: &str) -> Result<Option<ToggleResponse>> {
        self.post(&format!("tasks/{name}/enable")).await
    }

    /// `None` when the task name is unknown
    pub async fn disable(&self, name: &str) -> Result<Option<ToggleResponse>> {
        self.post(&format!("tasks/{name}/disable")).await
    }

    /// `None` when the task name is unknown
    pub async fn execute(&self, name: &str) -> Result<Option<ExecutionResult>> {
        self.post(&format!("tasks/{name}/execute")).await
    }

    pub async fn shutdown(&self) -> Result<ShutdownResponse> {
        self.post("shutdown")
            .await?
            .context("Shutdown endpoint not found")
    }

    /// Make a GET request; `None` on 404
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        Self::decode(response).await
    }

    /// Make a POST request without a body; `None` on 404
    async fn post<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .send()
            .await
            .context("Failed to send request")?;

        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<Option<T>> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            anyhow::bail!("API error ({}): {}", status, message);
        }

        response
            .json()
            .await
            .map(Some)
            .context("Failed to parse response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_joins_task_paths() {
        let client = ApiClient::new("127.0.0.1:8787").unwrap();
        let url = client.base_url.join("tasks/health_check/enable").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8787/tasks/health_check/enable");
    }

    #[tokio::test]
    async fn test_unreachable_daemon() {
        // Port 1 is never served in the test environment
        let client = ApiClient::new("127.0.0.1:1").unwrap();
        assert!(!client.is_reachable().await);
        assert!(client.status().await.is_err());
    }
}
