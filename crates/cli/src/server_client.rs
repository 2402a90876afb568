//! HTTP client for the sluice server control API.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use sluice_core::ExecutionRecord;
use uuid::Uuid;

/// Client for the sluice server REST API.
pub struct ServerClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteResponse {
    pub execution_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

impl ServerClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { base_url, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .http
            .get(self.url(path))
            .send()
            .await
            .with_context(|| format!("server not reachable at {}", self.base_url))?;
        Self::decode(resp).await
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .http
            .post(self.url(path))
            .send()
            .await
            .with_context(|| format!("server not reachable at {}", self.base_url))?;
        Self::decode(resp).await
    }

    /// Non-2xx responses become errors carrying the server's message.
    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            bail!("server returned {}: {}", status, message);
        }
        resp.json().await.context("failed to parse server response")
    }

    pub async fn status(&self) -> Result<Value> {
        self.get_json("/scheduler/status").await
    }

    pub async fn reload(&self) -> Result<Value> {
        self.post_json("/scheduler/reload").await
    }

    pub async fn execute(&self, task_id: i64) -> Result<ExecuteResponse> {
        self.post_json(&format!("/tasks/{task_id}/execute")).await
    }

    pub async fn cancel(&self, task_id: i64) -> Result<CancelResponse> {
        self.post_json(&format!("/tasks/{task_id}/cancel")).await
    }

    pub async fn test(&self, task_id: i64, limit: Option<u32>) -> Result<Value> {
        let path = match limit {
            Some(limit) => format!("/tasks/{task_id}/test?limit={limit}"),
            None => format!("/tasks/{task_id}/test"),
        };
        self.post_json(&path).await
    }

    pub async fn history(&self, task_id: i64, limit: u32) -> Result<Vec<ExecutionRecord>> {
        self.get_json(&format!("/tasks/{task_id}/executions?limit={limit}"))
            .await
    }

    pub async fn execution(&self, execution_id: Uuid) -> Result<ExecutionRecord> {
        self.get_json(&format!("/executions/{execution_id}")).await
    }
}
