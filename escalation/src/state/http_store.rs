//! Remote data API adapter for the persistence collaborator.
//!
//! ```text
//! GET  {base}/tasks?active=true   -> [TaskSnapshot, ...]
//! PUT  {base}/tasks/{id}          <- TaskSnapshot
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::store::{decode_records, StoreError, StoreResult, TaskStore};
use super::types::TaskSnapshot;

/// HTTP client for the task data service.
pub struct HttpTaskStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpTaskStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> StoreResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
        })
    }

    /// Send `Authorization: Bearer <key>` with every request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

async fn check(response: reqwest::Response) -> StoreResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Rejected {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl TaskStore for HttpTaskStore {
    async fn load_active_tasks(&self) -> StoreResult<Vec<TaskSnapshot>> {
        let url = format!("{}/tasks", self.base_url);
        let request = self.client.get(&url).query(&[("active", "true")]);
        let response = check(self.authorize(request).send().await?).await?;

        let rows: Vec<Value> = response.json().await?;
        let total = rows.len();
        let tasks: Vec<TaskSnapshot> = decode_records(rows)
            .into_iter()
            .filter(|t| !t.is_terminal())
            .collect();
        debug!(url, total, accepted = tasks.len(), "Loaded active tasks");
        Ok(tasks)
    }

    async fn save(&self, snapshot: &TaskSnapshot) -> StoreResult<()> {
        let url = format!("{}/tasks/{}", self.base_url, snapshot.id);
        let request = self.client.put(&url).json(snapshot);
        check(self.authorize(request).send().await?).await?;
        Ok(())
    }
}
