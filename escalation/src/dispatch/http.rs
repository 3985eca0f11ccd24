//! Delivery collaborators: webhook-backed and log-only.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{DeliveryResult, DispatchPayload, Dispatcher};
use crate::policy::Channel;

/// Longest provider error body kept in a failure reason
const MAX_REASON_BODY: usize = 200;

/// POSTs the payload as JSON to a provider webhook.
///
/// Any 2xx is `Sent`. The provider reference is read from the response
/// body's `id` or `sid` field when present, otherwise generated.
pub struct HttpDispatcher {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpDispatcher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            api_key: None,
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn provider_ref(body: &str, channel: Channel) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            ["id", "sid"]
                .iter()
                .find_map(|key| v.get(*key).and_then(Value::as_str).map(String::from))
        })
        .unwrap_or_else(|| format!("{channel}-{}", uuid::Uuid::new_v4()))
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn send(&self, channel: Channel, task_id: &str, payload: &DispatchPayload) -> DeliveryResult {
        let mut request = self.client.post(&self.url).json(payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(task_id, channel = %channel, error = %e, "Provider unreachable");
                return DeliveryResult::Failed(e.to_string());
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.is_success() {
            let reference = provider_ref(&body, channel);
            debug!(task_id, channel = %channel, provider_ref = %reference, "Provider accepted");
            DeliveryResult::Sent(reference)
        } else {
            let snippet: String = body.chars().take(MAX_REASON_BODY).collect();
            DeliveryResult::Failed(format!("provider returned {status}: {snippet}"))
        }
    }
}

/// Logs the step and reports it sent. Stands in for channels with no
/// provider configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDispatcher;

#[async_trait]
impl Dispatcher for LogDispatcher {
    async fn send(&self, channel: Channel, task_id: &str, payload: &DispatchPayload) -> DeliveryResult {
        info!(
            task_id,
            channel = %channel,
            priority = %payload.priority,
            step = payload.step_index,
            attempt = payload.attempt,
            "Escalation step (log only)"
        );
        DeliveryResult::Sent(format!("log-{}", uuid::Uuid::new_v4()))
    }
}
