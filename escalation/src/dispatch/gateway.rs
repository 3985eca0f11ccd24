//! Per-channel routing with a bounded wait.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::{DeliveryResult, DispatchPayload, Dispatcher};
use crate::policy::Channel;

/// Routes each channel to its collaborator and bounds how long a delivery
/// may take. A timed-out delivery counts as `Failed`.
pub struct DispatchGateway {
    routes: HashMap<Channel, Arc<dyn Dispatcher>>,
    fallback: Option<Arc<dyn Dispatcher>>,
    timeout: Duration,
}

impl DispatchGateway {
    pub fn new(timeout: Duration) -> Self {
        Self {
            routes: HashMap::new(),
            fallback: None,
            timeout,
        }
    }

    /// Same collaborator for every channel.
    pub fn uniform(dispatcher: Arc<dyn Dispatcher>, timeout: Duration) -> Self {
        Self::new(timeout).with_fallback(dispatcher)
    }

    pub fn with_route(mut self, channel: Channel, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.routes.insert(channel, dispatcher);
        self
    }

    /// Used for channels without an explicit route.
    pub fn with_fallback(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.fallback = Some(dispatcher);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn route(&self, channel: Channel) -> Option<&Arc<dyn Dispatcher>> {
        self.routes.get(&channel).or(self.fallback.as_ref())
    }
}

#[async_trait]
impl Dispatcher for DispatchGateway {
    async fn send(&self, channel: Channel, task_id: &str, payload: &DispatchPayload) -> DeliveryResult {
        let Some(dispatcher) = self.route(channel) else {
            warn!(task_id, channel = %channel, "No dispatcher configured for channel");
            return DeliveryResult::Failed(format!("no dispatcher for {channel}"));
        };

        match tokio::time::timeout(self.timeout, dispatcher.send(channel, task_id, payload)).await {
            Ok(result) => result,
            Err(_) => DeliveryResult::Failed(format!(
                "{channel} delivery timed out after {}ms",
                self.timeout.as_millis()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Priority;
    use crate::state::TaskSnapshot;
    use chrono::Utc;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        name: &'static str,
        seen: Mutex<Vec<Channel>>,
    }

    #[async_trait]
    impl Dispatcher for Recording {
        async fn send(&self, channel: Channel, _task_id: &str, _payload: &DispatchPayload) -> DeliveryResult {
            self.seen.lock().unwrap().push(channel);
            DeliveryResult::Sent(format!("{}-{channel}", self.name))
        }
    }

    struct Stalled;

    #[async_trait]
    impl Dispatcher for Stalled {
        async fn send(&self, _channel: Channel, _task_id: &str, _payload: &DispatchPayload) -> DeliveryResult {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            DeliveryResult::Sent("late".into())
        }
    }

    fn payload(channel: Channel) -> DispatchPayload {
        let task = TaskSnapshot::new("t-1", Utc::now(), Priority::MustNotMiss);
        DispatchPayload::for_step(&task, channel, 0, 1)
    }

    #[tokio::test]
    async fn routes_by_channel_then_fallback() {
        let voice = Arc::new(Recording {
            name: "voice",
            ..Default::default()
        });
        let default = Arc::new(Recording {
            name: "default",
            ..Default::default()
        });
        let gateway = DispatchGateway::new(Duration::from_secs(5))
            .with_route(Channel::Call, voice.clone())
            .with_fallback(default.clone());

        let call = gateway.send(Channel::Call, "t-1", &payload(Channel::Call)).await;
        let push = gateway.send(Channel::Push, "t-1", &payload(Channel::Push)).await;

        assert_eq!(call, DeliveryResult::Sent("voice-call".into()));
        assert_eq!(push, DeliveryResult::Sent("default-push".into()));
        assert_eq!(*voice.seen.lock().unwrap(), vec![Channel::Call]);
        assert_eq!(*default.seen.lock().unwrap(), vec![Channel::Push]);
    }

    #[tokio::test]
    async fn missing_route_fails_delivery() {
        let gateway = DispatchGateway::new(Duration::from_secs(5));
        let result = gateway
            .send(Channel::Messaging, "t-1", &payload(Channel::Messaging))
            .await;
        assert!(!result.is_sent());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_delivery_times_out_as_failed() {
        let gateway = DispatchGateway::uniform(Arc::new(Stalled), Duration::from_secs(10));
        let result = gateway.send(Channel::Call, "t-1", &payload(Channel::Call)).await;
        match result {
            DeliveryResult::Failed(reason) => assert!(reason.contains("timed out")),
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
