use tokio::sync::broadcast;
use uuid::Uuid;

/// Real-time push channel for the UI. Lossy by design: slow subscribers drop
/// old envelopes rather than backpressuring the workers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<serde_json::Value>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<serde_json::Value> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event_type: &str, campaign_id: Uuid, payload: serde_json::Value) {
        let envelope = serde_json::json!({
            "type": event_type,
            "campaignId": campaign_id,
            "payload": payload,
            "at": chrono::Utc::now(),
        });
        // No subscribers is fine.
        let _ = self.sender.send(envelope);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();
        bus.publish("email_sent", id, serde_json::json!({ "to": "a@b.com" }));
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope["type"], "email_sent");
        assert_eq!(envelope["campaignId"], serde_json::json!(id));
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::new(16);
        bus.publish("email_failed", Uuid::new_v4(), serde_json::json!({}));
    }
}
