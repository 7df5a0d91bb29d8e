//! Message bus collaborator.
//!
//! Terminal state transitions are published for a downstream aggregator to
//! consume; the gateway itself never reads them back. The in-memory bus
//! fans out over a tokio broadcast channel and records published events
//! for assertions in tests.

use std::{fmt, sync::Arc};

use serde_json::Value;
use tokio::sync::{broadcast, Mutex};

use crate::error::Result;

/// A published bus event.
#[derive(Debug, Clone)]
pub struct BusEvent {
    /// Topic the event was published on.
    pub topic: String,
    /// JSON payload.
    pub payload: Value,
}

/// Publish/subscribe surface the gateway depends on.
#[async_trait::async_trait]
pub trait Bus: Send + Sync + fmt::Debug {
    /// Publishes an event. Must not block dispatch; failures are the
    /// implementation's to log.
    async fn publish(&self, topic: &str, payload: Value) -> Result<()>;

    /// Subscribes to all topics. Receivers that fall behind lose events.
    fn subscribe(&self) -> broadcast::Receiver<BusEvent>;
}

/// In-memory bus for tests and single-node deployments.
#[derive(Debug, Clone)]
pub struct MemoryBus {
    sender: broadcast::Sender<BusEvent>,
    published: Arc<Mutex<Vec<BusEvent>>>,
}

impl MemoryBus {
    /// Creates a bus with the given broadcast capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, published: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Every event published so far, in order.
    pub async fn published(&self) -> Vec<BusEvent> {
        self.published.lock().await.clone()
    }

    /// Events published on a specific topic, in order.
    pub async fn published_on(&self, topic: &str) -> Vec<BusEvent> {
        self.published.lock().await.iter().filter(|e| e.topic == topic).cloned().collect()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait::async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, topic: &str, payload: Value) -> Result<()> {
        let event = BusEvent { topic: topic.to_string(), payload };
        self.published.lock().await.push(event.clone());
        // No subscribers is fine; the recorded log still captures the event.
        let _ = self.sender.send(event);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }
}

/// Bus that discards everything. Used when event emission is disabled.
#[derive(Debug, Default, Clone)]
pub struct NoOpBus {
    sender: Option<broadcast::Sender<BusEvent>>,
}

impl NoOpBus {
    /// Creates a new discarding bus.
    pub fn new() -> Self {
        Self { sender: None }
    }
}

#[async_trait::async_trait]
impl Bus for NoOpBus {
    async fn publish(&self, _topic: &str, _payload: Value) -> Result<()> {
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        // A fresh channel nobody publishes to.
        let (sender, receiver) = broadcast::channel(1);
        drop(sender);
        receiver
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn publish_records_and_broadcasts() {
        let bus = MemoryBus::default();
        let mut receiver = bus.subscribe();

        bus.publish("messages.sent", json!({"id": 1})).await.unwrap();

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.topic, "messages.sent");
        assert_eq!(received.payload, json!({"id": 1}));

        assert_eq!(bus.published().await.len(), 1);
    }

    #[tokio::test]
    async fn published_on_filters_by_topic() {
        let bus = MemoryBus::default();
        bus.publish("messages.sent", json!(1)).await.unwrap();
        bus.publish("messages.failed", json!(2)).await.unwrap();
        bus.publish("messages.sent", json!(3)).await.unwrap();

        let sent = bus.published_on("messages.sent").await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].payload, json!(3));
    }

    #[tokio::test]
    async fn noop_bus_discards() {
        let bus = NoOpBus::new();
        bus.publish("anything", json!(null)).await.unwrap();

        let mut receiver = bus.subscribe();
        assert!(receiver.recv().await.is_err());
    }
}
