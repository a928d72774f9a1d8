//! ---
//! flx_section: "02-messaging-data-model"
//! flx_subsection: "module"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Shared data model, topic bus, and delivery tracking."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::types::{Message, Topic};
use crate::{MessagingError, Result};

/// Publish/subscribe abstraction used by every bus backend.
pub trait Transport: Send + Sync {
    /// Publish a message on its topic, returning how many subscribers received it.
    fn publish(&self, msg: Message) -> Result<usize>;
    /// Open a new subscription on `topic`.
    fn subscribe(&self, topic: Topic) -> Subscription;
    /// Human-readable transport name for logging/metrics.
    fn name(&self) -> &'static str;
}

/// Receiving end of a topic.
pub struct Subscription {
    topic: Topic,
    rx: broadcast::Receiver<Message>,
}

impl Subscription {
    /// Topic this subscription listens on.
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Wait for the next message.
    ///
    /// A lagging receiver skips what it missed and keeps going; only a closed
    /// topic ends the subscription.
    pub async fn recv(&mut self) -> Result<Message> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Ok(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "subscriber lagged, dropping oldest messages");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(MessagingError::Closed {
                        topic: self.topic.to_string(),
                    })
                }
            }
        }
    }

    /// Non-blocking receive used by tests and drain loops.
    pub fn try_recv(&mut self) -> Option<Message> {
        loop {
            match self.rx.try_recv() {
                Ok(message) => return Some(message),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// In-process bus with one bounded broadcast channel per topic.
#[derive(Clone)]
pub struct InMemoryBus {
    prefix: String,
    capacity: usize,
    channels: Arc<Mutex<HashMap<Topic, broadcast::Sender<Message>>>>,
    connected: Arc<AtomicBool>,
}

impl InMemoryBus {
    /// Create a bus whose topic paths live under `prefix`.
    pub fn new(prefix: impl Into<String>, capacity: usize) -> Self {
        Self {
            prefix: prefix.into(),
            capacity: capacity.max(1),
            channels: Arc::new(Mutex::new(HashMap::new())),
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate broker connectivity; publishes fail while disconnected.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Whether publishes are currently accepted.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn sender(&self, topic: Topic) -> broadcast::Sender<Message> {
        let mut channels = self.channels.lock();
        channels
            .entry(topic)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new("factory", 64)
    }
}

impl Transport for InMemoryBus {
    fn publish(&self, msg: Message) -> Result<usize> {
        let path = msg.topic.path(&self.prefix);
        if !self.is_connected() {
            return Err(MessagingError::Disconnected { topic: path });
        }
        let kind = msg.kind();
        // No subscribers is not a failure: the broker simply has nobody to deliver to.
        let delivered = self.sender(msg.topic).send(msg).unwrap_or(0);
        debug!(topic = %path, kind, delivered, "published message");
        Ok(delivered)
    }

    fn subscribe(&self, topic: Topic) -> Subscription {
        Subscription {
            topic,
            rx: self.sender(topic).subscribe(),
        }
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sample;
    use chrono::Utc;

    #[test]
    fn subscribers_only_see_their_topic() {
        let bus = InMemoryBus::default();
        let mut updates = bus.subscribe(Topic::MachineUpdate);
        let mut raw = bus.subscribe(Topic::DebugRaw);

        bus.publish(Message::machine_update(Sample::idle(Utc::now())))
            .expect("publish");

        assert_eq!(updates.try_recv().map(|m| m.topic), Some(Topic::MachineUpdate));
        assert!(raw.try_recv().is_none());
    }

    #[test]
    fn publish_without_subscribers_is_accepted() {
        let bus = InMemoryBus::default();
        let delivered = bus
            .publish(Message::debug_raw(serde_json::json!({})))
            .expect("publish");
        assert_eq!(delivered, 0);
    }

    #[test]
    fn disconnected_bus_rejects_publish() {
        let bus = InMemoryBus::new("plant", 4);
        bus.set_connected(false);
        let err = bus
            .publish(Message::debug_raw(serde_json::json!({})))
            .unwrap_err();
        assert!(matches!(err, MessagingError::Disconnected { ref topic } if topic == "plant/debug/raw"));
    }

    #[test]
    fn lagging_subscriber_keeps_latest_messages() {
        let bus = InMemoryBus::new("factory", 2);
        let mut sub = bus.subscribe(Topic::DebugRaw);
        for n in 0..5 {
            bus.publish(Message::debug_raw(serde_json::json!({ "n": n })))
                .expect("publish");
        }
        let first = sub.try_recv().expect("message after lag");
        assert_eq!(first.payload, crate::MessagePayload::Raw(serde_json::json!({ "n": 3 })));
    }
}
