//! ---
//! flx_section: "02-messaging-data-model"
//! flx_subsection: "module"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Shared data model, topic bus, and delivery tracking."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::bus::Transport;
use crate::{Message, Result};

/// Delivery guarantees supported by the messaging subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryGuarantee {
    /// Deliver the message at most once; no retry tracking.
    AtMostOnce,
    /// Deliver the message at least once; retries until acknowledgement or `max_retries` reached.
    AtLeastOnce {
        /// Maximum number of retry attempts before declaring the message dropped.
        max_retries: u8,
        /// Minimum waiting period between retry attempts.
        retry_interval: Duration,
    },
}

impl DeliveryGuarantee {
    fn retry_policy(&self) -> Option<(u8, Duration)> {
        match self {
            DeliveryGuarantee::AtLeastOnce {
                max_retries,
                retry_interval,
            } => Some((*max_retries, *retry_interval)),
            DeliveryGuarantee::AtMostOnce => None,
        }
    }
}

/// Tracks sequence numbers and pending acknowledgements for a delivery guarantee.
#[derive(Clone)]
pub struct QoSManager {
    guarantee: DeliveryGuarantee,
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    next_sequence: u64,
    pending: BTreeMap<u64, PendingMessage>,
}

struct PendingMessage {
    message: Message,
    attempts: u8,
    last_attempt: Instant,
}

impl QoSManager {
    /// Create a new QoS manager with the chosen delivery guarantee.
    pub fn new(guarantee: DeliveryGuarantee) -> Self {
        Self {
            guarantee,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Assign a sequence number to a message and track it for retries if required.
    pub fn register(&self, message: &Message) -> u64 {
        let mut guard = self.state.lock();
        guard.next_sequence = guard.next_sequence.wrapping_add(1);
        let sequence = guard.next_sequence;

        if self.guarantee.retry_policy().is_some() {
            guard.pending.insert(
                sequence,
                PendingMessage {
                    message: message.clone(),
                    attempts: 0,
                    last_attempt: Instant::now(),
                },
            );
        }
        sequence
    }

    /// Mark a sequence as acknowledged, removing it from retry tracking.
    pub fn acknowledge(&self, sequence: u64) {
        self.state.lock().pending.remove(&sequence);
    }

    /// Messages due for another attempt, oldest first.
    ///
    /// Entries that exhausted their retries are dropped and returned separately.
    pub fn pending_for_retry(&self) -> (Vec<(u64, Message)>, Vec<(u64, Message)>) {
        let Some((max_retries, interval)) = self.guarantee.retry_policy() else {
            return (Vec::new(), Vec::new());
        };

        let mut guard = self.state.lock();
        let now = Instant::now();
        let mut to_retry = Vec::new();
        let mut exhausted = Vec::new();

        for (sequence, pending) in guard.pending.iter_mut() {
            if pending.attempts >= max_retries {
                exhausted.push(*sequence);
                continue;
            }
            if now.duration_since(pending.last_attempt) >= interval {
                pending.attempts += 1;
                pending.last_attempt = now;
                to_retry.push((*sequence, pending.message.clone()));
            }
        }

        let dropped = exhausted
            .into_iter()
            .filter_map(|sequence| {
                guard
                    .pending
                    .remove(&sequence)
                    .map(|pending| (sequence, pending.message))
            })
            .collect();

        (to_retry, dropped)
    }

    /// Number of messages still awaiting acknowledgement.
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Access the current sequence counter (useful for testing).
    pub fn current_sequence(&self) -> u64 {
        self.state.lock().next_sequence
    }
}

impl Default for QoSManager {
    fn default() -> Self {
        Self::new(DeliveryGuarantee::AtLeastOnce {
            max_retries: 3,
            retry_interval: Duration::from_millis(100),
        })
    }
}

/// Outcome of one retry sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetryReport {
    /// Messages delivered on this sweep.
    pub delivered: usize,
    /// Messages that failed again and stay pending.
    pub failed: usize,
    /// Messages abandoned after exhausting their retries.
    pub dropped: usize,
}

/// Publisher that keeps failed sends for later attempts.
#[derive(Clone)]
pub struct ReliablePublisher {
    transport: Arc<dyn Transport>,
    qos: QoSManager,
}

impl ReliablePublisher {
    /// Wrap `transport` with the given delivery guarantee.
    pub fn new(transport: Arc<dyn Transport>, guarantee: DeliveryGuarantee) -> Self {
        Self {
            transport,
            qos: QoSManager::new(guarantee),
        }
    }

    /// Publish once; on failure the message stays queued for [`Self::retry_due`].
    pub fn publish(&self, message: Message) -> Result<u64> {
        let sequence = self.qos.register(&message);
        match self.transport.publish(message) {
            Ok(_) => {
                self.qos.acknowledge(sequence);
                Ok(sequence)
            }
            Err(err) => {
                warn!(sequence, transport = self.transport.name(), error = %err, "publish failed, queued for retry");
                Err(err)
            }
        }
    }

    /// Retry every message whose retry interval has elapsed.
    pub fn retry_due(&self) -> RetryReport {
        let (due, dropped) = self.qos.pending_for_retry();
        let mut report = RetryReport {
            dropped: dropped.len(),
            ..RetryReport::default()
        };
        for (sequence, message) in dropped {
            warn!(sequence, topic = %message.topic, "giving up on message after max retries");
        }
        for (sequence, message) in due {
            match self.transport.publish(message) {
                Ok(_) => {
                    self.qos.acknowledge(sequence);
                    report.delivered += 1;
                    debug!(sequence, "retried message delivered");
                }
                Err(err) => {
                    report.failed += 1;
                    debug!(sequence, error = %err, "retry failed");
                }
            }
        }
        report
    }

    /// Messages still awaiting delivery.
    pub fn pending(&self) -> usize {
        self.qos.pending_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::types::{Message, Topic};

    fn raw_message() -> Message {
        Message::debug_raw(serde_json::json!({ "cumulativeCount": 1 }))
    }

    #[test]
    fn at_most_once_does_not_retry() {
        let qos = QoSManager::new(DeliveryGuarantee::AtMostOnce);
        qos.register(&raw_message());
        assert!(qos.pending_for_retry().0.is_empty());
        assert_eq!(qos.pending_len(), 0);
    }

    #[test]
    fn at_least_once_retries_until_ack_or_limit() {
        let qos = QoSManager::new(DeliveryGuarantee::AtLeastOnce {
            max_retries: 2,
            retry_interval: Duration::from_millis(1),
        });
        let sequence = qos.register(&raw_message());
        std::thread::sleep(Duration::from_millis(2));
        let (retry_batch, _) = qos.pending_for_retry();
        assert_eq!(retry_batch.len(), 1);
        assert_eq!(retry_batch[0].0, sequence);
        qos.acknowledge(sequence);
        assert!(qos.pending_for_retry().0.is_empty());
    }

    #[test]
    fn retries_stop_after_max_attempts() {
        let qos = QoSManager::new(DeliveryGuarantee::AtLeastOnce {
            max_retries: 1,
            retry_interval: Duration::from_millis(1),
        });
        qos.register(&raw_message());
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(qos.pending_for_retry().0.len(), 1);
        std::thread::sleep(Duration::from_millis(2));
        let (retry, dropped) = qos.pending_for_retry();
        assert!(retry.is_empty(), "should stop retrying after max attempts");
        assert_eq!(dropped.len(), 1);
    }

    #[test]
    fn reliable_publisher_redelivers_after_reconnect() {
        let bus = InMemoryBus::default();
        let mut completions = bus.subscribe(Topic::ProductionCompletion);
        let publisher = ReliablePublisher::new(
            Arc::new(bus.clone()),
            DeliveryGuarantee::AtLeastOnce {
                max_retries: 3,
                retry_interval: Duration::from_millis(1),
            },
        );

        bus.set_connected(false);
        let message = Message::new(Topic::ProductionCompletion, raw_message().payload);
        assert!(publisher.publish(message).is_err());
        assert_eq!(publisher.pending(), 1);

        bus.set_connected(true);
        std::thread::sleep(Duration::from_millis(2));
        let report = publisher.retry_due();
        assert_eq!(report.delivered, 1);
        assert_eq!(publisher.pending(), 0);
        assert!(completions.try_recv().is_some());
    }
}
