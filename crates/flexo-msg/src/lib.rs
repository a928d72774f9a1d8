//! ---
//! flx_section: "02-messaging-data-model"
//! flx_subsection: "module"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Shared data model, topic bus, and delivery tracking."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
#![warn(missing_docs)]
//! Data model and publish/subscribe plumbing shared by the console crates.

pub mod bus;
pub mod qos;
pub mod types;

/// Shared result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;

/// Errors raised by the bus and the delivery tracker.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// The bus is marked disconnected, nothing was sent.
    #[error("bus disconnected, cannot publish on {topic}")]
    Disconnected {
        /// Topic path the publish targeted.
        topic: String,
    },
    /// Every sender for the subscribed topic has been dropped.
    #[error("subscription to {topic} closed")]
    Closed {
        /// Topic path of the closed subscription.
        topic: String,
    },
    /// Wrapper for JSON serialization or deserialization problems.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub use bus::{InMemoryBus, Subscription, Transport};
pub use qos::{DeliveryGuarantee, QoSManager, ReliablePublisher, RetryReport};
pub use types::{
    CompletionDetails, CompletionRecord, CompletionStatus, Message, MessagePayload, Order,
    OrderId, OrderStatus, ProductionRecord, Sample, SampleUpdate, StopEvent, Topic,
};
