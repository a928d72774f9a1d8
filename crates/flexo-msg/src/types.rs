//! ---
//! flx_section: "02-messaging-data-model"
//! flx_subsection: "module"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Shared data model, topic bus, and delivery tracking."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use strum::{Display, EnumIter, IntoStaticStr};
use uuid::Uuid;

/// Schema version broadcast alongside every message payload.
pub const SCHEMA_VERSION: u16 = 1;

/// One telemetry reading from the line.
///
/// Speed is in units per minute. The counter is cumulative and only ever moves
/// forward while the machine runs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    /// Cumulative pulse counter.
    pub cumulative_count: f64,
    /// Current line speed, never negative.
    pub line_speed: f64,
    /// Machine status code, `1` running and `0` stopped for the simulator.
    pub status_code: i64,
    /// Time the reading was taken.
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    /// A stopped machine with a zero counter.
    pub fn idle(timestamp: DateTime<Utc>) -> Self {
        Self {
            cumulative_count: 0.0,
            line_speed: 0.0,
            status_code: 0,
            timestamp,
        }
    }

    /// Whether the line is moving.
    pub fn is_running(&self) -> bool {
        self.line_speed > 0.0
    }

    /// Apply a partial reading on top of `self`.
    ///
    /// Missing fields keep their previous value, a missing timestamp takes
    /// `received_at`, and non-finite or negative speeds collapse to zero.
    pub fn merged(&self, update: &SampleUpdate, received_at: DateTime<Utc>) -> Sample {
        let line_speed = update
            .line_speed
            .filter(|speed| speed.is_finite())
            .map(|speed| speed.max(0.0))
            .unwrap_or(self.line_speed);
        let cumulative_count = update
            .cumulative_count
            .filter(|count| count.is_finite())
            .unwrap_or(self.cumulative_count);
        Sample {
            cumulative_count,
            line_speed,
            status_code: update.status_code.unwrap_or(self.status_code),
            timestamp: update.timestamp.unwrap_or(received_at),
        }
    }
}

/// Partially populated sample as received from an upstream producer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleUpdate {
    /// Cumulative pulse counter, if present.
    #[serde(default)]
    pub cumulative_count: Option<f64>,
    /// Line speed, if present.
    #[serde(default)]
    pub line_speed: Option<f64>,
    /// Status code, if present.
    #[serde(default)]
    pub status_code: Option<i64>,
    /// Reading time, if present.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl SampleUpdate {
    /// Extract whatever canonical fields are usable from an arbitrary JSON value.
    ///
    /// Fields with the wrong type are treated as absent rather than failing the
    /// whole reading.
    pub fn from_json(value: &JsonValue) -> Self {
        let number = |key: &str| value.get(key).and_then(JsonValue::as_f64);
        Self {
            cumulative_count: number("cumulativeCount"),
            line_speed: number("lineSpeed"),
            status_code: value.get("statusCode").and_then(|code| {
                code.as_i64()
                    .or_else(|| code.as_f64().map(|code| code as i64))
            }),
            timestamp: value
                .get("timestamp")
                .and_then(JsonValue::as_str)
                .and_then(|raw| raw.parse().ok()),
        }
    }

    /// True when no usable field was found.
    pub fn is_empty(&self) -> bool {
        self.cumulative_count.is_none()
            && self.line_speed.is_none()
            && self.status_code.is_none()
            && self.timestamp.is_none()
    }
}

impl From<Sample> for SampleUpdate {
    fn from(sample: Sample) -> Self {
        Self {
            cumulative_count: Some(sample.cumulative_count),
            line_speed: Some(sample.line_speed),
            status_code: Some(sample.status_code),
            timestamp: Some(sample.timestamp),
        }
    }
}

/// Identifier of a real production order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub String);

impl OrderId {
    /// Allocate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrderId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Lifecycle status of a real order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    /// Waiting in the queue.
    Queued,
    /// Occupying the running slot.
    Running,
    /// Completed and archived.
    Finished,
}

/// Production order as held in the queue and persisted to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Unique identifier.
    pub id: OrderId,
    /// Order number printed on the work ticket.
    pub order_no: String,
    /// Box style code.
    pub box_no: String,
    /// Customer name, if known.
    #[serde(default)]
    pub customer: Option<String>,
    /// Product description, if known.
    #[serde(default)]
    pub product_name: Option<String>,
    /// Quantity the order must reach.
    pub target_qty: u64,
    /// Sequence number used by schedule views.
    #[serde(default)]
    pub seq_no: u32,
    /// Lifecycle status.
    pub status: OrderStatus,
}

impl Order {
    /// Create a queued order with a generated id.
    pub fn new(order_no: impl Into<String>, box_no: impl Into<String>, target_qty: u64) -> Self {
        Self {
            id: OrderId::generate(),
            order_no: order_no.into(),
            box_no: box_no.into(),
            customer: None,
            product_name: None,
            target_qty,
            seq_no: 0,
            status: OrderStatus::Queued,
        }
    }

    /// Product identifier used on completion messages.
    pub fn product_id(&self) -> String {
        product_id(&self.box_no, self.product_name.as_deref())
    }
}

fn product_id(box_no: &str, product_name: Option<&str>) -> String {
    [Some(box_no), product_name]
        .into_iter()
        .flatten()
        .find(|value| !value.trim().is_empty())
        .unwrap_or("UNKNOWN")
        .to_owned()
}

/// A stoppage whose reason the operator has supplied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopEvent {
    /// Time the stop was flagged.
    pub start_time: DateTime<Utc>,
    /// Seconds from flag to reason entry.
    pub duration_seconds: u64,
    /// Operator-facing reason text.
    pub reason_label: String,
    /// Catalog code of the reason, if it came from the catalog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
}

/// Immutable archive entry written when an order finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductionRecord {
    /// Record identifier.
    pub id: Uuid,
    /// Order the record belongs to.
    pub order_id: OrderId,
    /// Order number.
    pub order_no: String,
    /// Box style code.
    pub box_no: String,
    /// Customer name.
    #[serde(default)]
    pub customer: Option<String>,
    /// Product description.
    #[serde(default)]
    pub product_name: Option<String>,
    /// Operator who confirmed the finish.
    pub operator: String,
    /// Shift label.
    pub shift: String,
    /// Target quantity of the order.
    pub target_qty: u64,
    /// Good units confirmed by the operator.
    pub good_qty: u64,
    /// Defective units confirmed by the operator.
    pub defect_qty: u64,
    /// Prep time in minutes, one decimal.
    pub prep_minutes: f64,
    /// Run time in minutes, one decimal.
    pub run_minutes: f64,
    /// Stop time in minutes, one decimal.
    pub stop_minutes: f64,
    /// Job run time in whole seconds.
    #[serde(default)]
    pub run_seconds: u64,
    /// Job stop time in whole seconds.
    #[serde(default)]
    pub stop_seconds: u64,
    /// Number of stop events recorded for the job.
    pub stop_count: usize,
    /// Average speed in units per minute of run time.
    pub avg_speed: u64,
    /// Simplified OEE as a whole percentage.
    pub oee: u8,
    /// Production date.
    pub date: NaiveDate,
    /// Finish time.
    pub finished_at: DateTime<Utc>,
    /// Stop events of the job.
    #[serde(default)]
    pub stop_reasons: Vec<StopEvent>,
}

/// Status carried on completion messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionStatus {
    /// The order was finished normally.
    Completed,
}

/// Completion summary published for downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRecord {
    /// Finished order id.
    pub order_id: OrderId,
    /// Product identifier (box number, product name, or `UNKNOWN`).
    pub product_id: String,
    /// Always [`CompletionStatus::Completed`].
    pub status: CompletionStatus,
    /// Finish time.
    pub timestamp: DateTime<Utc>,
    /// Production figures.
    pub details: CompletionDetails,
}

/// Figures attached to a [`CompletionRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionDetails {
    /// Good units.
    pub good_qty: u64,
    /// Defective units.
    pub defect_qty: u64,
    /// Operator name.
    pub operator: String,
    /// Average speed.
    pub avg_speed: u64,
    /// OEE percentage.
    pub oee: u8,
    /// Run time in seconds.
    pub run_time: u64,
    /// Stop time in seconds.
    pub stop_time: u64,
    /// Stop events of the job.
    pub stop_reasons: Vec<StopEvent>,
}

impl From<&ProductionRecord> for CompletionRecord {
    fn from(record: &ProductionRecord) -> Self {
        Self {
            order_id: record.order_id.clone(),
            product_id: product_id(&record.box_no, record.product_name.as_deref()),
            status: CompletionStatus::Completed,
            timestamp: record.finished_at,
            details: CompletionDetails {
                good_qty: record.good_qty,
                defect_qty: record.defect_qty,
                operator: record.operator.clone(),
                avg_speed: record.avg_speed,
                oee: record.oee,
                run_time: record.run_seconds,
                stop_time: record.stop_seconds,
                stop_reasons: record.stop_reasons.clone(),
            },
        }
    }
}

/// Bus topics used by the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Simulated telemetry published in remote simulation mode.
    MachineUpdate,
    /// Raw upstream payloads as received from the relay.
    DebugRaw,
    /// Order completion summaries.
    ProductionCompletion,
}

impl Topic {
    /// Topic path without prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::MachineUpdate => "machine/update",
            Topic::DebugRaw => "debug/raw",
            Topic::ProductionCompletion => "production/completion",
        }
    }

    /// Full topic path under `prefix`.
    pub fn path(&self, prefix: &str) -> String {
        if prefix.is_empty() {
            self.as_str().to_owned()
        } else {
            format!("{}/{}", prefix.trim_end_matches('/'), self.as_str())
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payloads carried on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum MessagePayload {
    /// Normalised telemetry sample.
    Sample(Sample),
    /// Upstream payload exactly as received.
    Raw(JsonValue),
    /// Order completion summary.
    Completion(CompletionRecord),
}

/// Unified message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for deduplication and tracing.
    pub id: Uuid,
    /// Version of the schema used by the payload.
    pub schema_version: u16,
    /// Topic the message is published on.
    pub topic: Topic,
    /// Timestamp when the message was created.
    pub timestamp: DateTime<Utc>,
    /// Actual payload carried by the message.
    pub payload: MessagePayload,
}

impl Message {
    /// Construct a new message envelope for `topic`.
    pub fn new(topic: Topic, payload: MessagePayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            schema_version: SCHEMA_VERSION,
            topic,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Message carrying a sample on `machine/update`.
    pub fn machine_update(sample: Sample) -> Self {
        Self::new(Topic::MachineUpdate, MessagePayload::Sample(sample))
    }

    /// Message carrying a raw payload on `debug/raw`.
    pub fn debug_raw(raw: JsonValue) -> Self {
        Self::new(Topic::DebugRaw, MessagePayload::Raw(raw))
    }

    /// Message carrying a completion on `production/completion`.
    pub fn completion(record: CompletionRecord) -> Self {
        Self::new(Topic::ProductionCompletion, MessagePayload::Completion(record))
    }

    /// Payload kind as a static string.
    pub fn kind(&self) -> &'static str {
        match &self.payload {
            MessagePayload::Sample(_) => "sample",
            MessagePayload::Raw(_) => "raw",
            MessagePayload::Completion(_) => "completion",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sample_uses_camel_case_wire_names() {
        let sample = Sample {
            cumulative_count: 12.5,
            line_speed: 80.0,
            status_code: 1,
            timestamp: "2024-05-01T08:00:00Z".parse().unwrap(),
        };
        let value = serde_json::to_value(sample).unwrap();
        assert_eq!(value["cumulativeCount"], json!(12.5));
        assert_eq!(value["lineSpeed"], json!(80.0));
        assert_eq!(value["statusCode"], json!(1));
    }

    #[test]
    fn partial_update_keeps_previous_values() {
        let now: DateTime<Utc> = "2024-05-01T08:00:00Z".parse().unwrap();
        let previous = Sample {
            cumulative_count: 500.0,
            line_speed: 120.0,
            status_code: 1,
            timestamp: now,
        };
        let update = SampleUpdate::from_json(&json!({ "lineSpeed": "fast", "statusCode": 0 }));
        let merged = previous.merged(&update, now);
        assert_eq!(merged.cumulative_count, 500.0);
        assert_eq!(merged.line_speed, 120.0);
        assert_eq!(merged.status_code, 0);
    }

    #[test]
    fn legacy_counter_names_are_not_read() {
        let update = SampleUpdate::from_json(&json!({ "di1": 10.0, "totalLength": 11.0 }));
        assert!(update.is_empty());
    }

    #[test]
    fn negative_speed_clamps_to_zero() {
        let now = Utc::now();
        let merged = Sample::idle(now).merged(
            &SampleUpdate {
                line_speed: Some(-4.0),
                ..SampleUpdate::default()
            },
            now,
        );
        assert_eq!(merged.line_speed, 0.0);
    }

    #[test]
    fn product_id_falls_back_to_product_name_then_unknown() {
        let mut order = Order::new("SO-1", "", 100);
        assert_eq!(order.product_id(), "UNKNOWN");
        order.product_name = Some("Carton".into());
        assert_eq!(order.product_id(), "Carton");
        order.box_no = "BX-7".into();
        assert_eq!(order.product_id(), "BX-7");
    }

    #[test]
    fn topics_render_under_prefix() {
        assert_eq!(
            Topic::ProductionCompletion.path("factory"),
            "factory/production/completion"
        );
        assert_eq!(Topic::MachineUpdate.path(""), "machine/update");
    }

    #[test]
    fn completion_status_serialises_uppercase() {
        let value = serde_json::to_value(CompletionStatus::Completed).unwrap();
        assert_eq!(value, json!("COMPLETED"));
    }
}
