//! ---
//! flx_section: "01-core-functionality"
//! flx_subsection: "module"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Counter offset and tare handling."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
use flexo_msg::Sample;
use serde::{Deserialize, Serialize};

/// Maps the machine's cumulative counter onto the quantity of the current job.
///
/// The press counter never resets; a job's quantity is the counter minus the
/// offset captured when the job was tared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OffsetManager {
    offset: f64,
}

impl OffsetManager {
    pub fn new(offset: f64) -> Self {
        Self { offset }
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Zero the job quantity at `counter`.
    pub fn tare(&mut self, counter: f64) {
        self.offset = counter;
    }

    /// Manual correction: a positive delta raises the job quantity.
    pub fn adjust(&mut self, delta: i64) {
        self.offset -= delta as f64;
    }

    /// Quantity since the last tare, rounded down. May be negative after a
    /// downward correction.
    pub fn relative_quantity(&self, sample: &Sample) -> i64 {
        (sample.cumulative_count - self.offset).floor() as i64
    }

    /// Quantity as shown to the operator.
    pub fn display_quantity(&self, sample: &Sample) -> u64 {
        self.relative_quantity(sample).max(0) as u64
    }
}
