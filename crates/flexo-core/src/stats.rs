//! ---
//! flx_section: "01-core-functionality"
//! flx_subsection: "module"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Job summary figures and production record assembly."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
use chrono::{DateTime, Local, Utc};
use flexo_msg::{Order, ProductionRecord, StopEvent};
use uuid::Uuid;

use crate::timers::TimerState;

/// Performance figures for a finished job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobSummary {
    /// Units per minute of run time.
    pub avg_speed: u64,
    pub availability: f64,
    pub performance: f64,
    /// Percent, availability times performance.
    pub oee: u8,
}

impl JobSummary {
    pub fn compute(quantity: u64, run_secs: u64, stop_secs: u64, target_qty: u64) -> Self {
        let avg_speed = if run_secs > 0 {
            (quantity as f64 / (run_secs as f64 / 60.0)).round() as u64
        } else {
            0
        };
        let total = run_secs + stop_secs;
        let availability = if total > 0 {
            run_secs as f64 / total as f64
        } else {
            1.0
        };
        let performance = if target_qty > 0 {
            (quantity as f64 / target_qty as f64).min(1.0)
        } else {
            1.0
        };
        let oee = (availability * performance * 100.0).round().clamp(0.0, 100.0) as u8;
        Self {
            avg_speed,
            availability,
            performance,
            oee,
        }
    }
}

/// Seconds to minutes, one decimal.
pub fn minutes(secs: u64) -> f64 {
    (secs as f64 / 6.0).round() / 10.0
}

/// Operator-confirmed numbers for a finish.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishFigures {
    pub good_qty: u64,
    pub defect_qty: u64,
    pub operator: String,
    pub shift: String,
}

pub fn build_record(
    order: &Order,
    quantity: u64,
    figures: FinishFigures,
    timers: &TimerState,
    stops: &[StopEvent],
    finished_at: DateTime<Utc>,
) -> ProductionRecord {
    let summary = JobSummary::compute(quantity, timers.job_run, timers.job_stop, order.target_qty);
    ProductionRecord {
        id: Uuid::new_v4(),
        order_id: order.id.clone(),
        order_no: order.order_no.clone(),
        box_no: order.box_no.clone(),
        customer: order.customer.clone(),
        product_name: order.product_name.clone(),
        operator: figures.operator,
        shift: figures.shift,
        target_qty: order.target_qty,
        good_qty: figures.good_qty,
        defect_qty: figures.defect_qty,
        prep_minutes: minutes(timers.prep),
        run_minutes: minutes(timers.job_run),
        stop_minutes: minutes(timers.job_stop),
        run_seconds: timers.job_run,
        stop_seconds: timers.job_stop,
        stop_count: stops.len(),
        avg_speed: summary.avg_speed,
        oee: summary.oee,
        date: finished_at.with_timezone(&Local).date_naive(),
        finished_at,
        stop_reasons: stops.to_vec(),
    }
}
