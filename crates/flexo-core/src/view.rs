//! ---
//! flx_section: "01-core-functionality"
//! flx_subsection: "module"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Read-only session snapshot for displays."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
use chrono::{DateTime, Utc};
use flexo_common::StopReasonEntry;
use flexo_msg::{Order, OrderId, StopEvent};
use serde::Serialize;
use strum::Display;

use crate::session::ConfirmationKind;
use crate::timers::TimerState;

/// Preparation time against the standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum PrepStatus {
    Green,
    Yellow,
    Red,
}

impl PrepStatus {
    pub fn classify(prep_secs: u64, standard_secs: u64, yellow_percent: f64) -> Self {
        let prep = prep_secs as f64;
        let standard = standard_secs as f64;
        if prep < standard {
            PrepStatus::Green
        } else if prep <= standard * yellow_percent / 100.0 {
            PrepStatus::Yellow
        } else {
            PrepStatus::Red
        }
    }
}

/// Line speed against the standard speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum SpeedStatus {
    Stopped,
    Low,
    BelowStandard,
    OnTarget,
}

impl SpeedStatus {
    pub fn classify(speed: f64, standard: f64, low_percent: f64) -> Self {
        if speed <= 0.0 {
            SpeedStatus::Stopped
        } else if speed < standard * low_percent / 100.0 {
            SpeedStatus::Low
        } else if speed < standard {
            SpeedStatus::BelowStandard
        } else {
            SpeedStatus::OnTarget
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlotView {
    Placeholder,
    Order { order: Order },
}

impl SlotView {
    pub fn order(&self) -> Option<&Order> {
        match self {
            SlotView::Order { order } => Some(order),
            SlotView::Placeholder => None,
        }
    }
}

/// Everything a display needs, copied out of the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub timestamp: DateTime<Utc>,
    pub connected: bool,
    pub line_speed: f64,
    pub cumulative_count: f64,
    pub offset: f64,
    pub quantity: u64,
    pub relative_quantity: i64,
    pub target_qty: u64,
    pub remaining: i64,
    pub percent_complete: f64,
    pub near_complete: bool,
    pub speed_status: SpeedStatus,
    pub prep_status: PrepStatus,
    pub timers: TimerState,
    pub continuous_production: bool,
    pub awaiting_reason_since: Option<DateTime<Utc>>,
    pub stop_events: Vec<StopEvent>,
    pub slots: Vec<SlotView>,
    pub selected: Option<OrderId>,
    pub auto_next: bool,
    pub operator: String,
    pub shift: String,
    pub pending_confirmation: Option<ConfirmationKind>,
    pub stop_reasons: Vec<StopReasonEntry>,
}

impl SessionView {
    pub fn running_order(&self) -> Option<&Order> {
        self.slots.first().and_then(SlotView::order)
    }

    pub fn selected_index(&self) -> Option<usize> {
        let selected = self.selected.as_ref()?;
        self.slots
            .iter()
            .position(|slot| slot.order().is_some_and(|order| &order.id == selected))
    }
}

/// Share of the target reached, in percent, capped at 100.
pub fn percent_complete(quantity: i64, target_qty: u64) -> f64 {
    if target_qty == 0 {
        return 0.0;
    }
    (quantity.max(0) as f64 / target_qty as f64 * 100.0).min(100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prep_bands() {
        assert_eq!(PrepStatus::classify(599, 600, 120.0), PrepStatus::Green);
        assert_eq!(PrepStatus::classify(600, 600, 120.0), PrepStatus::Yellow);
        assert_eq!(PrepStatus::classify(700, 600, 120.0), PrepStatus::Yellow);
        assert_eq!(PrepStatus::classify(721, 600, 120.0), PrepStatus::Red);
    }

    #[test]
    fn speed_bands() {
        assert_eq!(SpeedStatus::classify(0.0, 280.0, 80.0), SpeedStatus::Stopped);
        assert_eq!(SpeedStatus::classify(200.0, 280.0, 80.0), SpeedStatus::Low);
        assert_eq!(SpeedStatus::classify(250.0, 280.0, 80.0), SpeedStatus::BelowStandard);
        assert_eq!(SpeedStatus::classify(290.0, 280.0, 80.0), SpeedStatus::OnTarget);
    }

    #[test]
    fn percent_is_capped() {
        assert_eq!(percent_complete(50, 200), 25.0);
        assert_eq!(percent_complete(300, 200), 100.0);
        assert_eq!(percent_complete(-4, 200), 0.0);
        assert_eq!(percent_complete(10, 0), 0.0);
    }
}
