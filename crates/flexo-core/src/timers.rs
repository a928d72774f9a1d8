//! ---
//! flx_section: "01-core-functionality"
//! flx_subsection: "module"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Run, stop and preparation second counters."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
use flexo_msg::OrderId;
use serde::{Deserialize, Serialize};

/// Second counters for the current job and the whole session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    pub job_run: u64,
    pub job_stop: u64,
    pub day_run: u64,
    pub day_stop: u64,
    pub prep: u64,
}

/// Which counter a tick landed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickKind {
    Run,
    Stop,
}

/// Classifies each elapsed second as running or stopped.
///
/// Preparation time accumulates from the moment an order becomes running
/// until the line first moves under it.
#[derive(Debug, Clone, Default)]
pub struct TimerSubsystem {
    state: TimerState,
    continuous_production: bool,
    tracked_order: Option<OrderId>,
}

impl TimerSubsystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn continuous_production(&self) -> bool {
        self.continuous_production
    }

    /// Account one second at `speed`.
    pub fn tick(&mut self, speed: f64) -> TickKind {
        let kind = if speed > 0.0 {
            self.continuous_production = true;
            self.state.job_run += 1;
            self.state.day_run += 1;
            TickKind::Run
        } else {
            self.state.job_stop += 1;
            self.state.day_stop += 1;
            TickKind::Stop
        };
        if !self.continuous_production {
            self.state.prep += 1;
        }
        kind
    }

    /// Zero the job counters; day counters are untouched.
    pub fn reset_job(&mut self) {
        self.state.job_run = 0;
        self.state.job_stop = 0;
    }

    /// Follow the running order. A different order restarts preparation.
    ///
    /// Returns whether the running order changed.
    pub fn track_running_order(&mut self, running: Option<&OrderId>) -> bool {
        if self.tracked_order.as_ref() == running {
            return false;
        }
        self.tracked_order = running.cloned();
        self.continuous_production = false;
        self.state.prep = 0;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_second_lands_on_exactly_one_counter() {
        let mut timers = TimerSubsystem::new();
        for speed in [50.0, 50.0, 0.0, 120.0, 0.0, 0.0] {
            timers.tick(speed);
        }
        let state = timers.state();
        assert_eq!(state.job_run, 3);
        assert_eq!(state.job_stop, 3);
        assert_eq!(state.job_run + state.job_stop, 6);
        assert_eq!(state.day_run + state.day_stop, 6);
    }

    #[test]
    fn reset_job_keeps_day_totals() {
        let mut timers = TimerSubsystem::new();
        timers.tick(10.0);
        timers.tick(0.0);
        timers.reset_job();
        let state = timers.state();
        assert_eq!((state.job_run, state.job_stop), (0, 0));
        assert_eq!((state.day_run, state.day_stop), (1, 1));
    }

    #[test]
    fn prep_counts_until_first_movement() {
        let mut timers = TimerSubsystem::new();
        timers.track_running_order(Some(&OrderId::from("a")));
        timers.tick(0.0);
        timers.tick(0.0);
        timers.tick(80.0);
        timers.tick(0.0);
        assert_eq!(timers.state().prep, 2);
        assert!(timers.continuous_production());
    }

    #[test]
    fn new_running_order_restarts_prep() {
        let mut timers = TimerSubsystem::new();
        let a = OrderId::from("a");
        timers.track_running_order(Some(&a));
        timers.tick(0.0);
        timers.tick(60.0);
        assert!(!timers.track_running_order(Some(&a)));
        assert!(timers.track_running_order(Some(&OrderId::from("b"))));
        assert_eq!(timers.state().prep, 0);
        timers.tick(0.0);
        assert_eq!(timers.state().prep, 1);
    }
}
