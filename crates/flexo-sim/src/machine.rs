//! ---
//! flx_section: "11-simulation"
//! flx_subsection: "module"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Simulation runtime helpers and scenario engines."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
use std::time::Duration;

use chrono::{DateTime, Utc};
use flexo_common::LineConfig;
use flexo_msg::Sample;
use rand::prelude::*;

/// Speeds the simulator steers between, in units per minute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedProfile {
    pub max_speed: f64,
    pub base_speed: f64,
}

impl SpeedProfile {
    pub fn from_line(line: &LineConfig) -> Self {
        Self {
            max_speed: line.max_speed,
            base_speed: line.standard_speed(),
        }
    }
}

/// Virtual press: a speed controller plus an integrating pulse counter.
#[derive(Debug)]
pub struct VirtualMachine {
    profile: SpeedProfile,
    rng: StdRng,
    speed_factor: f64,
    motor_on: bool,
    counter: f64,
}

impl VirtualMachine {
    pub fn new(profile: SpeedProfile, seed: u64) -> Self {
        Self {
            profile,
            rng: StdRng::seed_from_u64(seed),
            speed_factor: 0.0,
            motor_on: true,
            counter: 0.0,
        }
    }

    pub fn profile(&self) -> SpeedProfile {
        self.profile
    }

    pub fn speed_factor(&self) -> f64 {
        self.speed_factor
    }

    /// Clamped to `[-1, 1]`.
    pub fn set_speed_factor(&mut self, factor: f64) {
        self.speed_factor = if factor.is_finite() {
            factor.clamp(-1.0, 1.0)
        } else {
            0.0
        };
    }

    pub fn motor_on(&self) -> bool {
        self.motor_on
    }

    pub fn set_motor(&mut self, on: bool) {
        self.motor_on = on;
    }

    pub fn counter(&self) -> f64 {
        self.counter
    }

    /// Speed the controller aims for this tick, jitter included.
    pub fn target_speed(&mut self) -> f64 {
        let SpeedProfile {
            max_speed,
            base_speed,
        } = self.profile;
        let f = self.speed_factor;
        let speed = if f <= -1.0 {
            0.0
        } else if f >= 1.0 {
            max_speed + self.jitter(5.0)
        } else if f == 0.0 {
            base_speed + self.jitter(10.0)
        } else if f > 0.0 {
            base_speed + (max_speed - base_speed) * f + self.jitter(7.5)
        } else {
            base_speed * (1.0 + f) + self.jitter(5.0)
        };
        speed.max(0.0)
    }

    /// Advance the machine by `dt` and report the resulting reading.
    pub fn step(&mut self, dt: Duration, now: DateTime<Utc>) -> Sample {
        let speed = if self.motor_on {
            self.target_speed()
        } else {
            0.0
        };
        self.counter += speed / 60.0 * dt.as_secs_f64();
        Sample {
            cumulative_count: self.counter,
            line_speed: speed,
            status_code: i64::from(speed > 0.0),
            timestamp: now,
        }
    }

    fn jitter(&mut self, amplitude: f64) -> f64 {
        self.rng.gen_range(-amplitude..=amplitude)
    }
}
