//! ---
//! flx_section: "01-core-functionality"
//! flx_subsection: "module"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Shared primitives and utilities for the console runtime."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
//! Clock abstraction shared by the scheduler, timers and stop detector.
//!
//! Wall-clock time stamps records and audit lines; the monotonic reading drives
//! every elapsed-time rule so that a system clock jump never skews a counter.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Source of wall-clock and monotonic time.
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
    /// Monotonic time elapsed since the clock was created.
    fn monotonic(&self) -> Duration;
}

/// Clock handle shared across tasks.
pub type SharedClock = Arc<dyn Clock>;

/// Production clock backed by [`Utc::now`] and [`Instant`].
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Hand-driven clock for deterministic tests.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualState>>,
}

#[derive(Debug)]
struct ManualState {
    wall: DateTime<Utc>,
    elapsed: Duration,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualState {
                wall: start,
                elapsed: Duration::ZERO,
            })),
        }
    }

    /// Move both wall-clock and monotonic time forward.
    pub fn advance(&self, by: Duration) {
        let mut state = self.inner.lock();
        state.elapsed += by;
        state.wall += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.inner.lock().wall
    }

    fn monotonic(&self) -> Duration {
        self.inner.lock().elapsed
    }
}
