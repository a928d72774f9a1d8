//! ---
//! flx_section: "01-core-functionality"
//! flx_subsection: "module"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Runtime helpers supporting the session loop."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::error;

/// Async rate limiter over a tokio interval.
#[derive(Debug)]
pub struct RateLimiter {
    interval: tokio::time::Interval,
}

impl RateLimiter {
    pub fn new(period: Duration) -> Self {
        Self::with_behavior(period, MissedTickBehavior::Delay)
    }

    /// Missed ticks are dropped; the consumer catches up from elapsed time.
    pub fn skipping(period: Duration) -> Self {
        Self::with_behavior(period, MissedTickBehavior::Skip)
    }

    fn with_behavior(period: Duration, behavior: MissedTickBehavior) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(behavior);
        Self { interval }
    }

    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }
}

/// Counts whole periods of monotonic time.
///
/// A late wake-up reports every period it slept through, so timers stay
/// aligned with real time under load.
#[derive(Debug, Clone)]
pub struct SecondTicker {
    period: Duration,
    last: Duration,
}

impl SecondTicker {
    pub fn new(start: Duration, period: Duration) -> Self {
        Self {
            period: period.max(Duration::from_millis(1)),
            last: start,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Periods completed since the previous call.
    pub fn due(&mut self, now: Duration) -> u64 {
        let elapsed = now.saturating_sub(self.last);
        let periods = (elapsed.as_nanos() / self.period.as_nanos()) as u64;
        if periods > 0 {
            self.last += self.period * periods as u32;
        }
        periods
    }

    /// Start a fresh period at `now`, dropping the partial one in progress.
    pub fn resync(&mut self, now: Duration) {
        self.last = now;
    }
}

/// What woke the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerTick {
    Timer,
    Simulation,
    Poll,
}

/// The session's only time source: timer, simulation and poll cadences
/// multiplexed on one task. Ties resolve in that order.
#[derive(Debug)]
pub struct Scheduler {
    timer: RateLimiter,
    simulation: Option<RateLimiter>,
    poll: Option<RateLimiter>,
}

impl Scheduler {
    pub fn new(timer_period: Duration) -> Self {
        Self {
            timer: RateLimiter::skipping(timer_period),
            simulation: None,
            poll: None,
        }
    }

    pub fn with_simulation(mut self, period: Duration) -> Self {
        self.simulation = Some(RateLimiter::new(period));
        self
    }

    pub fn with_poll(mut self, period: Duration) -> Self {
        self.poll = Some(RateLimiter::skipping(period));
        self
    }

    pub async fn next(&mut self) -> SchedulerTick {
        tokio::select! {
            biased;
            _ = self.timer.tick() => SchedulerTick::Timer,
            _ = tick_optional(&mut self.simulation) => SchedulerTick::Simulation,
            _ = tick_optional(&mut self.poll) => SchedulerTick::Poll,
        }
    }
}

async fn tick_optional(limiter: &mut Option<RateLimiter>) {
    match limiter {
        Some(limiter) => {
            limiter.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Named producer tasks, joined together on shutdown.
#[derive(Debug, Default)]
pub struct TaskSet {
    tasks: Vec<(&'static str, JoinHandle<Result<()>>)>,
}

impl TaskSet {
    pub fn spawn<F>(&mut self, name: &'static str, fut: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.tasks.push((name, tokio::spawn(fut)));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every task; failures are logged, not propagated.
    pub async fn join(self) {
        let (names, handles): (Vec<_>, Vec<_>) = self.tasks.into_iter().unzip();
        let results = futures::future::join_all(handles).await;
        for (name, result) in names.into_iter().zip(results) {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(task = name, error = %err, "task ended with error"),
                Err(err) => error!(task = name, error = %err, "task join failure"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticker_counts_whole_periods_only() {
        let mut ticker = SecondTicker::new(Duration::ZERO, Duration::from_secs(1));
        assert_eq!(ticker.due(Duration::from_millis(999)), 0);
        assert_eq!(ticker.due(Duration::from_millis(1000)), 1);
        assert_eq!(ticker.due(Duration::from_millis(4200)), 3);
        assert_eq!(ticker.due(Duration::from_millis(4999)), 0);
        assert_eq!(ticker.due(Duration::from_millis(5000)), 1);
    }

    #[test]
    fn resync_restarts_the_period() {
        let mut ticker = SecondTicker::new(Duration::ZERO, Duration::from_secs(1));
        ticker.resync(Duration::from_millis(600));
        assert_eq!(ticker.due(Duration::from_millis(1200)), 0);
        assert_eq!(ticker.due(Duration::from_millis(1600)), 1);
    }

    #[test]
    fn ticker_ignores_time_going_backwards() {
        let mut ticker = SecondTicker::new(Duration::from_secs(10), Duration::from_secs(1));
        assert_eq!(ticker.due(Duration::from_secs(3)), 0);
        assert_eq!(ticker.due(Duration::from_secs(11)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_interleaves_cadences() {
        let mut scheduler = Scheduler::new(Duration::from_secs(1))
            .with_simulation(Duration::from_millis(250))
            .with_poll(Duration::from_secs(2));
        let mut timer = 0;
        let mut simulation = 0;
        let mut poll = 0;
        let start = Instant::now();
        loop {
            let tick = scheduler.next().await;
            if start.elapsed() > Duration::from_millis(2100) {
                break;
            }
            match tick {
                SchedulerTick::Timer => timer += 1,
                SchedulerTick::Simulation => simulation += 1,
                SchedulerTick::Poll => poll += 1,
            }
        }
        // every interval fires immediately, then on its period
        assert_eq!(timer, 3);
        assert_eq!(poll, 2);
        assert_eq!(simulation, 9);
    }

    #[tokio::test]
    async fn task_set_joins_all_tasks() {
        let mut tasks = TaskSet::default();
        tasks.spawn("ok", async { Ok(()) });
        tasks.spawn("fails", async { Err(anyhow::anyhow!("boom")) });
        assert_eq!(tasks.len(), 2);
        tasks.join().await;
    }
}
