//! ---
//! flx_section: "11-simulation"
//! flx_subsection: "module"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Simulation runtime helpers and scenario engines."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use flexo_common::{LineConfig, SimulationConfig};
use flexo_msg::Sample;

use crate::machine::{SpeedProfile, VirtualMachine};
use crate::replay::ReplayEngine;

/// Where simulated readings come from.
#[derive(Debug, Clone)]
pub enum SimulationMode {
    Synthetic,
    Replay(PathBuf),
}

/// Produces one sample per simulation tick.
#[derive(Debug)]
pub struct SimulationEngine {
    machine: VirtualMachine,
    replay: Option<ReplayEngine>,
    last: Option<Sample>,
    tick: Duration,
}

impl SimulationEngine {
    pub fn new(mode: SimulationMode, profile: SpeedProfile, seed: u64, tick: Duration) -> Result<Self> {
        let replay = match &mode {
            SimulationMode::Replay(path) => Some(
                ReplayEngine::from_path(path)
                    .with_context(|| format!("unable to load replay {}", path.display()))?,
            ),
            SimulationMode::Synthetic => None,
        };
        Ok(Self {
            machine: VirtualMachine::new(profile, seed),
            replay,
            last: None,
            tick,
        })
    }

    pub fn from_config(sim: &SimulationConfig, line: &LineConfig) -> Result<Self> {
        let mode = match &sim.replay_file {
            Some(path) => SimulationMode::Replay(path.clone()),
            None => SimulationMode::Synthetic,
        };
        let mut engine = Self::new(mode, SpeedProfile::from_line(line), sim.seed, sim.tick_interval)?;
        engine.machine.set_speed_factor(sim.speed_factor);
        Ok(engine)
    }

    pub fn machine(&self) -> &VirtualMachine {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut VirtualMachine {
        &mut self.machine
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick
    }

    /// Next reading. Replayed data ignores the motor; it is what was recorded.
    pub fn next_sample(&mut self, now: DateTime<Utc>) -> Sample {
        let sample = match self.replay.as_mut().and_then(ReplayEngine::next_update) {
            Some(update) => self
                .last
                .unwrap_or_else(|| Sample::idle(now))
                .merged(&update, now),
            None => self.machine.step(self.tick, now),
        };
        self.last = Some(sample);
        sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn synthetic_mode_applies_configured_factor() -> Result<()> {
        let sim = SimulationConfig {
            speed_factor: -1.0,
            ..SimulationConfig::default()
        };
        let mut engine = SimulationEngine::from_config(&sim, &LineConfig::default())?;
        let sample = engine.next_sample(Utc::now());
        assert_eq!(sample.line_speed, 0.0);
        assert_eq!(engine.tick_interval(), Duration::from_millis(100));
        Ok(())
    }

    #[test]
    fn replay_mode_merges_partial_records() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, r#"{{"cumulativeCount":100,"lineSpeed":90}}"#)?;
        writeln!(file, r#"{{"lineSpeed":0}}"#)?;
        file.flush()?;
        let sim = SimulationConfig {
            replay_file: Some(file.path().to_path_buf()),
            ..SimulationConfig::default()
        };
        let mut engine = SimulationEngine::from_config(&sim, &LineConfig::default())?;
        let now = Utc::now();
        let first = engine.next_sample(now);
        let second = engine.next_sample(now);
        assert_eq!(first.line_speed, 90.0);
        assert_eq!(second.cumulative_count, 100.0);
        assert_eq!(second.line_speed, 0.0);
        Ok(())
    }
}
