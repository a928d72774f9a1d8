//! ---
//! flx_section: "01-core-functionality"
//! flx_subsection: "module"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Shared primitives and utilities for the console runtime."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_mode() -> Mode {
    Mode::Simulation
}

fn default_machine_id() -> String {
    "press-01".to_owned()
}

fn default_max_speed() -> f64 {
    350.0
}

fn default_speed_base_percent() -> f64 {
    80.0
}

fn default_small_gap_threshold() -> u64 {
    50
}

fn default_std_prep_time_minutes() -> u64 {
    10
}

fn default_prep_yellow_percent() -> f64 {
    120.0
}

fn default_speed_low_percent() -> f64 {
    80.0
}

fn default_stop_reasons() -> Vec<StopReasonEntry> {
    [
        ("001", "Feed Skew"),
        ("002", "Print Blurry"),
        ("003", "Paper Tear"),
        ("004", "Low Ink"),
        ("005", "Mechanical Failure"),
        ("006", "Other"),
    ]
    .into_iter()
    .map(|(code, label)| StopReasonEntry {
        code: code.to_owned(),
        label: label.to_owned(),
    })
    .collect()
}

fn default_sim_tick() -> Duration {
    Duration::from_millis(100)
}

fn default_simulation_seed() -> u64 {
    0xF1E_C0
}

fn default_true() -> bool {
    true
}

fn default_relay_url() -> String {
    "http://localhost:5000/api/".to_owned()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_topic_prefix() -> String {
    "factory".to_owned()
}

fn default_channel_capacity() -> usize {
    64
}

fn default_completion_retries() -> u8 {
    5
}

fn default_completion_retry_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_timer_tick() -> Duration {
    Duration::from_secs(1)
}

fn default_command_cooldown() -> Duration {
    Duration::from_millis(1000)
}

fn default_operator() -> String {
    "operator".to_owned()
}

fn default_shift() -> String {
    "day".to_owned()
}

fn default_storage_directory() -> PathBuf {
    PathBuf::from("target/flexo-state")
}

fn default_history_cap() -> usize {
    1000
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 9898))
}

/// Primary configuration object for the console runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_mode")]
    pub mode: Mode,
    #[serde(default)]
    pub line: LineConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    /// `None` when no file was found and built-in defaults are in effect.
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "FLEXO_CONFIG";

    /// Load configuration from disk, respecting the `FLEXO_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    ///
    /// An explicit `FLEXO_CONFIG` path must exist. Otherwise the first existing
    /// candidate wins, falling back to defaults when none is present.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        debug!(
            inspected = %candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "no configuration file found, using defaults"
        );
        let config = AppConfig::default();
        config.validate()?;
        Ok(LoadedAppConfig {
            config,
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.line.validate()?;
        self.simulation.validate()?;
        self.relay.validate()?;
        if self.bus.channel_capacity == 0 {
            return Err(anyhow!("bus.channel_capacity must be greater than zero"));
        }
        if self.session.timer_tick.is_zero() {
            return Err(anyhow!("session.timer_tick_ms must be greater than zero"));
        }
        if self.storage.history_cap == 0 {
            return Err(anyhow!("storage.history_cap must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            line: LineConfig::default(),
            simulation: SimulationConfig::default(),
            relay: RelayConfig::default(),
            bus: BusConfig::default(),
            session: SessionConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Which telemetry backend feeds the session.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Poll the remote telemetry relay.
    Production,
    /// Drive the session from the virtual machine.
    #[default]
    Simulation,
}

impl Mode {
    pub fn is_simulation(&self) -> bool {
        matches!(self, Mode::Simulation)
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" | "relay" => Ok(Mode::Production),
            "simulation" | "sim" => Ok(Mode::Simulation),
            other => Err(format!("unknown mode: {}", other)),
        }
    }
}

/// Which speed the simulator treats as the "standard" running speed.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpeedBase {
    #[default]
    Standard,
    Maximum,
}

/// One entry of the operator stop-reason catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StopReasonEntry {
    pub code: String,
    pub label: String,
}

/// Physical line parameters and display thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineConfig {
    #[serde(default = "default_machine_id")]
    pub machine_id: String,
    /// Maximum line speed in units per minute.
    #[serde(default = "default_max_speed")]
    pub max_speed: f64,
    #[serde(default)]
    pub speed_base: SpeedBase,
    #[serde(default = "default_speed_base_percent")]
    pub speed_base_percent: f64,
    /// Remaining quantity at or below which a stalled job is treated as finished.
    #[serde(default = "default_small_gap_threshold")]
    pub small_gap_threshold: u64,
    #[serde(default = "default_std_prep_time_minutes")]
    pub std_prep_time_minutes: u64,
    #[serde(default = "default_prep_yellow_percent")]
    pub prep_yellow_percent: f64,
    #[serde(default = "default_speed_low_percent")]
    pub speed_low_percent: f64,
    #[serde(default = "default_stop_reasons")]
    pub stop_reasons: Vec<StopReasonEntry>,
}

impl LineConfig {
    /// Speed the line is expected to hold during normal production.
    pub fn standard_speed(&self) -> f64 {
        match self.speed_base {
            SpeedBase::Maximum => self.max_speed,
            SpeedBase::Standard => self.max_speed * self.speed_base_percent / 100.0,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_speed.is_nan() || self.max_speed <= 0.0 {
            return Err(anyhow!("line.max_speed must be positive"));
        }
        if !(1.0..=100.0).contains(&self.speed_base_percent) {
            return Err(anyhow!(
                "line.speed_base_percent must be within 1..=100, got {}",
                self.speed_base_percent
            ));
        }
        if self.stop_reasons.is_empty() {
            return Err(anyhow!("line.stop_reasons must list at least one reason"));
        }
        Ok(())
    }
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            machine_id: default_machine_id(),
            max_speed: default_max_speed(),
            speed_base: SpeedBase::default(),
            speed_base_percent: default_speed_base_percent(),
            small_gap_threshold: default_small_gap_threshold(),
            std_prep_time_minutes: default_std_prep_time_minutes(),
            prep_yellow_percent: default_prep_yellow_percent(),
            speed_low_percent: default_speed_low_percent(),
            stop_reasons: default_stop_reasons(),
        }
    }
}

/// Whether simulated samples go straight to the session or round-trip via the bus.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SimulationRoute {
    #[default]
    Local,
    Remote,
}

impl std::str::FromStr for SimulationRoute {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(SimulationRoute::Local),
            "remote" => Ok(SimulationRoute::Remote),
            other => Err(format!("unknown simulation route: {}", other)),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default)]
    pub route: SimulationRoute,
    #[serde(rename = "tick_interval_ms", default = "default_sim_tick")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub tick_interval: Duration,
    #[serde(default = "default_simulation_seed")]
    pub seed: u64,
    /// Initial speed factor in `[-1, 1]`.
    #[serde(default)]
    pub speed_factor: f64,
    #[serde(default = "default_true")]
    pub auto_stop_at_target: bool,
    /// Recorded samples to replay instead of synthesising.
    #[serde(default)]
    pub replay_file: Option<PathBuf>,
}

impl SimulationConfig {
    fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            return Err(anyhow!("simulation.tick_interval_ms must be greater than zero"));
        }
        if !(-1.0..=1.0).contains(&self.speed_factor) {
            return Err(anyhow!(
                "simulation.speed_factor must be within [-1, 1], got {}",
                self.speed_factor
            ));
        }
        Ok(())
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            route: SimulationRoute::default(),
            tick_interval: default_sim_tick(),
            seed: default_simulation_seed(),
            speed_factor: 0.0,
            auto_stop_at_target: true,
            replay_file: None,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_relay_url")]
    pub base_url: String,
    #[serde(rename = "poll_interval_ms", default = "default_poll_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub poll_interval: Duration,
    #[serde(rename = "request_timeout_ms", default = "default_request_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub request_timeout: Duration,
}

impl RelayConfig {
    fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(anyhow!("relay.poll_interval_ms must be greater than zero"));
        }
        if self.base_url.trim().is_empty() {
            return Err(anyhow!("relay.base_url must not be empty"));
        }
        Ok(())
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_url: default_relay_url(),
            poll_interval: default_poll_interval(),
            request_timeout: default_request_timeout(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_completion_retries")]
    pub completion_max_retries: u8,
    #[serde(
        rename = "completion_retry_interval_ms",
        default = "default_completion_retry_interval"
    )]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub completion_retry_interval: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            topic_prefix: default_topic_prefix(),
            channel_capacity: default_channel_capacity(),
            completion_max_retries: default_completion_retries(),
            completion_retry_interval: default_completion_retry_interval(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(rename = "timer_tick_ms", default = "default_timer_tick")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub timer_tick: Duration,
    #[serde(rename = "command_cooldown_ms", default = "default_command_cooldown")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub command_cooldown: Duration,
    #[serde(default = "default_true")]
    pub auto_next: bool,
    #[serde(default = "default_operator")]
    pub operator: String,
    #[serde(default = "default_shift")]
    pub shift: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timer_tick: default_timer_tick(),
            command_cooldown: default_command_cooldown(),
            auto_next: true,
            operator: default_operator(),
            shift: default_shift(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: default_storage_directory(),
            history_cap: default_history_cap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Disable when a terminal UI owns stdout.
    #[serde(default = "default_true")]
    pub stdout: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            stdout: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}
