//! ---
//! flx_section: "01-core-functionality"
//! flx_subsection: "module"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Shared primitives and utilities for the console runtime."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
//! Shared primitives for the flexo console workspace.
//! This crate exposes configuration loading, tracing initialisation and the
//! clock abstraction consumed by the monitoring core.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    AppConfig, BusConfig, LineConfig, LoadedAppConfig, LoggingConfig, MetricsConfig, Mode,
    RelayConfig, SessionConfig, SimulationConfig, SimulationRoute, SpeedBase, StopReasonEntry,
    StorageConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use time::{Clock, ManualClock, SharedClock, SystemClock};
