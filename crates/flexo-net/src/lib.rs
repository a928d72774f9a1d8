//! ---
//! flx_section: "05-networking-external-interfaces"
//! flx_subsection: "module"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Network connectivity and edge adapters."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
#![warn(missing_docs)]
//! Client side of the telemetry relay: realtime samples, current-order
//! assignment and machine section metadata.

pub mod relay;

pub use relay::{CurrentOrder, HttpRelayClient, MachineSection, RelayError, TelemetryRelay};

/// Result alias for relay calls.
pub type Result<T> = std::result::Result<T, RelayError>;
