//! ---
//! flx_section: "11-simulation"
//! flx_subsection: "module"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Simulation runtime module exports and shared types."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
//! Virtual press used when no relay is available, plus replay of recorded samples.

pub mod generator;
pub mod machine;
pub mod replay;

pub use generator::{SimulationEngine, SimulationMode};
pub use machine::{SpeedProfile, VirtualMachine};
pub use replay::ReplayEngine;
