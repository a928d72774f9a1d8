//! ---
//! flx_section: "01-core-functionality"
//! flx_subsection: "module"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Error types for the session core."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
use flexo_msg::OrderId;

use crate::dispatcher::CommandKind;

/// Infrastructure failures raised by the core.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Persistence(#[from] flexo_persistence::PersistenceError),
    #[error(transparent)]
    Relay(#[from] flexo_net::RelayError),
    #[error(transparent)]
    Messaging(#[from] flexo_msg::MessagingError),
    #[error("runtime already stopped")]
    RuntimeStopped,
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;

/// Why an operator action was refused.
///
/// The display text is shown to the operator as-is. A violation never leaves
/// partial state behind.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GuardViolation {
    #[error("machine is not connected, cannot start")]
    PlcDisconnected,
    #[error("select a queued order first")]
    NoOrderSelected,
    #[error("line is moving at {speed:.0}/min, stop the machine first")]
    LineMoving { speed: f64 },
    #[error("no order is running")]
    NothingRunning,
    #[error("produced quantity is 0, nothing to finish")]
    ZeroQuantity,
    #[error("the running order cannot be moved or deleted")]
    RunningOrderLocked,
    #[error("order is already at the edge of the queue")]
    QueueEdge,
    #[error("order {0} is not in the queue")]
    UnknownOrder(OrderId),
    #[error("{command} repeated within {remaining_ms} ms, ignored")]
    CoolingDown { command: CommandKind, remaining_ms: u64 },
    #[error("no finish is awaiting confirmation")]
    NoConfirmationPending,
    #[error("defect quantity {defect} exceeds produced quantity {produced}")]
    DefectsExceedOutput { defect: u64, produced: u64 },
    #[error("no stop is waiting for a reason")]
    NoPendingStop,
    #[error("stop reason must not be empty")]
    EmptyReason,
    #[error("target quantity must be greater than 0")]
    ZeroTarget,
}
