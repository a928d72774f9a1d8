//! ---
//! flx_section: "01-core-functionality"
//! flx_subsection: "module"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Primary orchestration and lifecycle management."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
//! Operator session core for a flexographic printing line.
//!
//! [`Session`] owns every piece of mutable job state and is driven by three
//! inputs: telemetry samples, clock ticks and operator commands. It answers
//! with [`Effect`]s for the outside world and [`SessionEvent`]s for displays.
//! [`ConsoleRuntime`] wires a session to a telemetry source, the relay, the
//! bus and the state store.

pub mod adapter;
pub mod detector;
pub mod dispatcher;
pub mod error;
pub mod offset;
pub mod queue;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod stats;
pub mod timers;
pub mod view;

pub use adapter::{SourceEvent, SourceKind};
pub use detector::{DetectorState, StopDetector, StopReasonCatalog};
pub use dispatcher::{
    Command, CommandDispatcher, CommandGuardContext, CommandKind, FinishRequest,
};
pub use error::{CoreError, GuardViolation, Result};
pub use offset::OffsetManager;
pub use queue::{OrderQueue, QueueSlot};
pub use runtime::{ConsoleRuntime, OperatorInput, RuntimeHandle, AUDIT_FILE};
pub use scheduler::{RateLimiter, Scheduler, SchedulerTick, SecondTicker};
pub use session::{
    CommandOutcome, CommandReport, ConfirmationKind, Effect, Session, SessionEvent,
    SessionSettings,
};
pub use stats::JobSummary;
pub use timers::{TimerState, TimerSubsystem};
pub use view::{PrepStatus, SessionView, SlotView, SpeedStatus};
