//! ---
//! flx_section: "03-persistence-logging"
//! flx_subsection: "module"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Persistence abstractions and storage bindings."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
#![warn(missing_docs)]
//! Durable local state: the order queue, the production history and the
//! operator audit trail. Everything on disk is JSON.

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Error type for the persistence subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Wrapper for IO errors encountered while reading/writing persistence files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Reported when a stored document fails integrity verification.
    #[error("hash mismatch in {0}")]
    HashMismatch(String),
}

pub mod audit;
pub mod store;

pub use audit::{read_audit_log, AuditEntry, AuditLogWriter, AuditOutcome};
pub use store::{StateStore, HISTORY_FILE, ORDERS_FILE, STORE_VERSION};
