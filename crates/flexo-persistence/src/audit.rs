//! ---
//! flx_section: "03-persistence-logging"
//! flx_subsection: "module"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Persistence abstractions and storage bindings."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{PersistenceError, Result};

/// How the console answered an operator action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditOutcome {
    /// The command changed state.
    Accepted,
    /// A guard refused the command.
    Rejected,
    /// A follow-up step such as a confirmation prompt or stop reason.
    Info,
}

/// One operator audit line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Sequential identifier assigned when appending.
    #[serde(default)]
    pub sequence: u64,
    /// Time of the action.
    pub timestamp: DateTime<Utc>,
    /// Operator on duty.
    pub operator: String,
    /// Command name.
    pub command: String,
    /// Result of the action.
    pub outcome: AuditOutcome,
    /// Human-readable detail.
    pub message: String,
}

impl AuditEntry {
    /// Build an entry; the sequence is assigned on append.
    pub fn new(
        timestamp: DateTime<Utc>,
        operator: impl Into<String>,
        command: impl Into<String>,
        outcome: AuditOutcome,
        message: impl Into<String>,
    ) -> Self {
        Self {
            sequence: 0,
            timestamp,
            operator: operator.into(),
            command: command.into(),
            outcome,
            message: message.into(),
        }
    }
}

impl fmt::Display for AuditEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} ({}): {}",
            self.timestamp.with_timezone(&Local).format("%H:%M:%S"),
            self.operator,
            self.command,
            self.outcome,
            self.message
        )
    }
}

/// Append-only NDJSON writer for the audit trail.
pub struct AuditLogWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    next_sequence: u64,
}

impl AuditLogWriter {
    /// Open the log for appending, continuing the sequence of an existing file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let next_sequence = if path.exists() {
            last_sequence(path)?
        } else {
            0
        };
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            next_sequence,
        })
    }

    /// Append `entry`, returning its assigned sequence number.
    pub fn append(&mut self, mut entry: AuditEntry) -> Result<u64> {
        self.next_sequence += 1;
        entry.sequence = self.next_sequence;
        let line = serde_json::to_string(&entry)?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(entry.sequence)
    }

    /// Path of the log on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn last_sequence(path: &Path) -> Result<u64> {
    let reader = BufReader::new(File::open(path)?);
    let mut last = 0u64;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(entry) = serde_json::from_str::<AuditEntry>(&line) {
            last = entry.sequence;
        }
    }
    Ok(last)
}

/// Read the most recent `limit` entries, oldest first.
pub fn read_audit_log(path: &Path, limit: usize) -> Result<Vec<AuditEntry>> {
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str::<AuditEntry>(&line).map_err(PersistenceError::from)?);
    }
    let skip = entries.len().saturating_sub(limit);
    Ok(entries.split_off(skip))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(command: &str, outcome: AuditOutcome) -> AuditEntry {
        AuditEntry::new(Utc::now(), "ana", command, outcome, format!("{command} done"))
    }

    #[test]
    fn sequence_continues_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit").join("operator.ndjson");
        {
            let mut writer = AuditLogWriter::open(&path).unwrap();
            assert_eq!(writer.append(entry("start", AuditOutcome::Accepted)).unwrap(), 1);
            assert_eq!(writer.append(entry("finish", AuditOutcome::Rejected)).unwrap(), 2);
        }
        let mut writer = AuditLogWriter::open(&path).unwrap();
        assert_eq!(writer.append(entry("return", AuditOutcome::Accepted)).unwrap(), 3);

        let recent = read_audit_log(&path, 2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].command, "finish");
        assert_eq!(recent[1].sequence, 3);
    }

    #[test]
    fn display_is_a_single_readable_line() {
        let line = entry("quantity_up", AuditOutcome::Accepted).to_string();
        assert!(line.starts_with('['));
        assert!(line.contains("ana quantity_up (accepted): quantity_up done"));
        assert!(!line.contains('\n'));
    }
}
