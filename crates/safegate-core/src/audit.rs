//! Append-only JSON-lines audit log.
//!
//! One record per gate decision. Records carry a digest of the action inputs,
//! never the inputs themselves. A failed append is returned to the caller;
//! it is never swallowed.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::digest::hash_inputs;
use crate::telemetry::AUDIT_TARGET;

/// Errors from audit log I/O.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for audit operations.
pub type AuditResult<T> = std::result::Result<T, AuditError>;

/// Final disposition recorded for an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failed,
    Blocked,
}

impl AuditOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub tool: String,
    /// SHA-256 hex of the canonical JSON encoding of the action inputs.
    pub inputs_hash: String,
    pub outcome: AuditOutcome,
    pub allowed: bool,
    pub reason: String,
}

/// Writes audit records to a JSONL file.
#[derive(Debug, Clone)]
pub struct AuditLogger {
    log_path: PathBuf,
}

impl AuditLogger {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Append one record. Parent directories are created as needed.
    pub fn log(
        &self,
        action: &str,
        tool: &str,
        inputs: &serde_json::Value,
        outcome: AuditOutcome,
        allowed: bool,
        reason: &str,
    ) -> AuditResult<AuditRecord> {
        let record = AuditRecord {
            timestamp: Utc::now(),
            action: action.to_string(),
            tool: tool.to_string(),
            inputs_hash: hash_inputs(inputs),
            outcome,
            allowed,
            reason: reason.to_string(),
        };
        self.append(&record)?;

        info!(
            target: AUDIT_TARGET,
            action = %record.action,
            tool = %record.tool,
            inputs_hash = %record.inputs_hash,
            outcome = %record.outcome,
            allowed = record.allowed,
            reason = %record.reason,
        );
        Ok(record)
    }

    fn append(&self, record: &AuditRecord) -> AuditResult<()> {
        if let Some(parent) = self.log_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    /// Read every record back. A missing log yields an empty list.
    pub fn read_records(&self) -> AuditResult<Vec<AuditRecord>> {
        let file = match fs::File::open(&self.log_path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }
}
