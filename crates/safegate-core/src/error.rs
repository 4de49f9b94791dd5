//! Crate-level error taxonomy for the gateway.
//!
//! Only conditions that must stop the caller are errors. Policy, risk and
//! budget blocks and failed executions are reported as a normal
//! [`GatewayResult`](crate::runner::GatewayResult) with `success = false`.

use crate::audit::AuditError;
use crate::config::ConfigError;
use crate::rollback::RollbackError;

/// Errors surfaced by the gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Appending to the audit log failed. The action must not be treated as
    /// recorded, so this propagates instead of being folded into a result.
    #[error("audit write failed: {0}")]
    AuditWriteFailed(#[from] AuditError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("rollback error: {0}")]
    Rollback(#[from] RollbackError),
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
