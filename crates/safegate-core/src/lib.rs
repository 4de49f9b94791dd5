//! SafeGate Core Library
//!
//! The safe execution gateway for an autonomous desktop agent: a permission
//! engine, a heuristic risk scorer, a budget guard, an append-only audit
//! log and a file checkpoint/rollback manager, composed by [`SafeRunner`].

pub mod audit;
pub mod budget;
pub mod config;
pub mod digest;
pub mod error;
pub mod obs;
pub mod permission;
pub mod request;
pub mod risk;
pub mod rollback;
pub mod runner;
pub mod sandbox;
pub mod telemetry;

pub use audit::{AuditError, AuditLogger, AuditOutcome, AuditRecord};
pub use budget::BudgetGuard;
pub use config::{ConfigError, GatewayConfig, PolicyConfig, DEFAULT_MAX_ALLOWED_RISK};
pub use error::{GatewayError, Result};
pub use permission::{PermissionDecision, PermissionEngine};
pub use request::ActionMetadata;
pub use risk::{score_action_risk, RiskTier};
pub use rollback::{
    CheckpointManifest, ManifestEntry, RollbackError, RollbackManager, RollbackReport,
};
pub use runner::{Disposition, Evaluation, GatewayResult, Outcome, SafeRunner};
pub use sandbox::is_within_workspace;
pub use telemetry::init_tracing;

/// SafeGate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
