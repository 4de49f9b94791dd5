//! Structured observability hooks for gate decisions.
//!
//! Events are emitted through `tracing`; see [`crate::telemetry`] for
//! subscriber setup. For JSON output, pass `json = true` to `init_tracing`.

use tracing::{info, warn};

use crate::risk::RiskTier;

/// RAII guard that enters an action-scoped span for the duration of a gate pass.
///
/// ```ignore
/// let _span = ActionSpan::enter("write report", "file_tool");
/// // every event below carries action and tool
/// ```
pub struct ActionSpan {
    _span: tracing::span::EnteredSpan,
}

impl ActionSpan {
    pub fn enter(action: &str, tool: &str) -> Self {
        let span = tracing::info_span!("safegate.action", action = %action, tool = %tool);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: permission and risk evaluated.
pub fn emit_action_evaluated(allowed: bool, risk_score: f64) {
    info!(
        event = "action.evaluated",
        allowed = allowed,
        risk_score = risk_score,
        risk_tier = %RiskTier::from_score(risk_score),
    );
}

/// Emit event: action blocked before execution (warning level).
pub fn emit_action_blocked(kind: &str, reason: &str) {
    warn!(event = "action.blocked", kind = %kind, reason = %reason);
}

/// Emit event: action executed, successfully or not.
pub fn emit_action_finished(success: bool, duration_ms: u64) {
    info!(
        event = "action.finished",
        success = success,
        duration_ms = duration_ms,
    );
}

/// Emit event: checkpoint written.
pub fn emit_checkpoint_created(checkpoint_id: &str, files: usize) {
    info!(event = "checkpoint.created", checkpoint_id = %checkpoint_id, files = files);
}

/// Emit event: rollback completed.
pub fn emit_rollback_finished(checkpoint_id: &str, restored_files: usize) {
    info!(
        event = "checkpoint.rolled_back",
        checkpoint_id = %checkpoint_id,
        restored_files = restored_files,
    );
}
