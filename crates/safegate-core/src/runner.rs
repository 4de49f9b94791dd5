//! The safe execution gate.
//!
//! Every action passes, in order: permission check, risk check, budget
//! charge, checkpoint, execution, audit. Each call is independent; the only
//! state carried between calls is the budget total and the audit log.
//!
//! Blocks and execution failures come back as a [`GatewayResult`] with
//! `success = false`. The only error `run` returns is a failed audit write.

use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::audit::{AuditLogger, AuditOutcome};
use crate::config::{GatewayConfig, DEFAULT_MAX_ALLOWED_RISK};
use crate::error::Result;
use crate::obs::{emit_action_blocked, emit_action_evaluated, emit_action_finished, ActionSpan};
use crate::permission::{PermissionDecision, PermissionEngine};
use crate::request::ActionMetadata;
use crate::risk::score_action_risk;
use crate::rollback::RollbackManager;

/// Confidence reported when an action does not state its own.
pub const DEFAULT_CONFIDENCE: f64 = 0.8;
/// Confidence reported for a blocked action.
pub const BLOCKED_CONFIDENCE: f64 = 1.0;
/// Confidence reported when execution failed.
pub const FAILED_CONFIDENCE: f64 = 0.2;

const BUDGET_REJECTED: &str = "Blocked: budget guard rejected charge.";

/// What an executed action reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Structured {
        outcome: String,
        confidence: Option<f64>,
        evidence_refs: Vec<String>,
    },
    Plain(String),
}

impl Outcome {
    pub fn structured(outcome: impl Into<String>) -> Self {
        Self::Structured {
            outcome: outcome.into(),
            confidence: None,
            evidence_refs: Vec::new(),
        }
    }

    fn into_parts(self) -> (String, f64, Vec<String>) {
        match self {
            Self::Structured {
                outcome,
                confidence,
                evidence_refs,
            } => (
                outcome,
                confidence.unwrap_or(DEFAULT_CONFIDENCE),
                evidence_refs,
            ),
            Self::Plain(text) => (text, DEFAULT_CONFIDENCE, Vec::new()),
        }
    }
}

impl From<String> for Outcome {
    fn from(text: String) -> Self {
        Self::Plain(text)
    }
}

impl From<&str> for Outcome {
    fn from(text: &str) -> Self {
        Self::Plain(text.to_string())
    }
}

/// Which stage decided the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Succeeded,
    PolicyBlocked,
    RiskExceeded,
    BudgetExceeded,
    CheckpointFailed,
    ExecutionFailed,
}

impl Disposition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::PolicyBlocked => "policy_blocked",
            Self::RiskExceeded => "risk_exceeded",
            Self::BudgetExceeded => "budget_exceeded",
            Self::CheckpointFailed => "checkpoint_failed",
            Self::ExecutionFailed => "execution_failed",
        }
    }
}

/// Result returned to the caller for every gate pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayResult {
    pub success: bool,
    pub action: String,
    pub tool: String,
    pub outcome: String,
    pub confidence: f64,
    pub evidence_refs: Vec<String>,
    pub risk_score: f64,
    pub disposition: Disposition,
    /// Checkpoint taken before execution, if any.
    pub checkpoint_id: Option<String>,
}

/// Permission decision and risk score, without side effects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub decision: PermissionDecision,
    pub risk_score: f64,
    pub max_allowed_risk: f64,
}

/// Runs actions only when policy, risk and budget allow.
#[derive(Debug)]
pub struct SafeRunner {
    permission_engine: PermissionEngine,
    audit_logger: AuditLogger,
    rollback_manager: RollbackManager,
    max_allowed_risk: f64,
}

impl SafeRunner {
    /// Build a runner for `workspace_dir`, which must exist.
    pub fn new(
        permission_engine: PermissionEngine,
        audit_logger: AuditLogger,
        workspace_dir: impl AsRef<Path>,
    ) -> Result<Self> {
        let rollback_manager =
            RollbackManager::new(workspace_dir)?.with_protected_path(audit_logger.log_path());
        Ok(Self {
            permission_engine,
            audit_logger,
            rollback_manager,
            max_allowed_risk: DEFAULT_MAX_ALLOWED_RISK,
        })
    }

    pub fn from_config(config: &GatewayConfig, workspace_dir: impl AsRef<Path>) -> Result<Self> {
        let workspace_dir = workspace_dir.as_ref();
        let runner = Self::new(
            PermissionEngine::new(config.policy.clone()),
            AuditLogger::new(config.audit_log_path(workspace_dir)),
            workspace_dir,
        )?;
        Ok(runner.with_max_allowed_risk(config.max_allowed_risk))
    }

    /// Set the risk threshold. Values are clamped to `[0, 1]`; NaN falls
    /// back to [`DEFAULT_MAX_ALLOWED_RISK`].
    pub fn with_max_allowed_risk(mut self, max_allowed_risk: f64) -> Self {
        self.max_allowed_risk = if max_allowed_risk.is_nan() {
            DEFAULT_MAX_ALLOWED_RISK
        } else {
            max_allowed_risk.clamp(0.0, 1.0)
        };
        self
    }

    pub fn max_allowed_risk(&self) -> f64 {
        self.max_allowed_risk
    }

    pub fn workspace_dir(&self) -> &Path {
        self.rollback_manager.workspace_dir()
    }

    pub fn permission_engine(&self) -> &PermissionEngine {
        &self.permission_engine
    }

    pub fn audit_logger(&self) -> &AuditLogger {
        &self.audit_logger
    }

    pub fn rollback_manager(&self) -> &RollbackManager {
        &self.rollback_manager
    }

    /// Permission decision and risk score for a proposed action. Does not
    /// charge the budget, checkpoint, or write to the audit log.
    pub fn evaluate(
        &self,
        action: &str,
        tool_name: &str,
        inputs: &serde_json::Value,
        metadata: &ActionMetadata,
    ) -> Evaluation {
        Evaluation {
            decision: self.permission_engine.check(
                action,
                tool_name,
                metadata,
                self.workspace_dir(),
            ),
            risk_score: score_action_risk(action, tool_name, inputs),
            max_allowed_risk: self.max_allowed_risk,
        }
    }

    /// Gate and run one action.
    pub fn run<F, E>(
        &mut self,
        action: &str,
        tool_name: &str,
        inputs: &serde_json::Value,
        metadata: &ActionMetadata,
        execute: F,
    ) -> Result<GatewayResult>
    where
        F: FnOnce() -> std::result::Result<Outcome, E>,
        E: Display,
    {
        let _span = ActionSpan::enter(action, tool_name);
        let gate = Gate {
            action,
            tool_name,
            inputs,
            audit: &self.audit_logger,
        };

        let Evaluation {
            decision,
            risk_score: risk,
            ..
        } = self.evaluate(action, tool_name, inputs, metadata);
        emit_action_evaluated(decision.allowed, risk);

        if !decision.allowed {
            let outcome = format!("Blocked: {}", decision.reason);
            return gate.block(Disposition::PolicyBlocked, &decision.reason, outcome, risk);
        }

        if risk > self.max_allowed_risk {
            let reason = format!(
                "Risk score {risk:.2} exceeds threshold {:.2}.",
                self.max_allowed_risk
            );
            let outcome = format!("Blocked: {reason}");
            return gate.block(Disposition::RiskExceeded, &reason, outcome, risk);
        }

        let cost = metadata.estimated_cost_usd;
        if cost > 0.0 && !self.permission_engine.charge(cost) {
            return gate.block(
                Disposition::BudgetExceeded,
                BUDGET_REJECTED,
                BUDGET_REJECTED.to_string(),
                risk,
            );
        }

        let mut checkpoint_id = None;
        if risk > 0.0 && metadata.modifies_workspace {
            let candidates: Vec<PathBuf> = metadata.checkpoint_candidates();
            match self.rollback_manager.create_checkpoint(&candidates) {
                Ok(id) => checkpoint_id = Some(id),
                Err(e) => {
                    let reason = format!("checkpoint failed: {e}");
                    return gate.fail(Disposition::CheckpointFailed, reason, risk, None);
                }
            }
        }

        let started = Instant::now();
        let executed = panic::catch_unwind(AssertUnwindSafe(execute));
        let duration_ms = started.elapsed().as_millis() as u64;

        match executed {
            Ok(Ok(output)) => {
                emit_action_finished(true, duration_ms);
                let (outcome, confidence, evidence_refs) = output.into_parts();
                gate.audit(AuditOutcome::Success, true, "")?;
                Ok(GatewayResult {
                    success: true,
                    action: action.to_string(),
                    tool: tool_name.to_string(),
                    outcome,
                    confidence,
                    evidence_refs,
                    risk_score: risk,
                    disposition: Disposition::Succeeded,
                    checkpoint_id,
                })
            }
            Ok(Err(e)) => {
                emit_action_finished(false, duration_ms);
                gate.fail(Disposition::ExecutionFailed, e.to_string(), risk, checkpoint_id)
            }
            Err(payload) => {
                emit_action_finished(false, duration_ms);
                let message = panic_message(payload.as_ref());
                gate.fail(Disposition::ExecutionFailed, message, risk, checkpoint_id)
            }
        }
    }
}

/// Per-call context shared by the block and failure paths.
struct Gate<'a> {
    action: &'a str,
    tool_name: &'a str,
    inputs: &'a serde_json::Value,
    audit: &'a AuditLogger,
}

impl Gate<'_> {
    fn audit(&self, outcome: AuditOutcome, allowed: bool, reason: &str) -> Result<()> {
        self.audit
            .log(self.action, self.tool_name, self.inputs, outcome, allowed, reason)?;
        Ok(())
    }

    fn block(
        &self,
        disposition: Disposition,
        reason: &str,
        outcome: String,
        risk_score: f64,
    ) -> Result<GatewayResult> {
        emit_action_blocked(disposition.as_str(), reason);
        self.audit(AuditOutcome::Blocked, false, reason)?;
        Ok(self.failure(disposition, outcome, BLOCKED_CONFIDENCE, risk_score, None))
    }

    fn fail(
        &self,
        disposition: Disposition,
        reason: String,
        risk_score: f64,
        checkpoint_id: Option<String>,
    ) -> Result<GatewayResult> {
        self.audit(AuditOutcome::Failed, true, &reason)?;
        let outcome = format!("Execution failed: {reason}");
        Ok(self.failure(disposition, outcome, FAILED_CONFIDENCE, risk_score, checkpoint_id))
    }

    fn failure(
        &self,
        disposition: Disposition,
        outcome: String,
        confidence: f64,
        risk_score: f64,
        checkpoint_id: Option<String>,
    ) -> GatewayResult {
        GatewayResult {
            success: false,
            action: self.action.to_string(),
            tool: self.tool_name.to_string(),
            outcome,
            confidence,
            evidence_refs: Vec::new(),
            risk_score,
            disposition,
            checkpoint_id,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic: <non-string payload>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use serde_json::json;
    use tempfile::TempDir;

    fn runner(policy: PolicyConfig) -> (TempDir, SafeRunner) {
        let dir = TempDir::new().unwrap();
        let runner = SafeRunner::new(
            PermissionEngine::new(policy),
            AuditLogger::new(dir.path().join("audit.jsonl")),
            dir.path(),
        )
        .unwrap();
        (dir, runner)
    }

    fn ok(text: &str) -> impl FnOnce() -> std::result::Result<Outcome, String> + '_ {
        move || Ok(Outcome::from(text))
    }

    #[test]
    fn test_plain_outcome_defaults() {
        let (_dir, mut runner) = runner(PolicyConfig::default());
        let result = runner
            .run("read notes", "file_tool", &json!({}), &ActionMetadata::default(), ok("done"))
            .unwrap();
        assert!(result.success);
        assert_eq!(result.outcome, "done");
        assert_eq!(result.confidence, DEFAULT_CONFIDENCE);
        assert_eq!(result.risk_score, 0.05);
        assert_eq!(result.disposition, Disposition::Succeeded);
        assert!(result.checkpoint_id.is_some());
    }

    #[test]
    fn test_structured_outcome_is_passed_through() {
        let (_dir, mut runner) = runner(PolicyConfig::default());
        let result = runner
            .run("capture", "vision_tool", &json!({}), &ActionMetadata::default(), || {
                Ok::<_, String>(Outcome::Structured {
                    outcome: "screenshot saved".into(),
                    confidence: Some(0.93),
                    evidence_refs: vec!["shots/1.png".into()],
                })
            })
            .unwrap();
        assert_eq!(result.outcome, "screenshot saved");
        assert_eq!(result.confidence, 0.93);
        assert_eq!(result.evidence_refs, vec!["shots/1.png".to_string()]);

        let result = runner
            .run("capture", "vision_tool", &json!({}), &ActionMetadata::default(), || {
                Ok::<_, String>(Outcome::structured("no confidence given"))
            })
            .unwrap();
        assert_eq!(result.confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_risk_threshold_reason_format() {
        let mut policy = PolicyConfig::default();
        policy.allow_shell = true;
        let (_dir, runner) = runner(policy);
        let mut runner = runner.with_max_allowed_risk(0.5);
        let result = runner
            .run("list", "shell_tool", &json!({}), &ActionMetadata::default(), ok("x"))
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.disposition, Disposition::RiskExceeded);
        assert_eq!(result.outcome, "Blocked: Risk score 0.80 exceeds threshold 0.50.");
        assert_eq!(result.confidence, BLOCKED_CONFIDENCE);
    }

    #[test]
    fn test_risk_equal_to_threshold_is_allowed() {
        let (_dir, mut runner) = runner(PolicyConfig::default());
        let result = runner
            .run("delete tmp file", "file_tool", &json!({}), &ActionMetadata::default(), ok("x"))
            .unwrap();
        assert_eq!(result.risk_score, 0.85);
        assert!(result.success);
    }

    #[test]
    fn test_threshold_is_clamped() {
        let (_dir, runner) = runner(PolicyConfig::default());
        let runner = runner.with_max_allowed_risk(f64::NAN);
        assert_eq!(runner.max_allowed_risk(), DEFAULT_MAX_ALLOWED_RISK);
        let runner = runner.with_max_allowed_risk(7.5);
        assert_eq!(runner.max_allowed_risk(), 1.0);
        let mut runner = runner.with_max_allowed_risk(-1.0);
        assert_eq!(runner.max_allowed_risk(), 0.0);

        let result = runner
            .run("read notes", "file_tool", &json!({}), &ActionMetadata::default(), ok("x"))
            .unwrap();
        assert_eq!(result.disposition, Disposition::RiskExceeded);
    }

    #[test]
    fn test_no_checkpoint_when_not_modifying() {
        let (_dir, mut runner) = runner(PolicyConfig::default());
        let meta = ActionMetadata {
            modifies_workspace: false,
            ..ActionMetadata::default()
        };
        let result = runner.run("read", "file_tool", &json!({}), &meta, ok("x")).unwrap();
        assert!(result.checkpoint_id.is_none());
        assert!(runner.rollback_manager().list_checkpoints().unwrap().is_empty());
    }

    #[test]
    fn test_evaluate_has_no_side_effects() {
        let mut policy = PolicyConfig::default();
        policy.max_daily_budget_usd = 1.0;
        let (_dir, runner) = runner(policy);
        let meta = ActionMetadata::default().with_estimated_cost(0.75);
        let eval = runner.evaluate("call api", "http_tool", &json!({}), &meta);
        assert!(eval.decision.allowed);
        assert_eq!(eval.risk_score, 0.05);
        assert_eq!(runner.permission_engine().budget().spent_today_usd(), 0.0);
        assert!(runner.audit_logger().read_records().unwrap().is_empty());
    }

    #[test]
    fn test_panic_in_execute_is_contained() {
        let (_dir, mut runner) = runner(PolicyConfig::default());
        let explode = || -> std::result::Result<Outcome, String> { panic!("driver crashed") };
        let result = runner
            .run("flaky", "file_tool", &json!({}), &ActionMetadata::default(), explode)
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.disposition, Disposition::ExecutionFailed);
        assert!(result.outcome.contains("driver crashed"));
        assert_eq!(result.confidence, FAILED_CONFIDENCE);
    }

    #[test]
    fn test_panic_message_payloads() {
        assert_eq!(panic_message(&"boom"), "panic: boom");
        assert_eq!(panic_message(&String::from("bang")), "panic: bang");
        assert_eq!(panic_message(&42u8), "panic: <non-string payload>");
    }
}
