//! End-to-end governance tests: policy blocks flow through the gate and
//! land in the audit log.

use std::path::Path;

use serde_json::json;
use tempfile::TempDir;

use safegate_core::{
    ActionMetadata, AuditLogger, AuditOutcome, Disposition, Outcome, PermissionEngine,
    PolicyConfig, SafeRunner,
};

fn locked_down_policy() -> PolicyConfig {
    PolicyConfig::default().with_confirmation_keywords([
        "cloud_deploy",
        "file_delete",
        "install_software",
        "login",
        "payment",
    ])
}

fn make_runner(workspace: &Path, policy: PolicyConfig, log_name: &str) -> SafeRunner {
    SafeRunner::new(
        PermissionEngine::new(policy),
        AuditLogger::new(workspace.join(log_name)),
        workspace,
    )
    .unwrap()
}

fn never_runs() -> Result<Outcome, String> {
    panic!("blocked action must not execute")
}

// -------------------------------------------------------------------------
// Default-deny policy
// -------------------------------------------------------------------------

#[test]
fn test_shell_blocked_by_default_and_audited() {
    let ws = TempDir::new().unwrap();
    let mut runner = make_runner(ws.path(), locked_down_policy(), "audit.jsonl");

    let result = runner
        .run(
            "shell execute",
            "shell_tool",
            &json!({"command": "echo hello"}),
            &ActionMetadata::default(),
            never_runs,
        )
        .unwrap();

    assert!(!result.success);
    assert!(result.outcome.to_lowercase().contains("blocked"));
    assert_eq!(result.disposition, Disposition::PolicyBlocked);
    assert_eq!(result.confidence, 1.0);
    // Risk is still computed for blocked actions.
    assert_eq!(result.risk_score, 0.8);
    assert!(result.checkpoint_id.is_none());

    assert!(ws.path().join("audit.jsonl").exists());
    let records = runner.audit_logger().read_records().unwrap();
    assert_eq!(records.len(), 1);
    assert!(!records[0].allowed);
    assert_eq!(records[0].outcome, AuditOutcome::Blocked);
    assert_eq!(records[0].reason, "Shell execution disabled by policy.");
}

#[test]
fn test_network_and_os_automation_blocked_by_default() {
    let ws = TempDir::new().unwrap();
    let mut runner = make_runner(ws.path(), PolicyConfig::default(), "audit2.jsonl");

    let network_meta = ActionMetadata {
        requires_network: true,
        ..ActionMetadata::default()
    };
    let network_block = runner
        .run(
            "browser fetch page",
            "browser_tool",
            &json!({"url": "https://example.com"}),
            &network_meta,
            never_runs,
        )
        .unwrap();
    let os_block = runner
        .run(
            "os_automation click",
            "input_tool",
            &json!({"x": 10, "y": 10}),
            &ActionMetadata::default(),
            never_runs,
        )
        .unwrap();

    assert!(!network_block.success);
    assert!(network_block.outcome.to_lowercase().contains("network"));
    assert!(!os_block.success);
    assert!(os_block.outcome.to_lowercase().contains("os automation"));

    let records = runner.audit_logger().read_records().unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| !r.allowed));
}

#[test]
fn test_confirmation_keyword_block_lists_matches() {
    let ws = TempDir::new().unwrap();
    let mut runner = make_runner(ws.path(), locked_down_policy(), "audit.jsonl");

    let result = runner
        .run(
            "login then payment",
            "form_tool",
            &json!({}),
            &ActionMetadata::default(),
            never_runs,
        )
        .unwrap();
    assert_eq!(
        result.outcome,
        "Blocked: Action requires confirmation: login, payment."
    );
}

#[test]
fn test_write_outside_workspace_blocked() {
    let ws = TempDir::new().unwrap();
    let outside = TempDir::new().unwrap();
    let mut runner = make_runner(ws.path(), PolicyConfig::default(), "audit.jsonl");

    let meta = ActionMetadata::default().with_target_path(outside.path().join("report.txt"));
    let result = runner
        .run("write report", "file_tool", &json!({}), &meta, never_runs)
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.outcome, "Blocked: Write outside workspace is blocked.");
}

// -------------------------------------------------------------------------
// Budget
// -------------------------------------------------------------------------

#[test]
fn test_budget_charged_only_on_pass_and_rejects_overrun() {
    let ws = TempDir::new().unwrap();
    let mut policy = PolicyConfig::default();
    policy.max_daily_budget_usd = 1.0;
    let mut runner = make_runner(ws.path(), policy, "audit.jsonl");

    let meta = ActionMetadata::default().with_estimated_cost(0.75);
    let first = runner
        .run("summarize", "llm_tool", &json!({}), &meta, || {
            Ok::<_, String>(Outcome::from("summary"))
        })
        .unwrap();
    assert!(first.success);
    assert_eq!(runner.permission_engine().budget().spent_today_usd(), 0.75);

    let second = runner
        .run("summarize", "llm_tool", &json!({}), &meta, never_runs)
        .unwrap();
    assert!(!second.success);
    assert_eq!(second.outcome, "Blocked: Budget limit exceeded.");
    assert_eq!(runner.permission_engine().budget().spent_today_usd(), 0.75);
}

#[test]
fn test_blocked_by_risk_does_not_charge_budget() {
    let ws = TempDir::new().unwrap();
    let mut policy = PolicyConfig::default();
    policy.max_daily_budget_usd = 5.0;
    let mut runner = make_runner(ws.path(), policy, "audit.jsonl");

    let meta = ActionMetadata::default().with_estimated_cost(1.0);
    let result = runner
        .run("git reset --hard", "git_tool", &json!({}), &meta, never_runs)
        .unwrap();
    assert_eq!(result.disposition, Disposition::RiskExceeded);
    assert_eq!(
        result.outcome,
        "Blocked: Risk score 0.90 exceeds threshold 0.85."
    );
    assert_eq!(runner.permission_engine().budget().spent_today_usd(), 0.0);
}

// -------------------------------------------------------------------------
// Config-driven construction
// -------------------------------------------------------------------------

#[test]
fn test_runner_from_gateway_config() {
    let ws = TempDir::new().unwrap();
    let config = safegate_core::GatewayConfig::from_toml_str(
        r#"
        max_allowed_risk = 0.9
        audit_log = "logs/gate.jsonl"

        [policy]
        allow_shell = true
        "#,
    )
    .unwrap();
    let mut runner = SafeRunner::from_config(&config, ws.path()).unwrap();
    assert_eq!(runner.max_allowed_risk(), 0.9);

    let result = runner
        .run(
            "list files",
            "shell_tool",
            &json!({"command": "ls"}),
            &ActionMetadata::default(),
            || Ok::<_, String>(Outcome::from("a.txt")),
        )
        .unwrap();
    assert!(result.success);
    assert!(ws.path().join("logs/gate.jsonl").is_file());
}
