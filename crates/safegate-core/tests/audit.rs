//! Audit trail tests across a gate session: one record per decision, in
//! call order, keyed by a stable digest of the inputs.

use serde_json::json;
use tempfile::TempDir;

use safegate_core::digest::hash_inputs;
use safegate_core::{
    ActionMetadata, AuditLogger, AuditOutcome, GatewayConfig, Outcome, SafeRunner,
};

#[test]
fn test_one_record_per_decision_in_call_order() {
    let ws = TempDir::new().unwrap();
    let config = GatewayConfig::from_toml_str(
        r#"
        [policy]
        require_confirmation_for = ["payment"]
        "#,
    )
    .unwrap();
    let mut runner = SafeRunner::from_config(&config, ws.path()).unwrap();
    let meta = ActionMetadata::default();

    runner
        .run("read notes", "file_tool", &json!({}), &meta, || {
            Ok::<_, String>(Outcome::from("ok"))
        })
        .unwrap();
    runner
        .run("submit payment", "browser_tool", &json!({}), &meta, || {
            Ok::<_, String>(Outcome::from("unreachable"))
        })
        .unwrap();
    runner
        .run("open window", "ui_tool", &json!({}), &meta, || {
            Err::<Outcome, _>("no display")
        })
        .unwrap();

    let records = runner.audit_logger().read_records().unwrap();
    let outcomes: Vec<_> = records.iter().map(|r| r.outcome).collect();
    assert_eq!(
        outcomes,
        vec![AuditOutcome::Success, AuditOutcome::Blocked, AuditOutcome::Failed]
    );
    assert_eq!(records[1].reason, "Action requires confirmation: payment.");
    assert!(!records[1].allowed);
    assert!(records[2].allowed);
    assert!(records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[test]
fn test_inputs_hash_ignores_key_order() {
    let ws = TempDir::new().unwrap();
    let logger = AuditLogger::new(ws.path().join("audit.jsonl"));

    let a = json!({"path": "a.txt", "mode": "w", "opts": {"y": 1, "x": 2}});
    let b = json!({"opts": {"x": 2, "y": 1}, "mode": "w", "path": "a.txt"});
    let first = logger
        .log("write", "file_tool", &a, AuditOutcome::Success, true, "")
        .unwrap();
    let second = logger
        .log("write", "file_tool", &b, AuditOutcome::Success, true, "")
        .unwrap();

    assert_eq!(first.inputs_hash, second.inputs_hash);
    assert_eq!(first.inputs_hash, hash_inputs(&a));
    assert_ne!(
        first.inputs_hash,
        hash_inputs(&json!({"path": "b.txt", "mode": "w", "opts": {"y": 1, "x": 2}}))
    );
}

#[test]
fn test_log_survives_new_logger_instance() {
    let ws = TempDir::new().unwrap();
    let path = ws.path().join("audit.jsonl");

    AuditLogger::new(&path)
        .log("first", "file_tool", &json!({}), AuditOutcome::Success, true, "")
        .unwrap();
    AuditLogger::new(&path)
        .log("second", "file_tool", &json!({}), AuditOutcome::Success, true, "")
        .unwrap();

    let actions: Vec<_> = AuditLogger::new(&path)
        .read_records()
        .unwrap()
        .into_iter()
        .map(|r| r.action)
        .collect();
    assert_eq!(actions, vec!["first", "second"]);
}
