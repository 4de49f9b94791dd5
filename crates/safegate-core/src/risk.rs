//! Heuristic risk scoring for proposed actions.
//!
//! The score is a pure function of `(action, tool_name, payload)`. Rules
//! raise a running maximum from a small baseline; the low-risk mock tool
//! caps the result last. Matching is plain case-insensitive substring search.

use serde::{Deserialize, Serialize};

/// Score assigned when no rule matches.
pub const BASELINE_RISK: f64 = 0.05;

const DELETE_RISK: f64 = 0.85;
const SHELL_RISK: f64 = 0.8;
const BROWSER_RISK: f64 = 0.65;
const DESTRUCTIVE_GIT_RISK: f64 = 0.9;
const CREDENTIAL_RISK: f64 = 0.95;
const MOCK_TOOL_CAP: f64 = 0.1;

const DESTRUCTIVE_GIT_WORDS: [&str; 3] = ["reset", "clean", "rebase"];

/// Coarse bucket for a numeric risk score, used in logs and CLI output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            Self::Critical
        } else if score >= 0.75 {
            Self::High
        } else if score >= 0.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Return a risk score in `[0, 1]` for the proposed action.
pub fn score_action_risk(action: &str, tool_name: &str, payload: &serde_json::Value) -> f64 {
    let action_l = action.to_lowercase();
    let tool_l = tool_name.to_lowercase();
    let payload_l = stringify_payload(payload).to_lowercase();

    let mut risk = BASELINE_RISK;
    if action_l.contains("delete") || payload_l.contains("delete") {
        risk = risk.max(DELETE_RISK);
    }
    if tool_l.contains("shell") {
        risk = risk.max(SHELL_RISK);
    }
    if tool_l.contains("browser") {
        risk = risk.max(BROWSER_RISK);
    }
    if tool_l.contains("git") && DESTRUCTIVE_GIT_WORDS.iter().any(|w| action_l.contains(w)) {
        risk = risk.max(DESTRUCTIVE_GIT_RISK);
    }
    if action_l.contains("payment") || action_l.contains("login") {
        risk = risk.max(CREDENTIAL_RISK);
    }
    if tool_l.contains("mock") {
        risk = risk.min(MOCK_TOOL_CAP);
    }
    risk.clamp(0.0, 1.0)
}

fn stringify_payload(payload: &serde_json::Value) -> String {
    match payload {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
