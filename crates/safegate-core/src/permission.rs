//! Ordered permission rules.
//!
//! Rules are evaluated in a fixed order and the first failing rule decides
//! the reason string. The engine owns the budget guard but `check` never
//! mutates it; spending happens through [`PermissionEngine::charge`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::budget::BudgetGuard;
use crate::config::PolicyConfig;
use crate::request::ActionMetadata;
use crate::sandbox::is_within_workspace;

pub const REASON_ALLOWED: &str = "Allowed by policy.";
pub const REASON_SHELL_DISABLED: &str = "Shell execution disabled by policy.";
pub const REASON_OS_AUTOMATION_DISABLED: &str = "OS automation disabled by policy.";
pub const REASON_NETWORK_DISABLED: &str = "Network operations disabled by policy.";
pub const REASON_REQUIRES_CONFIRMATION: &str = "Action requires explicit confirmation.";
pub const REASON_OUTSIDE_WORKSPACE: &str = "Write outside workspace is blocked.";
pub const REASON_BUDGET_EXCEEDED: &str = "Budget limit exceeded.";

/// Allow/deny verdict for one proposed action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDecision {
    pub allowed: bool,
    pub reason: String,
}

impl PermissionDecision {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// Policy engine for tool and action allow/deny checks.
#[derive(Debug, Clone)]
pub struct PermissionEngine {
    policy: PolicyConfig,
    budget: BudgetGuard,
}

impl PermissionEngine {
    pub fn new(policy: PolicyConfig) -> Self {
        let budget = BudgetGuard::new(policy.max_daily_budget_usd);
        Self { policy, budget }
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    pub fn budget(&self) -> &BudgetGuard {
        &self.budget
    }

    /// Evaluate the policy for a proposed action.
    pub fn check(
        &self,
        action: &str,
        tool_name: &str,
        metadata: &ActionMetadata,
        workspace_root: &Path,
    ) -> PermissionDecision {
        let action_l = action.to_lowercase();
        let tool_l = tool_name.to_lowercase();
        let policy = &self.policy;

        if tool_l.contains("shell") && !policy.allow_shell {
            return PermissionDecision::deny(REASON_SHELL_DISABLED);
        }
        if action_l.contains("os_automation") && !policy.allow_os_automation {
            return PermissionDecision::deny(REASON_OS_AUTOMATION_DISABLED);
        }
        if metadata.requires_network && !policy.allow_network {
            return PermissionDecision::deny(REASON_NETWORK_DISABLED);
        }
        if metadata.requires_confirmation {
            return PermissionDecision::deny(REASON_REQUIRES_CONFIRMATION);
        }

        // BTreeSet iteration is already sorted.
        let hits: Vec<&str> = policy
            .require_confirmation_for
            .iter()
            .filter(|word| action_l.contains(word.as_str()))
            .map(String::as_str)
            .collect();
        if !hits.is_empty() {
            return PermissionDecision::deny(format!(
                "Action requires confirmation: {}.",
                hits.join(", ")
            ));
        }

        if let Some(target) = &metadata.target_path {
            if !policy.allow_file_write_outside_workspace
                && !is_within_workspace(target, workspace_root)
            {
                return PermissionDecision::deny(REASON_OUTSIDE_WORKSPACE);
            }
        }

        let cost = metadata.estimated_cost_usd;
        if cost > 0.0 && !self.budget.can_spend(cost) {
            return PermissionDecision::deny(REASON_BUDGET_EXCEEDED);
        }

        PermissionDecision::allow(REASON_ALLOWED)
    }

    /// Charge the budget. Returns `false` and leaves state unchanged when
    /// the amount does not fit.
    pub fn charge(&mut self, amount_usd: f64) -> bool {
        self.budget.charge(amount_usd)
    }
}
