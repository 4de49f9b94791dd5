//! Running spend tracker against a daily ceiling.
//!
//! `spent_today_usd` only grows for the lifetime of the guard; there is no
//! calendar rollover. Mutation goes through `&mut self`, so sharing a guard
//! across threads requires an external lock.

use serde::{Deserialize, Serialize};

/// Tracks and enforces spend against a configured ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetGuard {
    max_daily_budget_usd: f64,
    spent_today_usd: f64,
}

impl BudgetGuard {
    pub fn new(max_daily_budget_usd: f64) -> Self {
        Self {
            max_daily_budget_usd,
            spent_today_usd: 0.0,
        }
    }

    /// Whether spending `amount_usd` would stay within the ceiling.
    /// Negative and non-finite amounts never fit.
    pub fn can_spend(&self, amount_usd: f64) -> bool {
        if !amount_usd.is_finite() || amount_usd < 0.0 {
            return false;
        }
        self.spent_today_usd + amount_usd <= self.max_daily_budget_usd
    }

    /// Charge `amount_usd` if it fits. On `false` the state is unchanged.
    pub fn charge(&mut self, amount_usd: f64) -> bool {
        if !self.can_spend(amount_usd) {
            return false;
        }
        self.spent_today_usd += amount_usd;
        true
    }

    pub fn max_daily_budget_usd(&self) -> f64 {
        self.max_daily_budget_usd
    }

    pub fn spent_today_usd(&self) -> f64 {
        self.spent_today_usd
    }

    pub fn remaining_usd(&self) -> f64 {
        (self.max_daily_budget_usd - self.spent_today_usd).max(0.0)
    }
}
