//! Policy and gateway configuration.
//!
//! Configuration is loaded once (usually from TOML) and is immutable after
//! that. The permission engine owns the [`PolicyConfig`]; the safe runner
//! reads the gateway-level keys.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default risk threshold above which the gate blocks an action.
pub const DEFAULT_MAX_ALLOWED_RISK: f64 = 0.85;

/// Directory under the workspace used for gateway state.
pub const STATE_DIR_NAME: &str = ".safegate";

/// Errors produced while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Result type for configuration loading.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Permission policy. Every capability defaults to disallowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub allow_shell: bool,
    pub allow_file_write_outside_workspace: bool,
    pub allow_os_automation: bool,
    pub allow_network: bool,
    /// Lowercase keywords that force a confirmation block when they appear
    /// in an action name.
    pub require_confirmation_for: BTreeSet<String>,
    pub max_daily_budget_usd: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allow_shell: false,
            allow_file_write_outside_workspace: false,
            allow_os_automation: false,
            allow_network: false,
            require_confirmation_for: BTreeSet::new(),
            max_daily_budget_usd: 0.0,
        }
    }
}

impl PolicyConfig {
    /// Parse a policy document.
    pub fn from_toml_str(s: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(s)?;
        config.normalized()
    }

    /// Read and parse a policy document from disk.
    pub fn from_toml_path(path: &Path) -> ConfigResult<Self> {
        Self::from_toml_str(&read_config(path)?)
    }

    /// Builder-style helper for adding confirmation keywords.
    pub fn with_confirmation_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.require_confirmation_for
            .extend(keywords.into_iter().map(|k| k.as_ref().to_lowercase()));
        self
    }

    fn normalized(mut self) -> ConfigResult<Self> {
        if !self.max_daily_budget_usd.is_finite() || self.max_daily_budget_usd < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "max_daily_budget_usd must be a non-negative number, got {}",
                self.max_daily_budget_usd
            )));
        }
        self.require_confirmation_for = self
            .require_confirmation_for
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Ok(self)
    }
}

/// Full gateway configuration: the policy plus runner-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Risk score above which an action is blocked.
    pub max_allowed_risk: f64,
    /// Audit log location. Relative paths are taken from the workspace root.
    pub audit_log: Option<PathBuf>,
    pub policy: PolicyConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_allowed_risk: DEFAULT_MAX_ALLOWED_RISK,
            audit_log: None,
            policy: PolicyConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Parse a gateway document (top-level keys plus a `[policy]` table).
    pub fn from_toml_str(s: &str) -> ConfigResult<Self> {
        let mut config: Self = toml::from_str(s)?;
        if !(0.0..=1.0).contains(&config.max_allowed_risk) {
            return Err(ConfigError::Invalid(format!(
                "max_allowed_risk must be within [0, 1], got {}",
                config.max_allowed_risk
            )));
        }
        config.policy = config.policy.normalized()?;
        Ok(config)
    }

    /// Read and parse a gateway document from disk.
    pub fn from_toml_path(path: &Path) -> ConfigResult<Self> {
        Self::from_toml_str(&read_config(path)?)
    }

    /// Resolve the audit log path against `workspace_root`.
    pub fn audit_log_path(&self, workspace_root: &Path) -> PathBuf {
        match &self.audit_log {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => workspace_root.join(p),
            None => workspace_root.join(STATE_DIR_NAME).join("audit.jsonl"),
        }
    }
}

fn read_config(path: &Path) -> ConfigResult<String> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}
