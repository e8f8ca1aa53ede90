//! Gate configuration with layered resolution.
//!
//! Resolution order (highest priority first):
//! 1. CLI flags (applied via `apply_cli_overrides`)
//! 2. Environment variables (`TOLLGATE_*`)
//! 3. Project config (`tollgate.toml` in the repo root)
//! 4. Compiled defaults

use crate::core::error::GateError;
use crate::core::gate::StagePolicyConfig;
use crate::core::heuristics::PatternSpec;
use crate::core::promotion::PromotionEntry;
use crate::core::rules::RuleSpec;
use crate::core::stage::Stage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "tollgate.toml";
pub const ENV_PROTECTED_BRANCHES: &str = "TOLLGATE_PROTECTED_BRANCHES";
pub const ENV_REQUIRE_MCP_RECEIPT: &str = "TOLLGATE_REQUIRE_MCP_RECEIPT";

/// Maximum evidence age in seconds, per checking stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreshnessConfig {
    #[serde(rename = "PRE_WRITE")]
    pub pre_write: u64,
    #[serde(rename = "PRE_COMMIT")]
    pub pre_commit: u64,
    #[serde(rename = "PRE_PUSH")]
    pub pre_push: u64,
    #[serde(rename = "CI")]
    pub ci: u64,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            pre_write: 300,
            pre_commit: 900,
            pre_push: 1800,
            ci: 7200,
        }
    }
}

impl FreshnessConfig {
    pub fn max_age_seconds(&self, stage: Stage) -> u64 {
        match stage {
            Stage::PreWrite => self.pre_write,
            Stage::PreCommit => self.pre_commit,
            Stage::PrePush => self.pre_push,
            Stage::Ci => self.ci,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitflowConfig {
    /// Exact branch names, or `prefix/*` patterns.
    pub protected_branches: Vec<String>,
}

impl Default for GitflowConfig {
    fn default() -> Self {
        Self {
            protected_branches: ["main", "master", "develop", "dev"]
                .iter()
                .map(|b| b.to_string())
                .collect(),
        }
    }
}

impl GitflowConfig {
    pub fn is_protected(&self, branch: &str) -> bool {
        self.protected_branches.iter().any(|pattern| {
            match pattern.strip_suffix("/*") {
                Some(prefix) => branch
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('/')),
                None => branch == pattern,
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiptConfig {
    pub required: bool,
    pub max_age_seconds: u64,
}

impl Default for ReceiptConfig {
    fn default() -> Self {
        Self {
            required: false,
            max_age_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceConfig {
    pub require_rules_coverage: bool,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            require_rules_coverage: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub freshness: FreshnessConfig,
    pub gitflow: GitflowConfig,
    pub receipt: ReceiptConfig,
    pub evidence: EvidenceConfig,
    pub policy: BTreeMap<Stage, StagePolicyConfig>,
    pub promotions: Vec<PromotionEntry>,
    /// Project rules layered on top of the built-in preset.
    pub rules: Vec<RuleSpec>,
    /// Line-pattern scanners feeding heuristic facts.
    pub scanners: Vec<PatternSpec>,
}

/// CLI override arguments that can be applied to a config.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub require_mcp_receipt: Option<bool>,
    pub protected_branches: Option<Vec<String>>,
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl GateConfig {
    pub fn load(repo_root: &Path, cli: Option<&CliOverrides>) -> Result<Self, GateError> {
        Self::load_with_env(repo_root, cli, |key| std::env::var(key).ok())
    }

    /// `load` with an injectable environment lookup.
    pub fn load_with_env(
        repo_root: &Path,
        cli: Option<&CliOverrides>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, GateError> {
        let path = repo_root.join(CONFIG_FILE_NAME);
        let mut config = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(GateError::IoError)?;
            debug!(path = %path.display(), "project config loaded");
            Self::from_toml(&raw)?
        } else {
            Self::default()
        };
        config.apply_env_overrides(env);
        if let Some(cli) = cli {
            config.apply_cli_overrides(cli);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self, GateError> {
        toml::from_str(raw)
            .map_err(|e| GateError::ConfigError(format!("{}: {}", CONFIG_FILE_NAME, e)))
    }

    pub fn apply_env_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = env(ENV_PROTECTED_BRANCHES) {
            let branches = parse_list(&raw);
            if !branches.is_empty() {
                self.gitflow.protected_branches = branches;
            }
        }
        if let Some(v) = env(ENV_REQUIRE_MCP_RECEIPT).as_deref().and_then(parse_bool) {
            self.receipt.required = v;
        }
    }

    pub fn apply_cli_overrides(&mut self, cli: &CliOverrides) {
        if let Some(v) = cli.require_mcp_receipt {
            self.receipt.required = v;
        }
        if let Some(branches) = &cli.protected_branches {
            self.gitflow.protected_branches = branches.clone();
        }
    }

    pub fn validate(&self) -> Result<(), GateError> {
        for stage in Stage::ALL {
            if self.freshness.max_age_seconds(stage) == 0 {
                return Err(GateError::ConfigError(format!(
                    "freshness.{} must be greater than 0",
                    stage
                )));
            }
        }
        if self.receipt.max_age_seconds == 0 {
            return Err(GateError::ConfigError(
                "receipt.max_age_seconds must be greater than 0".to_string(),
            ));
        }
        for (stage, policy) in &self.policy {
            if *stage == Stage::PreWrite {
                return Err(GateError::ConfigError(
                    "policy.PRE_WRITE is not configurable; PRE_WRITE uses the PRE_COMMIT policy"
                        .to_string(),
                ));
            }
            policy.validate(*stage)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::severity::Severity;

    #[test]
    fn test_defaults() {
        let config = GateConfig::default();
        assert_eq!(config.freshness.max_age_seconds(Stage::PreWrite), 300);
        assert_eq!(config.freshness.max_age_seconds(Stage::Ci), 7200);
        assert!(!config.receipt.required);
        assert_eq!(config.receipt.max_age_seconds, 300);
        assert!(config.evidence.require_rules_coverage);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_protected_branch_patterns() {
        let gitflow = GitflowConfig {
            protected_branches: vec!["main".to_string(), "release/*".to_string()],
        };
        assert!(gitflow.is_protected("main"));
        assert!(gitflow.is_protected("release/1.2"));
        assert!(!gitflow.is_protected("release"));
        assert!(!gitflow.is_protected("mainline"));
        assert!(!gitflow.is_protected("feature/main"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = GateConfig::from_toml(
            r#"
[freshness]
PRE_WRITE = 600

[policy.PRE_PUSH]
block_on_or_above = "WARN"
warn_on_or_above = "INFO"

[[promotions]]
rule_id = "custom.rule"
from_stage = "CI"
severity = "ERROR"
"#,
        )
        .unwrap();
        assert_eq!(config.freshness.pre_write, 600);
        assert_eq!(config.freshness.pre_push, 1800);
        assert_eq!(
            config.policy[&Stage::PrePush].block_on_or_above,
            Severity::Warn
        );
        assert_eq!(config.promotions.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_layers_env_then_cli() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[receipt]\nrequired = false\n",
        )
        .unwrap();
        let env = |key: &str| match key {
            ENV_REQUIRE_MCP_RECEIPT => Some("true".to_string()),
            ENV_PROTECTED_BRANCHES => Some("trunk, release/*".to_string()),
            _ => None,
        };
        let config = GateConfig::load_with_env(dir.path(), None, env).unwrap();
        assert!(config.receipt.required);
        assert_eq!(config.gitflow.protected_branches, vec!["trunk", "release/*"]);

        let cli = CliOverrides {
            require_mcp_receipt: Some(false),
            protected_branches: None,
        };
        let config = GateConfig::load_with_env(dir.path(), Some(&cli), env).unwrap();
        assert!(!config.receipt.required);
    }

    #[test]
    fn test_validation_rejects_zero_window() {
        let err = GateConfig::from_toml("[freshness]\nCI = 0\n")
            .unwrap()
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("freshness.CI"));
    }
}
