//! Findings to PASS/BLOCK under a stage policy.

use crate::core::error::GateError;
use crate::core::rules::Finding;
use crate::core::severity::Severity;
use crate::core::stage::Stage;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatePolicy {
    pub stage: Stage,
    pub block_on_or_above: Severity,
    pub warn_on_or_above: Severity,
}

impl GatePolicy {
    pub fn blocking_severities(&self) -> BTreeSet<Severity> {
        self.block_on_or_above.and_above().collect()
    }

    pub fn blocks(&self, severity: Severity) -> bool {
        severity >= self.block_on_or_above
    }

    pub fn warns(&self, severity: Severity) -> bool {
        severity >= self.warn_on_or_above && !self.blocks(severity)
    }
}

pub fn policy_for_pre_commit() -> GatePolicy {
    GatePolicy {
        stage: Stage::PreCommit,
        block_on_or_above: Severity::Error,
        warn_on_or_above: Severity::Warn,
    }
}

pub fn policy_for_pre_push() -> GatePolicy {
    GatePolicy {
        stage: Stage::PrePush,
        block_on_or_above: Severity::Error,
        warn_on_or_above: Severity::Warn,
    }
}

pub fn policy_for_ci() -> GatePolicy {
    GatePolicy {
        stage: Stage::Ci,
        block_on_or_above: Severity::Error,
        warn_on_or_above: Severity::Warn,
    }
}

/// Default findings policy governing `stage`. PRE_WRITE resolves to PRE_COMMIT.
pub fn default_policy_for(stage: Stage) -> GatePolicy {
    match stage.policy_stage() {
        Stage::PrePush => policy_for_pre_push(),
        Stage::Ci => policy_for_ci(),
        _ => policy_for_pre_commit(),
    }
}

/// Per-stage thresholds as written in `[policy.<STAGE>]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePolicyConfig {
    pub block_on_or_above: Severity,
    pub warn_on_or_above: Severity,
}

impl StagePolicyConfig {
    pub fn validate(&self, stage: Stage) -> Result<(), GateError> {
        if self.block_on_or_above > Severity::Error {
            return Err(GateError::ConfigError(format!(
                "policy.{}: block_on_or_above may not exceed ERROR (got {})",
                stage, self.block_on_or_above
            )));
        }
        if self.warn_on_or_above > self.block_on_or_above {
            return Err(GateError::ConfigError(format!(
                "policy.{}: warn_on_or_above ({}) is above block_on_or_above ({})",
                stage, self.warn_on_or_above, self.block_on_or_above
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicySource {
    Default,
    Config,
}

impl PolicySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicySource::Default => "default",
            PolicySource::Config => "config",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyTrace {
    pub source: PolicySource,
    pub bundle: String,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPolicy {
    /// Stage that was asked for.
    pub stage: Stage,
    /// Stage whose policy was used.
    pub resolved_stage: Stage,
    pub block_on_or_above: Severity,
    pub warn_on_or_above: Severity,
    pub trace: PolicyTrace,
}

impl ResolvedPolicy {
    pub fn policy(&self) -> GatePolicy {
        GatePolicy {
            stage: self.resolved_stage,
            block_on_or_above: self.block_on_or_above,
            warn_on_or_above: self.warn_on_or_above,
        }
    }
}

pub fn policy_hash(policy: &GatePolicy) -> Result<String, GateError> {
    let canonical = serde_json::to_string(policy)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// Resolve the policy for `stage`, preferring a configured override.
pub fn resolve_policy_for_stage(
    stage: Stage,
    overrides: &BTreeMap<Stage, StagePolicyConfig>,
) -> Result<ResolvedPolicy, GateError> {
    let resolved_stage = stage.policy_stage();
    let (policy, source) = match overrides.get(&resolved_stage) {
        Some(cfg) => {
            cfg.validate(resolved_stage)?;
            (
                GatePolicy {
                    stage: resolved_stage,
                    block_on_or_above: cfg.block_on_or_above,
                    warn_on_or_above: cfg.warn_on_or_above,
                },
                PolicySource::Config,
            )
        }
        None => (default_policy_for(resolved_stage), PolicySource::Default),
    };
    Ok(ResolvedPolicy {
        stage,
        resolved_stage,
        block_on_or_above: policy.block_on_or_above,
        warn_on_or_above: policy.warn_on_or_above,
        trace: PolicyTrace {
            source,
            bundle: format!("gate-policy.{}.{}", source.as_str(), resolved_stage),
            hash: policy_hash(&policy)?,
        },
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GateOutcome {
    Pass,
    Block,
}

impl GateOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateOutcome::Pass => "PASS",
            GateOutcome::Block => "BLOCK",
        }
    }
}

impl fmt::Display for GateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    pub outcome: GateOutcome,
    pub findings: Vec<Finding>,
}

impl GateDecision {
    pub fn blocking<'a>(&'a self, policy: &'a GatePolicy) -> impl Iterator<Item = &'a Finding> {
        self.findings.iter().filter(|f| policy.blocks(f.severity))
    }
}

/// BLOCK iff some finding's severity is blocking under `policy`.
///
/// Every finding is kept in the decision, blocking or not.
pub fn evaluate_gate(findings: Vec<Finding>, policy: &GatePolicy) -> GateDecision {
    let blocking = findings.iter().filter(|f| policy.blocks(f.severity)).count();
    let outcome = if blocking > 0 {
        GateOutcome::Block
    } else {
        GateOutcome::Pass
    };
    info!(
        stage = %policy.stage,
        %outcome,
        findings = findings.len(),
        blocking,
        "gate evaluated"
    );
    GateDecision { outcome, findings }
}
