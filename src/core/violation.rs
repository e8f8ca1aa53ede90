//! Coherence and policy violations.
//!
//! Codes are a stable vocabulary that hooks and CI annotations key off of.
//! Never rename a released code; new checks get new codes.

use crate::core::repo_state::RepoState;
use crate::core::severity::Severity;
use crate::core::stage::Stage;
use serde::{Deserialize, Serialize};

pub const EVIDENCE_MISSING: &str = "EVIDENCE_MISSING";
pub const EVIDENCE_INVALID: &str = "EVIDENCE_INVALID";
pub const EVIDENCE_TIMESTAMP_INVALID: &str = "EVIDENCE_TIMESTAMP_INVALID";
pub const EVIDENCE_STALE: &str = "EVIDENCE_STALE";
pub const EVIDENCE_TIMESTAMP_FUTURE: &str = "EVIDENCE_TIMESTAMP_FUTURE";
pub const EVIDENCE_REPO_ROOT_MISMATCH: &str = "EVIDENCE_REPO_ROOT_MISMATCH";
pub const EVIDENCE_BRANCH_MISMATCH: &str = "EVIDENCE_BRANCH_MISMATCH";
pub const GITFLOW_PROTECTED_BRANCH: &str = "GITFLOW_PROTECTED_BRANCH";
pub const EVIDENCE_GATE_BLOCKED: &str = "EVIDENCE_GATE_BLOCKED";
pub const EVIDENCE_OUTCOME_INCOHERENT: &str = "EVIDENCE_OUTCOME_INCOHERENT";
pub const EVIDENCE_GATE_STATUS_INCOHERENT: &str = "EVIDENCE_GATE_STATUS_INCOHERENT";
pub const EVIDENCE_RULES_COVERAGE_MISSING: &str = "EVIDENCE_RULES_COVERAGE_MISSING";
pub const EVIDENCE_RULES_COVERAGE_STAGE_MISMATCH: &str = "EVIDENCE_RULES_COVERAGE_STAGE_MISMATCH";
pub const EVIDENCE_RULES_COVERAGE_INCOMPLETE: &str = "EVIDENCE_RULES_COVERAGE_INCOMPLETE";
pub const EVIDENCE_UNSUPPORTED_AUTO_RULES: &str = "EVIDENCE_UNSUPPORTED_AUTO_RULES";
pub const MCP_RECEIPT_MISSING: &str = "MCP_ENTERPRISE_RECEIPT_MISSING";
pub const MCP_RECEIPT_INVALID: &str = "MCP_ENTERPRISE_RECEIPT_INVALID";
pub const MCP_RECEIPT_REPO_ROOT_MISMATCH: &str = "MCP_ENTERPRISE_RECEIPT_REPO_ROOT_MISMATCH";
pub const MCP_RECEIPT_STAGE_MISMATCH: &str = "MCP_ENTERPRISE_RECEIPT_STAGE_MISMATCH";
pub const MCP_RECEIPT_NOT_ALLOWED: &str = "MCP_ENTERPRISE_RECEIPT_NOT_ALLOWED";
pub const MCP_RECEIPT_STALE: &str = "MCP_ENTERPRISE_RECEIPT_STALE";
pub const MCP_RECEIPT_TIMESTAMP_FUTURE: &str = "MCP_ENTERPRISE_RECEIPT_TIMESTAMP_FUTURE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<Severity>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<u32>,
}

impl Violation {
    /// Validator violation. Every one of these blocks.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            rule_id: None,
            level: Some(Severity::Error),
            message: message.into(),
            file: None,
            lines: Vec::new(),
        }
    }
}

/// Operator-facing next step for a known code.
pub fn remediation_hint(code: &str) -> Option<&'static str> {
    Some(match code {
        EVIDENCE_MISSING => "run a gate stage (pre-commit, pre-push or ci) to regenerate .ai_evidence.json",
        EVIDENCE_INVALID => "regenerate .ai_evidence.json by re-running a gate stage",
        EVIDENCE_TIMESTAMP_INVALID => "regenerate evidence to obtain a valid timestamp",
        EVIDENCE_STALE => "refresh evidence before continuing with commit or push",
        EVIDENCE_TIMESTAMP_FUTURE => "fix the system clock and regenerate evidence",
        EVIDENCE_REPO_ROOT_MISMATCH => "regenerate evidence from this repository",
        EVIDENCE_BRANCH_MISMATCH => "regenerate evidence on the current branch",
        GITFLOW_PROTECTED_BRANCH => "avoid direct work on protected branches (use feature/*)",
        EVIDENCE_GATE_BLOCKED => "fix the blocking findings first, then re-run the gate",
        EVIDENCE_OUTCOME_INCOHERENT => "regenerate evidence to align ai_gate with snapshot.outcome",
        EVIDENCE_GATE_STATUS_INCOHERENT => "regenerate evidence to align ai_gate with severity_metrics",
        EVIDENCE_RULES_COVERAGE_MISSING => "run a full gate stage to recompute rules_coverage",
        EVIDENCE_RULES_COVERAGE_STAGE_MISMATCH => "re-run the gate at the correct stage",
        EVIDENCE_RULES_COVERAGE_INCOMPLETE => "make sure unevaluated=0 and coverage_ratio=1 before continuing",
        EVIDENCE_UNSUPPORTED_AUTO_RULES => "map every AUTO rule to a detector before continuing",
        MCP_RECEIPT_MISSING => "run the ai_gate_check tool to issue a receipt",
        MCP_RECEIPT_INVALID => "re-issue the receipt with the ai_gate_check tool",
        MCP_RECEIPT_REPO_ROOT_MISMATCH => "issue the receipt from this repository",
        MCP_RECEIPT_STAGE_MISMATCH => "issue the receipt for the stage being checked",
        MCP_RECEIPT_NOT_ALLOWED => "resolve the gate violations reported by the receipt issuer",
        MCP_RECEIPT_STALE => "re-issue the receipt, it is older than the allowed window",
        MCP_RECEIPT_TIMESTAMP_FUTURE => "fix the system clock and re-issue the receipt",
        _ => return None,
    })
}

/// One line per distinct violation code, in first-seen order.
pub fn remediation_hints(violations: &[Violation], stage: Stage, repo_state: &RepoState) -> Vec<String> {
    let mut seen = Vec::new();
    let mut hints = Vec::new();
    for violation in violations {
        if seen.contains(&violation.code) {
            continue;
        }
        seen.push(violation.code.clone());
        if let Some(hint) = remediation_hint(&violation.code) {
            hints.push(format!("{}: {}", violation.code, hint));
        }
    }
    if stage == Stage::PrePush && repo_state.git.available && repo_state.git.upstream.is_none() {
        hints.push(
            "PRE_PUSH without upstream: set tracking with git push --set-upstream origin <branch>"
                .to_string(),
        );
    }
    hints
}
