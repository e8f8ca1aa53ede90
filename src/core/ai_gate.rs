//! Evidence coherence gate.
//!
//! Decides whether evidence written by an earlier stage run may still be
//! trusted to admit a new action. Every collaborator (clock, evidence read,
//! repo-state capture, receipt read) is injected. Missing or invalid
//! evidence blocks at once; every other check accumulates so one run
//! reports every incoherence.

use crate::core::config::GateConfig;
use crate::core::error::GateError;
use crate::core::evidence::{Evidence, EvidenceReadResult, EvidenceSource, FsEvidenceStore, GateStatus};
use crate::core::gate::{ResolvedPolicy, resolve_policy_for_stage};
use crate::core::receipt::{FsReceiptStore, ReceiptSource, validate_receipt};
use crate::core::repo_state::{GitRepoProbe, RepoState, RepoStateProbe, same_repo_root};
use crate::core::stage::Stage;
use crate::core::time::{Clock, SystemClock, age_seconds, parse_timestamp};
use crate::core::violation::*;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct AiGateRequest {
    pub repo_root: String,
    pub stage: Stage,
    /// Overrides `receipt.required` from config when set.
    pub require_mcp_receipt: Option<bool>,
}

impl AiGateRequest {
    pub fn new(repo_root: impl Into<String>, stage: Stage) -> Self {
        Self {
            repo_root: repo_root.into(),
            stage,
            require_mcp_receipt: None,
        }
    }

    pub fn require_mcp_receipt(mut self, required: bool) -> Self {
        self.require_mcp_receipt = Some(required);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvidenceAssessment {
    pub kind: String,
    pub max_age_seconds: u64,
    pub age_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AiGateResult {
    pub stage: Stage,
    pub status: GateStatus,
    pub allowed: bool,
    pub policy: ResolvedPolicy,
    pub evidence: EvidenceAssessment,
    pub repo_state: RepoState,
    pub violations: Vec<Violation>,
}

impl AiGateResult {
    pub fn has_code(&self, code: &str) -> bool {
        self.violations.iter().any(|v| v.code == code)
    }

    pub fn codes(&self) -> Vec<&str> {
        self.violations.iter().map(|v| v.code.as_str()).collect()
    }
}

pub struct AiGate<'a> {
    config: GateConfig,
    clock: Box<dyn Clock + 'a>,
    evidence: Box<dyn EvidenceSource + 'a>,
    repo_probe: Box<dyn RepoStateProbe + 'a>,
    receipts: Option<Box<dyn ReceiptSource + 'a>>,
}

impl<'a> AiGate<'a> {
    pub fn new(
        config: GateConfig,
        clock: impl Clock + 'a,
        evidence: impl EvidenceSource + 'a,
        repo_probe: impl RepoStateProbe + 'a,
    ) -> Self {
        Self {
            config,
            clock: Box::new(clock),
            evidence: Box::new(evidence),
            repo_probe: Box::new(repo_probe),
            receipts: None,
        }
    }

    pub fn with_receipt_source(mut self, receipts: impl ReceiptSource + 'a) -> Self {
        self.receipts = Some(Box::new(receipts));
        self
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Evaluate a request.
    ///
    /// Errors only on misuse: a receipt required without a receipt source,
    /// or a policy override that fails validation.
    pub fn evaluate(&self, request: &AiGateRequest) -> Result<AiGateResult, GateError> {
        let require_receipt = request
            .require_mcp_receipt
            .unwrap_or(self.config.receipt.required);
        if require_receipt && self.receipts.is_none() {
            return Err(GateError::MissingCollaborator("MCP receipt source"));
        }
        let policy = resolve_policy_for_stage(request.stage, &self.config.policy)?;
        let max_age_seconds = self.config.freshness.max_age_seconds(request.stage);

        let now = self.clock.now();
        let evidence_result = self.evidence.read_evidence(&request.repo_root);
        let repo_state = self.repo_probe.capture(&request.repo_root);

        let mut violations = Vec::new();
        let mut age = None;
        match &evidence_result {
            EvidenceReadResult::Missing => {
                violations.push(Violation::error(EVIDENCE_MISSING, ".ai_evidence.json is missing."));
            }
            EvidenceReadResult::Invalid { reason, version } => {
                let version = version
                    .as_deref()
                    .map(|v| format!(" (version={})", v))
                    .unwrap_or_default();
                violations.push(Violation::error(
                    EVIDENCE_INVALID,
                    format!(".ai_evidence.json is invalid{}: {}.", version, reason),
                ));
            }
            EvidenceReadResult::Valid(evidence) => {
                age = self.check_freshness(evidence, request.stage, now, max_age_seconds, &mut violations);
                self.check_repo_identity(evidence, &repo_state, &mut violations);
                self.check_gitflow(&repo_state, &mut violations);
                check_self_consistency(evidence, &mut violations);
                self.check_rules_coverage(evidence, &mut violations);
                if require_receipt {
                    if let Some(receipts) = &self.receipts {
                        let read = receipts.read_receipt(&request.repo_root);
                        violations.extend(validate_receipt(
                            &read,
                            &request.repo_root,
                            request.stage,
                            now,
                            self.config.receipt.max_age_seconds,
                        ));
                    }
                }
            }
        }

        for violation in &violations {
            debug!(code = %violation.code, message = %violation.message, "ai gate violation");
        }
        let status = if violations.is_empty() {
            GateStatus::Allowed
        } else {
            GateStatus::Blocked
        };
        info!(
            stage = %request.stage,
            %status,
            evidence = evidence_result.kind(),
            violations = violations.len(),
            "ai gate evaluated"
        );

        Ok(AiGateResult {
            stage: request.stage,
            status,
            allowed: status == GateStatus::Allowed,
            policy,
            evidence: EvidenceAssessment {
                kind: evidence_result.kind().to_string(),
                max_age_seconds,
                age_seconds: age,
            },
            repo_state,
            violations,
        })
    }

    /// Staleness and future-timestamp checks. Returns the clamped age.
    fn check_freshness(
        &self,
        evidence: &Evidence,
        stage: Stage,
        now: DateTime<Utc>,
        max_age_seconds: u64,
        violations: &mut Vec<Violation>,
    ) -> Option<u64> {
        let Some(timestamp) = parse_timestamp(&evidence.timestamp) else {
            violations.push(Violation::error(
                EVIDENCE_TIMESTAMP_INVALID,
                "Evidence timestamp is invalid.",
            ));
            return None;
        };
        let age = age_seconds(timestamp, now);
        if age > max_age_seconds {
            violations.push(Violation::error(
                EVIDENCE_STALE,
                format!(
                    "Evidence is stale ({}s > {}s for {}).",
                    age, max_age_seconds, stage
                ),
            ));
        }
        if timestamp > now {
            violations.push(Violation::error(
                EVIDENCE_TIMESTAMP_FUTURE,
                format!(
                    "Evidence timestamp {} is after the current time.",
                    evidence.timestamp
                ),
            ));
        }
        Some(age)
    }

    fn check_repo_identity(
        &self,
        evidence: &Evidence,
        live: &RepoState,
        violations: &mut Vec<Violation>,
    ) {
        let recorded = &evidence.repo_state;
        if !same_repo_root(&recorded.repo_root, &live.repo_root) {
            violations.push(Violation::error(
                EVIDENCE_REPO_ROOT_MISMATCH,
                format!(
                    "Evidence repo_root \"{}\" does not match current repo_root \"{}\".",
                    recorded.repo_root, live.repo_root
                ),
            ));
        }
        if recorded.branch() != live.branch() {
            violations.push(Violation::error(
                EVIDENCE_BRANCH_MISMATCH,
                format!(
                    "Evidence branch \"{}\" does not match current branch \"{}\".",
                    recorded.branch().unwrap_or("-"),
                    live.branch().unwrap_or("-")
                ),
            ));
        }
    }

    fn check_gitflow(&self, live: &RepoState, violations: &mut Vec<Violation>) {
        if !live.git.available {
            return;
        }
        if let Some(branch) = live.branch() {
            if self.config.gitflow.is_protected(branch) {
                violations.push(Violation::error(
                    GITFLOW_PROTECTED_BRANCH,
                    format!("Direct work on protected branch \"{}\" is not allowed.", branch),
                ));
            }
        }
    }

    fn check_rules_coverage(&self, evidence: &Evidence, violations: &mut Vec<Violation>) {
        let Some(coverage) = &evidence.snapshot.rules_coverage else {
            if self.config.evidence.require_rules_coverage {
                violations.push(Violation::error(
                    EVIDENCE_RULES_COVERAGE_MISSING,
                    "Evidence snapshot has no rules_coverage.",
                ));
            }
            return;
        };
        if coverage.stage != evidence.snapshot.stage {
            violations.push(Violation::error(
                EVIDENCE_RULES_COVERAGE_STAGE_MISMATCH,
                format!(
                    "rules_coverage.stage {} does not match snapshot.stage {}.",
                    coverage.stage, evidence.snapshot.stage
                ),
            ));
        }
        if !coverage.unevaluated_rule_ids.is_empty() {
            violations.push(Violation::error(
                EVIDENCE_RULES_COVERAGE_INCOMPLETE,
                format!(
                    "Active rules were not evaluated: [{}] (coverage_ratio={:.2}).",
                    coverage.unevaluated_rule_ids.join(", "),
                    coverage.coverage_ratio
                ),
            ));
        }
        let unsupported = coverage.unsupported_auto();
        if !unsupported.is_empty() {
            violations.push(Violation::error(
                EVIDENCE_UNSUPPORTED_AUTO_RULES,
                format!(
                    "AUTO rules without an automated detector: [{}].",
                    unsupported.join(", ")
                ),
            ));
        }
    }
}

fn check_self_consistency(evidence: &Evidence, violations: &mut Vec<Violation>) {
    let status = evidence.ai_gate.status;
    if status == GateStatus::Blocked {
        violations.push(Violation::error(
            EVIDENCE_GATE_BLOCKED,
            "Evidence AI gate status is BLOCKED.",
        ));
    }
    if GateStatus::for_outcome(evidence.snapshot.outcome) != status {
        violations.push(Violation::error(
            EVIDENCE_OUTCOME_INCOHERENT,
            format!(
                "snapshot.outcome {} is incoherent with ai_gate.status {}.",
                evidence.snapshot.outcome, status
            ),
        ));
    }
    if evidence.severity_metrics.gate_status != status {
        violations.push(Violation::error(
            EVIDENCE_GATE_STATUS_INCOHERENT,
            format!(
                "severity_metrics.gate_status {} is incoherent with ai_gate.status {}.",
                evidence.severity_metrics.gate_status, status
            ),
        ));
    }
}

/// Gate wired to the real clock, filesystem and git.
pub fn production_gate(config: GateConfig) -> AiGate<'static> {
    AiGate::new(config, SystemClock, FsEvidenceStore, GitRepoProbe).with_receipt_source(FsReceiptStore)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::repo_state::GitState;

    fn live(branch: &str, available: bool) -> RepoState {
        RepoState {
            repo_root: "/repo".to_string(),
            git: GitState {
                available,
                branch: Some(branch.to_string()),
                ..GitState::default()
            },
            ..RepoState::default()
        }
    }

    fn at(ts: &str) -> DateTime<Utc> {
        parse_timestamp(ts).unwrap()
    }

    #[test]
    fn test_missing_evidence_short_circuits() {
        let gate = AiGate::new(
            GateConfig::default(),
            || at("2026-02-20T12:05:00Z"),
            |_: &str| EvidenceReadResult::Missing,
            |_: &str| live("main", true),
        );
        let result = gate.evaluate(&AiGateRequest::new("/repo", Stage::PreWrite)).unwrap();
        assert_eq!(result.status, GateStatus::Blocked);
        assert!(!result.allowed);
        assert_eq!(result.codes(), vec![EVIDENCE_MISSING]);
        assert_eq!(result.evidence.kind, "missing");
        assert_eq!(result.evidence.age_seconds, None);
        assert_eq!(result.policy.resolved_stage, Stage::PreCommit);
    }

    #[test]
    fn test_invalid_evidence_reports_version() {
        let gate = AiGate::new(
            GateConfig::default(),
            || at("2026-02-20T12:05:00Z"),
            |_: &str| EvidenceReadResult::Invalid {
                reason: "unsupported".to_string(),
                version: Some("1.0".to_string()),
            },
            |_: &str| live("feature/x", true),
        );
        let result = gate.evaluate(&AiGateRequest::new("/repo", Stage::PreWrite)).unwrap();
        assert_eq!(result.codes(), vec![EVIDENCE_INVALID]);
        assert!(result.violations[0].message.contains("version=1.0"));
    }

    #[test]
    fn test_required_receipt_without_source_is_misuse() {
        let gate = AiGate::new(
            GateConfig::default(),
            || at("2026-02-20T12:05:00Z"),
            |_: &str| EvidenceReadResult::Missing,
            |_: &str| live("feature/x", true),
        );
        let request = AiGateRequest::new("/repo", Stage::PreWrite).require_mcp_receipt(true);
        assert!(matches!(
            gate.evaluate(&request),
            Err(GateError::MissingCollaborator(_))
        ));
    }
}
