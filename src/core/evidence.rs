//! Evidence envelope (schema 2.1).
//!
//! Written once per gate run at PRE_COMMIT, PRE_PUSH or CI and read back at
//! PRE_WRITE. `ai_gate.status`, `severity_metrics.gate_status` and
//! `snapshot.outcome` are derived from one decision when built here; the
//! validator re-checks them on read.

use crate::core::coverage::RulesCoverage;
use crate::core::error::GateError;
use crate::core::gate::{GateDecision, GateOutcome};
use crate::core::repo_state::RepoState;
use crate::core::rules::Finding;
use crate::core::severity::Severity;
use crate::core::stage::Stage;
use crate::core::time::{format_timestamp, parse_timestamp};
use crate::core::violation::Violation;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const EVIDENCE_VERSION: &str = "2.1";
pub const EVIDENCE_FILE_NAME: &str = ".ai_evidence.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GateStatus {
    Allowed,
    Blocked,
}

impl GateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateStatus::Allowed => "ALLOWED",
            GateStatus::Blocked => "BLOCKED",
        }
    }

    pub fn for_outcome(outcome: GateOutcome) -> Self {
        match outcome {
            GateOutcome::Pass => GateStatus::Allowed,
            GateOutcome::Block => GateStatus::Blocked,
        }
    }
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub stage: Stage,
    pub outcome: GateOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules_coverage: Option<RulesCoverage>,
    #[serde(default)]
    pub findings: Vec<Finding>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub rule_id: String,
    pub file: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<u32>,
    pub first_seen: String,
    pub last_seen: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformState {
    pub detected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesetState {
    pub platform: String,
    pub bundle: String,
    pub hash: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentConfidence {
    High,
    Medium,
    Low,
    #[default]
    Unset,
}

/// What the human asked for, carried between runs until it expires.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanIntent {
    #[serde(default)]
    pub primary_goal: Option<String>,
    #[serde(default)]
    pub secondary_goals: Vec<String>,
    #[serde(default)]
    pub non_goals: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub confidence_level: IntentConfidence,
    #[serde(default)]
    pub set_by: Option<String>,
    #[serde(default)]
    pub set_at: Option<String>,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub preserved_at: Option<String>,
    #[serde(default)]
    pub preservation_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiGateSnapshot {
    pub status: GateStatus,
    #[serde(default)]
    pub violations: Vec<Violation>,
    #[serde(default)]
    pub human_intent: Option<HumanIntent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityMetrics {
    pub gate_status: GateStatus,
    pub total_violations: usize,
    #[serde(default)]
    pub by_severity: BTreeMap<Severity, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub version: String,
    pub timestamp: String,
    pub snapshot: Snapshot,
    #[serde(default)]
    pub ledger: Vec<LedgerEntry>,
    #[serde(default)]
    pub platforms: BTreeMap<String, PlatformState>,
    #[serde(default)]
    pub rulesets: Vec<RulesetState>,
    #[serde(default)]
    pub human_intent: Option<HumanIntent>,
    pub ai_gate: AiGateSnapshot,
    pub severity_metrics: SeverityMetrics,
    pub repo_state: RepoState,
}

/// Tri-state read of the evidence artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum EvidenceReadResult {
    Missing,
    Invalid {
        reason: String,
        version: Option<String>,
    },
    Valid(Box<Evidence>),
}

impl EvidenceReadResult {
    pub fn kind(&self) -> &'static str {
        match self {
            EvidenceReadResult::Missing => "missing",
            EvidenceReadResult::Invalid { .. } => "invalid",
            EvidenceReadResult::Valid(_) => "valid",
        }
    }
}

/// Parse an evidence document. Never fails; bad input is `Invalid`.
pub fn parse_evidence(raw: &str) -> EvidenceReadResult {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            return EvidenceReadResult::Invalid {
                reason: format!("malformed JSON: {}", e),
                version: None,
            };
        }
    };
    let version = value
        .get("version")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    if version.as_deref() != Some(EVIDENCE_VERSION) {
        return EvidenceReadResult::Invalid {
            reason: format!("unsupported evidence version (expected {})", EVIDENCE_VERSION),
            version,
        };
    }
    match serde_json::from_value::<Evidence>(value) {
        Ok(evidence) => EvidenceReadResult::Valid(Box::new(evidence)),
        Err(e) => EvidenceReadResult::Invalid {
            reason: format!("schema mismatch: {}", e),
            version,
        },
    }
}

/// Where the validator gets evidence from.
pub trait EvidenceSource {
    fn read_evidence(&self, repo_root: &str) -> EvidenceReadResult;
}

impl<F> EvidenceSource for F
where
    F: Fn(&str) -> EvidenceReadResult,
{
    fn read_evidence(&self, repo_root: &str) -> EvidenceReadResult {
        self(repo_root)
    }
}

/// Reads `<repo>/.ai_evidence.json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsEvidenceStore;

impl FsEvidenceStore {
    pub fn path_for(repo_root: &str) -> PathBuf {
        Path::new(repo_root).join(EVIDENCE_FILE_NAME)
    }

    pub fn write(&self, repo_root: &str, evidence: &Evidence) -> Result<PathBuf, GateError> {
        let path = Self::path_for(repo_root);
        let body = serde_json::to_string_pretty(evidence)?;
        fs::write(&path, format!("{}\n", body)).map_err(GateError::IoError)?;
        debug!(path = %path.display(), "evidence written");
        Ok(path)
    }
}

impl EvidenceSource for FsEvidenceStore {
    fn read_evidence(&self, repo_root: &str) -> EvidenceReadResult {
        let path = Self::path_for(repo_root);
        match fs::read_to_string(&path) {
            Ok(raw) => {
                let result = parse_evidence(&raw);
                debug!(path = %path.display(), kind = result.kind(), "evidence read");
                result
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => EvidenceReadResult::Missing,
            Err(e) => EvidenceReadResult::Invalid {
                reason: format!("unreadable: {}", e),
                version: None,
            },
        }
    }
}

/// Inputs for `build_evidence`.
#[derive(Debug, Clone)]
pub struct BuildEvidenceParams<'a> {
    pub stage: Stage,
    pub decision: &'a GateDecision,
    pub rules_coverage: Option<RulesCoverage>,
    pub previous: Option<&'a Evidence>,
    /// Explicit intent for this run. `None` carries the previous one forward.
    pub human_intent: Option<HumanIntent>,
    pub platforms: BTreeMap<String, PlatformState>,
    pub rulesets: Vec<RulesetState>,
    pub repo_state: RepoState,
    pub now: DateTime<Utc>,
}

fn lines_key(lines: &[u32]) -> String {
    lines
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn finding_key(rule_id: &str, file: &str, lines: &[u32]) -> String {
    format!("{}::{}::{}", rule_id, file, lines_key(lines))
}

fn normalize_finding(finding: &Finding) -> Finding {
    let file = finding
        .file
        .as_deref()
        .unwrap_or("unknown")
        .replace('\\', "/");
    let lines: BTreeSet<u32> = finding.lines.iter().copied().collect();
    Finding {
        file: Some(file),
        lines: lines.into_iter().collect(),
        ..finding.clone()
    }
}

fn snapshot_key(finding: &Finding) -> String {
    finding_key(
        &finding.rule_id,
        finding.file.as_deref().unwrap_or("unknown"),
        &finding.lines,
    )
}

/// De-duplicate by `(ruleId, file, lines)`, keeping the first, sorted by key.
pub fn dedupe_findings(findings: &[Finding]) -> Vec<Finding> {
    let mut unique: BTreeMap<String, Finding> = BTreeMap::new();
    for finding in findings {
        let normalized = normalize_finding(finding);
        unique.entry(snapshot_key(&normalized)).or_insert(normalized);
    }
    unique.into_values().collect()
}

fn normalize_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn normalize_list(values: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    values
        .iter()
        .filter_map(|v| normalize_text(Some(v)))
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

fn normalize_date(value: Option<&str>) -> Option<String> {
    value.and_then(parse_timestamp).map(format_timestamp)
}

fn resolve_human_intent(
    explicit: Option<&HumanIntent>,
    previous: Option<&HumanIntent>,
    now: DateTime<Utc>,
) -> Option<HumanIntent> {
    let carried = explicit.is_none();
    let candidate = explicit.or(previous)?;
    if let Some(raw) = candidate.expires_at.as_deref() {
        match parse_timestamp(raw) {
            Some(expires) if expires > now => {}
            _ => return None,
        }
    }
    Some(HumanIntent {
        primary_goal: normalize_text(candidate.primary_goal.as_deref()),
        secondary_goals: normalize_list(&candidate.secondary_goals),
        non_goals: normalize_list(&candidate.non_goals),
        constraints: normalize_list(&candidate.constraints),
        confidence_level: candidate.confidence_level,
        set_by: normalize_text(candidate.set_by.as_deref()),
        set_at: normalize_date(candidate.set_at.as_deref()),
        expires_at: normalize_date(candidate.expires_at.as_deref()),
        preserved_at: Some(format_timestamp(now)),
        preservation_count: if carried {
            candidate.preservation_count + 1
        } else {
            candidate.preservation_count
        },
    })
}

fn update_ledger(findings: &[Finding], previous: Option<&Evidence>, now: &str) -> Vec<LedgerEntry> {
    let prior: FxHashMap<String, &LedgerEntry> = previous
        .map(|e| {
            e.ledger
                .iter()
                .map(|entry| (finding_key(&entry.rule_id, &entry.file, &entry.lines), entry))
                .collect()
        })
        .unwrap_or_default();
    let mut ledger: Vec<LedgerEntry> = findings
        .iter()
        .map(|finding| {
            let file = finding.file.clone().unwrap_or_else(|| "unknown".to_string());
            let key = finding_key(&finding.rule_id, &file, &finding.lines);
            LedgerEntry {
                rule_id: finding.rule_id.clone(),
                file,
                lines: finding.lines.clone(),
                first_seen: prior
                    .get(&key)
                    .map(|p| p.first_seen.clone())
                    .unwrap_or_else(|| now.to_string()),
                last_seen: now.to_string(),
            }
        })
        .collect();
    ledger.sort_by_key(|e| finding_key(&e.rule_id, &e.file, &e.lines));
    ledger
}

fn normalize_rulesets(rulesets: &[RulesetState]) -> Vec<RulesetState> {
    let mut unique: BTreeMap<(String, String), RulesetState> = BTreeMap::new();
    for rs in rulesets {
        unique
            .entry((rs.platform.clone(), rs.bundle.clone()))
            .or_insert_with(|| rs.clone());
    }
    unique.into_values().collect()
}

fn by_severity(findings: &[Finding]) -> BTreeMap<Severity, usize> {
    let mut counts: BTreeMap<Severity, usize> = Severity::ALL.iter().map(|s| (*s, 0)).collect();
    for finding in findings {
        *counts.entry(finding.severity).or_insert(0) += 1;
    }
    counts
}

fn to_violation(finding: &Finding) -> Violation {
    Violation {
        code: finding.code.clone(),
        rule_id: Some(finding.rule_id.clone()),
        level: Some(finding.severity),
        message: finding.message.clone(),
        file: finding.file.clone(),
        lines: finding.lines.clone(),
    }
}

/// Build a v2.1 envelope from a finished stage run.
pub fn build_evidence(params: BuildEvidenceParams<'_>) -> Result<Evidence, GateError> {
    if let Some(coverage) = &params.rules_coverage {
        if coverage.stage != params.stage {
            return Err(GateError::ValidationError(format!(
                "rules_coverage.stage {} does not match snapshot stage {}",
                coverage.stage, params.stage
            )));
        }
    }
    let now = format_timestamp(params.now);
    let findings = dedupe_findings(&params.decision.findings);
    let status = GateStatus::for_outcome(params.decision.outcome);
    let human_intent = resolve_human_intent(
        params.human_intent.as_ref(),
        params.previous.and_then(|p| p.human_intent.as_ref()),
        params.now,
    );

    Ok(Evidence {
        version: EVIDENCE_VERSION.to_string(),
        timestamp: now.clone(),
        ledger: update_ledger(&findings, params.previous, &now),
        platforms: params.platforms,
        rulesets: normalize_rulesets(&params.rulesets),
        human_intent: human_intent.clone(),
        ai_gate: AiGateSnapshot {
            status,
            violations: findings.iter().map(to_violation).collect(),
            human_intent,
        },
        severity_metrics: SeverityMetrics {
            gate_status: status,
            total_violations: findings.len(),
            by_severity: by_severity(&findings),
        },
        snapshot: Snapshot {
            stage: params.stage,
            outcome: params.decision.outcome,
            rules_coverage: params.rules_coverage,
            findings,
        },
        repo_state: params.repo_state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(rule_id: &str, file: Option<&str>, lines: Vec<u32>) -> Finding {
        Finding {
            rule_id: rule_id.to_string(),
            severity: Severity::Warn,
            code: "C".to_string(),
            message: "m".to_string(),
            file: file.map(str::to_string),
            matched_by: None,
            source: None,
            lines,
        }
    }

    #[test]
    fn test_dedupe_normalizes_and_sorts() {
        let findings = vec![
            finding("b.rule", Some("src\\b.ts"), vec![3, 1, 3]),
            finding("a.rule", None, vec![]),
            finding("b.rule", Some("src/b.ts"), vec![1, 3]),
        ];
        let out = dedupe_findings(&findings);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].rule_id, "a.rule");
        assert_eq!(out[0].file.as_deref(), Some("unknown"));
        assert_eq!(out[1].file.as_deref(), Some("src/b.ts"));
        assert_eq!(out[1].lines, vec![1, 3]);
    }

    #[test]
    fn test_parse_rejects_wrong_version() {
        match parse_evidence(r#"{"version":"2.0"}"#) {
            EvidenceReadResult::Invalid { version, .. } => {
                assert_eq!(version.as_deref(), Some("2.0"))
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(parse_evidence("{not json").kind(), "invalid");
    }

    #[test]
    fn test_expired_intent_is_dropped() {
        let now = parse_timestamp("2026-02-20T12:00:00Z").unwrap();
        let intent = HumanIntent {
            primary_goal: Some(" ship ".to_string()),
            expires_at: Some("2026-02-20T11:00:00Z".to_string()),
            ..HumanIntent::default()
        };
        assert!(resolve_human_intent(Some(&intent), None, now).is_none());
    }

    #[test]
    fn test_carried_intent_counts_preservations() {
        let now = parse_timestamp("2026-02-20T12:00:00Z").unwrap();
        let intent = HumanIntent {
            primary_goal: Some(" ship ".to_string()),
            secondary_goals: vec!["a".to_string(), "a".to_string(), " ".to_string()],
            preservation_count: 2,
            ..HumanIntent::default()
        };
        let carried = resolve_human_intent(None, Some(&intent), now).unwrap();
        assert_eq!(carried.primary_goal.as_deref(), Some("ship"));
        assert_eq!(carried.secondary_goals, vec!["a"]);
        assert_eq!(carried.preservation_count, 3);
        assert_eq!(carried.preserved_at.as_deref(), Some("2026-02-20T12:00:00.000Z"));

        let explicit = resolve_human_intent(Some(&intent), None, now).unwrap();
        assert_eq!(explicit.preservation_count, 2);
    }

    #[test]
    fn test_fs_store_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().to_string();
        assert_eq!(FsEvidenceStore.read_evidence(&root), EvidenceReadResult::Missing);
        fs::write(dir.path().join(EVIDENCE_FILE_NAME), "garbage").unwrap();
        assert_eq!(FsEvidenceStore.read_evidence(&root).kind(), "invalid");
    }
}
