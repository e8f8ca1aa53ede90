use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tollgate::core::ai_gate::{AiGate, AiGateRequest};
use tollgate::core::config::GateConfig;
use tollgate::core::coverage::{CoverageCounts, RulesCoverage};
use tollgate::core::evidence::{
    BuildEvidenceParams, Evidence, EvidenceReadResult, GateStatus, build_evidence,
};
use tollgate::core::gate::{GateDecision, GateOutcome};
use tollgate::core::receipt::{McpReceipt, ReceiptReadResult};
use tollgate::core::repo_state::{GitState, RepoState};
use tollgate::core::stage::Stage;
use tollgate::core::time::parse_timestamp;
use tollgate::core::violation::*;

const EVIDENCE_TS: &str = "2026-02-20T12:00:00Z";
const CHECK_TS: &str = "2026-02-20T12:05:00Z";

fn at(ts: &str) -> DateTime<Utc> {
    parse_timestamp(ts).expect("fixture timestamp")
}

fn repo(branch: &str) -> RepoState {
    RepoState {
        repo_root: "/repo".to_string(),
        git: GitState {
            available: true,
            branch: Some(branch.to_string()),
            upstream: Some(format!("origin/{}", branch)),
            ..GitState::default()
        },
        ..RepoState::default()
    }
}

fn coverage(stage: Stage) -> RulesCoverage {
    let ids = vec!["skills.backend.no-empty-catch".to_string()];
    RulesCoverage {
        stage,
        active_rule_ids: ids.clone(),
        evaluated_rule_ids: ids,
        matched_rule_ids: Vec::new(),
        unevaluated_rule_ids: Vec::new(),
        unsupported_auto_rule_ids: None,
        counts: CoverageCounts {
            active: 1,
            evaluated: 1,
            matched: 0,
            unevaluated: 0,
            unsupported_auto: None,
        },
        coverage_ratio: 1.0,
    }
}

/// Coherent PRE_COMMIT evidence for `/repo` on `feature/happy-path`.
fn evidence_at(ts: &str) -> Evidence {
    let decision = GateDecision {
        outcome: GateOutcome::Pass,
        findings: Vec::new(),
    };
    build_evidence(BuildEvidenceParams {
        stage: Stage::PreCommit,
        decision: &decision,
        rules_coverage: Some(coverage(Stage::PreCommit)),
        previous: None,
        human_intent: None,
        platforms: BTreeMap::new(),
        rulesets: Vec::new(),
        repo_state: repo("feature/happy-path"),
        now: at(ts),
    })
    .expect("fixture evidence")
}

fn gate_with(evidence: Evidence, live: RepoState, now: &str) -> AiGate<'static> {
    let now = at(now);
    AiGate::new(
        GateConfig::default(),
        move || now,
        move |_: &str| EvidenceReadResult::Valid(Box::new(evidence.clone())),
        move |_: &str| live.clone(),
    )
}

fn pre_write() -> AiGateRequest {
    AiGateRequest::new("/repo", Stage::PreWrite)
}

#[test]
fn missing_evidence_blocks() {
    let gate = AiGate::new(
        GateConfig::default(),
        || at(CHECK_TS),
        |_: &str| EvidenceReadResult::Missing,
        |_: &str| repo("feature/happy-path"),
    );
    let result = gate.evaluate(&pre_write()).expect("evaluate");
    assert_eq!(result.status, GateStatus::Blocked);
    assert!(result.has_code(EVIDENCE_MISSING));
}

#[test]
fn stale_evidence_is_reported() {
    let gate = gate_with(
        evidence_at("2026-02-20T11:05:00Z"),
        repo("feature/happy-path"),
        "2026-02-20T12:30:00Z",
    );
    let result = gate
        .evaluate(&AiGateRequest::new("/repo", Stage::PrePush))
        .expect("evaluate");
    assert_eq!(result.status, GateStatus::Blocked);
    assert!(result.has_code(EVIDENCE_STALE));
    assert_eq!(result.evidence.age_seconds, Some(5100));
    let stale = result
        .violations
        .iter()
        .find(|v| v.code == EVIDENCE_STALE)
        .expect("stale violation");
    assert!(stale.message.contains("5100s > 1800s"));
}

#[test]
fn pre_write_rejects_evidence_older_than_its_window() {
    let gate = gate_with(
        evidence_at("2026-02-20T11:05:00Z"),
        repo("feature/happy-path"),
        "2026-02-20T12:30:00Z",
    );
    let result = gate.evaluate(&pre_write()).expect("evaluate");
    assert_eq!(result.status, GateStatus::Blocked);
    assert_eq!(result.codes(), vec![EVIDENCE_STALE]);
    assert_eq!(result.evidence.age_seconds, Some(5100));
    assert!(result.violations[0].message.contains("5100s > 300s"));
}

#[test]
fn trailing_separator_on_repo_root_is_not_a_mismatch() {
    let mut evidence = evidence_at(EVIDENCE_TS);
    evidence.repo_state.repo_root = "/repo/".to_string();
    let gate = gate_with(evidence, repo("feature/happy-path"), CHECK_TS);
    let result = gate.evaluate(&pre_write()).expect("evaluate");
    assert!(result.allowed, "unexpected: {:?}", result.codes());

    let mut evidence = evidence_at(EVIDENCE_TS);
    evidence.repo_state.repo_root = "/repo-other".to_string();
    let gate = gate_with(evidence, repo("feature/happy-path"), CHECK_TS);
    let result = gate.evaluate(&pre_write()).expect("evaluate");
    assert_eq!(result.codes(), vec![EVIDENCE_REPO_ROOT_MISMATCH]);
}

#[test]
fn future_evidence_is_reported() {
    let gate = gate_with(
        evidence_at("2026-02-20T12:10:00Z"),
        repo("feature/happy-path"),
        CHECK_TS,
    );
    let result = gate.evaluate(&pre_write()).expect("evaluate");
    assert_eq!(result.codes(), vec![EVIDENCE_TIMESTAMP_FUTURE]);
    assert_eq!(result.evidence.age_seconds, Some(0));
}

#[test]
fn blocked_evidence_blocks_the_next_action() {
    let decision = GateDecision {
        outcome: GateOutcome::Block,
        findings: Vec::new(),
    };
    let evidence = build_evidence(BuildEvidenceParams {
        stage: Stage::PreCommit,
        decision: &decision,
        rules_coverage: Some(coverage(Stage::PreCommit)),
        previous: None,
        human_intent: None,
        platforms: BTreeMap::new(),
        rulesets: Vec::new(),
        repo_state: repo("feature/happy-path"),
        now: at(EVIDENCE_TS),
    })
    .expect("evidence");
    let gate = gate_with(evidence, repo("feature/happy-path"), CHECK_TS);
    let result = gate.evaluate(&pre_write()).expect("evaluate");
    assert_eq!(result.status, GateStatus::Blocked);
    assert_eq!(result.codes(), vec![EVIDENCE_GATE_BLOCKED]);
}

#[test]
fn protected_branch_blocks_with_perfect_evidence() {
    let mut evidence = evidence_at(EVIDENCE_TS);
    evidence.repo_state = repo("main");
    let gate = gate_with(evidence, repo("main"), CHECK_TS);
    let result = gate.evaluate(&pre_write()).expect("evaluate");
    assert_eq!(result.status, GateStatus::Blocked);
    assert_eq!(result.codes(), vec![GITFLOW_PROTECTED_BRANCH]);
}

#[test]
fn protected_branch_is_ignored_without_git() {
    let mut evidence = evidence_at(EVIDENCE_TS);
    evidence.repo_state = repo("main");
    let mut live = repo("main");
    live.git.available = false;
    evidence.repo_state.git.available = false;
    let gate = gate_with(evidence, live, CHECK_TS);
    let result = gate.evaluate(&pre_write()).expect("evaluate");
    assert!(result.allowed, "unexpected: {:?}", result.codes());
}

#[test]
fn coherent_fresh_evidence_is_allowed() {
    let gate = gate_with(evidence_at(EVIDENCE_TS), repo("feature/happy-path"), CHECK_TS);
    let result = gate.evaluate(&pre_write()).expect("evaluate");
    assert_eq!(result.status, GateStatus::Allowed);
    assert!(result.allowed);
    assert!(result.violations.is_empty());
    assert_eq!(result.evidence.kind, "valid");
    assert_eq!(result.evidence.age_seconds, Some(300));
    assert_eq!(result.policy.resolved_stage, Stage::PreCommit);
    assert_eq!(result.policy.trace.bundle, "gate-policy.default.PRE_COMMIT");
}

#[test]
fn every_incoherence_is_reported_in_one_pass() {
    let mut evidence = evidence_at(EVIDENCE_TS);
    evidence.repo_state.repo_root = "/elsewhere".to_string();
    evidence.repo_state.git.branch = Some("feature/other".to_string());
    evidence.snapshot.outcome = GateOutcome::Block;
    evidence.severity_metrics.gate_status = GateStatus::Blocked;
    let mut cov = coverage(Stage::PrePush);
    cov.unevaluated_rule_ids = vec!["skills.ios.no-force-unwrap".to_string()];
    cov.unsupported_auto_rule_ids = Some(vec!["skills.backend.guideline.auto".to_string()]);
    cov.coverage_ratio = 0.5;
    evidence.snapshot.rules_coverage = Some(cov);

    let gate = gate_with(evidence, repo("feature/happy-path"), CHECK_TS);
    let result = gate.evaluate(&pre_write()).expect("evaluate");
    assert_eq!(result.status, GateStatus::Blocked);
    for code in [
        EVIDENCE_REPO_ROOT_MISMATCH,
        EVIDENCE_BRANCH_MISMATCH,
        EVIDENCE_OUTCOME_INCOHERENT,
        EVIDENCE_GATE_STATUS_INCOHERENT,
        EVIDENCE_RULES_COVERAGE_STAGE_MISMATCH,
        EVIDENCE_RULES_COVERAGE_INCOMPLETE,
        EVIDENCE_UNSUPPORTED_AUTO_RULES,
    ] {
        assert!(result.has_code(code), "missing {} in {:?}", code, result.codes());
    }
    assert!(result.violations.iter().all(|v| v.level.is_some()));
}

#[test]
fn missing_coverage_respects_config() {
    let mut evidence = evidence_at(EVIDENCE_TS);
    evidence.snapshot.rules_coverage = None;
    let gate = gate_with(evidence.clone(), repo("feature/happy-path"), CHECK_TS);
    let result = gate.evaluate(&pre_write()).expect("evaluate");
    assert_eq!(result.codes(), vec![EVIDENCE_RULES_COVERAGE_MISSING]);

    let mut config = GateConfig::default();
    config.evidence.require_rules_coverage = false;
    let now = at(CHECK_TS);
    let gate = AiGate::new(
        config,
        move || now,
        move |_: &str| EvidenceReadResult::Valid(Box::new(evidence.clone())),
        |_: &str| repo("feature/happy-path"),
    );
    assert!(gate.evaluate(&pre_write()).expect("evaluate").allowed);
}

#[test]
fn required_receipt_missing_then_valid() {
    let evidence = evidence_at(EVIDENCE_TS);
    let now = at(CHECK_TS);
    let request = pre_write().require_mcp_receipt(true);

    let missing = AiGate::new(
        GateConfig::default(),
        move || now,
        {
            let evidence = evidence.clone();
            move |_: &str| EvidenceReadResult::Valid(Box::new(evidence.clone()))
        },
        |_: &str| repo("feature/happy-path"),
    )
    .with_receipt_source(|_: &str| ReceiptReadResult::Missing {
        path: "/repo/.tollgate/artifacts/mcp-ai-gate-receipt.json".to_string(),
    });
    let result = missing.evaluate(&request).expect("evaluate");
    assert_eq!(result.codes(), vec![MCP_RECEIPT_MISSING]);
    assert_eq!(MCP_RECEIPT_MISSING, "MCP_ENTERPRISE_RECEIPT_MISSING");

    let receipt = McpReceipt::new("/repo", Stage::PreWrite, GateStatus::Allowed, at("2026-02-20T12:04:00Z"));
    let valid = AiGate::new(
        GateConfig::default(),
        move || now,
        move |_: &str| EvidenceReadResult::Valid(Box::new(evidence.clone())),
        |_: &str| repo("feature/happy-path"),
    )
    .with_receipt_source(move |_: &str| ReceiptReadResult::Valid {
        path: "receipt.json".to_string(),
        receipt: receipt.clone(),
    });
    let result = valid.evaluate(&request).expect("evaluate");
    assert_eq!(result.status, GateStatus::Allowed);
    assert!(
        !result
            .codes()
            .iter()
            .any(|c| c.starts_with("MCP_ENTERPRISE_RECEIPT_"))
    );
}

#[test]
fn stale_receipt_is_reported() {
    let evidence = evidence_at(EVIDENCE_TS);
    let now = at(CHECK_TS);
    let receipt = McpReceipt::new("/repo/", Stage::PreWrite, GateStatus::Allowed, at("2026-02-20T11:55:00Z"));
    let gate = AiGate::new(
        GateConfig::default(),
        move || now,
        move |_: &str| EvidenceReadResult::Valid(Box::new(evidence.clone())),
        |_: &str| repo("feature/happy-path"),
    )
    .with_receipt_source(move |_: &str| ReceiptReadResult::Valid {
        path: "receipt.json".to_string(),
        receipt: receipt.clone(),
    });
    let result = gate
        .evaluate(&pre_write().require_mcp_receipt(true))
        .expect("evaluate");
    assert_eq!(result.codes(), vec![MCP_RECEIPT_STALE]);
}

#[test]
fn evaluation_is_deterministic() {
    let gate = gate_with(evidence_at("2026-02-20T11:05:00Z"), repo("main"), CHECK_TS);
    let first = gate.evaluate(&pre_write()).expect("evaluate");
    let second = gate.evaluate(&pre_write()).expect("evaluate");
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).expect("json"),
        serde_json::to_string(&second).expect("json")
    );
}
