//! Rules coverage and the stage gate pipeline.
//!
//! Coverage records how much of the active rule set was actually exercised
//! by the facts collected in a run. Gaps become ERROR governance findings so
//! an incomplete run blocks itself.

use crate::core::facts::FactSet;
use crate::core::gate::{GateDecision, GatePolicy, evaluate_gate};
use crate::core::promotion::PromotionTable;
use crate::core::rules::{Finding, Predicate, Rule, RuleSet, evaluate_rules};
use crate::core::severity::Severity;
use crate::core::stage::Stage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::warn;

pub const RULES_COVERAGE_INCOMPLETE_RULE: &str = "governance.rules.coverage.incomplete";
pub const DETECTOR_MAPPING_INCOMPLETE_RULE: &str = "governance.skills.detector-mapping.incomplete";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageCounts {
    pub active: usize,
    pub evaluated: usize,
    pub matched: usize,
    pub unevaluated: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsupported_auto: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulesCoverage {
    pub stage: Stage,
    pub active_rule_ids: Vec<String>,
    pub evaluated_rule_ids: Vec<String>,
    pub matched_rule_ids: Vec<String>,
    pub unevaluated_rule_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsupported_auto_rule_ids: Option<Vec<String>>,
    pub counts: CoverageCounts,
    pub coverage_ratio: f64,
}

impl RulesCoverage {
    pub fn compute(
        stage: Stage,
        rule_set: &RuleSet,
        fact_set: &FactSet,
        findings: &[Finding],
        unsupported_auto_rule_ids: &[String],
    ) -> Self {
        let active: BTreeSet<String> = if rule_set.is_active_for(stage) {
            rule_set.rule_ids().map(str::to_string).collect()
        } else {
            BTreeSet::new()
        };
        let evaluated: BTreeSet<String> = rule_set
            .rules
            .iter()
            .filter(|r| active.contains(&r.id))
            .filter(|r| was_evaluated(r, fact_set))
            .map(|r| r.id.clone())
            .collect();
        let matched: BTreeSet<String> = findings
            .iter()
            .filter(|f| active.contains(&f.rule_id))
            .map(|f| f.rule_id.clone())
            .collect();
        let unevaluated: Vec<String> = active.difference(&evaluated).cloned().collect();
        let unsupported: BTreeSet<String> = unsupported_auto_rule_ids.iter().cloned().collect();

        let coverage_ratio = if active.is_empty() {
            1.0
        } else {
            evaluated.len() as f64 / active.len() as f64
        };
        let unsupported = (!unsupported.is_empty()).then(|| unsupported.into_iter().collect::<Vec<_>>());

        Self {
            stage,
            counts: CoverageCounts {
                active: active.len(),
                evaluated: evaluated.len(),
                matched: matched.len(),
                unevaluated: unevaluated.len(),
                unsupported_auto: unsupported.as_ref().map(Vec::len),
            },
            active_rule_ids: active.into_iter().collect(),
            evaluated_rule_ids: evaluated.into_iter().collect(),
            matched_rule_ids: matched.into_iter().collect(),
            unevaluated_rule_ids: unevaluated,
            unsupported_auto_rule_ids: unsupported,
            coverage_ratio,
        }
    }

    pub fn unsupported_auto(&self) -> &[String] {
        self.unsupported_auto_rule_ids.as_deref().unwrap_or(&[])
    }

    pub fn is_complete(&self) -> bool {
        self.unevaluated_rule_ids.is_empty() && self.unsupported_auto().is_empty()
    }
}

/// A Heuristic rule is evaluated only when a detector for its id ran; other
/// rules when a producer for one of their fact kinds ran.
fn was_evaluated(rule: &Rule, fact_set: &FactSet) -> bool {
    match &rule.when {
        Predicate::Heuristic { rule_id } => fact_set.is_scanned(rule_id),
        when => when.fact_kinds().iter().any(|k| fact_set.is_collected(*k)),
    }
}

pub fn governance_findings(coverage: &RulesCoverage) -> Vec<Finding> {
    let mut findings = Vec::new();
    if !coverage.unevaluated_rule_ids.is_empty() {
        findings.push(Finding {
            rule_id: RULES_COVERAGE_INCOMPLETE_RULE.to_string(),
            severity: Severity::Error,
            code: "GOVERNANCE_RULES_COVERAGE_INCOMPLETE".to_string(),
            message: format!(
                "Active rules were not evaluated at {}: unevaluated_rule_ids=[{}] coverage_ratio={:.2}",
                coverage.stage,
                coverage.unevaluated_rule_ids.join(", "),
                coverage.coverage_ratio
            ),
            file: None,
            matched_by: None,
            source: Some("governance".to_string()),
            lines: vec![],
        });
    }
    let unsupported = coverage.unsupported_auto();
    if !unsupported.is_empty() {
        findings.push(Finding {
            rule_id: DETECTOR_MAPPING_INCOMPLETE_RULE.to_string(),
            severity: Severity::Error,
            code: "GOVERNANCE_SKILLS_DETECTOR_MAPPING_INCOMPLETE".to_string(),
            message: format!(
                "AUTO rules have no detector mapped: unsupported_auto_rule_ids=[{}]",
                unsupported.join(", ")
            ),
            file: None,
            matched_by: None,
            source: Some("governance".to_string()),
            lines: vec![],
        });
    }
    findings
}

/// One stage run: promoted rules, decision and the coverage that backs it.
#[derive(Debug, Clone)]
pub struct StageRun {
    pub stage: Stage,
    pub rules: RuleSet,
    pub decision: GateDecision,
    pub coverage: RulesCoverage,
}

/// Promote, evaluate, append governance findings, then decide.
pub fn run_stage_gate(
    stage: Stage,
    base_rules: &RuleSet,
    promotions: &PromotionTable,
    fact_set: &FactSet,
    policy: &GatePolicy,
    unsupported_auto_rule_ids: &[String],
) -> StageRun {
    let rules = promotions.apply(base_rules, stage);
    let mut findings = if rules.is_active_for(stage) {
        evaluate_rules(&rules, fact_set.facts())
    } else {
        Vec::new()
    };
    let coverage =
        RulesCoverage::compute(stage, &rules, fact_set, &findings, unsupported_auto_rule_ids);
    if !coverage.is_complete() {
        warn!(
            %stage,
            unevaluated = coverage.counts.unevaluated,
            unsupported_auto = coverage.unsupported_auto().len(),
            "rules coverage incomplete"
        );
    }
    findings.extend(governance_findings(&coverage));
    let decision = evaluate_gate(findings, policy);
    StageRun {
        stage,
        rules,
        decision,
        coverage,
    }
}
