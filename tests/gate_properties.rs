use proptest::prelude::*;
use proptest::sample::select;
use tollgate::core::facts::{ChangeType, Fact};
use tollgate::core::gate::{GateOutcome, GatePolicy, evaluate_gate};
use tollgate::core::promotion::PromotionTable;
use tollgate::core::rules::{Finding, Predicate, Rule, RuleSet, Scope, evaluate_rules};
use tollgate::core::severity::Severity;
use tollgate::core::stage::Stage;

const PATHS: [&str; 5] = [
    "apps/backend/a.ts",
    "apps/backend/b.ts",
    "apps/web/c.ts",
    "docs/readme.md",
    "package.json",
];
const PREFIXES: [&str; 4] = ["apps/", "apps/backend/", "docs/", "package"];

fn severity() -> impl Strategy<Value = Severity> {
    select(Severity::ALL.to_vec())
}

fn stage() -> impl Strategy<Value = Stage> {
    select(Stage::ALL.to_vec())
}

fn policy() -> impl Strategy<Value = GatePolicy> {
    (stage(), select(vec![Severity::Info, Severity::Warn, Severity::Error])).prop_map(
        |(stage, block)| GatePolicy {
            stage,
            block_on_or_above: block,
            warn_on_or_above: Severity::Info,
        },
    )
}

fn finding(rule_id: String, severity: Severity) -> Finding {
    Finding {
        rule_id,
        severity,
        code: "CODE".to_string(),
        message: "message".to_string(),
        file: None,
        matched_by: None,
        source: None,
        lines: Vec::new(),
    }
}

fn findings() -> impl Strategy<Value = Vec<Finding>> {
    prop::collection::vec(
        ("[a-c]\\.rule", severity()).prop_map(|(id, s)| finding(id, s)),
        0..12,
    )
}

fn rule_set() -> impl Strategy<Value = RuleSet> {
    prop::collection::vec((select(PREFIXES.to_vec()), severity()), 1..6).prop_map(|specs| {
        let rules = specs
            .into_iter()
            .enumerate()
            .map(|(idx, (prefix, severity))| Rule {
                id: format!("rule.{}", idx),
                description: String::new(),
                severity,
                platform: None,
                locked: false,
                when: Predicate::FileChange {
                    path_prefix: Some(prefix.to_string()),
                    change_type: None,
                },
                code: format!("RULE_{}", idx),
                message: "changed {file}".to_string(),
                scope: Scope::default(),
            })
            .collect();
        RuleSet::new("generated", Vec::new(), rules)
    })
}

fn facts() -> impl Strategy<Value = Vec<Fact>> {
    prop::collection::vec(
        select(PATHS.to_vec()).prop_map(|path| Fact::FileChange {
            path: path.to_string(),
            change_type: ChangeType::Modified,
            source: "git".to_string(),
        }),
        0..8,
    )
}

proptest! {
    #[test]
    fn one_finding_per_matching_rule_fact_pair(rules in rule_set(), facts in facts()) {
        let findings = evaluate_rules(&rules, &facts);
        for f in &findings {
            prop_assert!(rules.get(&f.rule_id).is_some());
        }
        let expected = facts
            .iter()
            .map(|fact| rules.rules.iter().filter(|r| r.applies_to(fact)).count())
            .sum::<usize>();
        prop_assert_eq!(findings.len(), expected);
    }

    #[test]
    fn promotion_is_idempotent(
        rules in rule_set(),
        entries in prop::collection::vec((0usize..6, stage(), severity()), 0..6),
        at in stage(),
    ) {
        let mut table = PromotionTable::new();
        for (idx, from, severity) in entries {
            table.insert(&format!("rule.{}", idx), from, severity);
        }
        let once = table.apply(&rules, at);
        prop_assert_eq!(&table.apply(&once, at), &once);
    }

    #[test]
    fn empty_findings_always_pass(policy in policy()) {
        prop_assert_eq!(evaluate_gate(Vec::new(), &policy).outcome, GateOutcome::Pass);
    }

    #[test]
    fn outcome_ignores_finding_order(findings in findings(), policy in policy()) {
        let mut reversed = findings.clone();
        reversed.reverse();
        prop_assert_eq!(
            evaluate_gate(findings, &policy).outcome,
            evaluate_gate(reversed, &policy).outcome
        );
    }

    #[test]
    fn raising_a_severity_never_unblocks(
        findings in findings(),
        policy in policy(),
        pick in any::<prop::sample::Index>(),
        raised in severity(),
    ) {
        prop_assume!(!findings.is_empty());
        let idx = pick.index(findings.len());
        prop_assume!(raised >= findings[idx].severity);
        let before = evaluate_gate(findings.clone(), &policy).outcome;
        let mut promoted = findings;
        promoted[idx].severity = raised;
        let after = evaluate_gate(promoted, &policy).outcome;
        if before == GateOutcome::Block {
            prop_assert_eq!(after, GateOutcome::Block);
        }
    }
}
