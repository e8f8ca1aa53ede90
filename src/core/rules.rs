//! Declarative rule sets and fact matching.
//!
//! Rules are plain records with a closed predicate type. `RuleSpec` is the
//! serde form used by presets and project files; compiling a spec validates
//! its regexes and produces an immutable `Rule`.

use crate::core::error::GateError;
use crate::core::facts::{ChangeType, Fact, FactKind};
use crate::core::severity::Severity;
use crate::core::stage::Stage;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

/// Compiled content regex. Equality is by source pattern.
#[derive(Debug, Clone)]
pub struct ContentPattern(Regex);

impl ContentPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(ContentPattern)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }
}

impl PartialEq for ContentPattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for ContentPattern {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    FileChange {
        path_prefix: Option<String>,
        change_type: Option<ChangeType>,
    },
    /// Every `contains` needle and, when any are given, at least one regex.
    FileContent {
        contains: Vec<String>,
        regex: Vec<ContentPattern>,
    },
    /// Matches any located fact whose path fits one of the patterns.
    PathPattern { patterns: Vec<String> },
    Dependency {
        from: Option<String>,
        to: Option<String>,
    },
    Heuristic { rule_id: String },
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
}

impl Predicate {
    pub fn matches(&self, fact: &Fact) -> bool {
        match (self, fact) {
            (
                Predicate::FileChange {
                    path_prefix,
                    change_type,
                },
                Fact::FileChange {
                    path,
                    change_type: actual,
                    ..
                },
            ) => {
                path_prefix
                    .as_deref()
                    .is_none_or(|prefix| path.starts_with(prefix))
                    && change_type.is_none_or(|expected| expected == *actual)
            }
            (Predicate::FileContent { contains, regex }, Fact::FileContent { content, .. }) => {
                contains.iter().all(|needle| content.contains(needle.as_str()))
                    && (regex.is_empty() || regex.iter().any(|re| re.is_match(content)))
            }
            (Predicate::PathPattern { patterns }, fact) => fact
                .path()
                .is_some_and(|path| patterns.iter().any(|p| path_matches(p, path))),
            (Predicate::Dependency { from, to }, Fact::Dependency { from: f, to: t, .. }) => {
                from.as_deref().is_none_or(|expected| expected == f)
                    && to.as_deref().is_none_or(|expected| expected == t)
            }
            (Predicate::Heuristic { rule_id }, Fact::Heuristic { rule_id: actual, .. }) => {
                rule_id == actual
            }
            (Predicate::All(children), fact) => children.iter().all(|c| c.matches(fact)),
            (Predicate::Any(children), fact) => children.iter().any(|c| c.matches(fact)),
            _ => false,
        }
    }

    /// Fact kinds this predicate is able to match.
    pub fn fact_kinds(&self) -> BTreeSet<FactKind> {
        match self {
            Predicate::FileChange { .. } => BTreeSet::from([FactKind::FileChange]),
            Predicate::FileContent { .. } => BTreeSet::from([FactKind::FileContent]),
            Predicate::Dependency { .. } => BTreeSet::from([FactKind::Dependency]),
            Predicate::Heuristic { .. } => BTreeSet::from([FactKind::Heuristic]),
            Predicate::PathPattern { .. } => BTreeSet::from([
                FactKind::FileChange,
                FactKind::FileContent,
                FactKind::Dependency,
                FactKind::Heuristic,
            ]),
            Predicate::All(children) => {
                let mut iter = children.iter().map(Predicate::fact_kinds);
                let first = iter.next().unwrap_or_default();
                iter.fold(first, |acc, kinds| acc.intersection(&kinds).copied().collect())
            }
            Predicate::Any(children) => children.iter().flat_map(Predicate::fact_kinds).collect(),
        }
    }

    /// 1-based lines of a FileContent fact that carry a needle or regex hit.
    fn matched_lines(&self, fact: &Fact) -> Vec<u32> {
        let mut lines = BTreeSet::new();
        self.collect_lines(fact, &mut lines);
        lines.into_iter().collect()
    }

    fn collect_lines(&self, fact: &Fact, out: &mut BTreeSet<u32>) {
        match (self, fact) {
            (Predicate::FileContent { contains, regex }, Fact::FileContent { content, .. }) => {
                for (idx, line) in content.lines().enumerate() {
                    let hit = contains.iter().any(|n| line.contains(n.as_str()))
                        || regex.iter().any(|re| re.is_match(line));
                    if hit {
                        out.insert(idx as u32 + 1);
                    }
                }
            }
            (Predicate::All(children), _) | (Predicate::Any(children), _) => {
                for child in children {
                    if child.matches(fact) {
                        child.collect_lines(fact, out);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Path filter applied before a rule's predicate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

impl Scope {
    pub fn admits(&self, path: Option<&str>) -> bool {
        let Some(path) = path else {
            return self.include.is_empty();
        };
        if self.exclude.iter().any(|p| path_matches(p, path)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|p| path_matches(p, path))
    }
}

/// Path pattern match.
///
/// A pattern with `**` or `*` matches the prefix before and the suffix after
/// the star. A pattern without a star is a path prefix.
pub fn path_matches(pattern: &str, path: &str) -> bool {
    if let Some((prefix, suffix)) = pattern.split_once("**") {
        let suffix = suffix.trim_start_matches('/');
        return path.len() >= prefix.len() + suffix.len()
            && path.starts_with(prefix)
            && path.ends_with(suffix);
    }
    if let Some((prefix, suffix)) = pattern.split_once('*') {
        return path.len() >= prefix.len() + suffix.len()
            && path.starts_with(prefix)
            && path.ends_with(suffix);
    }
    path.starts_with(pattern)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub id: String,
    pub description: String,
    pub severity: Severity,
    pub platform: Option<String>,
    pub locked: bool,
    pub when: Predicate,
    pub code: String,
    pub message: String,
    pub scope: Scope,
}

impl Rule {
    pub fn applies_to(&self, fact: &Fact) -> bool {
        self.scope.admits(fact.path()) && self.when.matches(fact)
    }

    fn finding_for(&self, fact: &Fact) -> Finding {
        let file = fact.path().map(str::to_string);
        let lines = match fact {
            Fact::Heuristic { lines, .. } => {
                let unique: BTreeSet<u32> = lines.iter().copied().collect();
                unique.into_iter().collect()
            }
            _ => self.when.matched_lines(fact),
        };
        let source = fact.source();
        Finding {
            rule_id: self.id.clone(),
            severity: self.severity,
            code: self.code.clone(),
            message: render_message(&self.message, &self.id, file.as_deref()),
            file,
            matched_by: Some(fact.kind()),
            source: (!source.is_empty()).then(|| source.to_string()),
            lines,
        }
    }
}

fn render_message(template: &str, rule_id: &str, file: Option<&str>) -> String {
    template
        .replace("{rule_id}", rule_id)
        .replace("{file}", file.unwrap_or("<repo>"))
}

/// Result of one rule matching one fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub rule_id: String,
    pub severity: Severity,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_by: Option<FactKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum PredicateSpec {
    FileChange {
        #[serde(default)]
        path_prefix: Option<String>,
        #[serde(default)]
        change_type: Option<ChangeType>,
    },
    FileContent {
        #[serde(default)]
        contains: Vec<String>,
        #[serde(default)]
        regex: Vec<String>,
    },
    PathPattern { patterns: Vec<String> },
    Dependency {
        #[serde(default)]
        from: Option<String>,
        #[serde(default)]
        to: Option<String>,
    },
    Heuristic { rule_id: String },
    All { conditions: Vec<PredicateSpec> },
    Any { conditions: Vec<PredicateSpec> },
}

impl PredicateSpec {
    pub fn compile(&self, rule_id: &str) -> Result<Predicate, GateError> {
        let invalid = |message: String| GateError::InvalidRule {
            rule_id: rule_id.to_string(),
            message,
        };
        Ok(match self {
            PredicateSpec::FileChange {
                path_prefix,
                change_type,
            } => Predicate::FileChange {
                path_prefix: path_prefix.clone(),
                change_type: *change_type,
            },
            PredicateSpec::FileContent { contains, regex } => {
                let compiled = regex
                    .iter()
                    .map(|p| {
                        ContentPattern::new(p)
                            .map_err(|e| invalid(format!("bad regex '{}': {}", p, e)))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Predicate::FileContent {
                    contains: contains.clone(),
                    regex: compiled,
                }
            }
            PredicateSpec::PathPattern { patterns } => {
                if patterns.is_empty() {
                    return Err(invalid("PathPattern needs at least one pattern".to_string()));
                }
                Predicate::PathPattern {
                    patterns: patterns.clone(),
                }
            }
            PredicateSpec::Dependency { from, to } => Predicate::Dependency {
                from: from.clone(),
                to: to.clone(),
            },
            PredicateSpec::Heuristic { rule_id: target } => {
                if target.trim().is_empty() {
                    return Err(invalid("Heuristic predicate needs a rule_id".to_string()));
                }
                Predicate::Heuristic {
                    rule_id: target.clone(),
                }
            }
            PredicateSpec::All { conditions } | PredicateSpec::Any { conditions } => {
                if conditions.is_empty() {
                    return Err(invalid("combinator has no conditions".to_string()));
                }
                let children = conditions
                    .iter()
                    .map(|c| c.compile(rule_id))
                    .collect::<Result<Vec<_>, _>>()?;
                if matches!(self, PredicateSpec::All { .. }) {
                    Predicate::All(children)
                } else {
                    Predicate::Any(children)
                }
            }
        })
    }
}

/// Serde form of a rule. A spec without `when` matches the Heuristic fact
/// carrying its own id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub severity: Severity,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub when: Option<PredicateSpec>,
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
    #[serde(default)]
    pub scope: Scope,
}

impl RuleSpec {
    pub fn compile(&self) -> Result<Rule, GateError> {
        if self.id.trim().is_empty() {
            return Err(GateError::InvalidRule {
                rule_id: self.id.clone(),
                message: "rule id is empty".to_string(),
            });
        }
        let when = match &self.when {
            Some(spec) => spec.compile(&self.id)?,
            None => Predicate::Heuristic {
                rule_id: self.id.clone(),
            },
        };
        let code = self
            .code
            .clone()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| self.id.clone());
        Ok(Rule {
            id: self.id.clone(),
            description: self.description.clone(),
            severity: self.severity,
            platform: self.platform.clone(),
            locked: self.locked,
            when,
            code,
            message: self.message.clone(),
            scope: self.scope.clone(),
        })
    }
}

/// Named, ordered collection of rules plus the stages it is active for.
/// An empty stage list means every stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    pub name: String,
    pub stages: Vec<Stage>,
    pub rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(name: impl Into<String>, stages: Vec<Stage>, rules: Vec<Rule>) -> Self {
        Self {
            name: name.into(),
            stages,
            rules,
        }
    }

    pub fn from_specs(
        name: impl Into<String>,
        stages: Vec<Stage>,
        specs: &[RuleSpec],
    ) -> Result<Self, GateError> {
        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(specs.len());
        for spec in specs {
            if !seen.insert(spec.id.as_str()) {
                return Err(GateError::InvalidRule {
                    rule_id: spec.id.clone(),
                    message: "duplicate rule id".to_string(),
                });
            }
            rules.push(spec.compile()?);
        }
        Ok(Self::new(name, stages, rules))
    }

    pub fn is_active_for(&self, stage: Stage) -> bool {
        self.stages.is_empty() || self.stages.contains(&stage)
    }

    pub fn get(&self, rule_id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == rule_id)
    }

    pub fn rule_ids(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Layer custom rules on top of this set.
    ///
    /// A custom rule with a new id is appended; one reusing an unlocked id
    /// replaces it in place. Reusing a locked id is an error.
    pub fn with_custom_rules(&self, specs: &[RuleSpec]) -> Result<RuleSet, GateError> {
        let mut merged = self.clone();
        for spec in specs {
            let rule = spec.compile()?;
            match merged.rules.iter().position(|r| r.id == rule.id) {
                Some(idx) if merged.rules[idx].locked => {
                    return Err(GateError::InvalidRule {
                        rule_id: rule.id,
                        message: "cannot override a locked rule".to_string(),
                    });
                }
                Some(idx) => merged.rules[idx] = rule,
                None => merged.rules.push(rule),
            }
        }
        Ok(merged)
    }
}

/// Match every fact against every rule. One finding per (rule, fact) pair.
pub fn evaluate_rules(rule_set: &RuleSet, facts: &[Fact]) -> Vec<Finding> {
    let mut findings = Vec::new();
    for fact in facts {
        for rule in &rule_set.rules {
            if rule.applies_to(fact) {
                findings.push(rule.finding_for(fact));
            }
        }
    }
    debug!(
        rule_set = %rule_set.name,
        rules = rule_set.rules.len(),
        facts = facts.len(),
        findings = findings.len(),
        "rules evaluated"
    );
    findings
}
