//! Typed observations about a repository.
//!
//! Facts are produced by external collaborators (git probes, file readers,
//! AST/text scanners) and are immutable once produced. `kind` discriminates
//! the variant on the wire; `source` names the producer for audit.

use crate::core::severity::Severity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Fact {
    FileChange {
        path: String,
        #[serde(rename = "changeType")]
        change_type: ChangeType,
        #[serde(default)]
        source: String,
    },
    FileContent {
        path: String,
        content: String,
        #[serde(default)]
        source: String,
    },
    Dependency {
        from: String,
        to: String,
        #[serde(default)]
        source: String,
    },
    Heuristic {
        #[serde(rename = "ruleId")]
        rule_id: String,
        severity: Severity,
        code: String,
        message: String,
        #[serde(rename = "filePath", default, skip_serializing_if = "Option::is_none")]
        file_path: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        lines: Vec<u32>,
        #[serde(default)]
        source: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FactKind {
    FileChange,
    FileContent,
    Dependency,
    Heuristic,
}

impl FactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactKind::FileChange => "FileChange",
            FactKind::FileContent => "FileContent",
            FactKind::Dependency => "Dependency",
            FactKind::Heuristic => "Heuristic",
        }
    }
}

impl fmt::Display for FactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Fact {
    pub fn kind(&self) -> FactKind {
        match self {
            Fact::FileChange { .. } => FactKind::FileChange,
            Fact::FileContent { .. } => FactKind::FileContent,
            Fact::Dependency { .. } => FactKind::Dependency,
            Fact::Heuristic { .. } => FactKind::Heuristic,
        }
    }

    /// Location the fact refers to, when it has one.
    ///
    /// Dependency facts are located at their importing module.
    pub fn path(&self) -> Option<&str> {
        match self {
            Fact::FileChange { path, .. } | Fact::FileContent { path, .. } => Some(path),
            Fact::Dependency { from, .. } => Some(from),
            Fact::Heuristic { file_path, .. } => file_path.as_deref(),
        }
    }

    pub fn source(&self) -> &str {
        match self {
            Fact::FileChange { source, .. }
            | Fact::FileContent { source, .. }
            | Fact::Dependency { source, .. }
            | Fact::Heuristic { source, .. } => source,
        }
    }

    pub fn lines(&self) -> &[u32] {
        match self {
            Fact::Heuristic { lines, .. } => lines,
            _ => &[],
        }
    }
}

/// Facts for one gate run plus the kinds whose producers actually ran.
///
/// A producer can run and find nothing; its kind still counts as collected,
/// which is what lets coverage tell "evaluated, no match" apart from
/// "never evaluated". Heuristic producers are tracked per rule id instead:
/// a scanner only vouches for the rules it carries detectors for.
#[derive(Debug, Clone, Default)]
pub struct FactSet {
    facts: Vec<Fact>,
    collected: BTreeSet<FactKind>,
    scanned: BTreeSet<String>,
}

impl FactSet {
    pub fn new(facts: Vec<Fact>) -> Self {
        let mut set = Self::default();
        set.extend(facts);
        set
    }

    pub fn facts(&self) -> &[Fact] {
        &self.facts
    }

    pub fn collected_kinds(&self) -> &BTreeSet<FactKind> {
        &self.collected
    }

    pub fn is_collected(&self, kind: FactKind) -> bool {
        self.collected.contains(&kind)
    }

    pub fn mark_collected(&mut self, kind: FactKind) {
        self.collected.insert(kind);
    }

    /// Record that a heuristic detector for `rule_id` ran over this run's files.
    pub fn mark_scanned(&mut self, rule_id: &str) {
        self.scanned.insert(rule_id.to_string());
    }

    pub fn is_scanned(&self, rule_id: &str) -> bool {
        self.scanned.contains(rule_id)
    }

    pub fn scanned_rule_ids(&self) -> &BTreeSet<String> {
        &self.scanned
    }

    /// Append facts. A Heuristic fact proves its own rule was scanned.
    pub fn extend(&mut self, facts: impl IntoIterator<Item = Fact>) {
        for fact in facts {
            self.collected.insert(fact.kind());
            if let Fact::Heuristic { rule_id, .. } = &fact {
                self.scanned.insert(rule_id.clone());
            }
            self.facts.push(fact);
        }
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heuristic_fact_wire_shape() {
        let raw = r#"{
            "kind": "Heuristic",
            "ruleId": "heuristics.ts.console-log.ast",
            "severity": "WARN",
            "code": "HEURISTICS_CONSOLE_LOG_AST",
            "message": "console.log",
            "filePath": "core/a.ts",
            "source": "heuristics:ast"
        }"#;
        let fact: Fact = serde_json::from_str(raw).unwrap();
        assert_eq!(fact.kind(), FactKind::Heuristic);
        assert_eq!(fact.path(), Some("core/a.ts"));
        assert_eq!(fact.source(), "heuristics:ast");
        assert!(fact.lines().is_empty());
    }

    #[test]
    fn test_file_change_wire_shape() {
        let raw = r#"{"kind":"FileChange","path":"apps/backend/src/main.ts","changeType":"modified","source":"git"}"#;
        let fact: Fact = serde_json::from_str(raw).unwrap();
        assert_eq!(
            fact,
            Fact::FileChange {
                path: "apps/backend/src/main.ts".to_string(),
                change_type: ChangeType::Modified,
                source: "git".to_string(),
            }
        );
    }

    #[test]
    fn test_fact_set_tracks_collected_kinds() {
        let mut set = FactSet::new(vec![Fact::Dependency {
            from: "a".to_string(),
            to: "b".to_string(),
            source: "depcruise".to_string(),
        }]);
        assert!(set.is_collected(FactKind::Dependency));
        assert!(!set.is_collected(FactKind::Heuristic));

        set.mark_collected(FactKind::Heuristic);
        assert!(set.is_collected(FactKind::Heuristic));
        assert_eq!(set.len(), 1);
        assert!(set.scanned_rule_ids().is_empty());
    }

    #[test]
    fn test_heuristic_facts_mark_their_rule_scanned() {
        let set = FactSet::new(vec![Fact::Heuristic {
            rule_id: "heuristics.ts.eval.ast".to_string(),
            severity: Severity::Warn,
            code: "HEURISTICS_EVAL_AST".to_string(),
            message: "eval".to_string(),
            file_path: None,
            lines: vec![],
            source: "external".to_string(),
        }]);
        assert!(set.is_scanned("heuristics.ts.eval.ast"));
        assert!(!set.is_scanned("heuristics.ts.console-log.ast"));
    }
}
