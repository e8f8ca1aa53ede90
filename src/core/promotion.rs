//! Stage severity promotion.
//!
//! The table maps `rule_id -> from_stage -> severity`. A promotion applies at
//! its `from_stage` and every later stage; when several entries reach a stage,
//! the one with the latest `from_stage` wins. The table is data, loaded from
//! the embedded preset and extended by project config.

use crate::core::error::GateError;
use crate::core::presets::{self, PROMOTIONS_PRESET};
use crate::core::rules::RuleSet;
use crate::core::severity::Severity;
use crate::core::stage::Stage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionTier {
    pub name: String,
    pub from_stage: Stage,
    pub severity: Severity,
    pub rule_ids: Vec<String>,
}

/// Single promotion entry, the shape used by `[[promotions]]` in config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionEntry {
    pub rule_id: String,
    pub from_stage: Stage,
    pub severity: Severity,
}

#[derive(Debug, Deserialize)]
struct PromotionPresetFile {
    #[serde(default)]
    tier: Vec<PromotionTier>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromotionTable {
    entries: BTreeMap<String, BTreeMap<Stage, Severity>>,
}

impl PromotionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The two built-in tiers.
    pub fn builtin() -> Result<Self, GateError> {
        let raw = presets::preset_text(PROMOTIONS_PRESET)?;
        let parsed: PromotionPresetFile = toml::from_str(&raw).map_err(|e| {
            GateError::ConfigError(format!("PRESET_INVALID: {}: {}", PROMOTIONS_PRESET, e))
        })?;
        let mut table = Self::new();
        for tier in &parsed.tier {
            table.add_tier(tier);
        }
        Ok(table)
    }

    pub fn add_tier(&mut self, tier: &PromotionTier) {
        for rule_id in &tier.rule_ids {
            self.insert(rule_id, tier.from_stage, tier.severity);
        }
    }

    /// Add or replace the promotion of `rule_id` starting at `from_stage`.
    pub fn insert(&mut self, rule_id: &str, from_stage: Stage, severity: Severity) {
        self.entries
            .entry(rule_id.to_string())
            .or_default()
            .insert(from_stage, severity);
    }

    pub fn extend(&mut self, extra: &[PromotionEntry]) {
        for entry in extra {
            self.insert(&entry.rule_id, entry.from_stage, entry.severity);
        }
    }

    pub fn severity_for(&self, rule_id: &str, stage: Stage) -> Option<Severity> {
        self.entries
            .get(rule_id)?
            .range(..=stage)
            .next_back()
            .map(|(_, severity)| *severity)
    }

    /// Every promotion in effect at `stage`, sorted by rule id.
    pub fn effective_at(&self, stage: Stage) -> Vec<(String, Severity)> {
        self.entries
            .keys()
            .filter_map(|id| self.severity_for(id, stage).map(|s| (id.clone(), s)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// New rule set with promoted severities replaced for `stage`.
    ///
    /// Predicates and all unlisted rules are untouched; `rule_set` itself is
    /// never modified, so several stage variants can be derived from one base.
    pub fn apply(&self, rule_set: &RuleSet, stage: Stage) -> RuleSet {
        let mut promoted = 0usize;
        let rules = rule_set
            .rules
            .iter()
            .map(|rule| {
                let mut rule = rule.clone();
                if let Some(severity) = self.severity_for(&rule.id, stage) {
                    if severity != rule.severity {
                        promoted += 1;
                    }
                    rule.severity = severity;
                }
                rule
            })
            .collect();
        debug!(rule_set = %rule_set.name, %stage, promoted, "stage promotions applied");
        RuleSet {
            name: rule_set.name.clone(),
            stages: rule_set.stages.clone(),
            rules,
        }
    }
}

pub fn apply_heuristic_severity_for_stage(
    rule_set: &RuleSet,
    stage: Stage,
    table: &PromotionTable,
) -> RuleSet {
    table.apply(rule_set, stage)
}
