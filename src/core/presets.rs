//! Embedded rule presets.
//!
//! Preset TOML files under `presets/` are baked into the binary so a gate
//! run never depends on files outside the repository being checked.

use crate::core::error::GateError;
use crate::core::rules::{RuleSet, RuleSpec};
use rust_embed::RustEmbed;
use serde::Deserialize;
use sha2::{Digest, Sha256};

pub const HEURISTICS_PRESET: &str = "heuristics.toml";
pub const PROMOTIONS_PRESET: &str = "stage_promotions.toml";
pub const HEURISTICS_RULE_SET: &str = "heuristics.ast";

#[derive(RustEmbed)]
#[folder = "presets/"]
#[include = "*.toml"]
struct PresetAssets;

#[derive(Debug, Deserialize)]
struct RulePresetFile {
    #[serde(default)]
    rule: Vec<RuleSpec>,
}

pub fn preset_text(name: &str) -> Result<String, GateError> {
    let file = PresetAssets::get(name)
        .ok_or_else(|| GateError::ConfigError(format!("PRESET_MISSING: {}", name)))?;
    String::from_utf8(file.data.into_owned())
        .map_err(|e| GateError::ConfigError(format!("PRESET_NOT_UTF8: {}: {}", name, e)))
}

pub fn list_presets() -> Vec<String> {
    let mut names: Vec<String> = PresetAssets::iter().map(|n| n.to_string()).collect();
    names.sort();
    names
}

/// SHA-256 of an embedded preset, recorded in evidence `rulesets`.
pub fn preset_hash(name: &str) -> Result<String, GateError> {
    let mut hasher = Sha256::new();
    hasher.update(preset_text(name)?.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// Built-in heuristic rules, active at every stage. Preset rules are locked.
pub fn heuristic_rule_set() -> Result<RuleSet, GateError> {
    let raw = preset_text(HEURISTICS_PRESET)?;
    let parsed: RulePresetFile = toml::from_str(&raw)
        .map_err(|e| GateError::ConfigError(format!("PRESET_INVALID: {}: {}", HEURISTICS_PRESET, e)))?;
    let mut set = RuleSet::from_specs(HEURISTICS_RULE_SET, Vec::new(), &parsed.rule)?;
    for rule in &mut set.rules {
        rule.locked = true;
    }
    Ok(set)
}
