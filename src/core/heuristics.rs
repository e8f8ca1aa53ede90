//! Heuristic fact extraction.
//!
//! Scanners (AST or text) report detections per file; this module decides
//! which files a platform's scanners may look at and turns detections into
//! ordinary `Heuristic` facts. The rule engine never sees platform logic.

use crate::core::error::GateError;
use crate::core::evidence::PlatformState;
use crate::core::facts::{Fact, FactKind, FactSet};
use crate::core::rules::RuleSet;
use crate::core::severity::Severity;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

pub const HEURISTIC_SOURCE: &str = "heuristics:ast";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    TypeScript,
    Ios,
    Android,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::TypeScript, Platform::Ios, Platform::Android];

    /// Tag used by the `platform` field of preset rules.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::TypeScript => "typescript",
            Platform::Ios => "ios",
            Platform::Android => "android",
        }
    }

    /// Map a detected-platform key (`frontend`, `backend`, `ios`, ...).
    pub fn from_key(key: &str) -> Option<Platform> {
        match key.trim().to_ascii_lowercase().as_str() {
            "frontend" | "backend" | "web" | "typescript" => Some(Platform::TypeScript),
            "ios" | "swift" => Some(Platform::Ios),
            "android" | "kotlin" => Some(Platform::Android),
            _ => None,
        }
    }

    pub fn is_production_path(&self, path: &str) -> bool {
        is_production_path(*self, path)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectedPlatforms(BTreeSet<Platform>);

impl DetectedPlatforms {
    pub fn new(platforms: impl IntoIterator<Item = Platform>) -> Self {
        Self(platforms.into_iter().collect())
    }

    pub fn contains(&self, platform: Platform) -> bool {
        self.0.contains(&platform)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Platform> + '_ {
        self.0.iter().copied()
    }

    pub fn from_states(states: &BTreeMap<String, PlatformState>) -> Self {
        Self(
            states
                .iter()
                .filter(|(_, s)| s.detected)
                .filter_map(|(k, _)| Platform::from_key(k))
                .collect(),
        )
    }

    /// A platform counts as detected when some fact lives under its roots.
    pub fn infer(facts: &[Fact]) -> Self {
        Self(
            Platform::ALL
                .into_iter()
                .filter(|p| {
                    facts
                        .iter()
                        .filter_map(Fact::path)
                        .any(|path| is_production_path(*p, path))
                })
                .collect(),
        )
    }

    pub fn to_states(&self) -> BTreeMap<String, PlatformState> {
        self.iter()
            .map(|p| {
                (
                    p.as_str().to_string(),
                    PlatformState {
                        detected: true,
                        confidence: None,
                    },
                )
            })
            .collect()
    }
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

pub fn is_build_output_path(path: &str) -> bool {
    let lower = format!("/{}", normalize(path).to_ascii_lowercase());
    ["/node_modules/", "/dist/", "/build/", "/coverage/", "/.git/"]
        .iter()
        .any(|segment| lower.contains(segment))
}

pub fn is_typescript_test_path(path: &str) -> bool {
    path.contains("/__tests__/")
        || path.contains("/tests/")
        || [".spec.ts", ".spec.tsx", ".test.ts", ".test.tsx"]
            .iter()
            .any(|suffix| path.ends_with(suffix))
}

pub fn is_swift_test_path(path: &str) -> bool {
    path.contains("/Tests/")
        || path.contains("/tests/")
        || path.ends_with("Tests.swift")
        || path.ends_with("Test.swift")
}

pub fn is_kotlin_test_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.contains("/test/")
        || lower.contains("/androidtest/")
        || lower.ends_with("test.kt")
        || lower.ends_with("tests.kt")
}

pub fn is_ios_bridge_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.contains("/bridge/") || lower.contains("/bridges/") || lower.ends_with("bridge.swift")
}

fn is_platform_source(platform: Platform, path: &str) -> bool {
    match platform {
        Platform::TypeScript => {
            (path.ends_with(".ts") || path.ends_with(".tsx"))
                && ["apps/frontend/", "apps/web/", "apps/backend/"]
                    .iter()
                    .any(|root| path.starts_with(root))
        }
        Platform::Ios => path.ends_with(".swift") && path.starts_with("apps/ios/"),
        Platform::Android => {
            (path.ends_with(".kt") || path.ends_with(".kts")) && path.starts_with("apps/android/")
        }
    }
}

fn is_platform_test(platform: Platform, path: &str) -> bool {
    match platform {
        Platform::TypeScript => is_typescript_test_path(path),
        Platform::Ios => is_swift_test_path(path),
        Platform::Android => is_kotlin_test_path(path),
    }
}

/// Production source for `platform`: under its roots, not a test, not build output.
pub fn is_production_path(platform: Platform, path: &str) -> bool {
    let path = normalize(path);
    is_platform_source(platform, &path)
        && !is_platform_test(platform, &path)
        && !is_build_output_path(&path)
}

/// Paths a specific rule intentionally does not apply to.
const RULE_PATH_EXEMPTIONS: &[(&str, fn(&str) -> bool)] =
    &[("heuristics.ios.callback-style.ast", is_ios_bridge_path)];

pub fn is_rule_exempt(rule_id: &str, path: &str) -> bool {
    RULE_PATH_EXEMPTIONS
        .iter()
        .any(|(id, exempt)| *id == rule_id && exempt(path))
}

/// One scanner hit in one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub rule_id: String,
    pub code: String,
    pub message: String,
    /// Defaults to WARN.
    pub severity: Option<Severity>,
    pub lines: Vec<u32>,
}

pub trait HeuristicScanner {
    fn platform(&self) -> Platform;
    /// Rule ids this scanner carries detectors for.
    fn rule_ids(&self) -> Vec<String>;
    fn scan(&self, path: &str, content: &str) -> Vec<Detection>;
}

/// Heuristic facts for every production file of a detected platform.
pub fn extract_heuristic_facts(
    facts: &[Fact],
    detected: &DetectedPlatforms,
    scanners: &[&dyn HeuristicScanner],
) -> Vec<Fact> {
    if detected.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    for fact in facts {
        let Fact::FileContent { path, content, .. } = fact else {
            continue;
        };
        let path = normalize(path);
        for scanner in scanners {
            let platform = scanner.platform();
            if !detected.contains(platform) || !is_production_path(platform, &path) {
                continue;
            }
            for detection in scanner.scan(&path, content) {
                if is_rule_exempt(&detection.rule_id, &path) {
                    continue;
                }
                out.push(Fact::Heuristic {
                    rule_id: detection.rule_id,
                    severity: detection.severity.unwrap_or(Severity::Warn),
                    code: detection.code,
                    message: detection.message,
                    file_path: Some(path.clone()),
                    lines: detection.lines,
                    source: HEURISTIC_SOURCE.to_string(),
                });
            }
        }
    }
    debug!(
        platforms = detected.iter().count(),
        heuristic_facts = out.len(),
        "heuristic facts extracted"
    );
    out
}

/// Extract into `fact_set` and record the rule ids of every scanner that ran
/// for a detected platform, even when it detected nothing. Rules no scanner
/// carries stay unscanned.
pub fn collect_heuristic_facts(
    fact_set: &mut FactSet,
    detected: &DetectedPlatforms,
    scanners: &[&dyn HeuristicScanner],
) {
    let extracted = extract_heuristic_facts(fact_set.facts(), detected, scanners);
    let mut ran = false;
    for scanner in scanners.iter().filter(|s| detected.contains(s.platform())) {
        for rule_id in scanner.rule_ids() {
            fact_set.mark_scanned(&rule_id);
        }
        ran = true;
    }
    fact_set.extend(extracted);
    if ran {
        fact_set.mark_collected(FactKind::Heuristic);
    }
}

/// Drop platform-tagged rules whose platform was not detected. Untagged rules
/// and unknown tags are kept.
pub fn restrict_to_detected(rules: &RuleSet, detected: &DetectedPlatforms) -> RuleSet {
    let kept = rules
        .rules
        .iter()
        .filter(|rule| match rule.platform.as_deref().and_then(Platform::from_key) {
            Some(platform) => detected.contains(platform),
            None => true,
        })
        .cloned()
        .collect();
    RuleSet::new(rules.name.clone(), rules.stages.clone(), kept)
}

/// `[[scanners]]` entry: a line regex bound to a rule id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSpec {
    pub platform: Platform,
    pub rule_id: String,
    pub regex: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
struct LinePattern {
    rule_id: String,
    code: String,
    message: String,
    regex: Regex,
}

/// Line-oriented regex scanner. Knows nothing about any language; callers
/// supply the patterns.
#[derive(Debug, Clone)]
pub struct PatternScanner {
    platform: Platform,
    patterns: Vec<LinePattern>,
}

impl PatternScanner {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            patterns: Vec::new(),
        }
    }

    pub fn with_pattern(
        mut self,
        rule_id: &str,
        code: &str,
        message: &str,
        pattern: &str,
    ) -> Result<Self, GateError> {
        let regex = Regex::new(pattern).map_err(|e| GateError::InvalidRule {
            rule_id: rule_id.to_string(),
            message: format!("bad scanner regex '{}': {}", pattern, e),
        })?;
        self.patterns.push(LinePattern {
            rule_id: rule_id.to_string(),
            code: code.to_string(),
            message: message.to_string(),
            regex,
        });
        Ok(self)
    }

    /// One scanner per platform from pattern specs. Code and message fall back
    /// to the matching rule in `rules`, then to the rule id.
    pub fn from_specs(specs: &[PatternSpec], rules: &RuleSet) -> Result<Vec<PatternScanner>, GateError> {
        let mut by_platform: BTreeMap<Platform, PatternScanner> = BTreeMap::new();
        for spec in specs {
            let rule = rules.get(&spec.rule_id);
            let code = spec
                .code
                .clone()
                .or_else(|| rule.map(|r| r.code.clone()))
                .unwrap_or_else(|| spec.rule_id.clone());
            let message = spec
                .message
                .clone()
                .or_else(|| rule.map(|r| r.message.clone()))
                .unwrap_or_else(|| spec.rule_id.clone());
            let scanner = by_platform
                .remove(&spec.platform)
                .unwrap_or_else(|| PatternScanner::new(spec.platform));
            by_platform.insert(
                spec.platform,
                scanner.with_pattern(&spec.rule_id, &code, &message, &spec.regex)?,
            );
        }
        Ok(by_platform.into_values().collect())
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl HeuristicScanner for PatternScanner {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn rule_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.patterns.iter().map(|p| p.rule_id.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    fn scan(&self, _path: &str, content: &str) -> Vec<Detection> {
        self.patterns
            .iter()
            .filter_map(|pattern| {
                let lines: Vec<u32> = content
                    .lines()
                    .enumerate()
                    .filter(|(_, line)| pattern.regex.is_match(line))
                    .map(|(idx, _)| idx as u32 + 1)
                    .collect();
                (!lines.is_empty()).then(|| Detection {
                    rule_id: pattern.rule_id.clone(),
                    code: pattern.code.clone(),
                    message: pattern.message.clone(),
                    severity: None,
                    lines,
                })
            })
            .collect()
    }
}
