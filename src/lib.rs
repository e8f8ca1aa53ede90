//! Tollgate: stage gates for AI-assisted changes.
//!
//! A change moves through four checkpoints (`PRE_WRITE`, `PRE_COMMIT`,
//! `PRE_PUSH`, `CI`). At each checkpoint a rule set turns facts about the
//! repository into findings, a stage policy turns findings into a PASS/BLOCK
//! decision, and the decision is stored as evidence. Before the next action
//! the AI gate re-reads that evidence and refuses it when it is stale,
//! belongs to another repo or branch, or contradicts itself.
//!
//! # Pipeline
//!
//! - [`core::rules`]: predicates over facts, evaluated into findings
//! - [`core::promotion`]: per-stage severity promotion of heuristic rules
//! - [`core::gate`]: stage policies and the PASS/BLOCK aggregator
//! - [`core::coverage`]: which active rules were actually evaluated
//! - [`core::evidence`]: the persisted v2.1 evidence envelope
//! - [`core::ai_gate`]: evidence coherence validation
//! - [`core::receipt`]: optional MCP receipt validation
//!
//! # Examples
//!
//! ```bash
//! # Gate a commit from a fact dump and store the evidence
//! tollgate rules --stage PRE_COMMIT --facts facts.json --write-evidence
//!
//! # Before writing code, check that evidence still holds
//! tollgate ai-gate --stage PRE_WRITE --format json
//! ```

pub mod cli;
pub mod core;

use cli::{AiGateCli, Cli, Command, PromotionsCli, RulesCli};
use crate::core::ai_gate::{AiGateRequest, production_gate};
use crate::core::config::{CliOverrides, GateConfig};
use crate::core::coverage::{RulesCoverage, run_stage_gate};
use crate::core::error::GateError;
use crate::core::evidence::{
    BuildEvidenceParams, EvidenceReadResult, EvidenceSource, FsEvidenceStore, RulesetState,
    build_evidence,
};
use crate::core::facts::{Fact, FactSet};
use crate::core::gate::{GateOutcome, resolve_policy_for_stage};
use crate::core::heuristics::{
    DetectedPlatforms, HeuristicScanner, PatternScanner, collect_heuristic_facts,
    restrict_to_detected,
};
use crate::core::output;
use crate::core::presets::{HEURISTICS_PRESET, HEURISTICS_RULE_SET, heuristic_rule_set, preset_hash};
use crate::core::promotion::PromotionTable;
use crate::core::receipt::{FsReceiptStore, McpReceipt};
use crate::core::repo_state::{GitRepoProbe, RepoStateProbe};
use crate::core::rules::Finding;
use crate::core::severity::Severity;
use crate::core::stage::Stage;
use crate::core::time::{Clock, SystemClock};

use clap::Parser;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Once;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "TOLLGATE_LOG";

static TRACING: Once = Once::new();

/// Install the stderr log subscriber. Reads `TOLLGATE_LOG`, default `warn`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .init();
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

fn output_format(raw: &str) -> Result<OutputFormat, GateError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "text" => Ok(OutputFormat::Text),
        "json" => Ok(OutputFormat::Json),
        other => Err(GateError::ConfigError(format!(
            "unknown format '{}' (expected text or json)",
            other
        ))),
    }
}

/// Canonical repo root string, so evidence written and read by separate
/// invocations compares equal.
fn resolve_repo_root(path: &Path) -> String {
    fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .to_string()
}

/// Parse arguments and dispatch. Returns the process exit code.
pub fn run() -> Result<i32, GateError> {
    let cli = Cli::parse();
    match cli.command {
        Command::AiGate(args) => run_ai_gate(args),
        Command::Rules(args) => run_rules(args),
        Command::Promotions(args) => run_promotions(args),
    }
}

fn run_ai_gate(args: AiGateCli) -> Result<i32, GateError> {
    let format = output_format(&args.format)?;
    let root = resolve_repo_root(&args.repo);
    let overrides = CliOverrides {
        require_mcp_receipt: args.require_mcp_receipt.then_some(true),
        protected_branches: (!args.protected_branches.is_empty())
            .then(|| args.protected_branches.clone()),
    };
    let config = GateConfig::load(Path::new(&root), Some(&overrides))?;
    let gate = production_gate(config);
    let result = gate.evaluate(&AiGateRequest::new(root.clone(), args.stage))?;

    if args.write_receipt {
        let receipt = McpReceipt::new(&root, args.stage, result.status, SystemClock.now());
        let path = FsReceiptStore.write(&receipt)?;
        info!(path = %path.display(), status = %result.status, "receipt written");
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => print!("{}", output::render_ai_gate(&result)),
    }
    Ok(if result.allowed { 0 } else { 1 })
}

#[derive(Serialize)]
struct RulesReport<'a> {
    stage: Stage,
    outcome: GateOutcome,
    findings: &'a [Finding],
    rules_coverage: &'a RulesCoverage,
}

fn run_rules(args: RulesCli) -> Result<i32, GateError> {
    let format = output_format(&args.format)?;
    let root = resolve_repo_root(&args.repo);
    let config = GateConfig::load(Path::new(&root), None)?;

    let raw = fs::read_to_string(&args.facts)?;
    let facts: Vec<Fact> = serde_json::from_str(&raw)?;
    let mut fact_set = FactSet::new(facts);

    let detected = DetectedPlatforms::infer(fact_set.facts());
    let rules = restrict_to_detected(&heuristic_rule_set()?, &detected)
        .with_custom_rules(&config.rules)?;
    let scanners = PatternScanner::from_specs(&config.scanners, &rules)?;
    let scanner_refs: Vec<&dyn HeuristicScanner> =
        scanners.iter().map(|s| s as &dyn HeuristicScanner).collect();
    collect_heuristic_facts(&mut fact_set, &detected, &scanner_refs);

    let mut promotions = PromotionTable::builtin()?;
    promotions.extend(&config.promotions);
    let policy = resolve_policy_for_stage(args.stage, &config.policy)?;
    let run = run_stage_gate(
        args.stage,
        &rules,
        &promotions,
        &fact_set,
        &policy.policy(),
        &args.unsupported,
    );

    if args.write_evidence {
        let store = FsEvidenceStore;
        let previous = match store.read_evidence(&root) {
            EvidenceReadResult::Valid(evidence) => Some(*evidence),
            _ => None,
        };
        let evidence = build_evidence(BuildEvidenceParams {
            stage: args.stage,
            decision: &run.decision,
            rules_coverage: Some(run.coverage.clone()),
            previous: previous.as_ref(),
            human_intent: None,
            platforms: detected.to_states(),
            rulesets: vec![RulesetState {
                platform: "heuristics".to_string(),
                bundle: format!("{}@{}", HEURISTICS_RULE_SET, env!("CARGO_PKG_VERSION")),
                hash: preset_hash(HEURISTICS_PRESET)?,
            }],
            repo_state: GitRepoProbe.capture(&root),
            now: SystemClock.now(),
        })?;
        let path = store.write(&root, &evidence)?;
        info!(path = %path.display(), outcome = %run.decision.outcome, "evidence written");
    }

    match format {
        OutputFormat::Json => {
            let report = RulesReport {
                stage: run.stage,
                outcome: run.decision.outcome,
                findings: &run.decision.findings,
                rules_coverage: &run.coverage,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => print!("{}", output::render_stage_run(&run)),
    }
    Ok(match run.decision.outcome {
        GateOutcome::Pass => 0,
        GateOutcome::Block => 1,
    })
}

fn run_promotions(args: PromotionsCli) -> Result<i32, GateError> {
    let format = output_format(&args.format)?;
    let root = resolve_repo_root(&args.repo);
    let config = GateConfig::load(Path::new(&root), None)?;
    let mut promotions = PromotionTable::builtin()?;
    promotions.extend(&config.promotions);

    match format {
        OutputFormat::Json => {
            let effective: BTreeMap<String, Severity> =
                promotions.effective_at(args.stage).into_iter().collect();
            println!("{}", serde_json::to_string_pretty(&effective)?);
        }
        OutputFormat::Text => print!("{}", output::render_promotions(&promotions, args.stage)),
    }
    Ok(0)
}
