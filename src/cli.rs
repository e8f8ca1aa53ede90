//! CLI struct definitions for the tollgate command-line interface.
//!
//! All clap-derived types live here. Dispatch logic lives in `lib.rs`.

use crate::core::stage::Stage;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "tollgate",
    version = env!("CARGO_PKG_VERSION"),
    about = "Stage gates for AI-assisted changes: rule findings, severity promotion and evidence coherence checks."
)]
pub(crate) struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Check that stored evidence still admits an action at a stage
    AiGate(AiGateCli),
    /// Evaluate a JSON fact list against the rule preset and decide the stage gate
    Rules(RulesCli),
    /// Show the effective promotion table for a stage
    Promotions(PromotionsCli),
}

#[derive(clap::Args, Debug)]
pub(crate) struct AiGateCli {
    /// Stage to check: PRE_WRITE, PRE_COMMIT, PRE_PUSH or CI.
    #[clap(long)]
    pub stage: Stage,
    /// Repository root.
    #[clap(long, default_value = ".")]
    pub repo: PathBuf,
    /// Require a fresh MCP receipt for this stage.
    #[clap(long)]
    pub require_mcp_receipt: bool,
    /// Protected branch name or `prefix/*` pattern (repeatable).
    #[clap(long = "protected-branch")]
    pub protected_branches: Vec<String>,
    /// Write an MCP receipt recording the result.
    #[clap(long)]
    pub write_receipt: bool,
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    pub format: String,
}

#[derive(clap::Args, Debug)]
pub(crate) struct RulesCli {
    /// Stage being gated.
    #[clap(long)]
    pub stage: Stage,
    /// JSON file holding an array of facts.
    #[clap(long)]
    pub facts: PathBuf,
    /// Repository root (config and evidence location).
    #[clap(long, default_value = ".")]
    pub repo: PathBuf,
    /// AUTO rule id with no automated detector (repeatable).
    #[clap(long = "unsupported")]
    pub unsupported: Vec<String>,
    /// Persist the run as `.ai_evidence.json` in the repository root.
    #[clap(long)]
    pub write_evidence: bool,
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    pub format: String,
}

#[derive(clap::Args, Debug)]
pub(crate) struct PromotionsCli {
    #[clap(long)]
    pub stage: Stage,
    /// Repository root; `[[promotions]]` from its config are included.
    #[clap(long, default_value = ".")]
    pub repo: PathBuf,
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    pub format: String,
}
