//! Compact output rendering helpers for CLI surfaces.
//!
//! Keeps command result output bounded and readable while preserving signal.

use crate::core::ai_gate::AiGateResult;
use crate::core::coverage::StageRun;
use crate::core::gate::GateOutcome;
use crate::core::promotion::PromotionTable;
use crate::core::rules::Finding;
use crate::core::severity::Severity;
use crate::core::stage::Stage;
use crate::core::violation::{Violation, remediation_hints};
use colored::Colorize;
use std::fmt::Write as _;

const MESSAGE_WIDTH: usize = 160;

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// Render up to `max_items` messages with compact formatting.
pub fn preview_messages(messages: &[String], max_items: usize, max_chars: usize) -> String {
    if messages.is_empty() {
        return String::new();
    }
    let shown = messages
        .iter()
        .take(max_items)
        .map(|m| compact_line(m, max_chars))
        .collect::<Vec<_>>()
        .join(" | ");
    if messages.len() > max_items {
        format!("{} (+{} more)", shown, messages.len() - max_items)
    } else {
        shown
    }
}

fn severity_label(severity: Severity) -> String {
    let label = format!("{:<8}", severity.as_str());
    match severity {
        Severity::Critical => label.bright_red().bold().to_string(),
        Severity::Error => label.red().bold().to_string(),
        Severity::Warn => label.yellow().to_string(),
        Severity::Info => label.dimmed().to_string(),
    }
}

fn location(file: Option<&str>, lines: &[u32]) -> String {
    match (file, lines) {
        (None, _) => String::new(),
        (Some(f), []) => format!(" ({})", f),
        (Some(f), lines) => {
            let joined = lines.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
            format!(" ({}:{})", f, joined)
        }
    }
}

pub fn render_violation(violation: &Violation) -> String {
    format!(
        "  {} {} {}{}",
        severity_label(violation.level.unwrap_or(Severity::Error)),
        violation.code.bold(),
        compact_line(&violation.message, MESSAGE_WIDTH),
        location(violation.file.as_deref(), &violation.lines).dimmed()
    )
}

pub fn render_finding(finding: &Finding) -> String {
    format!(
        "  {} {} {}{}",
        severity_label(finding.severity),
        finding.rule_id.bold(),
        compact_line(&finding.message, MESSAGE_WIDTH),
        location(finding.file.as_deref(), &finding.lines).dimmed()
    )
}

pub fn render_ai_gate(result: &AiGateResult) -> String {
    let mut out = String::new();
    let status = if result.allowed {
        result.status.to_string().green().bold()
    } else {
        result.status.to_string().red().bold()
    };
    let _ = writeln!(out, "ai-gate {} {}", result.stage.to_string().cyan(), status);
    let age = result
        .evidence
        .age_seconds
        .map(|a| format!("{}s", a))
        .unwrap_or_else(|| "-".to_string());
    let _ = writeln!(
        out,
        "  evidence: {} (age {}, max {}s)",
        result.evidence.kind, age, result.evidence.max_age_seconds
    );
    let _ = writeln!(
        out,
        "  policy:   {} {}",
        result.policy.trace.bundle,
        result.policy.trace.hash.chars().take(12).collect::<String>().dimmed()
    );
    if let Some(branch) = result.repo_state.branch() {
        let _ = writeln!(out, "  branch:   {}", branch);
    }
    for violation in &result.violations {
        let _ = writeln!(out, "{}", render_violation(violation));
    }
    for hint in remediation_hints(&result.violations, result.stage, &result.repo_state) {
        let _ = writeln!(out, "  {} {}", "hint:".bright_blue(), hint);
    }
    out
}

pub fn render_stage_run(run: &StageRun) -> String {
    let mut out = String::new();
    let outcome = match run.decision.outcome {
        GateOutcome::Pass => run.decision.outcome.to_string().green().bold(),
        GateOutcome::Block => run.decision.outcome.to_string().red().bold(),
    };
    let _ = writeln!(out, "rules {} {}", run.stage.to_string().cyan(), outcome);
    let counts = &run.coverage.counts;
    let _ = writeln!(
        out,
        "  coverage: {}/{} evaluated, {} matched, ratio {:.2}",
        counts.evaluated, counts.active, counts.matched, run.coverage.coverage_ratio
    );
    if !run.coverage.unevaluated_rule_ids.is_empty() {
        let _ = writeln!(
            out,
            "  unevaluated: {}",
            preview_messages(&run.coverage.unevaluated_rule_ids, 5, 80)
        );
    }
    for finding in &run.decision.findings {
        let _ = writeln!(out, "{}", render_finding(finding));
    }
    out
}

pub fn render_promotions(table: &PromotionTable, stage: Stage) -> String {
    let mut out = String::new();
    let effective = table.effective_at(stage);
    let _ = writeln!(
        out,
        "promotions at {} ({} rules)",
        stage.to_string().cyan(),
        effective.len()
    );
    for (rule_id, severity) in effective {
        let _ = writeln!(out, "  {} {}", severity_label(severity), rule_id);
    }
    out
}
