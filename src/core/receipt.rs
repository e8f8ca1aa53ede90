//! MCP gate receipts.
//!
//! A receipt is an external attestation that the `ai_gate_check` tool saw an
//! ALLOWED gate for a repository and stage. When required, the validator
//! checks it matches the request and is recent.

use crate::core::error::GateError;
use crate::core::evidence::GateStatus;
use crate::core::repo_state::same_repo_root;
use crate::core::stage::Stage;
use crate::core::time::{age_seconds, format_timestamp, parse_timestamp};
use crate::core::violation::{
    MCP_RECEIPT_INVALID, MCP_RECEIPT_MISSING, MCP_RECEIPT_NOT_ALLOWED,
    MCP_RECEIPT_REPO_ROOT_MISMATCH, MCP_RECEIPT_STAGE_MISMATCH, MCP_RECEIPT_STALE,
    MCP_RECEIPT_TIMESTAMP_FUTURE, Violation,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const RECEIPT_VERSION: &str = "1";
pub const RECEIPT_SOURCE: &str = "tollgate-enterprise-mcp";
pub const RECEIPT_TOOL: &str = "ai_gate_check";
pub const RECEIPT_REL_PATH: &str = ".tollgate/artifacts/mcp-ai-gate-receipt.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpReceipt {
    pub version: String,
    pub source: String,
    pub tool: String,
    pub repo_root: String,
    pub stage: Stage,
    pub status: GateStatus,
    pub allowed: bool,
    pub issued_at: String,
}

impl McpReceipt {
    pub fn new(repo_root: &str, stage: Stage, status: GateStatus, issued_at: DateTime<Utc>) -> Self {
        Self {
            version: RECEIPT_VERSION.to_string(),
            source: RECEIPT_SOURCE.to_string(),
            tool: RECEIPT_TOOL.to_string(),
            repo_root: repo_root.to_string(),
            stage,
            status,
            allowed: status == GateStatus::Allowed,
            issued_at: format_timestamp(issued_at),
        }
    }
}

/// Receipt read outcome. `path` is carried for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptReadResult {
    Missing { path: String },
    Invalid { path: String, reason: String },
    Valid { path: String, receipt: McpReceipt },
}

impl ReceiptReadResult {
    pub fn kind(&self) -> &'static str {
        match self {
            ReceiptReadResult::Missing { .. } => "missing",
            ReceiptReadResult::Invalid { .. } => "invalid",
            ReceiptReadResult::Valid { .. } => "valid",
        }
    }
}

fn field<'a>(value: &'a JsonValue, key: &str) -> Option<&'a str> {
    value.get(key).and_then(JsonValue::as_str)
}

/// Validate the raw receipt document, field by field.
pub fn parse_receipt(value: &JsonValue) -> Result<McpReceipt, String> {
    if !value.is_object() {
        return Err("receipt payload must be an object".to_string());
    }
    if field(value, "version") != Some(RECEIPT_VERSION) {
        return Err(format!("receipt version must be \"{}\"", RECEIPT_VERSION));
    }
    if field(value, "source") != Some(RECEIPT_SOURCE) {
        return Err(format!("receipt source must be \"{}\"", RECEIPT_SOURCE));
    }
    if field(value, "tool") != Some(RECEIPT_TOOL) {
        return Err(format!("receipt tool must be \"{}\"", RECEIPT_TOOL));
    }
    let repo_root = field(value, "repo_root")
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| "receipt repo_root must be a non-empty string".to_string())?;
    let stage = field(value, "stage")
        .and_then(|s| serde_json::from_value::<Stage>(JsonValue::String(s.to_string())).ok())
        .ok_or_else(|| "receipt stage must be PRE_WRITE, PRE_COMMIT, PRE_PUSH or CI".to_string())?;
    let status = match field(value, "status") {
        Some("ALLOWED") => GateStatus::Allowed,
        Some("BLOCKED") => GateStatus::Blocked,
        _ => return Err("receipt status must be ALLOWED or BLOCKED".to_string()),
    };
    let allowed = value
        .get("allowed")
        .and_then(JsonValue::as_bool)
        .ok_or_else(|| "receipt allowed must be boolean".to_string())?;
    let issued_at = field(value, "issued_at")
        .filter(|ts| parse_timestamp(ts).is_some())
        .ok_or_else(|| "receipt issued_at must be a valid RFC 3339 timestamp".to_string())?;
    if allowed != (status == GateStatus::Allowed) {
        return Err("receipt status and allowed must be coherent".to_string());
    }
    Ok(McpReceipt {
        version: RECEIPT_VERSION.to_string(),
        source: RECEIPT_SOURCE.to_string(),
        tool: RECEIPT_TOOL.to_string(),
        repo_root: repo_root.to_string(),
        stage,
        status,
        allowed,
        issued_at: issued_at.to_string(),
    })
}

pub trait ReceiptSource {
    fn read_receipt(&self, repo_root: &str) -> ReceiptReadResult;
}

impl<F> ReceiptSource for F
where
    F: Fn(&str) -> ReceiptReadResult,
{
    fn read_receipt(&self, repo_root: &str) -> ReceiptReadResult {
        self(repo_root)
    }
}

/// Reads and writes `<repo>/.tollgate/artifacts/mcp-ai-gate-receipt.json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsReceiptStore;

impl FsReceiptStore {
    pub fn path_for(repo_root: &str) -> PathBuf {
        Path::new(repo_root).join(RECEIPT_REL_PATH)
    }

    pub fn write(&self, receipt: &McpReceipt) -> Result<PathBuf, GateError> {
        let path = Self::path_for(&receipt.repo_root);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(GateError::IoError)?;
        }
        let body = serde_json::to_string_pretty(receipt)?;
        fs::write(&path, format!("{}\n", body)).map_err(GateError::IoError)?;
        Ok(path)
    }
}

impl ReceiptSource for FsReceiptStore {
    fn read_receipt(&self, repo_root: &str) -> ReceiptReadResult {
        let path = Self::path_for(repo_root);
        let path_str = path.to_string_lossy().to_string();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return ReceiptReadResult::Missing { path: path_str };
            }
            Err(e) => {
                return ReceiptReadResult::Invalid {
                    path: path_str,
                    reason: e.to_string(),
                };
            }
        };
        let parsed = serde_json::from_str::<JsonValue>(&raw)
            .map_err(|e| e.to_string())
            .and_then(|value| parse_receipt(&value));
        match parsed {
            Ok(receipt) => ReceiptReadResult::Valid {
                path: path_str,
                receipt,
            },
            Err(reason) => ReceiptReadResult::Invalid {
                path: path_str,
                reason,
            },
        }
    }
}

/// Check a receipt read against the request. Empty when the receipt is good.
pub fn validate_receipt(
    result: &ReceiptReadResult,
    repo_root: &str,
    stage: Stage,
    now: DateTime<Utc>,
    max_age_seconds: u64,
) -> Vec<Violation> {
    let receipt = match result {
        ReceiptReadResult::Missing { path } => {
            return vec![Violation::error(
                MCP_RECEIPT_MISSING,
                format!("MCP receipt is missing ({}).", path),
            )];
        }
        ReceiptReadResult::Invalid { path, reason } => {
            return vec![Violation::error(
                MCP_RECEIPT_INVALID,
                format!("MCP receipt is invalid ({}): {}.", path, reason),
            )];
        }
        ReceiptReadResult::Valid { receipt, .. } => receipt,
    };

    let mut violations = Vec::new();
    if !same_repo_root(&receipt.repo_root, repo_root) {
        violations.push(Violation::error(
            MCP_RECEIPT_REPO_ROOT_MISMATCH,
            format!(
                "MCP receipt repo_root \"{}\" does not match \"{}\".",
                receipt.repo_root, repo_root
            ),
        ));
    }
    if receipt.stage != stage {
        violations.push(Violation::error(
            MCP_RECEIPT_STAGE_MISMATCH,
            format!("MCP receipt stage {} does not match {}.", receipt.stage, stage),
        ));
    }
    if receipt.status != GateStatus::Allowed || !receipt.allowed {
        violations.push(Violation::error(
            MCP_RECEIPT_NOT_ALLOWED,
            format!("MCP receipt status is {}.", receipt.status),
        ));
    }
    if let Some(issued_at) = parse_timestamp(&receipt.issued_at) {
        if issued_at > now {
            violations.push(Violation::error(
                MCP_RECEIPT_TIMESTAMP_FUTURE,
                format!("MCP receipt issued_at {} is in the future.", receipt.issued_at),
            ));
        } else {
            let age = age_seconds(issued_at, now);
            if age > max_age_seconds {
                violations.push(Violation::error(
                    MCP_RECEIPT_STALE,
                    format!("MCP receipt is stale ({}s > {}s).", age, max_age_seconds),
                ));
            }
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        parse_timestamp("2026-02-20T12:05:00Z").unwrap()
    }

    fn valid(receipt: McpReceipt) -> ReceiptReadResult {
        ReceiptReadResult::Valid {
            path: "/repo/.tollgate/artifacts/mcp-ai-gate-receipt.json".to_string(),
            receipt,
        }
    }

    #[test]
    fn test_parse_requires_coherent_status() {
        let mut raw = serde_json::to_value(McpReceipt::new(
            "/repo",
            Stage::PreWrite,
            GateStatus::Allowed,
            now(),
        ))
        .unwrap();
        assert!(parse_receipt(&raw).is_ok());
        raw["allowed"] = JsonValue::Bool(false);
        assert_eq!(
            parse_receipt(&raw).unwrap_err(),
            "receipt status and allowed must be coherent"
        );
        raw["version"] = JsonValue::String("2".to_string());
        assert!(parse_receipt(&raw).unwrap_err().contains("version"));
    }

    #[test]
    fn test_fresh_matching_receipt_passes() {
        let issued = parse_timestamp("2026-02-20T12:04:00Z").unwrap();
        let receipt = McpReceipt::new("/repo", Stage::PreWrite, GateStatus::Allowed, issued);
        assert!(validate_receipt(&valid(receipt), "/repo/", Stage::PreWrite, now(), 300).is_empty());
    }

    #[test]
    fn test_mismatched_blocked_stale_receipt() {
        let issued = parse_timestamp("2026-02-20T11:00:00Z").unwrap();
        let receipt = McpReceipt::new("/other", Stage::PrePush, GateStatus::Blocked, issued);
        let codes: Vec<String> = validate_receipt(&valid(receipt), "/repo", Stage::PreWrite, now(), 300)
            .into_iter()
            .map(|v| v.code)
            .collect();
        assert_eq!(
            codes,
            vec![
                MCP_RECEIPT_REPO_ROOT_MISMATCH,
                MCP_RECEIPT_STAGE_MISMATCH,
                MCP_RECEIPT_NOT_ALLOWED,
                MCP_RECEIPT_STALE,
            ]
        );
    }

    #[test]
    fn test_future_receipt() {
        let issued = parse_timestamp("2026-02-20T12:10:00Z").unwrap();
        let receipt = McpReceipt::new("/repo", Stage::PreWrite, GateStatus::Allowed, issued);
        let violations = validate_receipt(&valid(receipt), "/repo", Stage::PreWrite, now(), 300);
        assert_eq!(violations[0].code, MCP_RECEIPT_TIMESTAMP_FUTURE);
    }

    #[test]
    fn test_fs_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().to_string();
        assert_eq!(FsReceiptStore.read_receipt(&root).kind(), "missing");
        let receipt = McpReceipt::new(&root, Stage::PreWrite, GateStatus::Allowed, now());
        FsReceiptStore.write(&receipt).unwrap();
        assert_eq!(
            FsReceiptStore.read_receipt(&root),
            ReceiptReadResult::Valid {
                path: FsReceiptStore::path_for(&root).to_string_lossy().to_string(),
                receipt,
            }
        );
    }
}
