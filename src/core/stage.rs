//! Lifecycle checkpoints.
//!
//! Stages are totally ordered by how late they run in delivery:
//! `PRE_WRITE < PRE_COMMIT < PRE_PUSH < CI`. Promotion tiers and policy
//! resolution rely on that order.

use crate::core::error::GateError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "PRE_WRITE")]
    PreWrite,
    #[serde(rename = "PRE_COMMIT")]
    PreCommit,
    #[serde(rename = "PRE_PUSH")]
    PrePush,
    #[serde(rename = "CI")]
    Ci,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::PreWrite, Stage::PreCommit, Stage::PrePush, Stage::Ci];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::PreWrite => "PRE_WRITE",
            Stage::PreCommit => "PRE_COMMIT",
            Stage::PrePush => "PRE_PUSH",
            Stage::Ci => "CI",
        }
    }

    /// Stage whose findings policy governs this stage.
    ///
    /// PRE_WRITE has no findings policy of its own; it borrows PRE_COMMIT's.
    pub fn policy_stage(&self) -> Stage {
        match self {
            Stage::PreWrite => Stage::PreCommit,
            other => *other,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        match normalized.as_str() {
            "PRE_WRITE" => Ok(Stage::PreWrite),
            "PRE_COMMIT" => Ok(Stage::PreCommit),
            "PRE_PUSH" => Ok(Stage::PrePush),
            "CI" => Ok(Stage::Ci),
            _ => Err(GateError::InvalidStage(format!(
                "'{}' (expected PRE_WRITE, PRE_COMMIT, PRE_PUSH or CI)",
                s
            ))),
        }
    }
}
