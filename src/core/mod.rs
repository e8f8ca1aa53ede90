//! Core gate engine.
//!
//! Facts flow through rules into findings, findings through a stage policy
//! into a decision, and decisions into persisted evidence that later stages
//! re-check for coherence.

pub mod ai_gate;
pub mod config;
pub mod coverage;
pub mod error;
pub mod evidence;
pub mod facts;
pub mod gate;
pub mod heuristics;
pub mod output;
pub mod presets;
pub mod promotion;
pub mod receipt;
pub mod repo_state;
pub mod rules;
pub mod severity;
pub mod stage;
pub mod time;
pub mod violation;
