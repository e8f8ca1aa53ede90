use std::io;
use thiserror::Error;

/// Misuse of the engine. Unsafe repository state is never reported through
/// this type; it surfaces as findings or violations instead.
#[derive(Error, Debug)]
pub enum GateError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Invalid stage: {0}")]
    InvalidStage(String),
    #[error("Invalid rule {rule_id}: {message}")]
    InvalidRule { rule_id: String, message: String },
    #[error("Missing collaborator: {0}")]
    MissingCollaborator(&'static str),
    #[error("Validation error: {0}")]
    ValidationError(String),
}
