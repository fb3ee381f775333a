//! Error types for the safety guard

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading rules, reading hook input or auditing
#[derive(Error, Debug)]
pub enum GuardError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid pattern for rule '{id}': {source}")]
    InvalidPattern {
        id: String,
        #[source]
        source: regex::Error,
    },

    #[error("Failed to read rules file {path}: {source}")]
    RulesFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse rules file {path}: {source}")]
    RulesParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Audit log error: {0}")]
    Audit(#[from] std::io::Error),

    #[error("Failed to serialize audit record: {0}")]
    AuditEncode(#[from] serde_json::Error),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

impl From<std::string::FromUtf8Error> for GuardError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        GuardError::InvalidInput(err.to_string())
    }
}
