//! Error types for ruleforge

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Ruleforge errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("Rule parse error: {0}")]
    RuleParse(String),

    #[error("Block parse error: {0}")]
    BlockParse(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Write error: {0}")]
    Write(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_norway::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

/// Failure inside a single rule's `when`, `commit` or `effects` stage.
///
/// These never abort a batch; the evaluator collects them as diagnostics.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{message}")]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<Error> for EvalError {
    fn from(e: Error) -> Self {
        EvalError::new(e.to_string())
    }
}

impl From<&str> for EvalError {
    fn from(s: &str) -> Self {
        EvalError::new(s)
    }
}
