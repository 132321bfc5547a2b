//! Trace events recorded during evaluation
//!
//! Trace events are report data for a debug console. They are separate
//! from log output, which goes through `tracing`.

use crate::context::WriteOp;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Which stage of a rule produced a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum RuleStage {
    When,
    Commit,
    Effects,
    Write,
}

impl std::fmt::Display for RuleStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleStage::When => write!(f, "when"),
            RuleStage::Commit => write!(f, "commit"),
            RuleStage::Effects => write!(f, "effects"),
            RuleStage::Write => write!(f, "write"),
        }
    }
}

/// A single trace event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TraceEvent {
    /// Source id is not registered
    #[serde(rename_all = "camelCase")]
    SourceMissing { module_id: String, source_id: String },

    /// Source exists but the module's allowlist excludes it
    #[serde(rename_all = "camelCase")]
    SourceNotAllowed { module_id: String, source_id: String },

    /// Getter or normalizer failed
    #[serde(rename_all = "camelCase")]
    SourceError {
        module_id: String,
        source_id: String,
        message: String,
    },

    /// A rule's condition was evaluated
    #[serde(rename_all = "camelCase")]
    RuleEvaluated { rule_id: String, ok: bool },

    /// A rule stage failed and was isolated
    #[serde(rename_all = "camelCase")]
    RuleError {
        rule_id: String,
        stage: RuleStage,
        message: String,
    },

    /// A patch was applied to the context
    #[serde(rename_all = "camelCase")]
    PatchApplied {
        rule_id: String,
        path: String,
        op: WriteOp,
    },

    /// A patch addressed a path outside the allowed targets
    #[serde(rename_all = "camelCase")]
    WriteBlocked { rule_id: String, path: String },
}

impl std::fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceEvent::SourceMissing {
                module_id,
                source_id,
            } => write!(f, "[{}] source missing: {}", module_id, source_id),
            TraceEvent::SourceNotAllowed {
                module_id,
                source_id,
            } => write!(f, "[{}] source not allowed: {}", module_id, source_id),
            TraceEvent::SourceError {
                module_id,
                source_id,
                message,
            } => write!(f, "[{}] source error {}: {}", module_id, source_id, message),
            TraceEvent::RuleEvaluated { rule_id, ok } => {
                write!(f, "rule {} -> {}", rule_id, if *ok { "PASS" } else { "FAIL" })
            }
            TraceEvent::RuleError {
                rule_id,
                stage,
                message,
            } => write!(f, "rule {} {} error: {}", rule_id, stage, message),
            TraceEvent::PatchApplied { rule_id, path, op } => {
                write!(f, "rule {} {} {}", rule_id, op, path)
            }
            TraceEvent::WriteBlocked { rule_id, path } => {
                write!(f, "rule {} blocked write to {}", rule_id, path)
            }
        }
    }
}
