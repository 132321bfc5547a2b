// Production-quality lints
#![warn(
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
// Deny truly dangerous patterns
#![deny(clippy::mem_forget)]
// Allow common patterns in library code
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! # ruleforge - keyword-injection rules for chat characters
//!
//! Author, check and simulate rules that inject text into a character card
//! when the conversation matches.
//!
//! ## Core Concept
//!
//! A **rule** pairs a condition tree (`when`) with text fragments
//! (`effects`) and optionally one explicit `write`. Conditions read named
//! **sources** (last message, history, character fields, derived numbers)
//! through an explicit [`SourceRegistry`]. Every evaluation returns a
//! [`Reason`] tree explaining why a rule did or did not fire.
//!
//! - **Validate** rule sets and report every structural problem at once
//! - **Evaluate** a batch against one context snapshot ([`run_rules`])
//! - **Apply** rules progressively so later rules see earlier writes
//!   ([`run_rules_progressive`])
//! - **Run block chains** (IF/ELSEIF/ELSE) with a full textual trace
//!   ([`run_chain`])
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ruleforge::*;
//!
//! let rules = RuleSet::from_yaml(r#"
//! rules:
//!   - id: cake_combo
//!     targets: [inject.pre]
//!     when:
//!       type: allTerms
//!       source: lastUser.norm
//!       terms: [strawberry, cake]
//!       mode: word
//!     effects:
//!       inject.pre: combo
//! "#)?;
//!
//! let report = validate_rules(&rules.rules);
//! assert!(report.is_valid());
//!
//! let ctx = Context::with_messages(["I want strawberry cake"]);
//! let compiled = compile_rules(&rules.rules);
//! let result = run_rules(&compiled, &EvalInput::new(&ctx), &SourceRegistry::with_defaults());
//! assert_eq!(result.effects.get("inject.pre"), Some(&["combo".to_string()][..]));
//! ```
//!
//! ## Architecture
//!
//! ```text
//! RuleSpec ──► validate_rules ──► SetValidation
//!    │
//!    └──► compile_rules ──► CompiledRule
//!                              │
//!                              ├──► run_rules ──► EvaluationReport
//!                              │
//!                              └──► run_rules_progressive ──► ProgressiveReport + Context
//!
//! BlockSet ──► run_chain ──► ChainRun (outcomes + trace) + Context
//! ```

// Data model
pub mod block;
pub mod context;
pub mod effects;
pub mod error;
pub mod reason;
pub mod rule;
pub mod trace;

// Sources and conditions
pub mod reasons;
pub mod source;

// Operations
pub mod chain;
pub mod compile;
pub mod eval;
pub mod runtime;
pub mod validate;

// Configuration
pub mod config;
pub mod config_validate;

// Re-exports
pub use block::{
    Action, Block, BlockSet, BlockType, CondGroup, CondLeaf, Condition, ConditionNode, GroupJoin,
    Join, NumericMode, StringMode, TextTarget,
};
pub use chain::{derive_list_counts, run_chain, BlockOutcome, ChainInput, ChainRun};
pub use compile::{compile_reason, compile_rule, compile_rules, CompiledRule};
pub use config::EngineConfig;
pub use context::{Context, WriteOp};
pub use effects::EffectTree;
pub use error::{Error, EvalError, Result};
pub use eval::{
    run_rules, stable_sort_by_priority_desc, ConflictGroup, ConflictKind, EvalInput,
    EvaluationReport, RuleApi, RuleDiagnostic, RuleResult,
};
pub use reason::{Reason, ReasonKind};
pub use reasons::{CompareOp, MatchMode, SourceReader};
pub use rule::{EffectValue, Priority, ReasonNode, ReasonSpec, RuleSet, RuleSpec, WriteSpec};
pub use runtime::{run_rules_progressive, Patch, ProgressiveOptions, ProgressiveReport};
pub use source::{Derived, ReadEnv, SourceKind, SourceRegistry, SourceSpec, SourceValue};
pub use trace::{RuleStage, TraceEvent};
pub use validate::{validate_rule, validate_rules, RuleValidation, SetValidation, Severity, ValidationIssue};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
