//! CLI command implementations
//!
//! This module contains all CLI command handlers, organized by category:
//! - `validate`: Rule set validation
//! - `run`: Batch and progressive rule evaluation
//! - `chain`: Block-chain simulation
//! - `config`: Config checking and schema commands
//! - `util`: Shared argument and file helpers

pub mod chain;
pub mod config;
pub mod run;
pub mod util;
pub mod validate;

pub use chain::cmd_chain;
pub use config::{cmd_config, cmd_schema};
pub use run::cmd_run;
pub use validate::cmd_validate;
