//! CLI utility helpers

use ruleforge::{BlockSet, Context, EngineConfig, Error, Result, RuleSet};
use std::fs;
use std::path::Path;

/// Flags that take a value
const VALUE_FLAGS: &[&str] = &["--config", "-c", "--seed"];

pub fn has_flag(args: &[String], name: &str) -> bool {
    args.iter().any(|a| a == name)
}

/// Value following `name`, if present
pub fn flag_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// Arguments that are neither flags nor flag values
pub fn positional(args: &[String]) -> Vec<&str> {
    let mut out = Vec::new();
    let mut skip = false;
    for arg in args {
        if skip {
            skip = false;
            continue;
        }
        if VALUE_FLAGS.contains(&arg.as_str()) {
            skip = true;
        } else if !arg.starts_with('-') {
            out.push(arg.as_str());
        }
    }
    out
}

pub fn read_file(path: &str) -> Result<String> {
    fs::read_to_string(path).map_err(Error::Io)
}

/// `--config <file>`, or defaults
pub fn load_config(args: &[String]) -> Result<EngineConfig> {
    match flag_value(args, "--config").or_else(|| flag_value(args, "-c")) {
        Some(path) => EngineConfig::load(Path::new(path)),
        None => Ok(EngineConfig::default()),
    }
}

pub fn load_rules(path: &str) -> Result<RuleSet> {
    RuleSet::from_path_str(path, &read_file(path)?)
}

pub fn load_blocks(path: &str) -> Result<BlockSet> {
    BlockSet::from_path_str(path, &read_file(path)?)
}

/// Context from JSON, or YAML when the extension says so
pub fn load_context(path: &str) -> Result<Context> {
    let content = read_file(path)?;
    if path.ends_with(".yaml") || path.ends_with(".yml") {
        Ok(serde_norway::from_str(&content)?)
    } else {
        Context::from_json(&content)
    }
}
