//! `config` and `schema` commands

use super::util::{has_flag, positional};
use ruleforge::config_validate::validate_config;
use ruleforge::*;
use std::path::Path;

pub fn cmd_config(args: &[String]) -> Result<()> {
    match args.first().map(String::as_str) {
        Some("check") => {
            let Some(path) = positional(&args[1..]).first().copied() else {
                return Err("Usage: ruleforge config check <file> [--json]".into());
            };
            let result = validate_config(Path::new(path));

            if has_flag(args, "--json") {
                let output = serde_json::json!({
                    "valid": !result.has_errors(),
                    "errors": result.error_count(),
                    "warnings": result.warning_count(),
                    "result": result,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("{}", result.to_report());
            }

            if result.has_errors() {
                return Err(format!("{}: config has {} error(s)", path, result.error_count()).into());
            }
            Ok(())
        }
        Some("schema") => print_schema::<EngineConfig>(),
        Some(cmd) => Err(format!("Unknown config subcommand '{}' (expected check or schema)", cmd).into()),
        None => Err("Usage: ruleforge config <check <file>|schema> [--json]".into()),
    }
}

pub fn cmd_schema(args: &[String]) -> Result<()> {
    let schema_name = args.first().map(|s| s.as_str()).unwrap_or("list");

    match schema_name {
        "list" => {
            println!("Available schemas: rules, blocks, context, config, validation");
            Ok(())
        }
        "rules" => print_schema::<RuleSet>(),
        "blocks" => print_schema::<BlockSet>(),
        "context" => print_schema::<Context>(),
        "config" => print_schema::<EngineConfig>(),
        "validation" => print_schema::<SetValidation>(),
        _ => Err(format!("Unknown schema: {}", schema_name).into()),
    }
}

fn print_schema<T: schemars::JsonSchema>() -> Result<()> {
    let schema = schemars::schema_for!(T);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
