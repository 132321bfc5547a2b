//! Validation CLI command

use super::util::{has_flag, load_rules, positional};
use ruleforge::*;

pub fn cmd_validate(args: &[String]) -> Result<()> {
    let paths = positional(args);
    let Some(rules_path) = paths.first() else {
        return Err("Usage: ruleforge validate <rules.yaml> [--strict] [--json]".into());
    };
    let strict = has_flag(args, "--strict");
    let json_output = has_flag(args, "--json");

    let rules = load_rules(rules_path)?;
    let report = validate_rules(&rules.rules);

    if json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.to_report(rules_path));
        println!("\nhash: {}", rules.hash());
    }

    if !report.is_valid() {
        return Err(format!("{} validation error(s)", report.error_count()).into());
    }
    if strict && report.warning_count() > 0 {
        return Err(format!(
            "{} warning(s) (strict mode treats warnings as errors)",
            report.warning_count()
        )
        .into());
    }
    Ok(())
}
