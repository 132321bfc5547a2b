//! Rule evaluation CLI command

use super::util::{has_flag, load_config, load_context, load_rules, positional};
use ruleforge::*;
use tracing::info;

pub fn cmd_run(args: &[String]) -> Result<()> {
    let paths = positional(args);
    if paths.len() < 2 {
        return Err(
            "Usage: ruleforge run <rules.yaml> <context.json> [--progressive] [--config <file>] [--json] [--all]"
                .into(),
        );
    }
    let json_output = has_flag(args, "--json");
    let show_all = has_flag(args, "--all");

    let config = load_config(args)?;
    let rules = load_rules(paths[0])?;
    let mut ctx = load_context(paths[1])?;

    let validation = validate_rules(&rules.rules);
    for issue in &validation.errors {
        eprintln!("{}", issue);
    }

    let registry = config.registry();
    let compiled = compile_rules(&rules.rules);
    info!(rules = compiled.len(), hash = %rules.hash(), "rules compiled");

    if has_flag(args, "--progressive") {
        let ordered = stable_sort_by_priority_desc(&compiled);
        let options = config.progressive_options();
        let report = run_rules_progressive(&ordered, &mut ctx, &options, &registry);

        if json_output {
            let output = serde_json::json!({
                "report": report,
                "ctx": ctx,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!("{}", report.to_report());
            println!("{}", ctx.to_json()?);
        }

        return match report.hard_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        };
    }

    let input = EvalInput::new(&ctx).strict(config.strict_reads);
    let report = run_rules(&compiled, &input, &registry);
    if json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.to_report(show_all));
    }
    Ok(())
}
