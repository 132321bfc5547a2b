//! Block-chain CLI command

use super::util::{flag_value, has_flag, load_blocks, load_config, load_context, positional};
use ruleforge::*;

pub fn cmd_chain(args: &[String]) -> Result<()> {
    let paths = positional(args);
    if paths.len() < 2 {
        return Err(
            "Usage: ruleforge chain <blocks.yaml> <context.json> [--seed <n>] [--config <file>] [--json]"
                .into(),
        );
    }
    let seed = match flag_value(args, "--seed") {
        Some(s) => Some(
            s.parse::<u64>()
                .map_err(|e| Error::Other(format!("invalid --seed '{}': {}", s, e)))?,
        ),
        None => None,
    };

    let config = load_config(args)?;
    let blocks = load_blocks(paths[0])?;
    let mut ctx = load_context(paths[1])?;

    let input = config.chain_input(&blocks.lists);
    let mut rng = config.rng(seed);
    let run = run_chain(&blocks.blocks, &mut ctx, &input, &mut rng);

    if has_flag(args, "--json") {
        let output = serde_json::json!({
            "outcomes": run.outcomes,
            "trace": run.log,
            "ctx": ctx,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", run.trace_text());
    }
    Ok(())
}
