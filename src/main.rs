//! ruleforge CLI - Command-line interface
//!
//! Commands:
//!   validate - Check a rule set for structural problems
//!   run      - Evaluate rules against a context
//!   chain    - Run an IF/ELSEIF/ELSE block chain
//!   config   - Check an engine config file
//!   schema   - Print JSON schemas

mod cli;

use ruleforge::VERSION;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    init_logging();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        return ExitCode::from(1);
    }

    let result = match args[1].as_str() {
        "validate" => cli::cmd_validate(&args[2..]),
        "run" => cli::cmd_run(&args[2..]),
        "chain" => cli::cmd_chain(&args[2..]),
        "config" => cli::cmd_config(&args[2..]),
        "schema" => cli::cmd_schema(&args[2..]),
        "version" | "--version" | "-v" => {
            println!("ruleforge {}", VERSION);
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        cmd => {
            eprintln!("Unknown command: {}", cmd);
            print_usage();
            Err("Unknown command".into())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(1)
        }
    }
}

/// Log to stderr, filtered by `RUST_LOG` (default `warn`)
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_usage() {
    println!(
        r#"
ruleforge - keyword-injection rules for chat characters

USAGE:
    ruleforge <COMMAND> [OPTIONS]

COMMANDS:
    validate <rules.yaml>                  Report structural errors and warnings
    run <rules.yaml> <context.json>        Evaluate rules against a context
    chain <blocks.yaml> <context.json>     Run an IF/ELSEIF/ELSE block chain
    config check <file>                    Validate an engine config file
    config schema                          Print the config JSON schema
    schema [name]                          Print JSON schema (rules, blocks, context, config, validation)
    version                                Print version

OPTIONS:
    --config <file>     Engine config (allowed targets, allowlists, lists, seed)
    --progressive       Apply each fired rule's writes before the next rule (run)
    --all               Show rules that did not fire (run)
    --seed <n>          Seed for random conditions and picks (chain)
    --strict            Treat warnings as errors (validate)
    --json              JSON output

EXAMPLES:
    ruleforge validate demos/rules.yaml
    ruleforge run demos/rules.yaml demos/context.json --all
    ruleforge run demos/rules.yaml demos/context.json --progressive --config demos/ruleforge.yaml
    ruleforge chain demos/blocks.yaml demos/context.json --seed 7
"#
    );
}
