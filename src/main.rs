// Copyright 2025-2026 worklane Contributors
// SPDX-License-Identifier: Apache-2.0

//! worklane-cli entry point.
//!
//! ## Subcommands
//!
//! - `worklane-cli run` - Run a synthetic workload and print metrics JSON
//! - `worklane-cli config show|defaults|validate` - Inspect configuration
//! - `worklane-cli version` / `help`

use std::process::ExitCode;
use std::time::Duration;

use worklane::cli::{self, config_cmd, run_workload, WorkloadOptions};
use worklane::telemetry::{self, LogConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    match command {
        "run" => run(&args).await,
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            let path = cli::flag_value(&args, "--config");
            match subcommand {
                "show" => ExitCode::from(config_cmd::run_show(path) as u8),
                "defaults" => {
                    config_cmd::run_defaults();
                    ExitCode::SUCCESS
                }
                "validate" => ExitCode::from(config_cmd::run_validate(path) as u8),
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_command_help("config");
                    ExitCode::FAILURE
                }
            }
        }
        "help" | "--help" | "-h" => {
            match args.get(2) {
                Some(subcommand) => print_command_help(subcommand),
                None => print_usage(),
            }
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("worklane-cli {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &[String]) -> ExitCode {
    if let Err(e) = telemetry::init_logging(&LogConfig::from_env()) {
        eprintln!("Logging disabled: {}", e);
    }
    telemetry::init_metrics();

    let config = match cli::resolve_config(cli::flag_value(args, "--config")) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::from(2);
        }
    };

    let defaults = WorkloadOptions::default();
    let parse = |flag: &str, default: u64| -> Option<u64> {
        match cli::flag_value(args, flag) {
            Some(raw) => raw.parse().ok(),
            None => Some(default),
        }
    };
    let (Some(jobs), Some(job_ms), Some(fail_every)) = (
        parse("--jobs", defaults.jobs as u64),
        parse("--job-ms", defaults.job_duration.as_millis() as u64),
        parse("--fail-every", defaults.fail_every as u64),
    ) else {
        eprintln!("Invalid numeric option");
        print_command_help("run");
        return ExitCode::from(2);
    };

    let opts = WorkloadOptions {
        jobs: jobs as usize,
        job_duration: Duration::from_millis(job_ms),
        fail_every: fail_every as usize,
        ..defaults
    };

    match run_workload(config, &opts).await {
        Ok(metrics) => match serde_json::to_string_pretty(&metrics) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Failed to encode metrics: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("Workload failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "worklane-cli - bounded worker lanes v{}

USAGE:
    worklane-cli [COMMAND] [OPTIONS]

COMMANDS:
    run          Run a synthetic workload and print final metrics as JSON
    config       Inspect configuration (show, defaults, validate)
    version      Show version information
    help         Show this help message

OPTIONS:
    -h, --help       Show help for command
    -V, --version    Show version information
    --config FILE    Load configuration from a TOML file

EXAMPLES:
    worklane-cli run --jobs 500 --job-ms 2
    worklane-cli config validate --config /etc/worklane.toml
    worklane-cli help run

ENVIRONMENT:
    WORKLANE_CONFIG       TOML config file used when --config is absent
    WORKLANE_*            Individual settings (see `worklane-cli config show`)
    WORKLANE_LOG          Log filter (default: info)
    WORKLANE_LOG_FORMAT   json or pretty (default: json)
    WORKLANE_LOG_FILE     Write logs to a file instead of stderr

EXIT CODES:
    0  Success
    1  Failure / validation warnings
    2  Configuration error
",
        version
    );
}

/// Print detailed help for a specific command.
fn print_command_help(command: &str) {
    match command {
        "run" => {
            eprintln!(
                "worklane-cli run - Synthetic workload

USAGE:
    worklane-cli run [OPTIONS]

OPTIONS:
    --jobs N          Number of jobs (default: 100)
    --job-ms N        Sleep per job in milliseconds (default: 5)
    --fail-every N    Every Nth job fails; 0 disables (default: 10)
    --config FILE     Load configuration from a TOML file

DESCRIPTION:
    Builds a manager from the resolved configuration, runs two thirds of
    the jobs as batches on the main lane and schedules the rest onto the
    background lane, then prints the final metrics snapshot.
"
            );
        }
        "config" => {
            eprintln!(
                "worklane-cli config - Inspect configuration

USAGE:
    worklane-cli config <show|defaults|validate> [--config FILE]

SUBCOMMANDS:
    show        Print effective values as KEY=value
    defaults    Print built-in defaults
    validate    Exit 1 if any setting looks like a mistake
"
            );
        }
        _ => print_usage(),
    }
}
