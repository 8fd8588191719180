// Copyright 2025-2026 worklane Contributors
// SPDX-License-Identifier: Apache-2.0

//! Config CLI subcommands: show, defaults, validate.
//!
//! These commands only read configuration; no manager is started.

use crate::config::{EffectiveConfig, ManagerConfig};

use super::resolve_config;

/// Print the effective config as `KEY=value` lines. Returns the exit code.
pub fn run_show(path: Option<&str>) -> i32 {
    match resolve_config(path) {
        Ok(cfg) => {
            print_config(&cfg.effective_config());
            0
        }
        Err(e) => {
            eprintln!("ERROR: {e}");
            2
        }
    }
}

/// Print the built-in defaults, ignoring environment and files.
pub fn run_defaults() {
    print_config(&ManagerConfig::default().effective_config());
}

/// Validate configuration for likely mistakes.
///
/// Returns 0 if valid, 1 if any warnings are found, 2 if it cannot be loaded.
pub fn run_validate(path: Option<&str>) -> i32 {
    let cfg = match resolve_config(path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("ERROR: {e}");
            return 2;
        }
    };
    let warnings = cfg.validate();
    for warning in &warnings {
        eprintln!("WARNING: {warning}");
    }
    if warnings.is_empty() {
        println!("Configuration is valid.");
        0
    } else {
        1
    }
}

fn print_config(cfg: &EffectiveConfig) {
    for (key, value) in cfg.entries() {
        println!("{key}={value}");
    }
    println!("# background queue capacity: {}", cfg.background_capacity);
}
