// Copyright 2025-2026 worklane Contributors
// SPDX-License-Identifier: Apache-2.0

//! Operator commands for `worklane-cli`.
//!
//! ## Usage
//!
//! ```bash
//! worklane-cli run --jobs 200        # Synthetic workload, prints metrics JSON
//! worklane-cli config show           # Effective configuration
//! worklane-cli config validate       # Exit 1 on suspicious settings
//! ```

pub mod config_cmd;
pub mod run_cmd;

pub use run_cmd::{run_workload, WorkloadOptions};

use crate::config::{self, ConfigError, ManagerConfig};

/// Environment variable naming a TOML config file.
pub const CONFIG_PATH_ENV: &str = "WORKLANE_CONFIG";

/// Resolve configuration: an explicit file wins, then `WORKLANE_CONFIG`,
/// then the `WORKLANE_*` variables.
pub fn resolve_config(explicit: Option<&str>) -> Result<ManagerConfig, ConfigError> {
    let from_env = std::env::var(CONFIG_PATH_ENV)
        .ok()
        .filter(|p| !p.trim().is_empty());
    match explicit.map(str::to_string).or(from_env) {
        Some(path) => config::load_file(path),
        None => Ok(config::load()),
    }
}

/// Value following `flag` in `args`, if present.
pub fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}
