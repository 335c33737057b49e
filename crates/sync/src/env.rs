// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access.
//!
//! All runtime environment variables are read here through typed accessors.

use std::path::PathBuf;

/// Environment variable names.
pub mod vars {
    pub const PILLAR_STATE_DIR: &str = "PILLAR_STATE_DIR";
    pub const PILLAR_CONFIG: &str = "PILLAR_CONFIG";
}

fn non_empty_path(name: &str) -> Option<PathBuf> {
    std::env::var_os(name)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Returns the value of `PILLAR_STATE_DIR` if set.
pub fn state_dir() -> Option<PathBuf> {
    non_empty_path(vars::PILLAR_STATE_DIR)
}

/// Returns the value of `PILLAR_CONFIG` if set.
pub fn config_path() -> Option<PathBuf> {
    non_empty_path(vars::PILLAR_CONFIG)
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
