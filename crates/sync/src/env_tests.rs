// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;

#[test]
fn test_vars_constants() {
    assert_eq!(vars::PILLAR_STATE_DIR, "PILLAR_STATE_DIR");
    assert_eq!(vars::PILLAR_CONFIG, "PILLAR_CONFIG");
}

#[test]
fn test_config_path_set_and_empty() {
    std::env::set_var(vars::PILLAR_CONFIG, "/tmp/pillar.toml");
    assert_eq!(config_path(), Some(PathBuf::from("/tmp/pillar.toml")));

    std::env::set_var(vars::PILLAR_CONFIG, "");
    assert_eq!(config_path(), None);

    std::env::remove_var(vars::PILLAR_CONFIG);
    assert_eq!(config_path(), None);
}
