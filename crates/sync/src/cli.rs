// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Output format for commands supporting structured output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

const QUICKSTART_HELP: &str = "\
Get started:
  pillar status           Show connection settings and local sync state
  pillar watch            Connect and stream sync notices until Ctrl-C
  pillar pending          List local changes not yet acknowledged";

#[derive(Parser, Debug)]
#[command(name = "pillar")]
#[command(about = "Offline-first sync client for pillars, areas, projects and tasks")]
#[command(after_help = QUICKSTART_HELP)]
pub struct Cli {
    /// Path to pillar.toml (defaults to PILLAR_CONFIG, then the state directory)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable debug logging (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Show connection settings and local sync state
    Status {
        #[arg(long = "output", short = 'o', value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },

    /// List local changes waiting for the backend
    Pending {
        #[arg(long = "output", short = 'o', value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },

    /// List actions queued while offline
    Actions {
        #[arg(long = "output", short = 'o', value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },

    /// Show the offline snapshot
    Snapshot {
        #[arg(long = "output", short = 'o', value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },

    /// Connect and stream sync notices until Ctrl-C
    Watch,

    /// Request the complete dataset from the backend
    #[command(name = "full-sync")]
    FullSync {
        /// Seconds to wait for the response
        #[arg(long, default_value = "10")]
        timeout: u64,
    },

    /// Forget sync state, the offline snapshot and queued actions
    Reset {
        /// Required to confirm the reset
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
