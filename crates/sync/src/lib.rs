// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! pillar-sync: real-time sync client for the pillar data model.
//!
//! # Main Components
//!
//! - [`ConnectionManager`] - one resilient live channel with heartbeats,
//!   bounded exponential backoff and an ordered send queue
//! - [`SyncCoordinator`] - per-entity subscribers, pending local changes and
//!   conflict resolution
//! - [`OfflineCache`] and [`ActionQueue`] - the last known dataset and a
//!   durable FIFO of user actions replayed on reconnect
//! - [`SyncContext`] - owns one of each and wires them together
//!
//! ```rust,ignore
//! use pillar_sync::{Config, SyncContext};
//!
//! let config = Config::load(&Config::locate(None)?)?;
//! let ctx = SyncContext::open(config)?;
//! ctx.start().await;
//! ctx.queue_action("create_task", serde_json::json!({"title": "Water plants"}))?;
//! ```

mod cli;
mod commands;
pub mod config;
pub mod connection;
pub mod context;
pub mod coordinator;
mod env;
pub mod error;
pub mod notify;
pub mod offline;
pub mod state;
pub mod transport;

#[cfg(test)]
mod test_helpers;

pub use cli::{Cli, Command, OutputFormat};
pub use config::{Config, RemoteConfig, SyncConfig};
pub use connection::{
    ConnectionConfig, ConnectionManager, ConnectionObserver, ConnectionState,
    SharedConnectionState,
};
pub use context::SyncContext;
pub use coordinator::{
    Arbitration, Callback, CoordinatorOptions, RemoteOutcome, Subscription, SyncCoordinator,
};
pub use error::{ConnectError, Error, Result, SendFailure};
pub use notify::{Notifier, SyncNotice};
pub use offline::{ActionHandler, ActionQueue, DrainReport, EventActionHandler, OfflineCache};
pub use state::SyncState;
pub use transport::{websocket_factory, Transport, TransportError, TransportFactory};

/// Loads configuration, opens the on-disk context and runs one command.
pub async fn run(cli: Cli) -> Result<()> {
    let path = Config::locate(cli.config.as_deref())?;
    let config = Config::load(&path)?;
    let ctx = SyncContext::open(config)?;
    commands::run(&ctx, cli.command).await
}
