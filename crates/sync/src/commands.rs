// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Command implementations for the `pillar` binary.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use pillar_core::{ConflictPolicy, OfflineSnapshot, Operation, QueuedAction, SyncEvent};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::cli::{Command, OutputFormat};
use crate::context::SyncContext;
use crate::error::{ConnectError, Error, Result};
use crate::notify::SyncNotice;

/// Dispatches a parsed command.
pub async fn run(ctx: &SyncContext, command: Command) -> Result<()> {
    match command {
        Command::Status { output } => {
            let report = StatusReport::collect(ctx)?;
            print(output, &report, |r| r.to_text())
        }
        Command::Pending { output } => {
            let pending = ctx.coordinator().pending_changes();
            print(output, &pending, |events| {
                lines(events, format_event, "no pending changes")
            })
        }
        Command::Actions { output } => {
            let actions = ctx.actions().pending()?;
            print(output, &actions, |actions| {
                lines(actions, format_action, "no queued actions")
            })
        }
        Command::Snapshot { output } => {
            let snapshot = ctx.cache().get_snapshot();
            print(output, &snapshot, |snapshot| match snapshot {
                Some(snapshot) => format_snapshot(snapshot),
                None => "no offline snapshot".to_string(),
            })
        }
        Command::Watch => watch(ctx).await,
        Command::FullSync { timeout } => full_sync(ctx, Duration::from_secs(timeout)).await,
        Command::Reset { force } => {
            if !force {
                eprintln!("this forgets pending changes, the snapshot and queued actions");
                eprintln!("  hint: run `pillar reset --force` to confirm");
                return Ok(());
            }
            ctx.reset()?;
            println!("local sync data reset");
            Ok(())
        }
    }
}

fn print<T: Serialize>(output: OutputFormat, value: &T, text: impl Fn(&T) -> String) -> Result<()> {
    match output {
        OutputFormat::Text => println!("{}", text(value)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

fn lines<T>(items: &[T], format: fn(&T) -> String, empty: &str) -> String {
    if items.is_empty() {
        return empty.to_string();
    }
    items.iter().map(format).collect::<Vec<_>>().join("\n")
}

fn timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn format_event(event: &SyncEvent) -> String {
    let target = match event.entity_id() {
        Some(id) => format!("{}:{}", event.entity_type, id),
        None => match event.operation {
            Operation::BulkUpdate => {
                format!("{} ({} items)", event.entity_type, event.bulk_items().len())
            }
            _ => format!("{} (new)", event.entity_type),
        },
    };
    format!(
        "{}  {:<11} {}",
        timestamp(&event.timestamp),
        event.operation.as_str(),
        target
    )
}

pub(crate) fn format_action(action: &QueuedAction) -> String {
    let mut line = format!("{}  {}", timestamp(&action.timestamp), action.action);
    if action.attempts > 0 {
        line.push_str(&format!(" (failed {}x)", action.attempts));
    }
    line
}

pub(crate) fn format_snapshot(snapshot: &OfflineSnapshot) -> String {
    let mut out = match &snapshot.last_sync {
        Some(ts) => format!("as of {}\n", timestamp(ts)),
        None => "never synced\n".to_string(),
    };
    let counts = snapshot.collections.counts();
    if counts.is_empty() {
        out.push_str("  (empty)");
    }
    let rows: Vec<String> = counts
        .iter()
        .map(|(entity_type, count)| format!("  {:<10} {}", entity_type.as_str(), count))
        .collect();
    out.push_str(&rows.join("\n"));
    out
}

/// Everything `pillar status` reports.
#[derive(Debug, Serialize)]
pub(crate) struct StatusReport {
    pub mode: &'static str,
    pub url: Option<String>,
    pub user_id: String,
    pub state_dir: String,
    pub conflict_policy: ConflictPolicy,
    pub pending_changes: usize,
    pub unresolved_conflicts: usize,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub queued_actions: usize,
    pub snapshot_entities: Option<usize>,
    pub can_work_offline: bool,
}

impl StatusReport {
    pub(crate) fn collect(ctx: &SyncContext) -> Result<Self> {
        let config = ctx.config();
        Ok(StatusReport {
            mode: if config.is_remote_mode() { "remote" } else { "local" },
            url: config.remote.as_ref().map(|r| r.url.clone()),
            user_id: config.user_id.clone(),
            state_dir: ctx.state_dir().display().to_string(),
            conflict_policy: ctx.coordinator().conflict_policy(),
            pending_changes: ctx.coordinator().pending_count(),
            unresolved_conflicts: ctx.coordinator().pending_conflicts().len(),
            last_sync_time: ctx.coordinator().last_sync_time(),
            queued_actions: ctx.actions().len()?,
            snapshot_entities: ctx.cache().get_snapshot().map(|s| s.collections.len()),
            can_work_offline: ctx.cache().can_work_offline(),
        })
    }

    pub(crate) fn to_text(&self) -> String {
        let remote = match &self.url {
            Some(url) => format!("remote ({url})"),
            None => "local only".to_string(),
        };
        let last_sync = self
            .last_sync_time
            .as_ref()
            .map(timestamp)
            .unwrap_or_else(|| "never".to_string());
        let snapshot = match self.snapshot_entities {
            Some(n) if self.can_work_offline => format!("{n} entities (offline ready)"),
            Some(n) => format!("{n} entities"),
            None => "none".to_string(),
        };
        let mut lines = vec![
            format!("Mode:            {remote}"),
            format!("User:            {}", self.user_id),
            format!("State dir:       {}", self.state_dir),
            format!("Conflict policy: {}", self.conflict_policy),
            format!("Last sync:       {last_sync}"),
            format!("Pending changes: {}", self.pending_changes),
            format!("Queued actions:  {}", self.queued_actions),
            format!("Snapshot:        {snapshot}"),
        ];
        if self.unresolved_conflicts > 0 {
            lines.push(format!("Conflicts:       {} unresolved", self.unresolved_conflicts));
        }
        lines.join("\n")
    }
}

async fn watch(ctx: &SyncContext) -> Result<()> {
    require_remote(ctx)?;
    let mut notices = ctx.notices();
    ctx.start().await;
    println!("{}", ctx.connection().status_string());

    loop {
        tokio::select! {
            notice = notices.recv() => match notice {
                Ok(notice) => println!("{notice}"),
                Err(RecvError::Lagged(n)) => warn!("missed {} notices", n),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    ctx.shutdown().await;
    Ok(())
}

async fn full_sync(ctx: &SyncContext, timeout: Duration) -> Result<()> {
    require_remote(ctx)?;
    let mut notices = ctx.notices();
    ctx.start().await;
    ctx.coordinator().request_full_sync()?;

    let applied = tokio::time::timeout(timeout, async {
        loop {
            match notices.recv().await {
                Ok(SyncNotice::FullSyncApplied { entities }) => return Some(entities),
                Ok(SyncNotice::ServerError { message }) => warn!("server error: {}", message),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return None,
            }
        }
    })
    .await;

    ctx.shutdown().await;
    match applied {
        Ok(Some(entities)) => {
            println!("full sync applied: {entities} entities");
            Ok(())
        }
        Ok(None) | Err(_) => Err(ConnectError::Timeout(timeout).into()),
    }
}

fn require_remote(ctx: &SyncContext) -> Result<()> {
    if ctx.config().is_remote_mode() {
        return Ok(());
    }
    Err(Error::Config(
        "no [remote] section configured\n  hint: add `[remote] url = \"ws://...\"` to pillar.toml"
            .to_string(),
    ))
}

#[cfg(test)]
#[path = "commands_tests.rs"]
mod tests;
