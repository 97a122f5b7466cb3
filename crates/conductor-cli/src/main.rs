//! `conductor` — operator CLI for the pty watcher daemon.
//!
//! Three subcommands under `pty`: `watch` runs the watcher loop in the
//! foreground, `status` lists tracked panes, `tail` shows a pane's
//! classification history. See `conductor_watcher::PtyWatcher` for the loop
//! this binary drives.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use conductor_core::Config;
use conductor_mux::TmuxAdapter;
use conductor_storage::{HistoryRow, StatusRow, StatusStore};
use conductor_watcher::PtyWatcher;
use serde::Serialize;

#[derive(Parser)]
#[command(name = "conductor", about = "Conductor helper CLI")]
struct Cli {
    /// Enable debug logging.
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// PTY helper commands.
    Pty {
        #[command(subcommand)]
        command: PtyCommand,
    },
}

#[derive(Subcommand)]
enum PtyCommand {
    /// Run the tmux watcher daemon.
    Watch {
        /// Polling interval in seconds (defaults to the configured watcher interval).
        #[arg(long)]
        interval: Option<f64>,
    },
    /// List tracked PTYs and their states.
    Status {
        /// Only show panes polled within the past SECONDS (default: all).
        #[arg(long, value_name = "SECONDS")]
        since: Option<f64>,
        /// Output raw JSON rows.
        #[arg(long)]
        json: bool,
        /// Print a compact one-line summary instead of the table.
        #[arg(long)]
        short: bool,
    },
    /// Show status history for a pane.
    Tail {
        /// tmux pane id to inspect (e.g. %14).
        pane_id: String,
        /// Maximum number of history rows to display.
        #[arg(long, default_value_t = 50)]
        limit: u32,
        /// Output JSON history rows.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let config = Arc::new(Config::load().context("loading configuration")?);

    let Commands::Pty { command } = cli.command;
    match command {
        PtyCommand::Watch { interval } => {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("building tokio runtime")?;
            rt.block_on(run_pty_watch(config, interval))
        }
        PtyCommand::Status { since, json, short } => run_pty_status(&config, since, json, short),
        PtyCommand::Tail { pane_id, limit, json } => run_pty_tail(&config, &pane_id, limit, json),
    }
}

async fn run_pty_watch(config: Arc<Config>, interval: Option<f64>) -> Result<()> {
    let mut config = (*config).clone();
    if let Some(interval) = interval {
        config.watcher_interval_secs = interval;
    }
    let config = Arc::new(config);

    tracing::info!(
        interval = config.watcher_interval_secs,
        workspace_root = %config.workspace_root.display(),
        "starting pty watcher"
    );

    let adapter = Arc::new(TmuxAdapter::new());
    let status_store = StatusStore::open(&config.status_db_path).context("opening status store")?;
    let mut watcher = PtyWatcher::new(adapter, config, status_store);

    tokio::select! {
        _ = watcher.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down watcher");
        }
    }
    Ok(())
}

fn run_pty_status(config: &Config, since: Option<f64>, json: bool, short: bool) -> Result<()> {
    let store = StatusStore::open(&config.status_db_path).context("opening status store")?;
    let min_ts = min_timestamp_for_window(since);
    let rows = store.list_status(min_ts).context("listing pane status")?;

    if json {
        let payload: Vec<StatusJson> = rows.iter().map(StatusJson::from_row).collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    if short {
        if rows.is_empty() {
            println!("[no workers]");
            return Ok(());
        }
        let chunks: Vec<String> = rows
            .iter()
            .map(|row| {
                let worker = row.worker_id.as_deref().unwrap_or(&row.pane_id);
                format!("[{worker}: {:?}]", row.state)
            })
            .collect();
        println!("{}", chunks.join(" "));
        return Ok(());
    }

    if rows.is_empty() {
        println!("No PTYs tracked (status database empty).");
        return Ok(());
    }

    let headers = ["Pane", "Target", "State", "Summary", "Last polled"];
    let table_rows: Vec<[String; 5]> = rows
        .iter()
        .map(|row| {
            [
                row.pane_id.clone(),
                row.tmux_target().unwrap_or_else(|| "-".to_string()),
                format!("{:?}", row.state),
                row.summary.trim().to_string(),
                format_timestamp(row.last_polled_ts),
            ]
        })
        .collect();
    print_table(&headers, &table_rows);
    Ok(())
}

fn run_pty_tail(config: &Config, pane_id: &str, limit: u32, json: bool) -> Result<()> {
    let store = StatusStore::open(&config.status_db_path).context("opening status store")?;
    let rows = store.tail_history(pane_id, limit).context("reading pane history")?;

    if json {
        let payload: Vec<HistoryJson> = rows.iter().map(HistoryJson::from_row).collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No history found for pane {pane_id}.");
        return Ok(());
    }

    let headers = ["Timestamp", "State", "Summary"];
    let table_rows: Vec<[String; 3]> = rows
        .iter()
        .map(|row| {
            [
                format_timestamp(Some(row.ts)),
                format!("{:?}", row.state),
                row.summary.trim().to_string(),
            ]
        })
        .collect();
    let target = rows[0].tmux_target().unwrap_or_else(|| pane_id.to_string());
    println!("History for {target} (limit {limit}):");
    print_table(&headers, &table_rows);
    Ok(())
}

/// `None` means no time window; otherwise the earliest timestamp to include.
fn min_timestamp_for_window(since_secs: Option<f64>) -> Option<DateTime<Utc>> {
    let since_secs = since_secs?;
    Some(Utc::now() - chrono::Duration::milliseconds((since_secs * 1000.0) as i64))
}

fn format_timestamp(ts: Option<DateTime<Utc>>) -> String {
    match ts {
        Some(ts) => ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        None => "-".to_string(),
    }
}

fn print_table<const N: usize>(headers: &[&str; N], rows: &[[String; N]]) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (idx, value) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(value.len());
        }
    }
    let print_row = |cells: &[&str]| {
        let line: Vec<String> = cells
            .iter()
            .zip(widths.iter())
            .map(|(cell, width)| format!("{cell:width$}"))
            .collect();
        println!("{}", line.join("  "));
    };
    print_row(headers);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    println!("{}", rule.join("  "));
    for row in rows {
        let cells: Vec<&str> = row.iter().map(|s| s.as_str()).collect();
        print_row(&cells);
    }
}

#[derive(Serialize)]
struct StatusJson {
    pane_id: String,
    worker_id: Option<String>,
    tmux_target: Option<String>,
    cwd: Option<String>,
    cli_type: Option<String>,
    state: String,
    summary: String,
    actions_needed: Option<String>,
    last_change_ts: Option<DateTime<Utc>>,
    last_polled_ts: Option<DateTime<Utc>>,
    stable_count: i64,
}

impl StatusJson {
    fn from_row(row: &StatusRow) -> Self {
        StatusJson {
            pane_id: row.pane_id.clone(),
            worker_id: row.worker_id.clone(),
            tmux_target: row.tmux_target(),
            cwd: row.cwd.clone(),
            cli_type: row.cli_type.clone(),
            state: format!("{:?}", row.state),
            summary: row.summary.clone(),
            actions_needed: row.actions_needed.clone(),
            last_change_ts: row.last_change_ts,
            last_polled_ts: row.last_polled_ts,
            stable_count: row.stable_count,
        }
    }
}

#[derive(Serialize)]
struct HistoryJson {
    ts: DateTime<Utc>,
    state: String,
    summary: String,
    worker_id: Option<String>,
    cli_type: Option<String>,
    cwd: Option<String>,
    tmux_target: Option<String>,
}

impl HistoryJson {
    fn from_row(row: &HistoryRow) -> Self {
        HistoryJson {
            ts: row.ts,
            state: format!("{:?}", row.state),
            summary: row.summary.clone(),
            worker_id: row.worker_id.clone(),
            cli_type: row.cli_type.clone(),
            cwd: row.cwd.clone(),
            tmux_target: row.tmux_target(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_timestamp_for_window_is_none_without_since() {
        assert!(min_timestamp_for_window(None).is_none());
    }

    #[test]
    fn min_timestamp_for_window_looks_back_by_seconds() {
        let min_ts = min_timestamp_for_window(Some(60.0)).unwrap();
        assert!(min_ts < Utc::now());
        assert!(Utc::now() - min_ts < chrono::Duration::seconds(61));
    }

    #[test]
    fn format_timestamp_renders_dash_for_none() {
        assert_eq!(format_timestamp(None), "-");
    }

    #[test]
    fn format_timestamp_renders_rfc3339_for_some() {
        let ts = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_timestamp(Some(ts)), "2026-01-01T00:00:00Z");
    }

    #[test]
    fn print_table_does_not_panic_on_empty_rows() {
        print_table(&["A", "B"], &[]);
    }
}
