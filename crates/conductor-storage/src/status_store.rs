//! SQLite persistence for the watcher's pane states, so they survive restarts.

use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use conductor_core::types::{PaneInfo, PaneLifecycle, PaneState, WorkerMetadata};
use rusqlite::{params, Connection, OptionalExtension, Result};

/// A single row read back by `list_status`/`tail_history`, joined with the
/// pane's static `ptys` metadata.
#[derive(Debug, Clone)]
pub struct StatusRow {
    pub pane_id: String,
    pub worker_id: Option<String>,
    pub tmux_session: Option<String>,
    pub tmux_window: Option<String>,
    pub tmux_pane: Option<String>,
    pub cwd: Option<String>,
    pub cli_type: Option<String>,
    pub state: PaneLifecycle,
    pub summary: String,
    pub actions_needed: Option<String>,
    pub last_snapshot_hash: Option<String>,
    pub last_change_ts: Option<DateTime<Utc>>,
    pub last_polled_ts: Option<DateTime<Utc>>,
    pub stable_count: i64,
}

impl StatusRow {
    pub fn tmux_target(&self) -> Option<String> {
        match (&self.tmux_session, &self.tmux_window, &self.tmux_pane) {
            (Some(s), Some(w), Some(p)) => Some(format!("{s}:{w}.{p}")),
            _ => None,
        }
    }
}

/// One chronological history entry for a pane, joined with the pane's static
/// `ptys` metadata.
#[derive(Debug, Clone)]
pub struct HistoryRow {
    pub ts: DateTime<Utc>,
    pub state: PaneLifecycle,
    pub summary: String,
    pub worker_id: Option<String>,
    pub cli_type: Option<String>,
    pub cwd: Option<String>,
    pub tmux_session: Option<String>,
    pub tmux_window: Option<String>,
    pub tmux_pane: Option<String>,
}

impl HistoryRow {
    pub fn tmux_target(&self) -> Option<String> {
        match (&self.tmux_session, &self.tmux_window, &self.tmux_pane) {
            (Some(s), Some(w), Some(p)) => Some(format!("{s}:{w}.{p}")),
            _ => None,
        }
    }
}

/// Persists PTY metadata and the watcher's latest classification per pane,
/// plus an append-only classification history.
pub struct StatusStore {
    conn: Connection,
}

impl StatusStore {
    /// Open (or create) the database at `path`, enabling WAL journaling so
    /// readers (the CLI) do not block the watcher's writer.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let store = StatusStore { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = StatusStore { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS ptys (
                id TEXT PRIMARY KEY,
                worker_id TEXT,
                tmux_session TEXT,
                tmux_window TEXT,
                tmux_pane TEXT,
                cwd TEXT,
                cli_type TEXT
            );
            CREATE TABLE IF NOT EXISTS status (
                id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                summary TEXT,
                actions_needed TEXT,
                last_snapshot_hash TEXT,
                last_change_ts TEXT,
                last_polled_ts TEXT,
                stable_count INTEGER
            );
            CREATE TABLE IF NOT EXISTS status_history (
                id TEXT,
                ts TEXT,
                state TEXT,
                summary TEXT
            );",
        )
    }

    /// Replace the pty + status rows for `pane.pane_id` and append one
    /// history row. Mirrors the watcher's one-upsert-per-cycle pattern.
    pub fn upsert(
        &self,
        pane: &PaneInfo,
        worker: &WorkerMetadata,
        pane_state: &PaneState,
        snapshot_hash: &str,
        polled_ts: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO ptys (id, worker_id, tmux_session, tmux_window, tmux_pane, cwd, cli_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                worker_id=excluded.worker_id,
                tmux_session=excluded.tmux_session,
                tmux_window=excluded.tmux_window,
                tmux_pane=excluded.tmux_pane,
                cwd=excluded.cwd,
                cli_type=excluded.cli_type",
            params![
                pane.pane_id,
                worker.id,
                pane.session_name,
                pane.window_index,
                pane.pane_index,
                pane.cwd,
                worker.cli_type,
            ],
        )?;
        self.conn.execute(
            "INSERT INTO status (id, state, summary, actions_needed, last_snapshot_hash, last_change_ts, last_polled_ts, stable_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                state=excluded.state,
                summary=excluded.summary,
                actions_needed=excluded.actions_needed,
                last_snapshot_hash=excluded.last_snapshot_hash,
                last_change_ts=excluded.last_change_ts,
                last_polled_ts=excluded.last_polled_ts,
                stable_count=excluded.stable_count",
            params![
                pane.pane_id,
                state_to_str(pane_state.state),
                pane_state.summary,
                pane_state.actions_needed,
                snapshot_hash,
                pane_state.last_change_ts.to_rfc3339(),
                polled_ts.to_rfc3339(),
                pane_state.stable_count,
            ],
        )?;
        self.conn.execute(
            "INSERT INTO status_history (id, ts, state, summary) VALUES (?1, ?2, ?3, ?4)",
            params![pane.pane_id, polled_ts.to_rfc3339(), state_to_str(pane_state.state), pane_state.summary],
        )?;
        Ok(())
    }

    /// Most-recently-polled-first list of every known pane's current status,
    /// optionally filtered to panes polled at or after `min_polled_ts`.
    pub fn list_status(&self, min_polled_ts: Option<DateTime<Utc>>) -> Result<Vec<StatusRow>> {
        let base = "SELECT s.id, p.worker_id, p.tmux_session, p.tmux_window, p.tmux_pane, p.cwd, p.cli_type,
                           s.state, s.summary, s.actions_needed, s.last_snapshot_hash, s.last_change_ts,
                           s.last_polled_ts, s.stable_count
                    FROM status s LEFT JOIN ptys p ON s.id = p.id";
        let (query, ts) = match min_polled_ts {
            Some(ts) => (format!("{base} WHERE s.last_polled_ts >= ?1 ORDER BY s.last_polled_ts DESC"), Some(ts.to_rfc3339())),
            None => (format!("{base} ORDER BY s.last_polled_ts DESC"), None),
        };
        let mut stmt = self.conn.prepare(&query)?;
        let rows = if let Some(ts) = ts {
            stmt.query_map(params![ts], row_to_status)?.collect::<Result<Vec<_>>>()?
        } else {
            stmt.query_map([], row_to_status)?.collect::<Result<Vec<_>>>()?
        };
        Ok(rows)
    }

    /// Last `limit` history entries for one pane, in chronological order,
    /// joined with pane metadata.
    pub fn tail_history(&self, pane_id: &str, limit: u32) -> Result<Vec<HistoryRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT h.ts, h.state, h.summary, p.worker_id, p.cli_type, p.cwd,
                    p.tmux_session, p.tmux_window, p.tmux_pane
             FROM status_history h LEFT JOIN ptys p ON h.id = p.id
             WHERE h.id = ?1 ORDER BY h.ts DESC LIMIT ?2",
        )?;
        let mut rows: Vec<HistoryRow> = stmt
            .query_map(params![pane_id, limit], |row| {
                let ts: String = row.get(0)?;
                let state: String = row.get(1)?;
                Ok(HistoryRow {
                    ts: parse_ts(&ts),
                    state: str_to_state(&state),
                    summary: row.get(2)?,
                    worker_id: row.get(3)?,
                    cli_type: row.get(4)?,
                    cwd: row.get(5)?,
                    tmux_session: row.get(6)?,
                    tmux_window: row.get(7)?,
                    tmux_pane: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        rows.reverse();
        Ok(rows)
    }

    /// Look up a single pane's current status row, if any.
    pub fn get_status(&self, pane_id: &str) -> Result<Option<StatusRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.id, p.worker_id, p.tmux_session, p.tmux_window, p.tmux_pane, p.cwd, p.cli_type,
                    s.state, s.summary, s.actions_needed, s.last_snapshot_hash, s.last_change_ts,
                    s.last_polled_ts, s.stable_count
             FROM status s LEFT JOIN ptys p ON s.id = p.id WHERE s.id = ?1",
        )?;
        stmt.query_row(params![pane_id], row_to_status).optional()
    }
}

fn row_to_status(row: &rusqlite::Row) -> Result<StatusRow> {
    let last_change_ts: Option<String> = row.get(11)?;
    let last_polled_ts: Option<String> = row.get(12)?;
    Ok(StatusRow {
        pane_id: row.get(0)?,
        worker_id: row.get(1)?,
        tmux_session: row.get(2)?,
        tmux_window: row.get(3)?,
        tmux_pane: row.get(4)?,
        cwd: row.get(5)?,
        cli_type: row.get(6)?,
        state: str_to_state(&row.get::<_, String>(7)?),
        summary: row.get(8)?,
        actions_needed: row.get(9)?,
        last_snapshot_hash: row.get(10)?,
        last_change_ts: last_change_ts.map(|s| parse_ts(&s)),
        last_polled_ts: last_polled_ts.map(|s| parse_ts(&s)),
        stable_count: row.get(13)?,
    })
}

fn state_to_str(state: PaneLifecycle) -> &'static str {
    match state {
        PaneLifecycle::Unknown => "UNKNOWN",
        PaneLifecycle::Ready => "READY",
        PaneLifecycle::Busy => "BUSY",
        PaneLifecycle::NeedsConfirmation => "NEEDS_CONFIRMATION",
        PaneLifecycle::Error => "ERROR",
    }
}

fn str_to_state(raw: &str) -> PaneLifecycle {
    match raw {
        "READY" => PaneLifecycle::Ready,
        "BUSY" => PaneLifecycle::Busy,
        "NEEDS_CONFIRMATION" => PaneLifecycle::NeedsConfirmation,
        "ERROR" => PaneLifecycle::Error,
        _ => PaneLifecycle::Unknown,
    }
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc.timestamp_opt(0, 0).unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::types::ClassificationResult;

    fn pane() -> PaneInfo {
        PaneInfo {
            pane_id: "%1".to_string(),
            session_name: "main".to_string(),
            window_index: "0".to_string(),
            pane_index: "0".to_string(),
            cwd: "/tmp".to_string(),
            title: "codex".to_string(),
        }
    }

    fn worker() -> WorkerMetadata {
        WorkerMetadata {
            id: "w1".to_string(),
            label: None,
            tmux_session: "main".to_string(),
            workspace: "/tmp/w1".to_string(),
            cli_type: "codex".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn upsert_then_list_roundtrips() {
        let store = StatusStore::open_in_memory().unwrap();
        let mut state = PaneState::new(3);
        state.apply_classification(ClassificationResult {
            state: PaneLifecycle::Ready,
            summary: "idle".to_string(),
            actions_needed: None,
        });
        store.upsert(&pane(), &worker(), &state, "hash-1", Utc::now()).unwrap();

        let rows = store.list_status(None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].pane_id, "%1");
        assert_eq!(rows[0].state, PaneLifecycle::Ready);
        assert_eq!(rows[0].tmux_target().unwrap(), "main:0.0");
    }

    #[test]
    fn upsert_overwrites_status_but_appends_history() {
        let store = StatusStore::open_in_memory().unwrap();
        let mut state = PaneState::new(3);
        store.upsert(&pane(), &worker(), &state, "hash-1", Utc::now()).unwrap();
        state.apply_classification(ClassificationResult {
            state: PaneLifecycle::Busy,
            summary: "busy now".to_string(),
            actions_needed: None,
        });
        store.upsert(&pane(), &worker(), &state, "hash-2", Utc::now()).unwrap();

        let rows = store.list_status(None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].state, PaneLifecycle::Busy);

        let history = store.tail_history("%1", 10).unwrap();
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn tail_history_returns_chronological_order() {
        let store = StatusStore::open_in_memory().unwrap();
        let state = PaneState::new(3);
        for i in 0..3 {
            store.upsert(&pane(), &worker(), &state, &format!("hash-{i}"), Utc::now()).unwrap();
        }
        let history = store.tail_history("%1", 2).unwrap();
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn tail_history_joins_pane_metadata() {
        let store = StatusStore::open_in_memory().unwrap();
        let state = PaneState::new(3);
        store.upsert(&pane(), &worker(), &state, "hash-1", Utc::now()).unwrap();

        let history = store.tail_history("%1", 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].worker_id.as_deref(), Some("w1"));
        assert_eq!(history[0].cli_type.as_deref(), Some("codex"));
        assert_eq!(history[0].cwd.as_deref(), Some("/tmp"));
        assert_eq!(history[0].tmux_target().unwrap(), "main:0.0");
    }
}
