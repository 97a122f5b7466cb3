use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::WorkerStatus;

/// A logical agent host: a reserved multiplexer session plus a workspace directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: String,
    pub label: Option<String>,
    pub status: WorkerStatus,
    /// Unique across all workers; the multiplexer session name.
    pub tmux_session: String,
    pub workspace_path: String,
    pub web_terminal_url: Option<String>,
    pub web_terminal_pid: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_seen_at: DateTime<Utc>,
}

/// The `worker.json` metadata file written into a worker's workspace root.
///
/// Rewritten only at worker creation time; the runtime and watcher only ever read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerMetadata {
    pub id: String,
    pub label: Option<String>,
    pub tmux_session: String,
    pub workspace: String,
    pub cli_type: String,
    pub created_at: DateTime<Utc>,
}
