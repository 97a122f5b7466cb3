use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::PaneLifecycle;

/// A pane as enumerated by the multiplexer adapter, before any classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaneInfo {
    pub pane_id: String,
    pub session_name: String,
    pub window_index: String,
    pub pane_index: String,
    pub cwd: String,
    pub title: String,
}

impl PaneInfo {
    /// The `session:window.pane` target string tmux expects.
    pub fn target(&self) -> String {
        format!("{}:{}.{}", self.session_name, self.window_index, self.pane_index)
    }
}

/// In-memory per-pane bookkeeping maintained by the watcher across poll cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaneState {
    pub last_snapshot_hash: Option<String>,
    pub last_classified_hash: Option<String>,
    pub stable_count: u32,
    pub last_change_ts: DateTime<Utc>,
    pub state: PaneLifecycle,
    pub summary: String,
    pub actions_needed: Option<String>,
    pub threshold: u32,
}

impl PaneState {
    pub fn new(threshold: u32) -> Self {
        PaneState {
            last_snapshot_hash: None,
            last_classified_hash: None,
            stable_count: 0,
            last_change_ts: Utc::now(),
            state: PaneLifecycle::Unknown,
            summary: String::new(),
            actions_needed: None,
            threshold,
        }
    }

    /// Record a snapshot that differs from the previous one: resets stability
    /// tracking and marks the pane busy until it settles again.
    pub fn mark_changed(&mut self, hash: String, now: DateTime<Utc>) {
        self.last_snapshot_hash = Some(hash);
        self.stable_count = 0;
        self.state = PaneLifecycle::Busy;
        self.summary = "Pane output changing".to_string();
        self.actions_needed = None;
        self.last_change_ts = now;
    }

    /// Record a snapshot identical to the previous one.
    pub fn mark_stable(&mut self) {
        self.stable_count = self.stable_count.saturating_add(1);
    }

    /// Whether this pane is due for (re-)classification.
    pub fn needs_classification(&self) -> bool {
        self.stable_count >= self.threshold
            && self.last_classified_hash.as_deref() != self.last_snapshot_hash.as_deref()
    }

    pub fn apply_classification(&mut self, result: ClassificationResult) {
        self.state = result.state;
        self.summary = result.summary;
        self.actions_needed = result.actions_needed;
        self.last_classified_hash = self.last_snapshot_hash.clone();
    }
}

/// The outcome of classifying a stable pane snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub state: PaneLifecycle,
    pub summary: String,
    pub actions_needed: Option<String>,
}

/// The `status.json` file a watcher cycle rewrites for each pane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaneStatusFile {
    pub worker_id: String,
    pub pane_id: String,
    pub tmux_session: String,
    pub tmux_target: String,
    pub state: PaneLifecycle,
    pub summary: String,
    pub actions_needed: Option<String>,
    pub last_change_ts: DateTime<Utc>,
    pub last_polled_ts: DateTime<Utc>,
}
