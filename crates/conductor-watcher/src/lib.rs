//! Background daemon that polls multiplexer panes and emits readiness states.
//!
//! One cycle: discover known workers from their `worker.json` files, list
//! every pane, normalize + hash the panes belonging to a known worker, wait
//! for the hash to stabilize, classify, and persist. See
//! `conductor_core::types::PaneState` for the per-pane bookkeeping this
//! loop maintains across cycles.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use conductor_classify::{ClassifierPack, ClassifyMeta, HybridClassifier, OpenRouterClassifier};
use conductor_core::types::{PaneInfo, PaneState, PaneStatusFile, WorkerMetadata};
use conductor_core::Config;
use conductor_mux::MultiplexerAdapter;
use conductor_storage::StatusStore;
use conductor_terminal::{TerminalDimensions, TerminalEmulator};
use sha2::{Digest, Sha256};

pub struct PtyWatcher {
    adapter: Arc<dyn MultiplexerAdapter>,
    config: Arc<Config>,
    status_store: StatusStore,
    terminal: TerminalEmulator,
    state: HashMap<String, PaneState>,
    packs: HashMap<String, ClassifierPack>,
    llm: Option<OpenRouterClassifier>,
}

impl PtyWatcher {
    pub fn new(adapter: Arc<dyn MultiplexerAdapter>, config: Arc<Config>, status_store: StatusStore) -> Self {
        let llm = config
            .openrouter_api_key
            .clone()
            .filter(|key| !key.is_empty())
            .map(|key| OpenRouterClassifier::new(key, config.openrouter_model.clone()));
        PtyWatcher {
            adapter,
            config,
            status_store,
            terminal: TerminalEmulator::new(TerminalDimensions { width: 220, height: 200 }),
            state: HashMap::new(),
            packs: HashMap::new(),
            llm,
        }
    }

    /// Run the poll loop forever, at `config.watcher_interval_secs`.
    pub async fn run(&mut self) {
        tracing::info!(interval = self.config.watcher_interval_secs, "starting PTY watcher loop");
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(self.config.watcher_interval_secs));
        loop {
            ticker.tick().await;
            self.poll_once().await;
        }
    }

    pub async fn poll_once(&mut self) {
        let workers = load_workers(&self.config.workspace_root);
        let adapter = Arc::clone(&self.adapter);
        let panes = match tokio::task::spawn_blocking(move || adapter.list_all_panes()).await {
            Ok(Ok(panes)) => panes,
            Ok(Err(err)) => {
                tracing::warn!(%err, "failed to list panes");
                return;
            }
            Err(err) => {
                tracing::warn!(%err, "list_panes task panicked");
                return;
            }
        };

        let now = Utc::now();
        let mut seen: HashSet<String> = HashSet::new();
        for pane in &panes {
            let Some(worker) = workers.get(&pane.session_name) else {
                continue;
            };
            seen.insert(pane.pane_id.clone());
            self.process_pane(pane, worker, now).await;
        }

        let removed: Vec<String> = self.state.keys().filter(|id| !seen.contains(*id)).cloned().collect();
        for pane_id in removed {
            tracing::info!(pane_id, "pane disappeared, removing cache entry");
            self.state.remove(&pane_id);
        }
    }

    async fn process_pane(&mut self, pane: &PaneInfo, worker: &WorkerMetadata, now: chrono::DateTime<Utc>) {
        let raw = self.capture_pane_text(pane).await;
        let normalized = self.terminal.render(&raw);
        let hash = sha256_hex(&normalized);

        let threshold = self.pack_for(&worker.cli_type).stability_polls;
        let state = self.state.entry(pane.pane_id.clone()).or_insert_with(|| PaneState::new(threshold));

        if state.last_snapshot_hash.as_deref() != Some(hash.as_str()) {
            state.mark_changed(hash.clone(), now);
        } else {
            state.mark_stable();
            if state.needs_classification() {
                let pack = self.packs.get(&worker.cli_type).expect("pack was just loaded by pack_for");
                let meta = ClassifyMeta {
                    pane_id: pane.pane_id.clone(),
                    cli_type: worker.cli_type.clone(),
                };
                let result = HybridClassifier::new(pack, self.llm.as_ref()).classify(&normalized, &meta).await;
                let state = self.state.get_mut(&pane.pane_id).expect("entry inserted above");
                state.apply_classification(result);
            }
        }

        let state = self.state.get(&pane.pane_id).expect("entry inserted above").clone();
        self.write_status(worker, pane, &state, &hash, now);
    }

    fn pack_for(&mut self, cli_type: &str) -> &ClassifierPack {
        self.packs
            .entry(cli_type.to_string())
            .or_insert_with(|| ClassifierPack::load(&self.config.classifier_packs_dir, cli_type, self.config.watcher_default_stability))
    }

    async fn capture_pane_text(&self, pane: &PaneInfo) -> String {
        let adapter = Arc::clone(&self.adapter);
        let target = pane.target();
        match tokio::task::spawn_blocking(move || adapter.capture_pane(&target)).await {
            Ok(Ok(text)) => text,
            Ok(Err(err)) => {
                tracing::error!(target = %pane.target(), %err, "tmux capture-pane failed");
                String::new()
            }
            Err(err) => {
                tracing::error!(%err, "capture-pane task panicked");
                String::new()
            }
        }
    }

    fn write_status(&self, worker: &WorkerMetadata, pane: &PaneInfo, state: &PaneState, hash: &str, now: chrono::DateTime<Utc>) {
        let payload = PaneStatusFile {
            worker_id: worker.id.clone(),
            pane_id: pane.pane_id.clone(),
            tmux_session: pane.session_name.clone(),
            tmux_target: pane.target(),
            state: state.state,
            summary: state.summary.clone(),
            actions_needed: state.actions_needed.clone(),
            last_change_ts: state.last_change_ts,
            last_polled_ts: now,
        };
        let status_path = std::path::Path::new(&worker.workspace).join("status.json");
        if let Ok(body) = serde_json::to_string_pretty(&payload) {
            if let Err(err) = std::fs::write(&status_path, body) {
                tracing::warn!(path = %status_path.display(), %err, "failed to write status.json");
            }
        }
        if let Err(err) = self.status_store.upsert(pane, worker, state, hash, now) {
            tracing::warn!(%err, "failed to upsert pane status");
        }
    }
}

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Scan `workspace_root`'s subdirectories for `worker.json` files, indexing
/// the result by multiplexer session name. Missing or malformed metadata is
/// skipped rather than treated as an error.
pub fn load_workers(workspace_root: &std::path::Path) -> HashMap<String, WorkerMetadata> {
    let mut workers = HashMap::new();
    let Ok(entries) = std::fs::read_dir(workspace_root) else {
        return workers;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let meta_path = path.join("worker.json");
        let Ok(raw) = std::fs::read_to_string(&meta_path) else {
            continue;
        };
        let Ok(meta) = serde_json::from_str::<WorkerMetadata>(&raw) else {
            continue;
        };
        workers.insert(meta.tmux_session.clone(), meta);
    }
    workers
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_mux::TmuxError;
    use std::sync::Mutex;

    struct FakeAdapter {
        panes: Vec<PaneInfo>,
        captures: Mutex<HashMap<String, Vec<String>>>,
    }

    impl MultiplexerAdapter for FakeAdapter {
        fn send_line(&self, _target: &str, _command: &str) -> Result<(), TmuxError> {
            Ok(())
        }

        fn capture_pane(&self, target: &str) -> Result<String, TmuxError> {
            let mut captures = self.captures.lock().unwrap();
            let queue = captures.entry(target.to_string()).or_default();
            Ok(if queue.is_empty() { String::new() } else { queue.remove(0) })
        }

        fn list_all_panes(&self) -> Result<Vec<PaneInfo>, TmuxError> {
            Ok(self.panes.clone())
        }
    }

    fn write_worker_json(dir: &std::path::Path, session: &str, id: &str) {
        std::fs::create_dir_all(dir).unwrap();
        let meta = WorkerMetadata {
            id: id.to_string(),
            label: None,
            tmux_session: session.to_string(),
            workspace: dir.to_string_lossy().to_string(),
            cli_type: "codex".to_string(),
            created_at: Utc::now(),
        };
        std::fs::write(dir.join("worker.json"), serde_json::to_string(&meta).unwrap()).unwrap();
    }

    #[test]
    fn load_workers_skips_missing_or_malformed() {
        let root = tempfile::tempdir().unwrap();
        write_worker_json(&root.path().join("w1"), "main", "w1");
        std::fs::create_dir_all(root.path().join("w2")).unwrap();
        std::fs::write(root.path().join("w2/worker.json"), "not json").unwrap();
        std::fs::create_dir_all(root.path().join("w3")).unwrap();

        let workers = load_workers(root.path());
        assert_eq!(workers.len(), 1);
        assert!(workers.contains_key("main"));
    }

    #[tokio::test]
    async fn poll_cycle_marks_pane_busy_on_change_then_classifies_once_stable() {
        let workspace_root = tempfile::tempdir().unwrap();
        let worker_dir = workspace_root.path().join("w1");
        write_worker_json(&worker_dir, "main", "w1");

        let pane = PaneInfo {
            pane_id: "%1".to_string(),
            session_name: "main".to_string(),
            window_index: "0".to_string(),
            pane_index: "0".to_string(),
            cwd: "/tmp".to_string(),
            title: "codex".to_string(),
        };

        let mut captures = HashMap::new();
        captures.insert(
            "main:0.0".to_string(),
            vec!["first$ ".to_string(), "first$ ".to_string(), "first$ ".to_string()],
        );
        let adapter = Arc::new(FakeAdapter {
            panes: vec![pane.clone()],
            captures: Mutex::new(captures),
        });

        let mut config = Config::default();
        config.workspace_root = workspace_root.path().to_path_buf();
        config.watcher_default_stability = 2;
        config.classifier_packs_dir = workspace_root.path().join("packs");

        let store = StatusStore::open_in_memory().unwrap();
        let mut watcher = PtyWatcher::new(adapter, Arc::new(config), store);

        watcher.poll_once().await; // hash changes from None -> busy
        assert_eq!(watcher.state.get("%1").unwrap().stable_count, 0);

        watcher.poll_once().await; // stable_count = 1, below threshold 2
        assert_eq!(watcher.state.get("%1").unwrap().stable_count, 1);

        watcher.poll_once().await; // stable_count = 2, meets threshold, classifies
        let pane_state = watcher.state.get("%1").unwrap();
        assert_eq!(pane_state.stable_count, 2);
        assert!(pane_state.last_classified_hash.is_some());
    }

    #[tokio::test]
    async fn purges_panes_not_seen_in_cycle() {
        let workspace_root = tempfile::tempdir().unwrap();
        write_worker_json(&workspace_root.path().join("w1"), "main", "w1");

        let adapter = Arc::new(FakeAdapter {
            panes: vec![],
            captures: Mutex::new(HashMap::new()),
        });
        let mut config = Config::default();
        config.workspace_root = workspace_root.path().to_path_buf();
        let store = StatusStore::open_in_memory().unwrap();
        let mut watcher = PtyWatcher::new(adapter, Arc::new(config), store);
        watcher.state.insert("%stale".to_string(), PaneState::new(3));

        watcher.poll_once().await;
        assert!(!watcher.state.contains_key("%stale"));
    }
}
