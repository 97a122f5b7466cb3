pub mod executor;

use conductor_core::types::PaneInfo;
pub use executor::{TmuxError, TmuxExecutor};

/// tmux list-panes format string.
///
/// Fields are tab-separated in the following order: pane_id, session_name,
/// window_index, pane_index, current_path, pane_title. Tab is chosen over a
/// printable delimiter because pane titles may contain arbitrary characters
/// but tmux never emits literal tabs in a `-F` format field.
const LIST_PANES_FMT: &str = concat!(
    "#{pane_id}\t",
    "#{session_name}\t",
    "#{window_index}\t",
    "#{pane_index}\t",
    "#{pane_current_path}\t",
    "#{pane_title}",
);

const EXPECTED_FIELDS: usize = 6;

/// The three primitives a terminal multiplexer must expose: send input,
/// read output, enumerate panes.
pub trait MultiplexerAdapter: Send + Sync {
    /// Send `command` to the pane and simulate pressing return. Issued as
    /// two separate `send-keys` invocations (text, then `C-m`) rather than
    /// one combined call, matching the behavior of terminals where a single
    /// `send-keys "cmd" Enter` call can race with shell readline redraws.
    fn send_line(&self, target: &str, command: &str) -> Result<(), TmuxError>;

    /// Capture the pane's rendered scrollback as plain text with ANSI/`-J`
    /// wrapping-joined formatting.
    fn capture_pane(&self, target: &str) -> Result<String, TmuxError>;

    /// Enumerate every pane across every session.
    fn list_all_panes(&self) -> Result<Vec<PaneInfo>, TmuxError>;
}

/// tmux-backed `MultiplexerAdapter`.
pub struct TmuxAdapter {
    executor: TmuxExecutor,
}

impl TmuxAdapter {
    pub fn new() -> Self {
        Self {
            executor: TmuxExecutor::new(),
        }
    }

    pub fn with_bin(bin: impl Into<String>) -> Self {
        Self {
            executor: TmuxExecutor::with_bin(bin),
        }
    }
}

impl Default for TmuxAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiplexerAdapter for TmuxAdapter {
    fn send_line(&self, target: &str, command: &str) -> Result<(), TmuxError> {
        self.executor.run_unchecked(&["send-keys", "-t", target, command])?;
        self.executor.run_unchecked(&["send-keys", "-t", target, "C-m"])?;
        Ok(())
    }

    fn capture_pane(&self, target: &str) -> Result<String, TmuxError> {
        self.executor.run(&["capture-pane", "-pJ", "-t", target])
    }

    fn list_all_panes(&self) -> Result<Vec<PaneInfo>, TmuxError> {
        let stdout = self.executor.run(&["list-panes", "-a", "-F", LIST_PANES_FMT])?;
        Ok(parse_list_panes_output(&stdout))
    }
}

/// Tracks a monotonic read cursor over one pane's capture, so repeated polls
/// can be told apart from the pane's full scrollback. Owns no process
/// handle; every call still goes through the shared adapter.
pub struct PaneCursor {
    target: String,
    last_size: usize,
}

impl PaneCursor {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            last_size: 0,
        }
    }

    /// Capture the pane and return `(full_text, new_text)`. `new_text` is
    /// the suffix appended since the last call, or the entire capture if the
    /// pane appears to have been cleared (its length shrank below the last
    /// known cursor).
    pub fn capture_new(&mut self, adapter: &dyn MultiplexerAdapter) -> Result<(String, String), TmuxError> {
        let text = adapter.capture_pane(&self.target)?;
        let new_text = if self.last_size <= text.len() {
            text[self.last_size..].to_string()
        } else {
            text.clone()
        };
        self.last_size = text.len();
        Ok((text, new_text))
    }
}

fn parse_list_panes_output(output: &str) -> Vec<PaneInfo> {
    let mut panes = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_pane_line(line) {
            Some(pane) => panes.push(pane),
            None => tracing::warn!(line, "skipping malformed list-panes line"),
        }
    }
    panes
}

fn parse_pane_line(line: &str) -> Option<PaneInfo> {
    let parts: Vec<&str> = line.splitn(EXPECTED_FIELDS, '\t').collect();
    if parts.len() < EXPECTED_FIELDS {
        return None;
    }
    Some(PaneInfo {
        pane_id: parts[0].to_string(),
        session_name: parts[1].to_string(),
        window_index: parts[2].to_string(),
        pane_index: parts[3].to_string(),
        cwd: parts[4].to_string(),
        title: parts[5].to_string(),
    })
}
