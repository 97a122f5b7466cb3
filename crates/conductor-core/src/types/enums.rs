use serde::{Deserialize, Serialize};

/// Worker lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Error,
    Terminated,
}

/// Task lifecycle status. Advances monotonically:
/// `Queued -> Running -> {Completed, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventType {
    StdoutChunk,
    StderrChunk,
    StateChange,
    ResultParsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    DesignRefinement,
}

/// Pane lifecycle classification produced by the classifier pack.
///
/// `Unknown` is the state of a freshly created `PaneState`, before its first
/// snapshot has even gone unstable once; it is never emitted by a classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaneLifecycle {
    Unknown,
    Ready,
    Busy,
    NeedsConfirmation,
    Error,
}

impl Default for PaneLifecycle {
    fn default() -> Self {
        PaneLifecycle::Unknown
    }
}
