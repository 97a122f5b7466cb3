mod enums;
mod flow;
mod pane;
mod task;
mod worker;

pub use enums::{FlowStatus, FlowType, PaneLifecycle, TaskEventType, TaskStatus, WorkerStatus};
pub use flow::{DesignRefinementConfig, Flow, FlowIteration};
pub use pane::{ClassificationResult, PaneInfo, PaneState, PaneStatusFile};
pub use task::{Task, TaskCreate, TaskEvent};
pub use worker::{Worker, WorkerMetadata};
