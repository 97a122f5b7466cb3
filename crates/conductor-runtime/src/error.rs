use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("worker not found: {0}")]
    WorkerNotFound(String),
    #[error("unsupported tool: {0}")]
    UnsupportedTool(String),
    #[error("tmux error: {0}")]
    Tmux(#[from] conductor_mux::TmuxError),
    #[error("storage error: {0}")]
    Storage(#[from] conductor_storage::GatewayError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
