mod coordinator;
mod critic;

pub use coordinator::{new_flow, FlowCoordinator};
pub use critic::{run_carmack_critic, CriticResult};
