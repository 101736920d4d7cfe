mod config;
mod deadline;
mod error;
mod orchestrator;
mod response;
mod state;

#[cfg(test)]
mod tests;

pub use config::{
    DEFAULT_EVIDENCE_K, DEFAULT_MAX_RETRY_ATTEMPTS, DEFAULT_TABLE_PREVIEW_ROWS, ResolvabilityPolicy,
    WorkflowConfig,
};
pub use orchestrator::Orchestrator;
pub use response::{QuestionResponse, ResponseBody};
