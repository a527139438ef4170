use thiserror::Error;

/// Failure reported by a worker while executing a step
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestraError {
    #[error("Step {step} failed: {message}")]
    StepExecution { step: String, message: String },

    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    #[error("Replanning exhausted after {attempts} attempts")]
    ReplanningExhausted { attempts: u32 },

    #[error("Planner error: {0}")]
    Planner(String),

    #[error("Intent parsing error: {0}")]
    IntentParsing(String),

    #[error("Approval error: {0}")]
    Approval(String),
}
