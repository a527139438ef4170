pub mod config;
mod notifier;
pub mod orchestrator;
pub mod planner;
mod runner;
mod strategy;
pub mod tasks;

pub use config::{ConfigError, OrchestratorConfig};
pub use notifier::ORCHESTRATOR_AGENT;
pub use orchestrator::{Orchestrator, TaskReport};
pub use planner::{
    ApprovalDecision, ApprovalGate, AutoApprove, IntentParser, PassthroughIntentParser, Planner,
};
pub use tasks::{TaskError, TaskManager, TaskSnapshot};
