pub mod bus;
pub mod context;
pub mod error;
pub mod events;
pub mod intent;
pub mod plan;
pub mod worker;

pub use bus::{EventBus, EventHandler, Subscription};
pub use context::{ExecutionContext, TaskStatus};
pub use error::{OrchestraError, WorkerError};
pub use events::{EventKind, EventPayload, OrchestraEvent};
pub use intent::Intent;
pub use plan::{ExecutionMode, Plan, PlanStep, StepStatus, DEFAULT_MAX_RETRIES};
pub use worker::{AgentResult, RegistryError, SharedWorker, Worker, WorkerRegistry};
