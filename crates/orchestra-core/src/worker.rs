use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::context::ExecutionContext;
use crate::error::{OrchestraError, WorkerError};
use crate::plan::PlanStep;

/// Outcome of one worker invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentResult {
    pub agent: String,
    pub value: Value,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentResult {
    pub fn success(agent: impl Into<String>, value: Value) -> Self {
        Self {
            agent: agent.into(),
            value,
            timestamp: Utc::now(),
            success: true,
            error: None,
        }
    }

    pub fn failure(agent: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            value: Value::Null,
            timestamp: Utc::now(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Executes plan steps on behalf of the orchestrator.
///
/// Implementations own everything about how a step is carried out (prompting,
/// HTTP calls, file access). The orchestrator only sees the returned result.
/// `cancel` is the task's cancellation token; honoring it is up to the worker.
#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    async fn execute(
        &self,
        step: &PlanStep,
        ctx: &ExecutionContext,
        cancel: CancellationToken,
    ) -> Result<AgentResult, WorkerError>;
}

pub type SharedWorker = Arc<dyn Worker>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("worker with name '{0}' already registered")]
    DuplicateWorker(String),

    #[error("invalid worker: {0}")]
    InvalidWorker(String),
}

/// Name-keyed table of workers, populated once at startup
pub struct WorkerRegistry {
    workers: DashMap<String, SharedWorker>,
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            workers: DashMap::new(),
        }
    }

    pub fn register<W>(&self, worker: W) -> Result<(), RegistryError>
    where
        W: Worker + 'static,
    {
        self.register_shared(Arc::new(worker))
    }

    pub fn register_shared(&self, worker: SharedWorker) -> Result<(), RegistryError> {
        let name = worker.name().trim();

        if name.is_empty() {
            return Err(RegistryError::InvalidWorker(
                "worker name cannot be empty".to_string(),
            ));
        }

        match self.workers.entry(name.to_string()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateWorker(name.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(worker);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<SharedWorker> {
        self.workers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Like `get`, but a missing worker is an error rather than a fallback.
    pub fn resolve(&self, name: &str) -> Result<SharedWorker, OrchestraError> {
        self.get(name)
            .ok_or_else(|| OrchestraError::WorkerNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workers.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .workers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.workers.remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
