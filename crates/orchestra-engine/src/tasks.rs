//! Background task bookkeeping
//!
//! Every submitted prompt gets its own [`ExecutionContext`] and a spawned
//! orchestrator run. Contexts hang off one root cancellation token, so
//! [`TaskManager::shutdown`] stops everything still in flight.

use std::sync::Arc;

use dashmap::DashMap;
use orchestra_core::{ExecutionContext, Plan, TaskStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::orchestrator::{Orchestrator, TaskReport};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task not found: {0}")]
    NotFound(String),

    #[error("task {task_id} stopped abnormally: {message}")]
    Join { task_id: String, message: String },

    #[error("task {0} is still running")]
    StillRunning(String),
}

/// Point-in-time view of a task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub prompt: String,
    pub status: TaskStatus,
    pub progress: f64,
    pub plan: Option<Plan>,
    pub replan_count: u32,
    pub logs: Vec<String>,
    pub errors: Vec<String>,
}

impl TaskSnapshot {
    fn of(ctx: &ExecutionContext) -> Self {
        Self {
            task_id: ctx.task_id().to_string(),
            prompt: ctx.prompt().to_string(),
            status: ctx.status(),
            progress: ctx.progress(),
            plan: ctx.plan(),
            replan_count: ctx.replan_count(),
            logs: ctx.logs(),
            errors: ctx.errors(),
        }
    }
}

struct TaskEntry {
    ctx: Arc<ExecutionContext>,
    handle: Mutex<Option<JoinHandle<TaskReport>>>,
    report: Mutex<Option<TaskReport>>,
}

pub struct TaskManager {
    orchestrator: Arc<Orchestrator>,
    tasks: DashMap<String, Arc<TaskEntry>>,
    root_token: CancellationToken,
}

impl TaskManager {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            tasks: DashMap::new(),
            root_token: CancellationToken::new(),
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Starts a task in the background and returns its id.
    pub fn submit(&self, prompt: impl Into<String>) -> String {
        let task_id = Uuid::new_v4().to_string();
        let ctx = Arc::new(
            ExecutionContext::new(task_id.clone(), prompt).with_parent_token(&self.root_token),
        );

        let orchestrator = self.orchestrator.clone();
        let run_ctx = ctx.clone();
        let handle = tokio::spawn(async move { orchestrator.run(&run_ctx).await });

        log::info!("[{}] Task submitted", task_id);
        self.tasks.insert(
            task_id.clone(),
            Arc::new(TaskEntry {
                ctx,
                handle: Mutex::new(Some(handle)),
                report: Mutex::new(None),
            }),
        );

        task_id
    }

    pub fn context(&self, task_id: &str) -> Option<Arc<ExecutionContext>> {
        self.tasks.get(task_id).map(|entry| entry.ctx.clone())
    }

    pub fn snapshot(&self, task_id: &str) -> Option<TaskSnapshot> {
        self.tasks
            .get(task_id)
            .map(|entry| TaskSnapshot::of(&entry.ctx))
    }

    /// Sorted so listings are stable.
    pub fn task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tasks.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Requests cancellation. Returns `false` for unknown ids.
    pub fn cancel(&self, task_id: &str) -> bool {
        match self.tasks.get(task_id) {
            Some(entry) => {
                log::info!("[{}] Cancellation requested", task_id);
                entry.ctx.cancel();
                true
            }
            None => false,
        }
    }

    /// Waits for the task to finish. Safe to call more than once.
    pub async fn wait(&self, task_id: &str) -> Result<TaskReport, TaskError> {
        let entry = self
            .tasks
            .get(task_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;

        let mut report = entry.report.lock().await;
        if let Some(report) = report.as_ref() {
            return Ok(report.clone());
        }

        let handle = entry.handle.lock().await.take();
        let Some(handle) = handle else {
            return Err(TaskError::Join {
                task_id: task_id.to_string(),
                message: "task handle already consumed".to_string(),
            });
        };

        let finished = handle.await.map_err(|error| TaskError::Join {
            task_id: task_id.to_string(),
            message: error.to_string(),
        })?;
        *report = Some(finished.clone());

        Ok(finished)
    }

    /// Drops a finished task. Running tasks are left alone.
    pub fn evict(&self, task_id: &str) -> Result<TaskSnapshot, TaskError> {
        let status = self
            .tasks
            .get(task_id)
            .map(|entry| entry.ctx.status())
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;

        if !status.is_terminal() {
            return Err(TaskError::StillRunning(task_id.to_string()));
        }

        let (_, entry) = self
            .tasks
            .remove(task_id)
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;
        log::debug!("[{}] Task evicted", task_id);

        Ok(TaskSnapshot::of(&entry.ctx))
    }

    /// Cancels every task this manager has started.
    pub fn shutdown(&self) {
        log::info!("Shutting down task manager ({} tasks)", self.tasks.len());
        self.root_token.cancel();
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        self.root_token.cancel();
    }
}
