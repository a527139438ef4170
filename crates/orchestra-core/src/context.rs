//! Per-task execution context
//!
//! The context is the shared blackboard of a task. The orchestrator and every
//! worker hold the same `Arc<ExecutionContext>`, so all mutable state lives
//! behind interior locks. Parallel steps write here concurrently; shared-state
//! keys follow last-write-wins.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::intent::Intent;
use crate::plan::{Plan, PlanStep};
use crate::worker::AgentResult;

const LOG_CHANNEL_CAPACITY: usize = 256;

/// Overall task status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Planning,
    Executing,
    Replanning,
    WaitingHumanApproval,
    Completed,
    Failed,
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Pending
    }
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Planning => "planning",
            TaskStatus::Executing => "executing",
            TaskStatus::Replanning => "replanning",
            TaskStatus::WaitingHumanApproval => "waiting_human_approval",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

pub struct ExecutionContext {
    task_id: String,
    prompt: String,
    logs: RwLock<Vec<String>>,
    log_tx: broadcast::Sender<String>,
    plan: RwLock<Option<Plan>>,
    intent: RwLock<Option<Intent>>,
    shared_state: DashMap<String, Value>,
    results: Mutex<Vec<AgentResult>>,
    status: RwLock<TaskStatus>,
    replan_count: AtomicU32,
    errors: Mutex<Vec<String>>,
    created_at: DateTime<Utc>,
    started_at: RwLock<Option<DateTime<Utc>>>,
    completed_at: RwLock<Option<DateTime<Utc>>>,
    cancel_token: CancellationToken,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ExecutionContext {
    pub fn new(task_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        let (log_tx, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);

        Self {
            task_id: task_id.into(),
            prompt: prompt.into(),
            logs: RwLock::new(Vec::new()),
            log_tx,
            plan: RwLock::new(None),
            intent: RwLock::new(None),
            shared_state: DashMap::new(),
            results: Mutex::new(Vec::new()),
            status: RwLock::new(TaskStatus::Pending),
            replan_count: AtomicU32::new(0),
            errors: Mutex::new(Vec::new()),
            created_at: Utc::now(),
            started_at: RwLock::new(None),
            completed_at: RwLock::new(None),
            cancel_token: CancellationToken::new(),
        }
    }

    /// Ties the task's cancellation to an outer scope; cancelling `parent` cancels this task.
    pub fn with_parent_token(mut self, parent: &CancellationToken) -> Self {
        self.cancel_token = parent.child_token();
        self
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    // Log

    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        write(&self.logs).push(message.clone());
        // No live subscribers is fine; the log itself is the record.
        let _ = self.log_tx.send(message);
    }

    pub fn logs(&self) -> Vec<String> {
        read(&self.logs).clone()
    }

    /// Live feed of log lines appended after this call.
    pub fn subscribe_logs(&self) -> broadcast::Receiver<String> {
        self.log_tx.subscribe()
    }

    // Plan

    pub fn plan(&self) -> Option<Plan> {
        read(&self.plan).clone()
    }

    /// Replaces the current plan, returning the previous one.
    pub fn set_plan(&self, plan: Plan) -> Option<Plan> {
        write(&self.plan).replace(plan)
    }

    pub fn update_plan<R>(&self, f: impl FnOnce(&mut Plan) -> R) -> Option<R> {
        write(&self.plan).as_mut().map(f)
    }

    pub fn update_step<R>(&self, index: usize, f: impl FnOnce(&mut PlanStep) -> R) -> Option<R> {
        write(&self.plan)
            .as_mut()
            .and_then(|plan| plan.steps.get_mut(index))
            .map(f)
    }

    pub fn step(&self, index: usize) -> Option<PlanStep> {
        read(&self.plan)
            .as_ref()
            .and_then(|plan| plan.steps.get(index).cloned())
    }

    pub fn progress(&self) -> f64 {
        read(&self.plan)
            .as_ref()
            .map(Plan::progress)
            .unwrap_or(0.0)
    }

    // Intent

    pub fn intent(&self) -> Option<Intent> {
        read(&self.intent).clone()
    }

    pub fn set_intent(&self, intent: Intent) {
        *write(&self.intent) = Some(intent);
    }

    // Shared state

    pub fn set_state(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.shared_state.insert(key.into(), value)
    }

    pub fn get_state(&self, key: &str) -> Option<Value> {
        self.shared_state.get(key).map(|entry| entry.value().clone())
    }

    pub fn remove_state(&self, key: &str) -> Option<Value> {
        self.shared_state.remove(key).map(|(_, value)| value)
    }

    pub fn state_snapshot(&self) -> HashMap<String, Value> {
        self.shared_state
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    // Results and errors

    pub fn push_result(&self, result: AgentResult) {
        lock(&self.results).push(result);
    }

    pub fn results(&self) -> Vec<AgentResult> {
        lock(&self.results).clone()
    }

    pub fn record_error(&self, error: impl Into<String>) {
        lock(&self.errors).push(error.into());
    }

    pub fn errors(&self) -> Vec<String> {
        lock(&self.errors).clone()
    }

    // Status

    pub fn status(&self) -> TaskStatus {
        *read(&self.status)
    }

    /// Sets the status and returns the previous one.
    pub fn set_status(&self, status: TaskStatus) -> TaskStatus {
        std::mem::replace(&mut *write(&self.status), status)
    }

    pub fn replan_count(&self) -> u32 {
        self.replan_count.load(Ordering::SeqCst)
    }

    pub fn increment_replan_count(&self) -> u32 {
        self.replan_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    // Timestamps

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *read(&self.started_at)
    }

    pub fn mark_started(&self) {
        write(&self.started_at).get_or_insert_with(Utc::now);
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        *read(&self.completed_at)
    }

    pub fn mark_completed(&self) {
        *write(&self.completed_at) = Some(Utc::now());
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        let started = self.started_at()?;
        let finished = self.completed_at().unwrap_or_else(Utc::now);
        Some(finished - started)
    }

    // Cancellation

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("task_id", &self.task_id)
            .field("status", &self.status())
            .field("replan_count", &self.replan_count())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
