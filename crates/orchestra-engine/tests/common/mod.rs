//! Test doubles shared by the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use orchestra_core::{
    AgentResult, EventKind, ExecutionContext, Intent, OrchestraError, OrchestraEvent, Plan,
    PlanStep, StepStatus, Worker, WorkerError,
};
use orchestra_engine::{OrchestratorConfig, Planner};
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

/// Orchestrator settings with no backoff so retries run immediately.
pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        retry_backoff_base_ms: 0,
        ..Default::default()
    }
}

pub fn drain(rx: &mut UnboundedReceiver<OrchestraEvent>) -> Vec<OrchestraEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn of_kind(events: &[OrchestraEvent], kind: EventKind) -> Vec<OrchestraEvent> {
    events
        .iter()
        .filter(|event| event.kind() == kind)
        .cloned()
        .collect()
}

/// One worker invocation, as seen from the worker
#[derive(Debug, Clone)]
pub struct Span {
    pub agent: String,
    pub step_id: String,
    pub start: Instant,
    pub end: Instant,
}

/// Records when each worker call ran and how many overlapped.
#[derive(Debug, Default)]
pub struct Timeline {
    spans: Mutex<Vec<Span>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Timeline {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn spans(&self) -> Vec<Span> {
        self.spans.lock().unwrap().clone()
    }

    pub fn span_for(&self, step_id: &str) -> Option<Span> {
        self.spans()
            .into_iter()
            .find(|span| span.step_id == step_id)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Instant {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        Instant::now()
    }

    fn exit(&self, agent: &str, step_id: &str, start: Instant) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.spans.lock().unwrap().push(Span {
            agent: agent.to_string(),
            step_id: step_id.to_string(),
            start,
            end: Instant::now(),
        });
    }
}

/// Worker whose behaviour is fixed up front: fail the first `failures` calls,
/// optionally sleep, then succeed.
pub struct ScriptedWorker {
    name: String,
    failures: u32,
    always_fail: bool,
    delay: Duration,
    calls: AtomicU32,
    timeline: Arc<Timeline>,
}

impl ScriptedWorker {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            failures: 0,
            always_fail: false,
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
            timeline: Timeline::new(),
        }
    }

    pub fn failing_first(mut self, failures: u32) -> Self {
        self.failures = failures;
        self
    }

    pub fn always_failing(mut self) -> Self {
        self.always_fail = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_timeline(mut self, timeline: Arc<Timeline>) -> Self {
        self.timeline = timeline;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        step: &PlanStep,
        _ctx: &ExecutionContext,
        _cancel: CancellationToken,
    ) -> Result<AgentResult, WorkerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let start = self.timeline.enter();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.timeline.exit(&self.name, &step.id, start);

        if self.always_fail || call <= self.failures {
            return Err(WorkerError::Execution(format!(
                "{} failed on call {}",
                self.name, call
            )));
        }

        Ok(AgentResult::success(
            &self.name,
            json!({ "action": step.action, "call": call }),
        ))
    }
}

/// Blocks until the task is cancelled.
pub struct BlockingWorker {
    name: String,
}

impl BlockingWorker {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl Worker for BlockingWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        _step: &PlanStep,
        _ctx: &ExecutionContext,
        cancel: CancellationToken,
    ) -> Result<AgentResult, WorkerError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(WorkerError::Cancelled),
            _ = tokio::time::sleep(Duration::from_secs(30)) => {
                Ok(AgentResult::success(&self.name, json!("timed out waiting")))
            }
        }
    }
}

/// Hands out a fixed plan, then queued replacements. With the queue empty a
/// replan returns the current plan with every step reset to `Pending`.
pub struct ScriptedPlanner {
    initial: Plan,
    replacements: Mutex<VecDeque<Plan>>,
    reasons: Mutex<Vec<String>>,
}

impl ScriptedPlanner {
    pub fn new(initial: Plan) -> Self {
        Self {
            initial,
            replacements: Mutex::new(VecDeque::new()),
            reasons: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, replacement: Plan) -> Self {
        self.replacements.lock().unwrap().push_back(replacement);
        self
    }

    pub fn reasons(&self) -> Vec<String> {
        self.reasons.lock().unwrap().clone()
    }
}

pub fn reset_steps(plan: &Plan) -> Plan {
    let mut plan = plan.clone();
    for step in &mut plan.steps {
        step.status = StepStatus::Pending;
        step.retry_count = 0;
        step.result = None;
        step.error = None;
        step.started_at = None;
        step.completed_at = None;
    }
    plan
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn create_plan(
        &self,
        _intent: &Intent,
        _ctx: &ExecutionContext,
    ) -> Result<Plan, OrchestraError> {
        Ok(self.initial.clone())
    }

    async fn replan(
        &self,
        current: &Plan,
        reason: &str,
        _ctx: &ExecutionContext,
    ) -> Result<Plan, OrchestraError> {
        self.reasons.lock().unwrap().push(reason.to_string());
        let replacement = self.replacements.lock().unwrap().pop_front();
        Ok(replacement.unwrap_or_else(|| reset_steps(current)))
    }
}

pub struct FailingPlanner;

#[async_trait]
impl Planner for FailingPlanner {
    async fn create_plan(
        &self,
        _intent: &Intent,
        _ctx: &ExecutionContext,
    ) -> Result<Plan, OrchestraError> {
        Err(OrchestraError::Planner("model unavailable".to_string()))
    }

    async fn replan(
        &self,
        _current: &Plan,
        _reason: &str,
        _ctx: &ExecutionContext,
    ) -> Result<Plan, OrchestraError> {
        Err(OrchestraError::Planner("model unavailable".to_string()))
    }
}
