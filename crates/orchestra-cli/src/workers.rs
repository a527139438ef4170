//! Built-in demo workers
//!
//! Enough behaviour to exercise every scheduling mode from a plan file without
//! wiring up a model.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use orchestra_core::{
    AgentResult, ExecutionContext, PlanStep, StepStatus, Worker, WorkerError, WorkerRegistry,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

/// Returns the step's parameters.
pub struct EchoWorker;

#[async_trait]
impl Worker for EchoWorker {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Returns the step parameters unchanged"
    }

    async fn execute(
        &self,
        step: &PlanStep,
        _ctx: &ExecutionContext,
        _cancel: CancellationToken,
    ) -> Result<AgentResult, WorkerError> {
        Ok(AgentResult::success(
            self.name(),
            json!({ "action": step.action, "parameters": step.parameters }),
        ))
    }
}

/// Sleeps for `ms` milliseconds (default 500), giving up early on cancellation.
pub struct SleepWorker;

#[async_trait]
impl Worker for SleepWorker {
    fn name(&self) -> &str {
        "sleep"
    }

    fn description(&self) -> &str {
        "Waits for `ms` milliseconds"
    }

    async fn execute(
        &self,
        step: &PlanStep,
        _ctx: &ExecutionContext,
        cancel: CancellationToken,
    ) -> Result<AgentResult, WorkerError> {
        let ms = match step.parameters.get("ms") {
            None => 500,
            Some(value) => value.as_u64().ok_or_else(|| {
                WorkerError::InvalidParameters(format!("`ms` must be a number, got {value}"))
            })?,
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(WorkerError::Cancelled),
            _ = tokio::time::sleep(Duration::from_millis(ms)) => {
                Ok(AgentResult::success(self.name(), json!({ "slept_ms": ms })))
            }
        }
    }
}

/// Fails the first `failures` attempts of each step (default 1), then succeeds.
#[derive(Default)]
pub struct FlakyWorker {
    attempts: Mutex<HashMap<String, u64>>,
}

#[async_trait]
impl Worker for FlakyWorker {
    fn name(&self) -> &str {
        "flaky"
    }

    fn description(&self) -> &str {
        "Fails a configurable number of times before succeeding"
    }

    async fn execute(
        &self,
        step: &PlanStep,
        _ctx: &ExecutionContext,
        _cancel: CancellationToken,
    ) -> Result<AgentResult, WorkerError> {
        let failures = step
            .parameters
            .get("failures")
            .and_then(Value::as_u64)
            .unwrap_or(1);

        let attempt = {
            let mut attempts = self
                .attempts
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let count = attempts.entry(step.id.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if attempt <= failures {
            return Err(WorkerError::Execution(format!(
                "simulated failure {attempt} of {failures}"
            )));
        }

        Ok(AgentResult::success(
            self.name(),
            json!({ "attempts": attempt }),
        ))
    }
}

/// Plans nothing itself; reports what the other workers have produced so far.
///
/// As a `validate-results` step it checks that every step it was asked to
/// validate completed.
pub struct CoordinatorWorker {
    name: String,
}

impl CoordinatorWorker {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Worker for CoordinatorWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Summarizes shared state and validates finished steps"
    }

    async fn execute(
        &self,
        step: &PlanStep,
        ctx: &ExecutionContext,
        _cancel: CancellationToken,
    ) -> Result<AgentResult, WorkerError> {
        let mut keys: Vec<String> = ctx.state_snapshot().into_keys().collect();
        keys.sort();

        let Some(validates) = step.parameters.get("validates") else {
            let objective = ctx.intent().map(|intent| intent.objective);
            return Ok(AgentResult::success(
                &self.name,
                json!({ "objective": objective, "known_results": keys }),
            ));
        };

        let ids: Vec<&str> = validates
            .as_array()
            .map(|ids| ids.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let plan = ctx
            .plan()
            .ok_or_else(|| WorkerError::Execution("no plan to validate".to_string()))?;

        let unfinished: Vec<String> = ids
            .iter()
            .filter_map(|id| plan.steps.iter().find(|step| step.id == *id))
            .filter(|step| step.status != StepStatus::Completed)
            .map(|step| step.label())
            .collect();

        if !unfinished.is_empty() {
            return Err(WorkerError::Execution(format!(
                "unfinished steps: {}",
                unfinished.join(", ")
            )));
        }

        Ok(AgentResult::success(
            &self.name,
            json!({ "validated": ids.len(), "known_results": keys }),
        ))
    }
}

/// Registers every demo worker, using `coordinator` as the coordinator's name.
pub fn demo_registry(coordinator: &str) -> anyhow::Result<WorkerRegistry> {
    let registry = WorkerRegistry::new();
    registry.register(EchoWorker)?;
    registry.register(SleepWorker)?;
    registry.register(FlakyWorker::default())?;
    registry.register(CoordinatorWorker::new(coordinator))?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_core::{ExecutionMode, Plan};

    fn step_with(agent: &str, parameters: Value) -> PlanStep {
        let mut step = PlanStep::new(1, agent, "act").with_id("s1");
        if let Value::Object(map) = parameters {
            step.parameters = map;
        }
        step
    }

    #[tokio::test]
    async fn flaky_worker_fails_then_succeeds_per_step() {
        let worker = FlakyWorker::default();
        let ctx = ExecutionContext::new("t1", "prompt");
        let step = step_with("flaky", json!({ "failures": 2 }));

        for _ in 0..2 {
            let result = worker.execute(&step, &ctx, CancellationToken::new()).await;
            assert!(matches!(result, Err(WorkerError::Execution(_))));
        }
        let result = worker
            .execute(&step, &ctx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.value["attempts"], 3);
    }

    #[tokio::test]
    async fn sleep_worker_stops_on_cancel() {
        let ctx = ExecutionContext::new("t1", "prompt");
        let step = step_with("sleep", json!({ "ms": 60_000 }));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = SleepWorker.execute(&step, &ctx, cancel).await;

        assert_eq!(result.unwrap_err(), WorkerError::Cancelled);
    }

    #[tokio::test]
    async fn sleep_worker_rejects_bad_duration() {
        let ctx = ExecutionContext::new("t1", "prompt");
        let step = step_with("sleep", json!({ "ms": "soon" }));

        let result = SleepWorker
            .execute(&step, &ctx, CancellationToken::new())
            .await;

        assert!(matches!(result, Err(WorkerError::InvalidParameters(_))));
    }

    #[tokio::test]
    async fn coordinator_reports_unfinished_steps() {
        let worker = CoordinatorWorker::new("coordinator");
        let ctx = ExecutionContext::new("t1", "prompt");
        let mut plan = Plan::new("objective", ExecutionMode::Hierarchical)
            .with_step(PlanStep::new(1, "echo", "a").with_id("a"))
            .with_step(PlanStep::new(2, "echo", "b").with_id("b"));
        plan.steps[0].status = StepStatus::Completed;
        ctx.set_plan(plan);
        let step = step_with("coordinator", json!({ "validates": ["a", "b"] }));

        let error = worker
            .execute(&step, &ctx, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(error.to_string().contains("#2 echo:b"));
    }

    #[test]
    fn demo_registry_lists_workers() {
        let registry = demo_registry("boss").unwrap();
        assert_eq!(registry.names(), vec!["boss", "echo", "flaky", "sleep"]);
    }
}
