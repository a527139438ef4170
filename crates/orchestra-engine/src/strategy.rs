//! Scheduling strategies, one per plan execution mode
//!
//! Each strategy makes a single pass over the current plan. Replanning is the
//! orchestrator's decision; a strategy only reports that a step exhausted its
//! retries.

use std::sync::Arc;

use futures::future::join_all;
use orchestra_core::{ExecutionContext, OrchestraError, PlanStep, StepStatus};
use serde_json::json;
use tokio::sync::Semaphore;

use crate::notifier::Notifier;
use crate::runner::{StepOutcome, StepRunner};

pub(crate) const VALIDATION_ACTION: &str = "validate-results";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PassOutcome {
    Completed,
    Cancelled,
    Failed(String),
    /// Sequential only: the step at `index` used up its retries.
    StepExhausted { index: usize, error: String },
}

/// Visits steps in ascending order, one at a time.
pub(crate) async fn run_sequential(
    runner: &StepRunner<'_>,
    notifier: &Notifier,
    ctx: &ExecutionContext,
) -> PassOutcome {
    let Some(plan) = ctx.plan() else {
        return PassOutcome::Failed("no plan to execute".to_string());
    };

    for index in plan.execution_order() {
        if ctx.is_cancelled() {
            notifier
                .log(ctx, "Cancellation requested; no further steps will start")
                .await;
            return PassOutcome::Cancelled;
        }

        let step = &plan.steps[index];
        if matches!(step.status, StepStatus::Completed | StepStatus::Skipped) {
            notifier
                .log(ctx, format!("Step {} already settled; skipping", step.label()))
                .await;
            continue;
        }

        match runner.run_step(ctx, index).await {
            StepOutcome::Completed => {}
            StepOutcome::Failed { error } => return PassOutcome::StepExhausted { index, error },
            StepOutcome::Interrupted { .. } => return PassOutcome::Cancelled,
        }
    }

    PassOutcome::Completed
}

/// Fans out every step without dependencies, joins, then runs the rest in order.
///
/// Dependency ids are never resolved: a non-empty list only means "run after the
/// whole independent group, one at a time".
pub(crate) async fn run_parallel(
    runner: &StepRunner<'_>,
    notifier: &Notifier,
    ctx: &ExecutionContext,
    max_parallel_steps: Option<usize>,
) -> PassOutcome {
    let Some(plan) = ctx.plan() else {
        return PassOutcome::Failed("no plan to execute".to_string());
    };

    let (independent, dependent): (Vec<usize>, Vec<usize>) = plan
        .execution_order()
        .into_iter()
        .partition(|&index| plan.steps[index].dependencies.is_empty());

    if ctx.is_cancelled() {
        return PassOutcome::Cancelled;
    }

    notifier
        .log(
            ctx,
            format!(
                "Launching {} independent steps concurrently ({} dependent steps queued)",
                independent.len(),
                dependent.len()
            ),
        )
        .await;

    let semaphore = max_parallel_steps.map(|limit| Arc::new(Semaphore::new(limit)));
    let launches = independent.iter().map(|&index| {
        let semaphore = semaphore.clone();
        async move {
            let _permit = match semaphore {
                Some(semaphore) => semaphore.acquire_owned().await.ok(),
                None => None,
            };
            runner.run_step(ctx, index).await
        }
    });
    let outcomes = join_all(launches).await;

    let interrupted = outcomes
        .iter()
        .any(|outcome| matches!(outcome, StepOutcome::Interrupted { .. }));
    if interrupted || ctx.is_cancelled() {
        notifier
            .log(ctx, "Cancellation requested during the independent group")
            .await;
        return PassOutcome::Cancelled;
    }

    for index in dependent {
        if ctx.is_cancelled() {
            notifier
                .log(ctx, "Cancellation requested; dependent steps will not start")
                .await;
            return PassOutcome::Cancelled;
        }

        let step = &plan.steps[index];
        notifier
            .log(
                ctx,
                format!(
                    "Step {} declares dependencies [{}]; running after all independent steps",
                    step.label(),
                    step.dependencies.join(", ")
                ),
            )
            .await;

        if let StepOutcome::Interrupted { .. } = runner.run_step(ctx, index).await {
            return PassOutcome::Cancelled;
        }
    }

    settle(ctx)
}

/// Coordinator step first, then every other step in order, then a validation step.
pub(crate) async fn run_hierarchical(
    runner: &StepRunner<'_>,
    notifier: &Notifier,
    ctx: &ExecutionContext,
    coordinator_agent: &str,
) -> PassOutcome {
    let Some(plan) = ctx.plan() else {
        return PassOutcome::Failed("no plan to execute".to_string());
    };

    let order = plan.execution_order();
    let coordinator = order
        .iter()
        .copied()
        .find(|&index| plan.steps[index].agent == coordinator_agent);

    let mut schedule = Vec::with_capacity(order.len());
    schedule.extend(coordinator);
    schedule.extend(order.iter().copied().filter(|&index| Some(index) != coordinator));

    if coordinator.is_none() {
        notifier
            .log(
                ctx,
                format!("No `{coordinator_agent}` step in plan; running workers in order"),
            )
            .await;
    }

    for index in schedule {
        if let Some(outcome) = run_scheduled(runner, notifier, ctx, index).await {
            return outcome;
        }
    }

    if coordinator.is_some() {
        let validated: Vec<String> = plan.steps.iter().map(|step| step.id.clone()).collect();
        let order = plan.last_order().unwrap_or(0) + 1;
        let validation = PlanStep::new(order, coordinator_agent, VALIDATION_ACTION)
            .with_parameter("validates", json!(validated));

        let Some(index) = ctx.update_plan(|plan| {
            plan.steps.push(validation);
            plan.steps.len() - 1
        }) else {
            return PassOutcome::Failed("plan disappeared before validation".to_string());
        };

        if let Some(outcome) = run_scheduled(runner, notifier, ctx, index).await {
            return outcome;
        }
    }

    PassOutcome::Completed
}

/// Runs one step of a strictly ordered schedule; `Some` ends the pass.
async fn run_scheduled(
    runner: &StepRunner<'_>,
    notifier: &Notifier,
    ctx: &ExecutionContext,
    index: usize,
) -> Option<PassOutcome> {
    if ctx.is_cancelled() {
        notifier
            .log(ctx, "Cancellation requested; no further steps will start")
            .await;
        return Some(PassOutcome::Cancelled);
    }

    match runner.run_step(ctx, index).await {
        StepOutcome::Completed => None,
        StepOutcome::Failed { error } => {
            let step = ctx
                .step(index)
                .map(|step| step.label())
                .unwrap_or_else(|| format!("#{index}"));
            let error = OrchestraError::StepExecution {
                step,
                message: error,
            };
            Some(PassOutcome::Failed(error.to_string()))
        }
        StepOutcome::Interrupted { .. } => Some(PassOutcome::Cancelled),
    }
}

fn settle(ctx: &ExecutionContext) -> PassOutcome {
    let Some(plan) = ctx.plan() else {
        return PassOutcome::Failed("no plan to execute".to_string());
    };

    let failed: Vec<String> = plan
        .steps
        .iter()
        .filter(|step| step.status == StepStatus::Failed)
        .map(|step| {
            OrchestraError::StepExecution {
                step: step.label(),
                message: step
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
            }
            .to_string()
        })
        .collect();

    if failed.is_empty() {
        PassOutcome::Completed
    } else {
        PassOutcome::Failed(format!("{} step(s) failed: {}", failed.len(), failed.join("; ")))
    }
}
