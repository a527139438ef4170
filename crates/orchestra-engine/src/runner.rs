use chrono::Utc;
use orchestra_core::{
    AgentResult, EventPayload, ExecutionContext, OrchestraError, StepStatus, WorkerRegistry,
};
use tokio::time::sleep;

use crate::config::OrchestratorConfig;
use crate::notifier::{Notifier, ORCHESTRATOR_AGENT};

/// How a single step ended after all of its attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StepOutcome {
    Completed,
    /// Retries exhausted, or the worker does not exist.
    Failed { error: String },
    /// Cancellation arrived before a retry could start; the step stays `Failed`.
    Interrupted { error: String },
}

/// Runs one plan step to completion, retrying with exponential backoff.
pub(crate) struct StepRunner<'a> {
    registry: &'a WorkerRegistry,
    notifier: &'a Notifier,
    config: &'a OrchestratorConfig,
}

impl<'a> StepRunner<'a> {
    pub(crate) fn new(
        registry: &'a WorkerRegistry,
        notifier: &'a Notifier,
        config: &'a OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            notifier,
            config,
        }
    }

    pub(crate) async fn run_step(&self, ctx: &ExecutionContext, index: usize) -> StepOutcome {
        let default_max_retries = self.config.default_max_retries;
        let Some(step) = ctx.update_step(index, |step| {
            if step.max_retries == 0 {
                step.max_retries = default_max_retries;
            }
            step.clone()
        }) else {
            return StepOutcome::Failed {
                error: format!("no step at index {index} in the current plan"),
            };
        };
        let max_retries = step.max_retries;

        if step.is_conditional {
            let condition = step.condition.clone().unwrap_or_default();
            self.notifier
                .log(
                    ctx,
                    format!(
                        "Step {} is conditional on `{}` (recorded, not evaluated)",
                        step.label(),
                        condition
                    ),
                )
                .await;
            self.notifier
                .emit(
                    ctx,
                    &step.agent,
                    EventPayload::AgentAction {
                        step_id: step.id.clone(),
                        action: step.action.clone(),
                        detail: format!("condition: {condition}"),
                    },
                )
                .await;
        }

        let cancel = ctx.cancellation_token();

        // Each pass is one attempt; the loop is bounded by `max_retries`.
        loop {
            let Some(step) = ctx.update_step(index, |step| {
                step.status = StepStatus::Running;
                step.started_at = Some(Utc::now());
                step.completed_at = None;
                step.clone()
            }) else {
                return StepOutcome::Failed {
                    error: format!("step at index {index} disappeared during execution"),
                };
            };

            self.notifier
                .emit(
                    ctx,
                    &step.agent,
                    EventPayload::AgentStart {
                        step_id: step.id.clone(),
                        order: step.order,
                        action: step.action.clone(),
                    },
                )
                .await;
            self.notifier
                .log(ctx, format!("Running step {}", step.label()))
                .await;

            let worker = match self.registry.resolve(&step.agent) {
                Ok(worker) => worker,
                Err(error) => return self.fail_unrecoverable(ctx, index, error).await,
            };

            let failure = match worker.execute(&step, ctx, cancel.clone()).await {
                Ok(result) if result.success => {
                    self.complete(ctx, index, result).await;
                    return StepOutcome::Completed;
                }
                Ok(result) => result
                    .error
                    .unwrap_or_else(|| "worker reported failure without an error".to_string()),
                Err(error) => error.to_string(),
            };

            let retry_count = ctx
                .update_step(index, |step| {
                    step.status = StepStatus::Failed;
                    step.error = Some(failure.clone());
                    step.completed_at = Some(Utc::now());
                    step.retry_count += 1;
                    step.retry_count
                })
                .unwrap_or(max_retries);
            let will_retry = retry_count < max_retries && !cancel.is_cancelled();

            log::warn!(
                "[{}] Step {} failed (attempt {}/{}): {}",
                ctx.task_id(),
                step.label(),
                retry_count,
                max_retries,
                failure
            );
            self.notifier
                .emit(
                    ctx,
                    &step.agent,
                    EventPayload::AgentError {
                        step_id: step.id.clone(),
                        error: failure.clone(),
                        will_retry,
                        attempt: retry_count,
                    },
                )
                .await;

            if !will_retry {
                if retry_count < max_retries {
                    self.notifier
                        .log(ctx, format!("Step {} not retried: task cancelled", step.label()))
                        .await;
                    return StepOutcome::Interrupted { error: failure };
                }

                self.notifier
                    .log(
                        ctx,
                        format!(
                            "Step {} failed after {} attempts: {}",
                            step.label(),
                            retry_count,
                            failure
                        ),
                    )
                    .await;
                return StepOutcome::Failed { error: failure };
            }

            let delay = self.config.backoff_for(retry_count);
            self.notifier
                .log(
                    ctx,
                    format!(
                        "Retrying step {} in {:?} (attempt {} of {})",
                        step.label(),
                        delay,
                        retry_count + 1,
                        max_retries
                    ),
                )
                .await;

            tokio::select! {
                _ = cancel.cancelled() => {
                    self.notifier
                        .log(ctx, format!("Retry of step {} abandoned: task cancelled", step.label()))
                        .await;
                    return StepOutcome::Interrupted { error: failure };
                }
                _ = sleep(delay) => {}
            }

            ctx.update_step(index, |step| step.status = StepStatus::Retrying);
        }
    }

    async fn complete(&self, ctx: &ExecutionContext, index: usize, result: AgentResult) {
        let value = result.value.clone();
        let Some(step) = ctx.update_step(index, |step| {
            step.status = StepStatus::Completed;
            step.result = Some(value);
            step.error = None;
            step.completed_at = Some(Utc::now());
            step.clone()
        }) else {
            return;
        };

        ctx.set_state(format!("{}_result", step.agent), result.value.clone());
        ctx.push_result(result.clone());

        self.notifier
            .emit(
                ctx,
                &step.agent,
                EventPayload::AgentResult {
                    step_id: step.id.clone(),
                    result,
                },
            )
            .await;
        self.notifier
            .log(ctx, format!("Step {} completed", step.label()))
            .await;
    }

    /// A configuration problem such as a missing worker: no retry, no backoff.
    async fn fail_unrecoverable(
        &self,
        ctx: &ExecutionContext,
        index: usize,
        error: OrchestraError,
    ) -> StepOutcome {
        let message = error.to_string();
        let step = ctx.update_step(index, |step| {
            step.status = StepStatus::Failed;
            step.error = Some(message.clone());
            step.completed_at = Some(Utc::now());
            step.retry_count = step.max_retries;
            step.clone()
        });

        let (step_id, agent, attempt, label) = match &step {
            Some(step) => (
                step.id.clone(),
                step.agent.clone(),
                step.retry_count,
                step.label(),
            ),
            None => (String::new(), ORCHESTRATOR_AGENT.to_string(), 0, format!("#{index}")),
        };

        log::error!("[{}] Step {} cannot run: {}", ctx.task_id(), label, message);
        self.notifier
            .emit(
                ctx,
                &agent,
                EventPayload::AgentError {
                    step_id,
                    error: message.clone(),
                    will_retry: false,
                    attempt,
                },
            )
            .await;
        self.notifier
            .log(ctx, format!("Step {label} cannot run: {message}"))
            .await;

        StepOutcome::Failed { error: message }
    }
}
