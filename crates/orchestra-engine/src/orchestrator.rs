//! Task state machine
//!
//! `Pending -> Planning -> [WaitingHumanApproval ->] Executing ->
//! (Replanning -> Executing)* -> Completed | Failed | Cancelled`
//!
//! Worker failures are absorbed at the step boundary by the step runner. Only a
//! collaborator fault (intent parser, planner, approval gate) aborts a task from
//! here, and even then the task is finalized and `WorkflowCompleted` is sent.

use std::sync::Arc;

use orchestra_core::{
    AgentResult, EventBus, EventPayload, ExecutionContext, ExecutionMode, OrchestraError, Plan,
    TaskStatus, WorkerRegistry,
};
use serde::{Deserialize, Serialize};

use crate::config::OrchestratorConfig;
use crate::notifier::{Notifier, ORCHESTRATOR_AGENT};
use crate::planner::{
    ApprovalDecision, ApprovalGate, AutoApprove, IntentParser, PassthroughIntentParser, Planner,
};
use crate::runner::StepRunner;
use crate::strategy::{self, PassOutcome};

/// How the execution phase ended
#[derive(Debug, Clone, PartialEq, Eq)]
enum ExecutionOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

/// Summary returned once a task reaches a terminal state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskReport {
    pub task_id: String,
    pub status: TaskStatus,
    pub success: bool,
    pub duration_ms: i64,
    pub replan_count: u32,
    pub progress: f64,
    pub results: Vec<AgentResult>,
    pub errors: Vec<String>,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Arc<WorkerRegistry>,
    planner: Arc<dyn Planner>,
    intent_parser: Arc<dyn IntentParser>,
    approval_gate: Arc<dyn ApprovalGate>,
    bus: EventBus,
    notifier: Notifier,
}

impl Orchestrator {
    pub fn new(registry: Arc<WorkerRegistry>, planner: Arc<dyn Planner>) -> Self {
        let config = OrchestratorConfig::default();
        let bus = EventBus::new();
        let notifier = Notifier::new(bus.clone(), config.publish_log_events);

        Self {
            config,
            registry,
            planner,
            intent_parser: Arc::new(PassthroughIntentParser),
            approval_gate: Arc::new(AutoApprove),
            bus,
            notifier,
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.notifier = Notifier::new(self.bus.clone(), config.publish_log_events);
        self.config = config;
        self
    }

    pub fn with_intent_parser(mut self, intent_parser: Arc<dyn IntentParser>) -> Self {
        self.intent_parser = intent_parser;
        self
    }

    pub fn with_approval_gate(mut self, approval_gate: Arc<dyn ApprovalGate>) -> Self {
        self.approval_gate = approval_gate;
        self
    }

    /// Shares an existing bus, e.g. one several orchestrators publish to.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.notifier = Notifier::new(bus.clone(), self.config.publish_log_events);
        self.bus = bus;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    /// Drives the task in `ctx` to a terminal state.
    pub async fn run(&self, ctx: &ExecutionContext) -> TaskReport {
        ctx.mark_started();
        log::info!("[{}] Starting task: {}", ctx.task_id(), ctx.prompt());

        let outcome = match self.drive(ctx).await {
            Ok(outcome) => outcome,
            Err(error) => {
                log::error!("[{}] Task aborted: {}", ctx.task_id(), error);
                self.notifier
                    .log(ctx, format!("Task aborted: {error}"))
                    .await;
                ExecutionOutcome::Failed(error.to_string())
            }
        };

        self.finalize(ctx, outcome).await
    }

    async fn drive(&self, ctx: &ExecutionContext) -> Result<ExecutionOutcome, OrchestraError> {
        if ctx.is_cancelled() {
            return Ok(ExecutionOutcome::Cancelled);
        }

        if let Some(outcome) = self.plan_task(ctx).await? {
            return Ok(outcome);
        }

        self.execute(ctx).await
    }

    /// Returns `Some` when the task ends before execution, e.g. a rejected plan.
    async fn plan_task(
        &self,
        ctx: &ExecutionContext,
    ) -> Result<Option<ExecutionOutcome>, OrchestraError> {
        self.notifier.set_status(ctx, TaskStatus::Planning).await;
        self.notifier.log(ctx, "Parsing intent").await;

        let intent = self.intent_parser.parse_intent(ctx.prompt()).await?;
        ctx.set_intent(intent.clone());

        let plan = self.planner.create_plan(&intent, ctx).await?;
        ctx.set_plan(plan.clone());
        self.notifier
            .log(
                ctx,
                format!(
                    "Plan v{} created: {} steps, {} mode",
                    plan.version,
                    plan.steps.len(),
                    plan.mode.as_str()
                ),
            )
            .await;
        self.notifier
            .emit(
                ctx,
                ORCHESTRATOR_AGENT,
                EventPayload::PlanCreated { plan: plan.clone() },
            )
            .await;

        if !plan.requires_approval {
            return Ok(None);
        }

        self.notifier
            .emit(
                ctx,
                ORCHESTRATOR_AGENT,
                EventPayload::HumanApprovalRequired {
                    reason: plan.approval_reason.clone(),
                    plan: plan.clone(),
                },
            )
            .await;
        self.notifier
            .set_status(ctx, TaskStatus::WaitingHumanApproval)
            .await;
        self.notifier
            .log(
                ctx,
                format!(
                    "Waiting for approval: {}",
                    plan.approval_reason.as_deref().unwrap_or("no reason given")
                ),
            )
            .await;

        let decision = self
            .approval_gate
            .await_approval(&plan, ctx)
            .await
            .map_err(|error| match error {
                OrchestraError::Approval(_) => error,
                other => OrchestraError::Approval(other.to_string()),
            })?;

        match decision {
            ApprovalDecision::Approved => {
                self.notifier.log(ctx, "Plan approved").await;
                Ok(None)
            }
            ApprovalDecision::Rejected { reason } => {
                self.notifier
                    .log(ctx, format!("Plan rejected: {reason}"))
                    .await;
                Ok(Some(ExecutionOutcome::Cancelled))
            }
        }
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<ExecutionOutcome, OrchestraError> {
        let runner = StepRunner::new(&self.registry, &self.notifier, &self.config);
        self.notifier.set_status(ctx, TaskStatus::Executing).await;

        loop {
            let mode = ctx
                .plan()
                .map(|plan| plan.mode)
                .ok_or_else(|| OrchestraError::Planner("planner produced no plan".to_string()))?;

            let pass = match mode {
                ExecutionMode::Sequential | ExecutionMode::Conditional => {
                    strategy::run_sequential(&runner, &self.notifier, ctx).await
                }
                ExecutionMode::Parallel => {
                    strategy::run_parallel(
                        &runner,
                        &self.notifier,
                        ctx,
                        self.config.max_parallel_steps,
                    )
                    .await
                }
                ExecutionMode::Hierarchical => {
                    strategy::run_hierarchical(
                        &runner,
                        &self.notifier,
                        ctx,
                        &self.config.coordinator_agent,
                    )
                    .await
                }
            };

            match pass {
                PassOutcome::Completed => return Ok(ExecutionOutcome::Completed),
                PassOutcome::Cancelled => return Ok(ExecutionOutcome::Cancelled),
                PassOutcome::Failed(error) => return Ok(ExecutionOutcome::Failed(error)),
                PassOutcome::StepExhausted { index, error } => {
                    if ctx.replan_count() >= self.config.max_replans {
                        let exhausted = OrchestraError::ReplanningExhausted {
                            attempts: ctx.replan_count(),
                        };
                        return Ok(ExecutionOutcome::Failed(format!("{exhausted}: {error}")));
                    }

                    self.replan(ctx, index, &error).await?;
                    self.notifier.set_status(ctx, TaskStatus::Executing).await;
                }
            }
        }
    }

    /// Swaps in a new plan from the planner. Execution restarts at its first step.
    async fn replan(
        &self,
        ctx: &ExecutionContext,
        failed_index: usize,
        error: &str,
    ) -> Result<(), OrchestraError> {
        self.notifier.set_status(ctx, TaskStatus::Replanning).await;

        let current = ctx
            .plan()
            .ok_or_else(|| OrchestraError::Planner("no plan to replan".to_string()))?;
        let reason = replan_reason(&current, failed_index, error);
        self.notifier
            .log(ctx, format!("Replanning: {reason}"))
            .await;

        let mut plan = self.planner.replan(&current, &reason, ctx).await?;
        plan.version = current.version + 1;
        ctx.set_plan(plan.clone());
        let replan_count = ctx.increment_replan_count();

        self.notifier
            .emit(
                ctx,
                ORCHESTRATOR_AGENT,
                EventPayload::Replan {
                    reason,
                    previous_version: current.version,
                    new_version: plan.version,
                    replan_count,
                },
            )
            .await;
        self.notifier
            .emit(
                ctx,
                ORCHESTRATOR_AGENT,
                EventPayload::PlanUpdated { plan: plan.clone() },
            )
            .await;
        self.notifier
            .log(
                ctx,
                format!(
                    "Plan v{} installed ({} steps, replan {} of {})",
                    plan.version,
                    plan.steps.len(),
                    replan_count,
                    self.config.max_replans
                ),
            )
            .await;

        Ok(())
    }

    async fn finalize(&self, ctx: &ExecutionContext, outcome: ExecutionOutcome) -> TaskReport {
        let status = match &outcome {
            ExecutionOutcome::Completed => TaskStatus::Completed,
            ExecutionOutcome::Failed(error) => {
                ctx.record_error(error.clone());
                TaskStatus::Failed
            }
            ExecutionOutcome::Cancelled => TaskStatus::Cancelled,
        };
        let success = status == TaskStatus::Completed;

        ctx.mark_completed();
        self.notifier.set_status(ctx, status).await;

        let duration_ms = ctx
            .duration()
            .map(|duration| duration.num_milliseconds())
            .unwrap_or_default();
        let results = ctx.results();

        self.notifier
            .log(
                ctx,
                format!("Task {} in {} ms", status.as_str(), duration_ms),
            )
            .await;
        self.notifier
            .emit(
                ctx,
                ORCHESTRATOR_AGENT,
                EventPayload::WorkflowCompleted {
                    success,
                    status,
                    duration_ms,
                    results: results.clone(),
                },
            )
            .await;
        log::info!(
            "[{}] Task finished: {} ({} results, {} replans)",
            ctx.task_id(),
            status.as_str(),
            results.len(),
            ctx.replan_count()
        );

        TaskReport {
            task_id: ctx.task_id().to_string(),
            status,
            success,
            duration_ms,
            replan_count: ctx.replan_count(),
            progress: ctx.progress(),
            results,
            errors: ctx.errors(),
        }
    }
}

fn replan_reason(plan: &Plan, failed_index: usize, error: &str) -> String {
    let completed: Vec<String> = plan
        .completed_steps()
        .into_iter()
        .map(|step| step.label())
        .collect();

    let failed = plan
        .steps
        .get(failed_index)
        .map(|step| format!("Step {} failed after {} attempts", step.label(), step.retry_count))
        .unwrap_or_else(|| "A step failed".to_string());

    format!(
        "{failed}: {error}. Completed steps: [{}]",
        completed.join(", ")
    )
}
