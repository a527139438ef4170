//! YAML plan files and the planner that serves them

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context};
use async_trait::async_trait;
use orchestra_core::{ExecutionContext, Intent, OrchestraError, Plan, StepStatus};
use orchestra_engine::Planner;
use serde::Deserialize;

/// A plan plus replanning hints.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanFile {
    #[serde(flatten)]
    pub plan: Plan,
    /// Worker to substitute when a step assigned to the key exhausts its retries.
    #[serde(default)]
    pub fallbacks: HashMap<String, String>,
}

impl PlanFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read plan file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid plan file {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let mut file: PlanFile = serde_yaml::from_str(content)?;

        if file.plan.steps.is_empty() {
            bail!("plan has no steps");
        }

        for step in &mut file.plan.steps {
            if step.condition.is_some() {
                step.is_conditional = true;
            }
        }

        let mut ids: Vec<&str> = file.plan.steps.iter().map(|step| step.id.as_str()).collect();
        ids.sort_unstable();
        if let Some(pair) = ids.windows(2).find(|pair| pair[0] == pair[1]) {
            bail!("duplicate step id `{}`", pair[0]);
        }

        Ok(file)
    }

    /// Workers named by the plan, its fallbacks included.
    pub fn agents(&self) -> Vec<String> {
        let mut agents: Vec<String> = self
            .plan
            .steps
            .iter()
            .map(|step| step.agent.clone())
            .chain(self.fallbacks.values().cloned())
            .collect();
        agents.sort();
        agents.dedup();
        agents
    }
}

/// Serves a plan loaded from disk.
///
/// A replan keeps every completed step, resets the rest to `Pending` and moves
/// exhausted steps onto their fallback worker when one is configured.
pub struct FilePlanner {
    file: PlanFile,
}

impl FilePlanner {
    pub fn new(file: PlanFile) -> Self {
        Self { file }
    }
}

#[async_trait]
impl Planner for FilePlanner {
    async fn create_plan(
        &self,
        intent: &Intent,
        _ctx: &ExecutionContext,
    ) -> Result<Plan, OrchestraError> {
        let mut plan = self.file.plan.clone();
        if plan.objective.trim().is_empty() {
            plan.objective = intent.objective.clone();
        }
        Ok(plan)
    }

    async fn replan(
        &self,
        current: &Plan,
        reason: &str,
        ctx: &ExecutionContext,
    ) -> Result<Plan, OrchestraError> {
        let mut plan = current.clone();
        let mut substituted = 0;

        for step in &mut plan.steps {
            if step.status == StepStatus::Completed {
                continue;
            }

            if step.retries_exhausted() {
                if let Some(fallback) = self.file.fallbacks.get(&step.agent) {
                    ctx.log(format!(
                        "Moving step {} to fallback worker `{}`",
                        step.label(),
                        fallback
                    ));
                    step.agent = fallback.clone();
                    substituted += 1;
                }
            }

            step.status = StepStatus::Pending;
            step.retry_count = 0;
            step.error = None;
            step.result = None;
            step.started_at = None;
            step.completed_at = None;
        }

        log::debug!(
            "[{}] Replanned with {} fallback(s): {}",
            ctx.task_id(),
            substituted,
            reason
        );
        Ok(plan)
    }
}
