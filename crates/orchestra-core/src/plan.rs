//! Plan and step types for multi-step task execution

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// How the steps of a plan are scheduled
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sequential,
    Parallel,
    Hierarchical,
    /// Scheduled exactly like `Sequential`; step conditions are only logged.
    Conditional,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Sequential
    }
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Sequential => "sequential",
            ExecutionMode::Parallel => "parallel",
            ExecutionMode::Hierarchical => "hierarchical",
            ExecutionMode::Conditional => "conditional",
        }
    }
}

/// Step status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Retrying,
    /// Reserved for dependency gating, never assigned by the orchestrator.
    WaitingDependency,
}

impl Default for StepStatus {
    fn default() -> Self {
        StepStatus::Pending
    }
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn initial_version() -> u32 {
    1
}

/// One unit of work assigned to a named worker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanStep {
    #[serde(default = "generate_id")]
    pub id: String,
    pub order: i32,
    pub agent: String,
    pub action: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Step ids this step should wait for. Only emptiness is consulted when scheduling.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_conditional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl PlanStep {
    pub fn new(order: i32, agent: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            order,
            agent: agent.into(),
            action: action.into(),
            parameters: Map::new(),
            dependencies: Vec::new(),
            status: StepStatus::Pending,
            result: None,
            error: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            started_at: None,
            completed_at: None,
            is_conditional: false,
            condition: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.is_conditional = true;
        self.condition = Some(condition.into());
        self
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Short human-readable label used in logs and replan reasons.
    pub fn label(&self) -> String {
        format!("#{} {}:{}", self.order, self.agent, self.action)
    }
}

/// An ordered set of steps plus a scheduling mode and version
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    #[serde(default = "generate_id")]
    pub id: String,
    pub objective: String,
    #[serde(default)]
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default = "initial_version")]
    pub version: u32,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_reason: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(objective: impl Into<String>, mode: ExecutionMode) -> Self {
        Self {
            id: generate_id(),
            objective: objective.into(),
            steps: Vec::new(),
            mode,
            version: 1,
            requires_approval: false,
            approval_reason: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_step(mut self, step: PlanStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_approval(mut self, reason: impl Into<String>) -> Self {
        self.requires_approval = true;
        self.approval_reason = Some(reason.into());
        self
    }

    /// First step in stored order that is still pending.
    pub fn next_pending_step(&self) -> Option<&PlanStep> {
        self.steps
            .iter()
            .find(|step| step.status == StepStatus::Pending)
    }

    pub fn is_complete(&self) -> bool {
        self.steps
            .iter()
            .all(|step| matches!(step.status, StepStatus::Completed | StepStatus::Skipped))
    }

    pub fn has_failed(&self) -> bool {
        self.steps
            .iter()
            .any(|step| step.status == StepStatus::Failed)
    }

    pub fn progress(&self) -> f64 {
        if self.steps.is_empty() {
            return 0.0;
        }

        let completed = self
            .steps
            .iter()
            .filter(|step| step.status == StepStatus::Completed)
            .count();
        completed as f64 / self.steps.len() as f64
    }

    /// Step indices sorted by `order`; ties keep their stored position.
    pub fn execution_order(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.steps.len()).collect();
        indices.sort_by_key(|&index| self.steps[index].order);
        indices
    }

    pub fn completed_steps(&self) -> Vec<&PlanStep> {
        self.steps
            .iter()
            .filter(|step| step.status == StepStatus::Completed)
            .collect()
    }

    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.id == step_id)
    }

    pub fn last_order(&self) -> Option<i32> {
        self.steps.iter().map(|step| step.order).max()
    }
}
