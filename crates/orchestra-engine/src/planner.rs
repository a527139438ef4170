//! Collaborators the orchestrator consults but does not implement
//!
//! Plan generation and intent parsing normally sit on top of a language model;
//! the orchestrator only depends on these traits.

use async_trait::async_trait;
use orchestra_core::{ExecutionContext, Intent, OrchestraError, Plan};

#[async_trait]
pub trait IntentParser: Send + Sync {
    async fn parse_intent(&self, raw: &str) -> Result<Intent, OrchestraError>;
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn create_plan(
        &self,
        intent: &Intent,
        ctx: &ExecutionContext,
    ) -> Result<Plan, OrchestraError>;

    /// Produces a replacement for `current` after a step exhausted its retries.
    /// The orchestrator assigns `current.version + 1` to the returned plan.
    async fn replan(
        &self,
        current: &Plan,
        reason: &str,
        ctx: &ExecutionContext,
    ) -> Result<Plan, OrchestraError>;
}

/// Uses the raw prompt as the objective, with no further structure.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughIntentParser;

#[async_trait]
impl IntentParser for PassthroughIntentParser {
    async fn parse_intent(&self, raw: &str) -> Result<Intent, OrchestraError> {
        let objective = raw.trim();
        if objective.is_empty() {
            return Err(OrchestraError::IntentParsing(
                "prompt cannot be empty".to_string(),
            ));
        }

        Ok(Intent::from_objective(objective))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Rejected { reason: String },
}

/// Gate consulted when a plan is flagged as requiring human approval.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn await_approval(
        &self,
        plan: &Plan,
        ctx: &ExecutionContext,
    ) -> Result<ApprovalDecision, OrchestraError>;
}

/// Approves every plan immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalGate for AutoApprove {
    async fn await_approval(
        &self,
        _plan: &Plan,
        _ctx: &ExecutionContext,
    ) -> Result<ApprovalDecision, OrchestraError> {
        Ok(ApprovalDecision::Approved)
    }
}
