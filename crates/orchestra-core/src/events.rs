use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::TaskStatus;
use crate::plan::Plan;
use crate::worker::AgentResult;

/// Discriminant of an event, used to route it to kind-specific handlers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventKind {
    PlanCreated,
    PlanUpdated,
    AgentStart,
    AgentAction,
    AgentResult,
    AgentError,
    ToolCall,
    Replan,
    WorkflowCompleted,
    StatusChanged,
    HumanApprovalRequired,
    LogMessage,
}

impl EventKind {
    pub const ALL: [EventKind; 12] = [
        EventKind::PlanCreated,
        EventKind::PlanUpdated,
        EventKind::AgentStart,
        EventKind::AgentAction,
        EventKind::AgentResult,
        EventKind::AgentError,
        EventKind::ToolCall,
        EventKind::Replan,
        EventKind::WorkflowCompleted,
        EventKind::StatusChanged,
        EventKind::HumanApprovalRequired,
        EventKind::LogMessage,
    ];

    /// Stable wire name, identical to the `type` tag of the serialized event.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PlanCreated => "PlanCreated",
            EventKind::PlanUpdated => "PlanUpdated",
            EventKind::AgentStart => "AgentStart",
            EventKind::AgentAction => "AgentAction",
            EventKind::AgentResult => "AgentResult",
            EventKind::AgentError => "AgentError",
            EventKind::ToolCall => "ToolCall",
            EventKind::Replan => "Replan",
            EventKind::WorkflowCompleted => "WorkflowCompleted",
            EventKind::StatusChanged => "StatusChanged",
            EventKind::HumanApprovalRequired => "HumanApprovalRequired",
            EventKind::LogMessage => "LogMessage",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum EventPayload {
    PlanCreated {
        plan: Plan,
    },

    PlanUpdated {
        plan: Plan,
    },

    AgentStart {
        step_id: String,
        order: i32,
        action: String,
    },

    /// Annotation about what a step is doing, e.g. an unevaluated condition.
    AgentAction {
        step_id: String,
        action: String,
        detail: String,
    },

    AgentResult {
        step_id: String,
        result: AgentResult,
    },

    AgentError {
        step_id: String,
        error: String,
        will_retry: bool,
        attempt: u32,
    },

    /// Published by workers that call out to tools.
    ToolCall {
        tool: String,
        arguments: Value,
    },

    Replan {
        reason: String,
        previous_version: u32,
        new_version: u32,
        replan_count: u32,
    },

    WorkflowCompleted {
        success: bool,
        status: TaskStatus,
        duration_ms: i64,
        results: Vec<AgentResult>,
    },

    StatusChanged {
        from: TaskStatus,
        to: TaskStatus,
    },

    HumanApprovalRequired {
        reason: Option<String>,
        plan: Plan,
    },

    LogMessage {
        message: String,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::PlanCreated { .. } => EventKind::PlanCreated,
            EventPayload::PlanUpdated { .. } => EventKind::PlanUpdated,
            EventPayload::AgentStart { .. } => EventKind::AgentStart,
            EventPayload::AgentAction { .. } => EventKind::AgentAction,
            EventPayload::AgentResult { .. } => EventKind::AgentResult,
            EventPayload::AgentError { .. } => EventKind::AgentError,
            EventPayload::ToolCall { .. } => EventKind::ToolCall,
            EventPayload::Replan { .. } => EventKind::Replan,
            EventPayload::WorkflowCompleted { .. } => EventKind::WorkflowCompleted,
            EventPayload::StatusChanged { .. } => EventKind::StatusChanged,
            EventPayload::HumanApprovalRequired { .. } => EventKind::HumanApprovalRequired,
            EventPayload::LogMessage { .. } => EventKind::LogMessage,
        }
    }
}

/// A lifecycle event broadcast on the event bus
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestraEvent {
    pub task_id: String,
    /// Worker the event concerns; the orchestrator itself uses `"orchestrator"`.
    pub agent: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl OrchestraEvent {
    pub fn new(task_id: impl Into<String>, agent: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            task_id: task_id.into(),
            agent: agent.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_tag_matches_kind_name() {
        let event = OrchestraEvent::new(
            "t1",
            "writer",
            EventPayload::AgentError {
                step_id: "s1".to_string(),
                error: "boom".to_string(),
                will_retry: true,
                attempt: 1,
            },
        );

        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], event.kind().as_str());
        assert_eq!(json["task_id"], "t1");
        assert_eq!(json["will_retry"], true);
    }

    #[test]
    fn event_roundtrips_through_json() {
        let event = OrchestraEvent::new(
            "t1",
            "orchestrator",
            EventPayload::StatusChanged {
                from: TaskStatus::Planning,
                to: TaskStatus::Executing,
            },
        );

        let json = serde_json::to_string(&event).unwrap();
        let parsed: OrchestraEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, event);
    }

    #[test]
    fn kind_names_are_unique() {
        let mut names: Vec<&str> = EventKind::ALL.iter().map(EventKind::as_str).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), EventKind::ALL.len());
    }
}
