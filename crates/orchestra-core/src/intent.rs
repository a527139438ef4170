use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Structured reading of a raw task prompt, produced by an intent parser
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Intent {
    pub objective: String,
    #[serde(default)]
    pub sub_goals: Vec<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_agent: Option<String>,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub requires_confirmation: bool,
    #[serde(default)]
    pub confidence: f32,
}

impl Intent {
    pub fn from_objective(objective: impl Into<String>) -> Self {
        Self {
            objective: objective.into(),
            confidence: 1.0,
            ..Default::default()
        }
    }
}
