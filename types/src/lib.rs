//! Core domain types for Tricode.
//!
//! Pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

mod edit;
mod ids;
mod plan;

pub use edit::{
    Anchor, AnchorKind, EditMode, EditResult, Hunk, HunkOp, LineRange, LineRangeError,
    MatchRecord, Occurrence, Precondition,
};
pub use ids::{ConversationId, ConversationIdError, SessionId, SessionIdError};
pub use plan::{Plan, PlanDecision, PlanError, Task, TaskStatus, TaskStatusError};

use serde::{Deserialize, Serialize};

/// A tool the orchestrator can advertise to a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The name of the tool (function name).
    pub name: String,
    /// A description of what the tool does.
    pub description: String,
    /// JSON Schema describing the tool's parameters.
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// A tool call requested by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default = "empty_object")]
    pub arguments: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}
