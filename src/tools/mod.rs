//! Local tools the live service can invoke
//!
//! Every [`ToolInvocation`] produces exactly one [`ToolResult`]; failures are
//! carried inside the result payload rather than raised.

mod dialer;
mod dispatcher;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::session::protocol::FunctionDeclaration;
use crate::tasks::Task;

pub use dialer::{Dialer, SystemDialer, dialable_number};
pub use dispatcher::ToolDispatcher;

/// Tool name: place a phone call
pub const DIAL_NUMBER: &str = "dial_number";

/// Tool name: read the current task list
pub const GET_TASKS: &str = "get_tasks";

/// A structured request from the live service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// The single reply to a [`ToolInvocation`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub id: String,
    pub name: String,
    pub result: Value,
}

impl ToolResult {
    /// Successful reply carrying `result`
    #[must_use]
    pub fn new(invocation: &ToolInvocation, result: Value) -> Self {
        Self {
            id: invocation.id.clone(),
            name: invocation.name.clone(),
            result,
        }
    }

    /// Reply reporting a failed local action
    #[must_use]
    pub fn failure(invocation: &ToolInvocation, message: &str) -> Self {
        Self::new(invocation, json!({ "error": message }))
    }

    /// Whether this reply reports a failure
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.result.get("error").is_some()
    }
}

/// Side effect the session must carry out after replying
#[derive(Debug, Clone, PartialEq)]
pub enum ToolAction {
    /// Release the microphone, then hand `number` to the native dialer
    CallHandoff {
        /// Dialable number
        number: String,
        /// Task shown while the call is set up
        target: Task,
    },
}

/// What dispatching one invocation produced
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub result: ToolResult,
    pub action: Option<ToolAction>,
}

/// Declarations announced to the live service at setup
#[must_use]
pub fn declarations() -> Vec<FunctionDeclaration> {
    vec![
        FunctionDeclaration {
            name: DIAL_NUMBER.to_string(),
            description: "Place a phone call to a number from the task list. Pass the task id when the number belongs to a task.".to_string(),
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "number": { "type": "STRING", "description": "Phone number to dial" },
                    "taskId": { "type": "STRING", "description": "Id of the task being called" }
                },
                "required": ["number"]
            }),
        },
        FunctionDeclaration {
            name: GET_TASKS.to_string(),
            description: "List the open and in-progress tasks.".to_string(),
            parameters: json!({ "type": "OBJECT", "properties": {} }),
        },
    ]
}
