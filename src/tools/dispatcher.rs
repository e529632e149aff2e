//! Tool dispatcher: maps invocation names to local actions

use serde_json::{Value, json};

use super::{
    DIAL_NUMBER, DispatchOutcome, GET_TASKS, ToolAction, ToolInvocation, ToolResult,
    dialable_number,
};
use crate::tasks::{SharedTaskStore, Task, TaskStatus};
use crate::{Error, Result};

/// Executes tool invocations against the task store
///
/// Dispatching never fails at the protocol level: errors become a failure
/// payload in the returned [`ToolResult`]. Unknown tools are acknowledged
/// with `"ok"`.
#[derive(Clone)]
pub struct ToolDispatcher {
    tasks: SharedTaskStore,
}

impl ToolDispatcher {
    /// Create a dispatcher reading from `tasks`
    #[must_use]
    pub const fn new(tasks: SharedTaskStore) -> Self {
        Self { tasks }
    }

    /// Shared task store this dispatcher resolves against
    #[must_use]
    pub const fn tasks(&self) -> &SharedTaskStore {
        &self.tasks
    }

    /// Execute one invocation and produce its reply
    pub fn dispatch(&self, invocation: &ToolInvocation) -> DispatchOutcome {
        tracing::info!(id = %invocation.id, tool = %invocation.name, "tool call");

        let outcome = match invocation.name.as_str() {
            DIAL_NUMBER => self.dial_number(&invocation.arguments).map(|(number, target)| {
                (json!("ok"), Some(ToolAction::CallHandoff { number, target }))
            }),
            GET_TASKS => self.get_tasks().map(|tasks| (tasks, None)),
            other => {
                tracing::info!(tool = other, "acknowledging unknown tool");
                Ok((json!("ok"), None))
            }
        };

        match outcome {
            Ok((result, action)) => DispatchOutcome {
                result: ToolResult::new(invocation, result),
                action,
            },
            Err(e) => {
                tracing::warn!(id = %invocation.id, tool = %invocation.name, error = %e, "tool failed");
                DispatchOutcome {
                    result: ToolResult::failure(invocation, &e.to_string()),
                    action: None,
                }
            }
        }
    }

    /// Resolve the call target, mark it in progress and return the number to dial
    fn dial_number(&self, args: &Value) -> Result<(String, Task)> {
        let number = string_arg(args, "number");
        let task_id = string_arg(args, "taskId").or_else(|| string_arg(args, "task_id"));

        let mut store = self
            .tasks
            .write()
            .map_err(|_| Error::ToolExecution("task store lock poisoned".to_string()))?;

        let resolved = task_id
            .and_then(|id| store.get(id))
            .or_else(|| number.and_then(|n| store.find_by_number(n)))
            .cloned();

        if let Some(id) = task_id
            && store.get(id).is_none()
        {
            tracing::debug!(task_id = id, "unknown task id, matching by number");
        }

        let raw_number = number
            .map(str::to_string)
            .or_else(|| {
                resolved
                    .as_ref()
                    .map(|t| t.phone_number.clone())
                    .filter(|n| !n.trim().is_empty())
            })
            .ok_or_else(|| Error::InvalidNumber("no number given".to_string()))?;
        let dialable = dialable_number(&raw_number)?;

        let target = match resolved {
            Some(task) => store.set_status(&task.id, TaskStatus::InProgress)?,
            None => Task::external(&raw_number),
        };
        drop(store);

        tracing::info!(number = %dialable, task = %target.id, "call handoff requested");
        Ok((dialable, target))
    }

    /// Open and in-progress tasks as JSON
    fn get_tasks(&self) -> Result<Value> {
        let store = self
            .tasks
            .read()
            .map_err(|_| Error::ToolExecution("task store lock poisoned".to_string()))?;
        Ok(serde_json::to_value(store.pending())?)
    }
}

/// Non-empty trimmed string argument
fn string_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
