//! Task list consumed by the voice session
//!
//! Tasks are imported by the surrounding application as an already-validated
//! JSON array. The session only reads them, except for flipping a task to
//! in-progress when a call to it starts.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Shared handle to the task store
pub type SharedTaskStore = Arc<RwLock<TaskStore>>;

/// Progress of a call/visit target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    /// Not started
    #[default]
    Open,
    /// A call is underway
    #[serde(alias = "bezig", alias = "in_progress")]
    InProgress,
    /// Finished
    #[serde(alias = "voltooid")]
    Done,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::InProgress => write!(f, "in progress"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// A call/visit target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    #[serde(alias = "name")]
    pub display_name: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub status: TaskStatus,
}

impl Task {
    /// Placeholder shown while calling a number that matches no task
    #[must_use]
    pub fn external(number: &str) -> Self {
        Self {
            id: "ext".to_string(),
            display_name: "External number".to_string(),
            organization: String::new(),
            subject: String::new(),
            phone_number: number.to_string(),
            status: TaskStatus::InProgress,
        }
    }

    /// Whether the task still needs attention
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self.status, TaskStatus::Open | TaskStatus::InProgress)
    }

    /// One-line plain text form used in the system instruction
    #[must_use]
    pub fn context_line(&self) -> String {
        let mut line = format!("- {}", self.display_name);
        if !self.organization.is_empty() {
            line.push_str(&format!(" ({})", self.organization));
        }
        if !self.subject.is_empty() {
            line.push_str(&format!(" | {}", self.subject));
        }
        let phone = if self.phone_number.is_empty() {
            "not available"
        } else {
            &self.phone_number
        };
        line.push_str(&format!(
            " | Tel: {phone} | id: {} | status: {}",
            self.id, self.status
        ));
        line
    }
}

/// Reduce a phone number to a leading `+` and digits
#[must_use]
pub fn normalize_number(number: &str) -> String {
    let trimmed = number.trim();
    let mut normalized = String::with_capacity(trimmed.len());
    if trimmed.starts_with('+') {
        normalized.push('+');
    }
    normalized.extend(trimmed.chars().filter(char::is_ascii_digit));
    normalized
}

/// In-memory list of call/visit targets
#[derive(Debug, Clone, Default)]
pub struct TaskStore {
    tasks: Vec<Task>,
}

impl TaskStore {
    /// Create a store from imported tasks
    #[must_use]
    pub const fn new(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    /// Load tasks from a JSON array file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let tasks: Vec<Task> = serde_json::from_str(&content)?;
        tracing::info!(path = %path.display(), count = tasks.len(), "loaded tasks");
        Ok(Self::new(tasks))
    }

    /// Wrap the store for sharing with the session
    #[must_use]
    pub fn shared(self) -> SharedTaskStore {
        Arc::new(RwLock::new(self))
    }

    /// Look up a task by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Find the first task whose phone number matches `number`
    #[must_use]
    pub fn find_by_number(&self, number: &str) -> Option<&Task> {
        let wanted = normalize_number(number);
        if wanted.is_empty() || wanted == "+" {
            return None;
        }
        self.tasks
            .iter()
            .find(|t| normalize_number(&t.phone_number) == wanted)
    }

    /// Set the status of a task, returning the updated task
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if no task has this id
    pub fn set_status(&mut self, id: &str, status: TaskStatus) -> Result<Task> {
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| Error::NotFound(format!("task {id}")))?;
        task.status = status;
        Ok(task.clone())
    }

    /// Tasks that are open or in progress, in list order
    #[must_use]
    pub fn pending(&self) -> Vec<&Task> {
        self.tasks.iter().filter(|t| t.is_pending()).collect()
    }

    /// All tasks in list order
    #[must_use]
    pub fn all(&self) -> &[Task] {
        &self.tasks
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Plain-text task list embedded in the system instruction
    #[must_use]
    pub fn context_block(&self) -> String {
        if self.tasks.is_empty() {
            return "There are currently NO tasks loaded in the system.".to_string();
        }
        self.tasks
            .iter()
            .map(Task::context_line)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TaskStore {
        TaskStore::new(vec![
            Task {
                id: "t1".to_string(),
                display_name: "Bakery De Vries".to_string(),
                organization: "De Vries BV".to_string(),
                subject: "Delivery".to_string(),
                phone_number: "+31 12-345".to_string(),
                status: TaskStatus::Open,
            },
            Task {
                id: "t2".to_string(),
                display_name: "Town hall".to_string(),
                organization: String::new(),
                subject: String::new(),
                phone_number: String::new(),
                status: TaskStatus::Done,
            },
        ])
    }

    #[test]
    fn normalizes_numbers() {
        assert_eq!(normalize_number(" +31 (0)12-345 "), "+31012345");
        assert_eq!(normalize_number("0612 34"), "061234");
        assert_eq!(normalize_number("abc"), "");
    }

    #[test]
    fn finds_task_by_formatted_number() {
        let store = sample();
        assert_eq!(store.find_by_number("+3112345").map(|t| t.id.as_str()), Some("t1"));
        assert!(store.find_by_number("").is_none());
        assert!(store.find_by_number("999").is_none());
    }

    #[test]
    fn set_status_updates_only_status() {
        let mut store = sample();
        let updated = store.set_status("t1", TaskStatus::InProgress).unwrap();
        assert_eq!(updated.status, TaskStatus::InProgress);
        assert_eq!(updated.display_name, "Bakery De Vries");
        assert_eq!(store.get("t1").unwrap().status, TaskStatus::InProgress);
        assert!(matches!(
            store.set_status("nope", TaskStatus::Done),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn pending_skips_done_tasks() {
        let store = sample();
        let ids: Vec<_> = store.pending().iter().map(|t| t.id.clone()).collect();
        assert_eq!(ids, vec!["t1"]);
    }

    #[test]
    fn context_block_lists_every_task() {
        let block = sample().context_block();
        assert!(block.contains("- Bakery De Vries (De Vries BV) | Delivery | Tel: +31 12-345"));
        assert!(block.contains("- Town hall | Tel: not available | id: t2 | status: done"));
        assert!(TaskStore::default().context_block().contains("NO tasks"));
    }

    #[test]
    fn deserializes_legacy_field_names() {
        let json = r#"[{"id":"a","name":"Garage","phoneNumber":"0101","status":"bezig"}]"#;
        let tasks: Vec<Task> = serde_json::from_str(json).unwrap();
        assert_eq!(tasks[0].display_name, "Garage");
        assert_eq!(tasks[0].status, TaskStatus::InProgress);
        assert!(tasks[0].organization.is_empty());
    }

    #[test]
    fn load_reads_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(&path, r#"[{"id":"a","displayName":"Garage"}]"#).unwrap();

        let store = TaskStore::load(&path).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").unwrap().status, TaskStatus::Open);
    }
}
