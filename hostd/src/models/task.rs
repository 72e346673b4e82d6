//! Tracked remote task (activity) model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Task lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Finished,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Finished | TaskStatus::Failed)
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "finished" => Ok(TaskStatus::Finished),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

/// Completion event raised once a task reaches a terminal state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnFinish {
    pub event: String,

    /// Opaque payload handed back to the event's subscribers
    #[serde(default)]
    pub data: serde_json::Value,
}

impl OnFinish {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// What caused the task to be created
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityContext {
    pub event: String,

    #[serde(default)]
    pub properties: serde_json::Value,
}

impl ActivityContext {
    pub fn new(event: impl Into<String>, properties: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            properties,
        }
    }
}

/// One line of captured output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    pub command_index: usize,
    pub line: String,
}

/// Audit record of a remote command sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub server_id: Uuid,
    pub commands: Vec<String>,
    pub status: TaskStatus,
    pub ignore_errors: bool,

    #[serde(default)]
    pub on_finish: Option<OnFinish>,

    pub context: ActivityContext,

    #[serde(default)]
    pub output: Vec<OutputLine>,

    #[serde(default)]
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(server_id: Uuid, commands: Vec<String>, context: ActivityContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            server_id,
            commands,
            status: TaskStatus::Pending,
            ignore_errors: false,
            on_finish: None,
            context,
            output: Vec::new(),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Record captured output of command `index`
    pub fn push_output(&mut self, index: usize, text: &str) {
        self.output.extend(text.lines().map(|line| OutputLine {
            command_index: index,
            line: line.to_string(),
        }));
    }

    pub fn mark_running(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_terminal(&mut self, status: TaskStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
        self.finished_at = Some(Utc::now());
    }
}

/// Query over stored tasks
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub server_id: Option<Uuid>,
    pub status: Option<TaskStatus>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        self.server_id.is_none_or(|id| task.server_id == id)
            && self.status.is_none_or(|status| task.status == status)
    }
}
