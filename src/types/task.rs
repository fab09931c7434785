//! Asynchronous task objects and their state machine
//!
//! Tasks back the task JSON-RPC adapter. Every status mutation goes through
//! the valid-transition table; terminal states have no outgoing edges.
//!
//! ```text
//! queued ──(picked)── running ──(done)── completed
//!  queued ──(cancel)── canceled
//!  queued ──(reject)── rejected
//!  running ──(fail)── failed
//!  running ──(pause)── input-required / auth-required ──(resume)── running
//!                                                    ──(cancel)── canceled
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Task lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Queued,
    Running,
    InputRequired,
    AuthRequired,
    Completed,
    Failed,
    Canceled,
    Rejected,
}

impl TaskState {
    /// Whether this state has no outgoing transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Canceled | TaskState::Rejected
        )
    }

    /// The valid-transition table
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Canceled)
                | (Queued, Rejected)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Canceled)
                | (Running, InputRequired)
                | (Running, AuthRequired)
                | (InputRequired, Running)
                | (InputRequired, Canceled)
                | (AuthRequired, Running)
                | (AuthRequired, Canceled)
        )
    }
}

/// A message part: free-form text or a typed data object
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Part {
    Text { text: String },
    Data { data: Value },
}

/// A message exchanged over the task protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// "user" or "agent"
    pub role: String,
    pub parts: Vec<Part>,
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
}

/// Content produced by the worker for a task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub artifact_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub parts: Vec<Part>,
}

/// Current status of a task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TaskStatus {
    /// Status for a state with an optional progress message
    pub fn new(state: TaskState, message: Option<String>) -> Self {
        Self {
            state,
            message,
            timestamp: Utc::now(),
        }
    }
}

/// An asynchronous work item, stored at `task:{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    /// Always "task"
    pub kind: String,
    /// The skill this task will invoke
    pub skill: String,
    /// Skill parameters as submitted
    pub params: Value,
    pub status: TaskStatus,
    /// Append-only message history
    pub history: Vec<Message>,
    /// Artifacts produced by the worker
    pub artifacts: Vec<Artifact>,
}

impl Task {
    /// Create a queued task
    pub fn new(
        id: impl Into<String>,
        context_id: Option<String>,
        skill: impl Into<String>,
        params: Value,
    ) -> Self {
        Self {
            id: id.into(),
            context_id,
            kind: "task".to_string(),
            skill: skill.into(),
            params,
            status: TaskStatus::new(TaskState::Queued, None),
            history: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    /// History trimmed to the most recent `n` messages
    pub fn with_history_length(mut self, n: usize) -> Self {
        if self.history.len() > n {
            self.history = self.history.split_off(self.history.len() - n);
        }
        self
    }
}
