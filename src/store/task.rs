//! Task store: CRUD, valid-transition enforcement, FIFO queue, context map
//!
//! Status mutations go through [`TaskStore::update_status`], which loads the
//! task, checks the transition table, and rejects invalid moves with an
//! InvalidTransition error. History appends and artifact attachment are
//! idempotent per message/artifact id.

use crate::kv::Kv;
use crate::types::{Artifact, Message, Task, TaskState, TaskStatus};
use crate::{ProofportError, Result};
use std::sync::Arc;
use std::time::Duration;

/// Default task TTL (24 h), bumped on every mutation
const TASK_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// The submitted-task FIFO queue key
const QUEUE_KEY: &str = "queue:submitted";

/// Store for task objects, keyed `task:{id}`
#[derive(Clone)]
pub struct TaskStore {
    kv: Arc<dyn Kv>,
}

impl TaskStore {
    /// Create a task store
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    fn key(id: &str) -> String {
        format!("task:{}", id)
    }

    fn ctx_key(context_id: &str) -> String {
        format!("ctx:{}", context_id)
    }

    /// Load a task
    pub async fn get(&self, id: &str) -> Result<Option<Task>> {
        match self.kv.get(&Self::key(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Load a task or fail with a NotFound error
    pub async fn get_required(&self, id: &str) -> Result<Task> {
        self.get(id)
            .await?
            .ok_or_else(|| ProofportError::not_found(format!("task {} not found", id)))
    }

    /// Write a task, bumping its TTL
    pub async fn put(&self, task: &Task) -> Result<()> {
        let raw = serde_json::to_string(task)?;
        self.kv.set(&Self::key(&task.id), &raw, Some(TASK_TTL)).await
    }

    /// Create a task and push it onto the submitted queue
    pub async fn submit(&self, task: &Task) -> Result<()> {
        self.put(task).await?;
        if let Some(context_id) = &task.context_id {
            self.kv
                .set(&Self::ctx_key(context_id), &task.id, Some(TASK_TTL))
                .await?;
        }
        self.kv.lpush(QUEUE_KEY, &task.id).await
    }

    /// Pop the next submitted task id, FIFO
    pub async fn next_submitted(&self) -> Result<Option<String>> {
        self.kv.rpop(QUEUE_KEY).await
    }

    /// Look up the task id recorded for a context id
    pub async fn task_for_context(&self, context_id: &str) -> Result<Option<String>> {
        self.kv.get(&Self::ctx_key(context_id)).await
    }

    /// Transition a task to a new state
    ///
    /// Rejects moves the transition table does not allow and returns the
    /// updated task on success.
    pub async fn update_status(
        &self,
        id: &str,
        state: TaskState,
        message: Option<String>,
    ) -> Result<Task> {
        let mut task = self.get_required(id).await?;
        if !task.status.state.can_transition_to(state) {
            return Err(ProofportError::invalid_transition(format!(
                "task {}: {:?} -> {:?}",
                id, task.status.state, state
            )));
        }
        task.status = TaskStatus::new(state, message);
        self.put(&task).await?;
        Ok(task)
    }

    /// Append a message to a task's history; idempotent per message id
    pub async fn append_history(&self, id: &str, message: Message) -> Result<Task> {
        let mut task = self.get_required(id).await?;
        if !task.history.iter().any(|m| m.message_id == message.message_id) {
            task.history.push(message);
            self.put(&task).await?;
        }
        Ok(task)
    }

    /// Attach an artifact to a task; idempotent per artifact id
    pub async fn add_artifact(&self, id: &str, artifact: Artifact) -> Result<Task> {
        let mut task = self.get_required(id).await?;
        if !task
            .artifacts
            .iter()
            .any(|a| a.artifact_id == artifact.artifact_id)
        {
            task.artifacts.push(artifact);
            self.put(&task).await?;
        }
        Ok(task)
    }
}
