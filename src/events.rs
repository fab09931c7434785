//! In-process event bus for task updates
//!
//! Multi-producer broadcast keyed by task id. The task worker publishes
//! status changes and artifacts; SSE handlers subscribe per task and map
//! events into JSON-RPC envelopes. Events for a given task arrive in emit
//! order; there is no cross-task ordering. A topic is dropped once its
//! final event is published and all subscribers are gone.

use crate::types::{Artifact, Task, TaskStatus};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Buffered events per topic before slow subscribers start lagging
const TOPIC_CAPACITY: usize = 64;

/// An event published for a task
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TaskEvent {
    /// Task status changed; `final` marks the last status event
    #[serde(rename_all = "camelCase")]
    StatusUpdate {
        task_id: String,
        status: TaskStatus,
        #[serde(rename = "final")]
        is_final: bool,
    },
    /// The worker attached an artifact
    #[serde(rename_all = "camelCase")]
    ArtifactUpdate { task_id: String, artifact: Artifact },
    /// Terminal snapshot of the whole task; closes streams
    #[serde(rename_all = "camelCase")]
    TaskComplete { task_id: String, task: Task },
}

impl TaskEvent {
    /// Whether this event ends a subscription
    pub fn is_final(&self) -> bool {
        matches!(self, TaskEvent::TaskComplete { .. })
    }
}

/// Per-task publish/subscribe bus
#[derive(Clone, Default)]
pub struct EventBus {
    topics: Arc<RwLock<HashMap<String, broadcast::Sender<TaskEvent>>>>,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a task's events
    pub async fn subscribe(&self, task_id: &str) -> broadcast::Receiver<TaskEvent> {
        let mut topics = self.topics.write().await;
        topics
            .entry(task_id.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }

    async fn publish(&self, task_id: &str, event: TaskEvent) {
        let is_final = event.is_final();
        let mut topics = self.topics.write().await;
        if let Some(sender) = topics.get(task_id) {
            // A send error just means nobody is listening
            let _ = sender.send(event);
        }
        if is_final {
            topics.remove(task_id);
        }
    }

    /// Publish a status change
    pub async fn status_update(&self, task_id: &str, status: TaskStatus, is_final: bool) {
        self.publish(
            task_id,
            TaskEvent::StatusUpdate {
                task_id: task_id.to_string(),
                status,
                is_final,
            },
        )
        .await;
    }

    /// Publish an artifact attachment
    pub async fn artifact_update(&self, task_id: &str, artifact: Artifact) {
        self.publish(
            task_id,
            TaskEvent::ArtifactUpdate {
                task_id: task_id.to_string(),
                artifact,
            },
        )
        .await;
    }

    /// Publish the terminal task snapshot and retire the topic
    pub async fn task_complete(&self, task_id: &str, task: Task) {
        self.publish(
            task_id,
            TaskEvent::TaskComplete {
                task_id: task_id.to_string(),
                task,
            },
        )
        .await;
    }
}
