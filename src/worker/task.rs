//! Task worker
//!
//! One loop: pop the next submitted task id, mark it running, dispatch its
//! skill into the core, attach the result (plus an outcome record) as one
//! artifact, and land the task in the state the outcome picked. Events go
//! out on every state change and artifact. Shutdown is cooperative: the
//! in-flight task finishes before the loop exits.

use crate::events::EventBus;
use crate::outcome::{outcome_for, outcome_for_error, SkillOutcome};
use crate::skills::{Skill, SkillCore};
use crate::store::TaskStore;
use crate::types::{Artifact, Part, Task, TaskState};
use crate::Result;
use serde_json::json;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

/// Idle backoff when the queue is empty
const EMPTY_QUEUE_BACKOFF: Duration = Duration::from_millis(500);

/// Queue-draining worker
#[derive(Clone)]
pub struct TaskWorker {
    tasks: TaskStore,
    core: SkillCore,
    events: EventBus,
}

impl TaskWorker {
    /// Create a worker
    pub fn new(tasks: TaskStore, core: SkillCore, events: EventBus) -> Self {
        Self {
            tasks,
            core,
            events,
        }
    }

    /// Run until the shutdown flag flips
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("task worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.tasks.next_submitted().await {
                Ok(Some(task_id)) => {
                    if let Err(err) = self.process(&task_id).await {
                        tracing::error!(task_id, error = %err, "task processing failed");
                    }
                }
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(EMPTY_QUEUE_BACKOFF) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "queue pop failed");
                    tokio::time::sleep(EMPTY_QUEUE_BACKOFF).await;
                }
            }
        }
        tracing::info!("task worker drained, exiting");
    }

    /// Process one task id from the queue
    pub async fn process(&self, task_id: &str) -> Result<()> {
        let Some(task) = self.tasks.get(task_id).await? else {
            tracing::warn!(task_id, "queued task vanished before processing");
            return Ok(());
        };

        // A task canceled while still queued never runs
        let running = match self
            .tasks
            .update_status(task_id, TaskState::Running, None)
            .await
        {
            Ok(task) => task,
            Err(err) => {
                tracing::debug!(task_id, state = ?task.status.state, error = %err, "skipping task");
                return Ok(());
            }
        };
        self.events
            .status_update(task_id, running.status.clone(), false)
            .await;

        let outcome = self.execute(&running).await;
        let final_message = outcome.guidance.clone();
        let final_state = outcome.state;

        let updated = self
            .tasks
            .update_status(task_id, final_state, Some(final_message))
            .await?;
        self.events
            .status_update(task_id, updated.status.clone(), true)
            .await;
        self.events.task_complete(task_id, updated).await;
        Ok(())
    }

    /// Dispatch the task's skill and attach the result artifact
    async fn execute(&self, task: &Task) -> SkillOutcome {
        let skill = match Skill::from_str(&task.skill) {
            Ok(skill) => skill,
            Err(err) => return outcome_for_error(&err),
        };

        match self.core.dispatch(skill, task.params.clone()).await {
            Ok(result) => {
                let outcome = outcome_for(skill, &result);
                let artifact = Artifact {
                    artifact_id: Uuid::new_v4().to_string(),
                    name: Some(format!("{}-result", skill)),
                    parts: vec![
                        Part::Data { data: result },
                        Part::Data {
                            data: json!({ "outcome": outcome }),
                        },
                    ],
                };
                match self.tasks.add_artifact(&task.id, artifact.clone()).await {
                    Ok(_) => self.events.artifact_update(&task.id, artifact).await,
                    Err(err) => {
                        tracing::error!(task_id = %task.id, error = %err, "artifact write failed")
                    }
                }
                outcome
            }
            Err(err) => {
                tracing::warn!(task_id = %task.id, skill = %skill, error = %err, "skill failed");
                outcome_for_error(&err)
            }
        }
    }
}
