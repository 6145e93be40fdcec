//! Async task tracking
//!
//! Instance creation and deletion are long-running director-side tasks.
//! [`TaskTracker::remaining_seconds`] sizes the orchestrator's wait hint
//! from the director's own estimate and falls back to a caller-supplied
//! default on any probe failure, so a transient status error can never
//! stall the workflow. [`TaskTracker::poll_until_terminal`] is a blocking
//! convenience for interactive callers and is never used on the resumable
//! workflow path.

use crate::director::{DirectorApi, TaskStatus};
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;

pub struct TaskTracker {
    api: Arc<dyn DirectorApi>,
    org_id: String,
}

/// Terminal disposition of a long-running task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Finished,
    Failed,
    Canceled,
}

impl TaskTracker {
    pub fn new(api: Arc<dyn DirectorApi>, org_id: impl Into<String>) -> Self {
        Self {
            api,
            org_id: org_id.into(),
        }
    }

    /// Estimated seconds until the task completes, or `fallback` when the
    /// estimate is unavailable for any reason.
    pub async fn remaining_seconds(&self, task_id: &str, fallback: u64) -> u64 {
        match self.api.get_task(&self.org_id, task_id).await {
            Ok(task) => task
                .estimated_remaining_minutes
                .map(|minutes| minutes * 60)
                .unwrap_or(fallback),
            Err(e) => {
                tracing::debug!("task {} status probe failed: {}", task_id, e);
                fallback
            }
        }
    }

    /// Poll the task until it reaches a terminal status. Interactive use
    /// only.
    pub async fn poll_until_terminal(
        &self,
        task_id: &str,
        interval: Duration,
    ) -> Result<TaskOutcome> {
        tracing::info!(
            "waiting for task {}, checking every {}s",
            task_id,
            interval.as_secs()
        );

        loop {
            match self.api.get_task(&self.org_id, task_id).await {
                Ok(task) => match task.status {
                    TaskStatus::Finished => {
                        tracing::info!("task {} finished", task_id);
                        return Ok(TaskOutcome::Finished);
                    }
                    TaskStatus::Failed => {
                        tracing::warn!("task {} failed", task_id);
                        return Ok(TaskOutcome::Failed);
                    }
                    TaskStatus::Canceled => {
                        tracing::warn!("task {} cancelled", task_id);
                        return Ok(TaskOutcome::Canceled);
                    }
                    _ => {
                        if let Some(minutes) = task.estimated_remaining_minutes {
                            tracing::info!("task {}: ~{} minutes remaining", task_id, minutes);
                        }
                    }
                },
                Err(e) => {
                    tracing::debug!("task {} status probe failed: {}", task_id, e);
                }
            }

            tokio::time::sleep(interval).await;
        }
    }
}
