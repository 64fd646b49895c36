//! Background job registry.
//!
//! `submit` records a `pending` job, spawns the work and returns the task id
//! at once. The spawned task moves the job through `in_progress` to
//! `completed` or `failed`; a panic in the work counts as a failure. Each
//! transition replaces the record under the write lock, so a reader sees a
//! whole record from before or after a transition, never a mix.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Forward-only: `pending -> in_progress -> completed | failed`, plus
    /// `pending -> failed` for work that never starts. No self-transitions.
    pub fn can_transition_to(&self, next: &JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::Pending, Self::Failed)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub task_id: String,
    /// What the job runs, e.g. `extraction:proj-1`.
    pub label: String,
    pub status: JobStatus,
    /// Summary on success, error message on failure.
    pub result: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

type Registry = Arc<RwLock<HashMap<String, JobRecord>>>;

#[derive(Clone, Default)]
pub struct JobOrchestrator {
    registry: Registry,
}

impl JobOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending job and run `work` in the background.
    pub async fn submit<F, Fut>(&self, label: impl Into<String>, work: F) -> String
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        let task_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let record = JobRecord {
            task_id: task_id.clone(),
            label: label.into(),
            status: JobStatus::Pending,
            result: None,
            submitted_at: now,
            updated_at: now,
        };
        info!(task_id = task_id.as_str(), label = record.label.as_str(), "Job submitted");
        self.registry.write().await.insert(task_id.clone(), record);

        let registry = self.registry.clone();
        let id = task_id.clone();
        tokio::spawn(async move {
            transition(&registry, &id, JobStatus::InProgress, None).await;

            let outcome = tokio::spawn(async move { work().await }).await;
            match outcome {
                Ok(Ok(summary)) => {
                    transition(&registry, &id, JobStatus::Completed, Some(summary)).await;
                }
                Ok(Err(e)) => {
                    error!(task_id = id.as_str(), error = %e, "Job failed");
                    transition(&registry, &id, JobStatus::Failed, Some(format!("{e:#}"))).await;
                }
                Err(join_error) => {
                    let message = if join_error.is_panic() {
                        "job panicked".to_string()
                    } else {
                        format!("job aborted: {join_error}")
                    };
                    error!(task_id = id.as_str(), "{message}");
                    transition(&registry, &id, JobStatus::Failed, Some(message)).await;
                }
            }
        });

        task_id
    }

    /// Snapshot of a job. Unknown ids return `None` and are never registered.
    pub async fn status(&self, task_id: &str) -> Option<JobRecord> {
        self.registry.read().await.get(task_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.registry.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.registry.read().await.is_empty()
    }

    /// Poll until the job is terminal or `timeout` elapses; returns the last snapshot.
    pub async fn wait(&self, task_id: &str, timeout: Duration) -> Option<JobRecord> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let record = self.status(task_id).await?;
            if record.status.is_terminal() || tokio::time::Instant::now() >= deadline {
                return Some(record);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn transition(registry: &Registry, task_id: &str, next: JobStatus, result: Option<String>) {
    let mut jobs = registry.write().await;
    let Some(current) = jobs.get(task_id) else {
        warn!(task_id, "Transition for unknown job");
        return;
    };
    if !current.status.can_transition_to(&next) {
        warn!(task_id, from = %current.status, to = %next, "Rejected job transition");
        return;
    }
    let updated = JobRecord {
        status: next,
        result,
        updated_at: Utc::now(),
        ..current.clone()
    };
    info!(task_id, status = %next, "Job status changed");
    jobs.insert(task_id.to_string(), updated);
}
