//! Supervised update worker
//!
//! Ingestion triggered over HTTP is not fire-and-forget: requests enqueue a
//! job onto a bounded queue and immediately receive a run id. A single
//! worker task drains the queue, so at most one pipeline run is in flight -
//! the database side of an import is single-writer by design. Job states
//! live in an in-process registry; durable outcome still lands in the
//! `data_versions` table.

use crate::error::{PipelineError, Result};
use crate::services::Pipeline;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info};
use uuid::Uuid;

/// Queued-but-not-started jobs the queue will hold before rejecting.
const QUEUE_CAPACITY: usize = 8;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRequest {
    /// Target release (`YYYY-MM`); latest when omitted.
    pub release: Option<String>,
    /// Re-import even when the registry shows the release completed.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub run_id: Uuid,
    pub release: Option<String>,
    pub state: JobState,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

struct UpdateJob {
    run_id: Uuid,
    request: UpdateRequest,
}

/// Handle for enqueuing pipeline runs and inspecting their state.
#[derive(Clone)]
pub struct UpdateWorker {
    queue: mpsc::Sender<UpdateJob>,
    jobs: Arc<RwLock<HashMap<Uuid, JobInfo>>>,
}

impl UpdateWorker {
    /// Spawn the worker task draining the queue sequentially.
    pub fn spawn(pipeline: Arc<Pipeline>) -> Self {
        let (queue, mut rx) = mpsc::channel::<UpdateJob>(QUEUE_CAPACITY);
        let jobs: Arc<RwLock<HashMap<Uuid, JobInfo>>> = Arc::new(RwLock::new(HashMap::new()));

        let registry = Arc::clone(&jobs);
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if let Some(info) = registry.write().await.get_mut(&job.run_id) {
                    info.state = JobState::Running;
                }
                info!(run_id = %job.run_id, release = ?job.request.release, "Update job started");

                let outcome = pipeline
                    .run(job.request.release.as_deref(), job.request.force)
                    .await;

                let mut guard = registry.write().await;
                let Some(info) = guard.get_mut(&job.run_id) else {
                    continue;
                };
                info.finished_at = Some(Utc::now());
                match outcome {
                    Ok(release) => {
                        info.state = JobState::Completed;
                        info.release = Some(release);
                    }
                    Err(err) => {
                        error!(run_id = %job.run_id, error = %err, "Update job failed");
                        info.state = JobState::Failed;
                        info.error = Some(err.to_string());
                    }
                }
            }
        });

        Self { queue, jobs }
    }

    /// Enqueue a run; returns its registry entry with a fresh run id.
    pub async fn enqueue(&self, request: UpdateRequest) -> Result<JobInfo> {
        let run_id = Uuid::new_v4();
        let info = JobInfo {
            run_id,
            release: request.release.clone(),
            state: JobState::Queued,
            submitted_at: Utc::now(),
            finished_at: None,
            error: None,
        };
        self.jobs.write().await.insert(run_id, info.clone());

        if self.queue.try_send(UpdateJob { run_id, request }).is_err() {
            self.jobs.write().await.remove(&run_id);
            return Err(PipelineError::Internal(
                "update queue is full, try again later".to_string(),
            ));
        }
        info!(run_id = %run_id, "Update job enqueued");
        Ok(info)
    }

    pub async fn job(&self, run_id: Uuid) -> Option<JobInfo> {
        self.jobs.read().await.get(&run_id).cloned()
    }
}
