//! In-memory job table with single-owner checkout.

use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::DispatchError;
use crate::job::{Job, JobStatus};

struct Entry {
    /// The job itself, or the snapshot taken at checkout while a worker owns it.
    job: Job,
    checked_out: bool,
    /// Set by an external cancel while the job is queued or running;
    /// cleared by a requeue.
    cancel_requested: bool,
}

impl Entry {
    fn new(job: Job) -> Self {
        Self {
            job,
            checked_out: false,
            cancel_requested: false,
        }
    }
}

/// Holds every known job. While a worker has a job checked out, only that
/// worker mutates it; the table keeps a read-only snapshot for queries.
#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<Uuid, Entry>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new job.
    pub async fn insert(&self, job: Job) -> Result<(), DispatchError> {
        let mut jobs = self.jobs.write().await;
        let id = job.uuid();
        if jobs.contains_key(&id) {
            return Err(DispatchError::DuplicateJob { id });
        }
        jobs.insert(id, Entry::new(job));
        Ok(())
    }

    /// Snapshot of a job.
    pub async fn get(&self, id: Uuid) -> Result<Job, DispatchError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .map(|entry| entry.job.clone())
            .ok_or(DispatchError::JobNotFound { id })
    }

    /// Take ownership of an unprocessed job, moving it to Processing.
    ///
    /// Returns `None` if the job is already owned or has nothing to process.
    pub async fn checkout(&self, id: Uuid) -> Result<Option<Job>, DispatchError> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get_mut(&id).ok_or(DispatchError::JobNotFound { id })?;
        if entry.checked_out || !entry.job.status.is_unprocessed() {
            return Ok(None);
        }

        let from = entry.job.status;
        entry
            .job
            .transition_to(JobStatus::Processing, Some("Picked up by worker".to_string()))
            .map_err(|_| DispatchError::InvalidTransition {
                id,
                from,
                to: JobStatus::Processing,
            })?;
        entry.checked_out = true;
        Ok(Some(entry.job.clone()))
    }

    /// Return a job taken with `checkout`.
    pub async fn checkin(&self, job: Job) {
        let mut jobs = self.jobs.write().await;
        let id = job.uuid();
        match jobs.get_mut(&id) {
            Some(entry) => {
                entry.job = job;
                entry.checked_out = false;
            }
            None => {
                tracing::warn!(job_id = %id, "Checked in a job the store did not know");
                jobs.insert(id, Entry::new(job));
            }
        }
    }

    /// Record a cancel for a job that is queued or owned by a worker.
    ///
    /// Returns whether a request is now pending. Idle finished jobs have
    /// nothing to cancel.
    pub async fn request_cancel(&self, id: Uuid) -> Result<bool, DispatchError> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get_mut(&id).ok_or(DispatchError::JobNotFound { id })?;
        if entry.checked_out || entry.job.status.is_unprocessed() {
            entry.cancel_requested = true;
        }
        Ok(entry.cancel_requested)
    }

    /// Whether a cancel has been requested for the job's current run.
    pub async fn cancel_requested(&self, id: Uuid) -> bool {
        self.jobs
            .read()
            .await
            .get(&id)
            .is_some_and(|entry| entry.cancel_requested)
    }

    /// Move an idle job to another status.
    ///
    /// Entering InQueue clears the outcome of the previous run.
    pub async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        reason: Option<String>,
    ) -> Result<(), DispatchError> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get_mut(&id).ok_or(DispatchError::JobNotFound { id })?;
        let from = entry.job.status;
        if entry.checked_out {
            return Err(DispatchError::InvalidTransition {
                id,
                from,
                to: status,
            });
        }

        entry
            .job
            .transition_to(status, reason)
            .map_err(|_| DispatchError::InvalidTransition {
                id,
                from,
                to: status,
            })?;
        if status == JobStatus::InQueue {
            entry.job.reset_outcome();
            entry.cancel_requested = false;
        }
        Ok(())
    }

    /// Number of jobs a worker currently owns.
    pub async fn checked_out_count(&self) -> usize {
        self.jobs
            .read()
            .await
            .values()
            .filter(|entry| entry.checked_out)
            .count()
    }
}
