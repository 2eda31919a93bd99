//! Job dispatcher — process event queue, worker pool, and cancellation.
//!
//! The dispatcher provides:
//! - `submit()` / `update_status()` — store a job and emit a process event
//!   whenever it enters an unprocessed status
//! - a fixed pool of workers, each handling one event end to end
//! - `cancel()` — the control path into a running provider
//! - `subscribe()` / `wait_for()` — observe jobs as they finish

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::DispatcherConfig;
use crate::error::{ConfigError, DispatchError};
use crate::job::{Job, JobStatus};
use crate::registry::PluginRegistry;
use crate::worker::event::{JobActivity, JobProcessEvent};
use crate::worker::store::JobStore;
use crate::worker::worker::{InFlight, Worker, WorkerDeps};

/// Capacity of the activity broadcast channel.
const ACTIVITY_CAPACITY: usize = 1024;

/// Accepts jobs and feeds them to a pool of workers.
pub struct Dispatcher {
    config: DispatcherConfig,
    store: Arc<JobStore>,
    in_flight: Arc<InFlight>,
    activity_tx: broadcast::Sender<JobActivity>,
    /// Dropped on shutdown so workers drain the queue and exit.
    events_tx: Mutex<Option<mpsc::Sender<JobProcessEvent>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Validate the configuration and spawn the worker pool.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: DispatcherConfig, registry: PluginRegistry) -> Result<Self, ConfigError> {
        config.validate()?;

        let (events_tx, events_rx) = mpsc::channel(config.queue_capacity);
        let events_rx = Arc::new(Mutex::new(events_rx));
        let (activity_tx, _) = broadcast::channel(ACTIVITY_CAPACITY);

        let deps = WorkerDeps {
            registry: Arc::new(registry),
            store: Arc::new(JobStore::new()),
            in_flight: Arc::new(InFlight::default()),
            activity_tx: activity_tx.clone(),
        };

        let workers: Vec<JoinHandle<()>> = (0..config.worker_count)
            .map(|id| {
                let worker = Worker::new(id, deps.clone());
                tokio::spawn(worker.run(Arc::clone(&events_rx)))
            })
            .collect();

        tracing::info!(
            workers = config.worker_count,
            queue_capacity = config.queue_capacity,
            "Dispatcher started"
        );

        Ok(Self {
            config,
            store: deps.store,
            in_flight: deps.in_flight,
            activity_tx,
            events_tx: Mutex::new(Some(events_tx)),
            workers: Mutex::new(workers),
        })
    }

    /// Store a new job and schedule it for processing.
    ///
    /// Jobs naming no publishers get the configured default publishers.
    pub async fn submit(&self, mut job: Job) -> Result<Uuid, DispatchError> {
        let id = job.uuid();
        if !job.status.is_unprocessed() {
            return Err(DispatchError::InvalidTransition {
                id,
                from: job.status,
                to: JobStatus::InQueue,
            });
        }
        if job.publishers.is_empty() {
            job.publishers = self.config.default_publishers.clone();
        }

        self.store.insert(job).await?;
        tracing::debug!(job_id = %id, "Job submitted");
        self.emit(id).await?;
        Ok(id)
    }

    /// Move an idle job to a new status, scheduling it if that status is
    /// unprocessed.
    pub async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        reason: Option<String>,
    ) -> Result<(), DispatchError> {
        self.store.update_status(id, status, reason).await?;
        if status.is_unprocessed() {
            self.emit(id).await?;
        }
        Ok(())
    }

    /// Put a finished job back in the queue for another run.
    pub async fn requeue(&self, id: Uuid) -> Result<(), DispatchError> {
        self.update_status(id, JobStatus::InQueue, Some("Requeued".to_string()))
            .await
    }

    /// Cancel a job's run.
    ///
    /// A queued job or one whose provider is still initializing keeps the
    /// request and is stopped before its provider does any work. A running
    /// provider is cancelled directly. Returns true once nothing will run,
    /// including when the job had already finished.
    pub async fn cancel(&self, id: Uuid) -> Result<bool, DispatchError> {
        // Recorded before the in-flight lookup; the worker checks in the
        // opposite order.
        let pending = self.store.request_cancel(id).await?;
        if pending {
            tracing::info!(job_id = %id, "Cancel requested");
        }

        let provider = self.in_flight.read().await.get(&id).cloned();
        let Some(provider) = provider else {
            return Ok(true);
        };

        tracing::info!(job_id = %id, provider = provider.name(), "Cancelling job");
        let stopped = provider.cancel().await;
        if !stopped {
            tracing::warn!(job_id = %id, "Provider could not confirm cancellation");
        }
        Ok(stopped)
    }

    /// Snapshot of a job.
    pub async fn job(&self, id: Uuid) -> Result<Job, DispatchError> {
        self.store.get(id).await
    }

    /// Subscribe to job activity.
    pub fn subscribe(&self) -> broadcast::Receiver<JobActivity> {
        self.activity_tx.subscribe()
    }

    /// Wait until a job has been released by its worker with a final status.
    pub async fn wait_for(&self, id: Uuid) -> Result<Job, DispatchError> {
        let mut rx = self.subscribe();
        loop {
            let job = self.store.get(id).await?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            match rx.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Err(DispatchError::QueueClosed),
            }
        }
    }

    /// Number of jobs currently owned by a worker.
    pub async fn running_count(&self) -> usize {
        self.store.checked_out_count().await
    }

    /// Stop accepting events, let workers finish what is queued, and join them.
    pub async fn shutdown(&self) {
        self.events_tx.lock().await.take();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for result in join_all(workers).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Worker task failed");
            }
        }
        tracing::info!("Dispatcher stopped");
    }

    async fn emit(&self, id: Uuid) -> Result<(), DispatchError> {
        let tx = self
            .events_tx
            .lock()
            .await
            .clone()
            .ok_or(DispatchError::QueueClosed)?;
        tx.send(JobProcessEvent::new(id))
            .await
            .map_err(|_| DispatchError::QueueClosed)?;
        // No subscribers is fine.
        let _ = self.activity_tx.send(JobActivity::Queued { job_id: id });
        Ok(())
    }
}
