//! Per-event worker execution.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use uuid::Uuid;

use crate::job::{Job, JobStatus};
use crate::provider::Provider;
use crate::registry::PluginRegistry;
use crate::worker::event::{JobActivity, JobProcessEvent};
use crate::worker::store::JobStore;

/// Providers currently running, by job, for the cancellation path.
pub type InFlight = RwLock<HashMap<Uuid, Arc<dyn Provider>>>;

/// How far a job got through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Provider and every publisher succeeded.
    Completed,
    /// The provider could not be resolved or rejected the job's parameters.
    ProviderRejected,
    /// The provider ran and reported failure; no publisher ran.
    ProviderFailed,
    /// The provider succeeded but these publishers failed.
    PublisherFailed { publishers: Vec<String> },
}

impl PipelineOutcome {
    /// Final status recorded on the job.
    pub fn status(&self) -> JobStatus {
        match self {
            Self::Completed => JobStatus::Completed,
            _ => JobStatus::Failed,
        }
    }
}

impl std::fmt::Display for PipelineOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::ProviderRejected => write!(f, "provider rejected the job"),
            Self::ProviderFailed => write!(f, "provider failed"),
            Self::PublisherFailed { publishers } => {
                write!(f, "publisher failed: {}", publishers.join(", "))
            }
        }
    }
}

/// Shared dependencies for worker execution.
#[derive(Clone)]
pub struct WorkerDeps {
    pub registry: Arc<PluginRegistry>,
    pub store: Arc<JobStore>,
    pub in_flight: Arc<InFlight>,
    pub activity_tx: broadcast::Sender<JobActivity>,
}

/// Drives jobs through provider execution and publication.
pub struct Worker {
    id: usize,
    deps: WorkerDeps,
}

impl Worker {
    /// Create a new worker.
    pub fn new(id: usize, deps: WorkerDeps) -> Self {
        Self { id, deps }
    }

    fn emit(&self, activity: JobActivity) {
        // No subscribers is fine.
        let _ = self.deps.activity_tx.send(activity);
    }

    /// Consume process events until the queue closes.
    pub async fn run(self, events: Arc<Mutex<mpsc::Receiver<JobProcessEvent>>>) {
        tracing::debug!(worker = self.id, "Worker started");

        loop {
            // Hold the receiver only while waiting so other workers can take
            // the next event as soon as this one is handed out.
            let event = events.lock().await.recv().await;
            let Some(event) = event else {
                break;
            };
            self.handle(event).await;
        }

        tracing::debug!(worker = self.id, "Worker stopped");
    }

    /// Handle one process event end to end.
    pub async fn handle(&self, event: JobProcessEvent) {
        let job_id = event.job_id;
        let mut job = match self.deps.store.checkout(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::debug!(worker = self.id, job_id = %job_id, "Job already owned or processed, skipping");
                return;
            }
            Err(e) => {
                tracing::warn!(worker = self.id, job_id = %job_id, error = %e, "Dropping process event");
                return;
            }
        };

        tracing::info!(worker = self.id, job_id = %job_id, provider = %job.provider, "Processing job");
        let outcome = self.run_job(&mut job).await;
        let status = job.status;
        self.deps.store.checkin(job).await;

        tracing::info!(worker = self.id, job_id = %job_id, %outcome, "Job finished");
        self.emit(JobActivity::Finished { job_id, status });
    }

    /// Run the provider, then the publishers if it succeeded, and record
    /// the final status on the job.
    pub async fn run_job(&self, job: &mut Job) -> PipelineOutcome {
        if job.status.is_unprocessed()
            && let Err(e) = job.transition_to(JobStatus::Processing, None)
        {
            tracing::warn!(job_id = %job.uuid(), "{}", e);
        }

        let outcome = self.execute_pipeline(job).await;

        let reason = (outcome != PipelineOutcome::Completed).then(|| outcome.to_string());
        if let Err(e) = job.transition_to(outcome.status(), reason) {
            tracing::warn!(job_id = %job.uuid(), "{}", e);
        }
        outcome
    }

    async fn execute_pipeline(&self, job: &mut Job) -> PipelineOutcome {
        let job_id = job.uuid();

        let Some(mut provider) = self.deps.registry.provider(&job.provider) else {
            job.add_error(format!("Unknown provider: {}", job.provider));
            return PipelineOutcome::ProviderRejected;
        };
        if !provider.initialize(job).await {
            return PipelineOutcome::ProviderRejected;
        }

        let provider: Arc<dyn Provider> = Arc::from(provider);
        self.deps
            .in_flight
            .write()
            .await
            .insert(job_id, Arc::clone(&provider));
        // Registered before checking, so a cancel racing this point is seen
        // either here or by the dispatcher through `in_flight`.
        if self.deps.store.cancel_requested(job_id).await {
            tracing::info!(job_id = %job_id, "Cancel requested before execution");
            provider.cancel().await;
        }
        self.emit(JobActivity::Started {
            job_id,
            provider: provider.name().to_string(),
        });

        let success = provider.process(job).await;

        self.deps.in_flight.write().await.remove(&job_id);
        self.emit(JobActivity::ProviderFinished { job_id, success });

        if !success {
            return PipelineOutcome::ProviderFailed;
        }

        let mut failed = Vec::new();
        for name in job.publishers.clone() {
            let published = self.publish(job, &name).await;
            self.emit(JobActivity::PublisherFinished {
                job_id,
                publisher: name.clone(),
                success: published,
            });
            if !published {
                failed.push(name);
            }
        }

        if failed.is_empty() {
            PipelineOutcome::Completed
        } else {
            PipelineOutcome::PublisherFailed { publishers: failed }
        }
    }

    async fn publish(&self, job: &mut Job, name: &str) -> bool {
        let Some(mut publisher) = self.deps.registry.publisher(name) else {
            job.add_error(format!("Unknown publisher: {name}"));
            return false;
        };
        publisher.initialize(job).await && publisher.publish(job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::Publisher;
    use async_trait::async_trait;

    /// Publisher that always fails after initializing.
    struct FailingPublisher;

    #[async_trait]
    impl Publisher for FailingPublisher {
        fn name(&self) -> &str {
            "failing"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        async fn initialize(&mut self, _job: &mut Job) -> bool {
            true
        }
        async fn publish(&self, job: &mut Job) -> bool {
            job.add_error("Publishing failed");
            false
        }
    }

    /// Publisher that records the order it ran in.
    struct RecordingPublisher(&'static str);

    #[async_trait]
    impl Publisher for RecordingPublisher {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "Records its name"
        }
        async fn initialize(&mut self, _job: &mut Job) -> bool {
            true
        }
        async fn publish(&self, job: &mut Job) -> bool {
            job.add_message(format!("published by {}", self.0));
            true
        }
    }

    fn worker() -> (Worker, broadcast::Receiver<JobActivity>) {
        let mut registry = PluginRegistry::with_builtins();
        registry.register_publisher("failing", || Box::new(FailingPublisher));
        registry.register_publisher("first", || Box::new(RecordingPublisher("first")));
        registry.register_publisher("second", || Box::new(RecordingPublisher("second")));

        let (activity_tx, activity_rx) = broadcast::channel(64);
        let deps = WorkerDeps {
            registry: Arc::new(registry),
            store: Arc::new(JobStore::new()),
            in_flight: Arc::new(InFlight::default()),
            activity_tx,
        };
        (Worker::new(0, deps), activity_rx)
    }

    #[tokio::test]
    async fn test_successful_pipeline() {
        let (worker, _rx) = worker();
        let mut job = Job::new("shell", "echo hello")
            .with_publisher("first")
            .with_publisher("second");

        let outcome = worker.run_job(&mut job).await;

        assert_eq!(outcome, PipelineOutcome::Completed);
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.success);
        assert_eq!(
            job.messages(),
            [
                "Job execution successful",
                "published by first",
                "published by second"
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let (worker, _rx) = worker();
        let mut job = Job::new("docker", "run it");

        let outcome = worker.run_job(&mut job).await;

        assert_eq!(outcome, PipelineOutcome::ProviderRejected);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.last_message(), Some("Unknown provider: docker"));
        assert!(job.completed().is_none());
    }

    #[tokio::test]
    async fn test_initialize_failure_skips_process() {
        let (worker, _rx) = worker();
        let mut job = Job::new("shell", "  ").with_publisher("first");

        let outcome = worker.run_job(&mut job).await;

        assert_eq!(outcome, PipelineOutcome::ProviderRejected);
        assert!(job.completed().is_none(), "process must not run");
        assert!(job.result.is_none());
        assert_eq!(job.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_provider_failure_skips_publishers() {
        let (worker, mut rx) = worker();
        let mut job = Job::new("shell", "false").with_publisher("first");

        let outcome = worker.run_job(&mut job).await;

        assert_eq!(outcome, PipelineOutcome::ProviderFailed);
        assert_eq!(job.status, JobStatus::Failed);
        assert!(!job.messages().iter().any(|m| m.contains("published by")));

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(!events
            .iter()
            .any(|e| matches!(e, JobActivity::PublisherFinished { .. })));
    }

    #[tokio::test]
    async fn test_publisher_failure_keeps_provider_success() {
        let (worker, _rx) = worker();
        let mut job = Job::new("shell", "echo hi")
            .with_publisher("failing")
            .with_publisher("first")
            .with_publisher("nowhere");

        let outcome = worker.run_job(&mut job).await;

        assert_eq!(
            outcome,
            PipelineOutcome::PublisherFailed {
                publishers: vec!["failing".to_string(), "nowhere".to_string()]
            }
        );
        assert!(job.success);
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.messages().iter().any(|m| m == "published by first"));
        assert_eq!(job.last_message(), Some("Unknown publisher: nowhere"));
    }

    #[tokio::test]
    async fn test_handle_skips_owned_job() {
        let (worker, _rx) = worker();
        let job = Job::new("shell", "echo once");
        let id = job.uuid();
        worker.deps.store.insert(job).await.unwrap();
        worker.deps.store.checkout(id).await.unwrap();

        worker.handle(JobProcessEvent::new(id)).await;

        let snapshot = worker.deps.store.get(id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Processing);
        assert!(snapshot.messages().is_empty());
    }

    #[tokio::test]
    async fn test_handle_checks_job_back_in() {
        let (worker, mut rx) = worker();
        let job = Job::new("shell", "echo stored");
        let id = job.uuid();
        worker.deps.store.insert(job).await.unwrap();

        worker.handle(JobProcessEvent::new(id)).await;

        let snapshot = worker.deps.store.get(id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.result.as_deref(), Some(b"stored\n".as_slice()));
        assert!(worker.deps.in_flight.read().await.is_empty());

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        assert_eq!(
            last,
            Some(JobActivity::Finished {
                job_id: id,
                status: JobStatus::Completed
            })
        );
    }
}
