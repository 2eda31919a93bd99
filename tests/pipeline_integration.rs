//! End-to-end tests for the job pipeline.
//!
//! Each test starts a real `Dispatcher` with the built-in shell provider and
//! file system publisher, submits jobs, and checks the recorded outcome.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;
use tokio::time::timeout;

use job_runner::{Dispatcher, DispatcherConfig, Job, JobActivity, JobStatus, PluginRegistry};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

fn start_dispatcher() -> Dispatcher {
    let config = DispatcherConfig {
        worker_count: 2,
        ..Default::default()
    };
    Dispatcher::start(config, PluginRegistry::with_builtins()).unwrap()
}

/// Helper: a shell job publishing to `dir`.
fn publishing_job(command: &str, dir: &Path) -> Job {
    let params = HashMap::from([("publishPath", dir.to_str().unwrap())]);
    Job::new("shell", command)
        .with_payload(serde_json::to_string(&params).unwrap())
        .with_publisher("filesystem")
}

async fn run(dispatcher: &Dispatcher, job: Job) -> Job {
    let id = dispatcher.submit(job).await.unwrap();
    timeout(TEST_TIMEOUT, dispatcher.wait_for(id))
        .await
        .expect("test timed out")
        .unwrap()
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn echo_hello_succeeds() {
    let dispatcher = start_dispatcher();

    let job = run(&dispatcher, Job::new("shell", "echo hello")).await;

    assert!(job.success);
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result.as_deref(), Some(b"hello\n".as_slice()));
    assert!(job.completed().is_some());
    assert_eq!(job.last_message(), Some("Job execution successful"));
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn false_fails_with_exit_code() {
    let dispatcher = start_dispatcher();

    let job = run(&dispatcher, Job::new("shell", "false")).await;

    assert!(!job.success);
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.result.as_deref(), Some(b"".as_slice()));
    assert!(job.messages().iter().any(|m| m.contains("Exit code: 1")));
    dispatcher.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn read_only_publish_path_fails_publisher_only() {
    use std::os::unix::fs::PermissionsExt;

    let dispatcher = start_dispatcher();
    let dir = TempDir::new().unwrap();
    std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o555)).unwrap();

    let job = run(&dispatcher, publishing_job("echo hello", dir.path())).await;
    std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o755)).unwrap();

    assert!(job.success, "provider success is not rewritten by the publisher");
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        job.messages(),
        [
            "Job execution successful",
            "Cannot write to the specified publishPath."
        ]
    );
    let reason = job.transitions.last().unwrap().reason.clone().unwrap();
    assert!(reason.contains("filesystem"));
    dispatcher.shutdown().await;
}

// ── Publication ─────────────────────────────────────────────────────

#[tokio::test]
async fn result_is_published_under_job_uuid() {
    let dispatcher = start_dispatcher();
    let dir = TempDir::new().unwrap();

    let job = run(&dispatcher, publishing_job("printf abc", dir.path())).await;

    assert_eq!(job.status, JobStatus::Completed);
    let report = dir.path().join(job.uuid().to_string());
    assert_eq!(std::fs::read(&report).unwrap(), b"abc");
    assert_eq!(
        job.last_message().unwrap(),
        format!("Report written to: {}", report.display())
    );
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn failed_provider_is_never_published() {
    let dispatcher = start_dispatcher();
    let dir = TempDir::new().unwrap();

    let job = run(&dispatcher, publishing_job("false", dir.path())).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(!dir.path().join(job.uuid().to_string()).exists());
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn missing_publish_path_is_reported_before_permissions() {
    let dispatcher = start_dispatcher();
    let dir = TempDir::new().unwrap();

    let job = run(
        &dispatcher,
        publishing_job("echo hi", &dir.path().join("absent")),
    )
    .await;

    assert!(job.success);
    assert_eq!(
        job.last_message(),
        Some("Specified publishPath does not exist.")
    );
    dispatcher.shutdown().await;
}

// ── Completion stamping ─────────────────────────────────────────────

/// The stamp falls inside the run: after it started, before it finished.
fn assert_stamped_within_run(job: &Job, label: &str) {
    let completed = job
        .completed()
        .unwrap_or_else(|| panic!("{label}: completed not stamped"));
    let started = job.started.unwrap();
    let finished = job.transitions.last().unwrap().timestamp;
    assert!(completed >= started, "{label}");
    assert!(completed <= finished, "{label}");
}

#[tokio::test]
async fn completed_is_stamped_on_every_branch() {
    let dispatcher = start_dispatcher();

    // A second stamp in a run trips a debug assertion in the worker, which
    // would leave the job unfinished and time out here.
    for command in ["echo ok", "false", "/no/such/program", "ls /no/such/dir"] {
        let job = run(&dispatcher, Job::new("shell", command)).await;
        assert_stamped_within_run(&job, command);
    }

    // Interrupted run.
    let mut rx = dispatcher.subscribe();
    let id = dispatcher
        .submit(Job::new("shell", "sleep 30"))
        .await
        .unwrap();
    timeout(TEST_TIMEOUT, async {
        loop {
            if let Ok(JobActivity::Started { job_id, .. }) = rx.recv().await
                && job_id == id
            {
                break;
            }
        }
    })
    .await
    .expect("job never started");
    assert!(dispatcher.cancel(id).await.unwrap());
    let job = timeout(TEST_TIMEOUT, dispatcher.wait_for(id))
        .await
        .expect("test timed out")
        .unwrap();
    assert_stamped_within_run(&job, "cancelled");

    // A requeued run gets a fresh stamp.
    let first = run(&dispatcher, Job::new("shell", "echo twice")).await;
    let first_stamp = first.completed().unwrap();
    dispatcher.requeue(first.uuid()).await.unwrap();
    let second = timeout(TEST_TIMEOUT, dispatcher.wait_for(first.uuid()))
        .await
        .expect("test timed out")
        .unwrap();
    assert_stamped_within_run(&second, "requeued");
    assert!(second.completed().unwrap() > first_stamp);

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn cancelled_job_resolves_as_abnormal_exit() {
    let dispatcher = start_dispatcher();
    let mut rx = dispatcher.subscribe();
    let id = dispatcher
        .submit(Job::new("shell", "sleep 60"))
        .await
        .unwrap();

    timeout(TEST_TIMEOUT, async {
        loop {
            if let Ok(JobActivity::Started { job_id, .. }) = rx.recv().await
                && job_id == id
            {
                break;
            }
        }
    })
    .await
    .expect("job never started");

    assert!(dispatcher.cancel(id).await.unwrap());
    assert!(dispatcher.cancel(id).await.unwrap());

    let job = timeout(TEST_TIMEOUT, dispatcher.wait_for(id))
        .await
        .expect("test timed out")
        .unwrap();
    assert!(!job.success);
    assert!(job.completed().is_some());
    assert!(
        job.messages()
            .iter()
            .any(|m| m.starts_with("Job terminated abnormally. Exit code: "))
    );
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn worker_keeps_serving_after_failures() {
    let dispatcher = start_dispatcher();

    let failed = run(&dispatcher, Job::new("nope", "echo hi")).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.last_message(), Some("Unknown provider: nope"));

    let ok = run(&dispatcher, Job::new("shell", "echo still here")).await;
    assert_eq!(ok.status, JobStatus::Completed);
    assert_eq!(ok.result.as_deref(), Some(b"still here\n".as_slice()));
    dispatcher.shutdown().await;
}
