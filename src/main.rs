use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use job_runner::publisher::filesystem::PUBLISH_PATH_PARAM;
use job_runner::{Dispatcher, DispatcherConfig, Job, PluginRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = DispatcherConfig::from_env();
    let provider = std::env::var("JOB_RUNNER_PROVIDER").unwrap_or_else(|_| "shell".to_string());
    let publish_path = std::env::var("JOB_RUNNER_PUBLISH_PATH").ok();

    eprintln!("job-runner v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Provider: {}", provider);
    eprintln!("   Workers: {}", config.worker_count);
    match &publish_path {
        Some(path) => eprintln!("   Publishing to: {}", path),
        None => eprintln!("   Publishing: disabled (set JOB_RUNNER_PUBLISH_PATH)"),
    }
    eprintln!("   Reading one command per line from stdin.\n");

    let dispatcher = Arc::new(
        Dispatcher::start(config, PluginRegistry::with_builtins())
            .context("invalid dispatcher configuration")?,
    );

    // Ctrl-C cancels whatever is running; the jobs then finish as failed.
    let jobs = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    {
        let dispatcher = Arc::clone(&dispatcher);
        let jobs = Arc::clone(&jobs);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling running jobs");
                for id in jobs.lock().await.iter().copied() {
                    if let Err(e) = dispatcher.cancel(id).await {
                        tracing::warn!(job_id = %id, error = %e, "Cancel failed");
                    }
                }
            }
        });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let mut job = Job::new(&provider, line);
        if let Some(path) = &publish_path {
            let payload = serde_json::to_string(&HashMap::from([(PUBLISH_PATH_PARAM, path)]))?;
            job = job.with_payload(payload).with_publisher("filesystem");
        }
        let id = dispatcher.submit(job).await?;
        jobs.lock().await.push(id);
    }

    let ids = jobs.lock().await.clone();
    let mut failures = 0;
    for id in ids {
        let job = dispatcher.wait_for(id).await?;
        println!("{} [{}] {}", job.uuid(), job.status, job.provider_payload());
        for message in job.messages() {
            println!("    {}", message);
        }
        if let Some(result) = &job.result
            && publish_path.is_none()
        {
            print!("{}", String::from_utf8_lossy(result));
        }
        if job.status != job_runner::JobStatus::Completed {
            failures += 1;
        }
    }

    dispatcher.shutdown().await;

    if failures > 0 {
        anyhow::bail!("{} job(s) failed", failures);
    }
    Ok(())
}
