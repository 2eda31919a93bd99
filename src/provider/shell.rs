//! Shell provider: runs the provider payload as an external process.
//!
//! - One child process per `process` call
//! - stdout and stderr captured in full, drained while the child runs
//! - Non-zero exit is a failure, with stderr standing in for an empty stdout
//! - `cancel` sends a graceful termination to the child's process group,
//!   then kills the group if the child is still alive
//!
//! The payload is split on whitespace with no quoting support, so an
//! argument containing spaces cannot be expressed.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::ExecutionError;
use crate::job::Job;
use crate::provider::Provider;

/// How long a child gets to exit after SIGTERM before it is killed.
const TERMINATION_GRACE: Duration = Duration::from_secs(2);

/// Request from `cancel` to the task awaiting the child; answered with
/// whether the child is confirmed stopped.
type CancelRequest = oneshot::Sender<bool>;

/// Output of a child that ran to exit.
#[derive(Debug)]
struct Captured {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: i32,
}

impl Captured {
    /// The result bytes, plus the abnormal-exit outcome for a non-zero exit.
    ///
    /// The result is stdout, or stderr when the process failed without
    /// writing to stdout.
    fn into_outcome(self) -> (Vec<u8>, Result<(), ExecutionError>) {
        if self.exit_code == 0 {
            return (self.stdout, Ok(()));
        }
        let result = if self.stdout.is_empty() {
            self.stderr
        } else {
            self.stdout
        };
        (
            result,
            Err(ExecutionError::AbnormalExit {
                code: self.exit_code,
            }),
        )
    }
}

/// Cancellation state shared between `process` and `cancel`.
#[derive(Debug, Default)]
struct Supervision {
    /// Set by `cancel`; a child spawned afterwards is stopped immediately.
    cancel_requested: bool,
    /// Control channel into the running `process` call, if any.
    control: Option<mpsc::Sender<CancelRequest>>,
}

/// Executes a command line and captures the output from STDOUT/STDERR.
#[derive(Debug, Default)]
pub struct ShellProvider {
    supervision: Mutex<Supervision>,
}

impl ShellProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the command and supervise it until it exits.
    async fn execute(&self, command_line: &str) -> Result<Captured, ExecutionError> {
        let (program, args) = split_command(command_line).ok_or(ExecutionError::EmptyCommand)?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own group, so termination reaches everything the command starts.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| ExecutionError::Spawn {
            command: program.to_string(),
            source,
        })?;
        let pid = child.id();

        let stdout = child.stdout.take().ok_or_else(|| ExecutionError::Capture {
            stream: "stdout",
            reason: "pipe not available".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| ExecutionError::Capture {
            stream: "stderr",
            reason: "pipe not available".to_string(),
        })?;
        let stdout_task = tokio::spawn(read_stream(stdout));
        let stderr_task = tokio::spawn(read_stream(stderr));

        let (cancel_tx, mut cancel_rx) = mpsc::channel::<CancelRequest>(4);
        let cancel_requested = {
            let mut supervision = self.supervision.lock().await;
            supervision.control = Some(cancel_tx);
            supervision.cancel_requested
        };

        tracing::debug!(pid = ?pid, command = %command_line, "Spawned child process");
        let mut cancelled = cancel_requested;
        if cancel_requested {
            tracing::info!("Cancelled before the child started, stopping it");
            terminate(&mut child, pid).await;
        }

        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                Some(reply) = cancel_rx.recv() => {
                    cancelled = true;
                    let stopped = terminate(&mut child, pid).await;
                    let _ = reply.send(stopped);
                }
            }
        };

        if cancelled {
            // Anything left in the group would hold the output pipes open.
            kill_group(pid);
        }

        // Whoever asks from now on finds nothing running.
        self.supervision.lock().await.control.take();
        cancel_rx.close();
        while let Ok(reply) = cancel_rx.try_recv() {
            let _ = reply.send(true);
        }

        let status = status.map_err(ExecutionError::Wait)?;
        let stdout = join_stream("stdout", stdout_task).await?;
        let stderr = join_stream("stderr", stderr_task).await?;

        tracing::debug!("STDOUT:\n{}", String::from_utf8_lossy(&stdout));
        tracing::debug!("STDERR:\n{}", String::from_utf8_lossy(&stderr));

        Ok(Captured {
            stdout,
            stderr,
            exit_code: exit_code(status),
        })
    }
}

#[async_trait]
impl Provider for ShellProvider {
    fn name(&self) -> &str {
        "Shell"
    }

    fn description(&self) -> &str {
        "Executes a shell command or script and captures the output from STDOUT/STDERR."
    }

    fn result_mime_type(&self) -> &str {
        "text/plain"
    }

    fn result_extension(&self) -> &str {
        "txt"
    }

    async fn initialize(&mut self, job: &mut Job) -> bool {
        *self.supervision.get_mut() = Supervision::default();
        if split_command(job.provider_payload()).is_none() {
            job.add_error("Invalid request. Expected a command in the provider payload.");
            return false;
        }
        true
    }

    async fn process(&self, job: &mut Job) -> bool {
        let outcome = self.execute(job.provider_payload()).await;
        record_outcome(job, outcome)
    }

    async fn cancel(&self) -> bool {
        let control = {
            let mut supervision = self.supervision.lock().await;
            supervision.cancel_requested = true;
            supervision.control.clone()
        };
        let Some(tx) = control else {
            return true;
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if tx.send(reply_tx).await.is_err() {
            // The child exited between the lookup and the send.
            return true;
        }

        // A dropped reply means the supervisor finished waiting on its own.
        reply_rx.await.unwrap_or(true)
    }
}

/// Classify a run and record it on the job: result, completion time,
/// messages and success.
fn record_outcome(job: &mut Job, outcome: Result<Captured, ExecutionError>) -> bool {
    job.success = false;

    let failure = match outcome {
        Ok(captured) => {
            let (result, exit) = captured.into_outcome();
            job.result = Some(result);
            exit.err().map(|e| vec![e.to_string()])
        }
        Err(e) => {
            job.result = Some(Vec::new());
            Some(vec!["Could not execute job.".to_string(), e.to_string()])
        }
    };

    job.mark_completed();

    match failure {
        Some(messages) => {
            for message in messages {
                job.add_error(message);
            }
        }
        None => {
            job.add_message("Job execution successful");
            job.success = true;
        }
    }

    job.success
}

/// Split a command line on whitespace into program and arguments.
fn split_command(command_line: &str) -> Option<(&str, impl Iterator<Item = &str>)> {
    let mut parts = command_line.split_whitespace();
    let program = parts.next()?;
    Some((program, parts))
}

async fn read_stream<R: AsyncRead + Unpin>(mut reader: R) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(buf)
}

async fn join_stream(
    stream: &'static str,
    task: JoinHandle<std::io::Result<Vec<u8>>>,
) -> Result<Vec<u8>, ExecutionError> {
    task.await
        .map_err(|e| ExecutionError::Capture {
            stream,
            reason: e.to_string(),
        })?
        .map_err(|e| ExecutionError::Capture {
            stream,
            reason: e.to_string(),
        })
}

/// Graceful termination, escalating to a kill if the child outlives the
/// grace period.
async fn terminate(child: &mut Child, pid: Option<u32>) -> bool {
    request_termination(child, pid);

    match tokio::time::timeout(TERMINATION_GRACE, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::info!(exit_code = exit_code(status), "Child process stopped");
            return true;
        }
        Ok(Err(e)) => tracing::warn!(error = %e, "Failed to wait for child after termination request"),
        Err(_) => tracing::debug!(pid = ?pid, "Child ignored termination request, killing"),
    }

    force_kill(child, pid);

    match child.wait().await {
        Ok(status) => {
            tracing::info!(exit_code = exit_code(status), "Child process killed");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Could not confirm child process stopped");
            false
        }
    }
}

#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: nix::sys::signal::Signal) {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Some(pid) = pid else {
        return;
    };
    match killpg(Pid::from_raw(pid as i32), signal) {
        // The group is already gone.
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pid, ?signal, error = %e, "Failed to signal process group"),
    }
}

#[cfg(unix)]
fn request_termination(_child: &mut Child, pid: Option<u32>) {
    signal_group(pid, nix::sys::signal::Signal::SIGTERM);
}

#[cfg(unix)]
fn force_kill(child: &mut Child, pid: Option<u32>) {
    signal_group(pid, nix::sys::signal::Signal::SIGKILL);
    if let Err(e) = child.start_kill() {
        tracing::warn!(error = %e, "Failed to kill child process");
    }
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    signal_group(pid, nix::sys::signal::Signal::SIGKILL);
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child, _pid: Option<u32>) {
    if let Err(e) = child.start_kill() {
        tracing::warn!(error = %e, "Failed to terminate child process");
    }
}

#[cfg(not(unix))]
fn force_kill(child: &mut Child, pid: Option<u32>) {
    request_termination(child, pid);
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}

/// Exit code, with signal deaths reported as `128 + signal`.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
