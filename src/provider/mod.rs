//! Providers execute a job's payload and produce its result buffer.

pub mod shell;

pub use shell::ShellProvider;

use async_trait::async_trait;

use crate::job::Job;

/// Capability contract every provider implements.
///
/// An instance serves a single job: the worker calls `initialize` while it
/// still owns the instance exclusively, then shares it so that a control
/// path can call `cancel` while `process` is running.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Get a human-readable description.
    fn description(&self) -> &str;

    /// MIME type of the result buffer.
    fn result_mime_type(&self) -> &str;

    /// File extension suggested for the result buffer.
    fn result_extension(&self) -> &str;

    /// Validate job-specific parameters.
    ///
    /// Returns false after appending an explanatory message to the job;
    /// `process` must not be called in that case.
    async fn initialize(&mut self, job: &mut Job) -> bool;

    /// Run the job.
    ///
    /// Sets `job.result` and `job.success`, appends at least one message and
    /// stamps `job.completed` on every path. Returns the success flag.
    async fn process(&self, job: &mut Job) -> bool;

    /// Request early termination of in-flight work.
    ///
    /// Idempotent. Returns true once nothing is running any more.
    async fn cancel(&self) -> bool;
}
