//! Publishers deliver a provider's result buffer to a destination.

pub mod filesystem;

pub use filesystem::FileSystemPublisher;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::job::Job;

/// Capability contract every publisher implements.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Get the publisher name.
    fn name(&self) -> &str;

    /// Get a human-readable description.
    fn description(&self) -> &str;

    /// Validate publisher-specific parameters from the job payload.
    ///
    /// Returns false after appending an explanatory message to the job.
    async fn initialize(&mut self, job: &mut Job) -> bool;

    /// Deliver `job.result`.
    ///
    /// Every failure is recorded as a job message and returned as false.
    async fn publish(&self, job: &mut Job) -> bool;
}

/// Extract the parameter map of a job, or record why it could not be read.
pub(crate) fn job_parameters(job: &mut Job) -> Option<HashMap<String, String>> {
    match job.parameters() {
        Ok(params) => Some(params),
        Err(e) => {
            job.add_error(format!(
                "Invalid request. Payload is not a valid parameter map: {e}"
            ));
            None
        }
    }
}

/// Look up a required, non-blank parameter, recording a message if absent.
pub(crate) fn require_param(
    job: &mut Job,
    params: &HashMap<String, String>,
    key: &str,
) -> Option<String> {
    match params.get(key).map(|v| v.trim()) {
        Some(value) if !value.is_empty() => Some(value.to_string()),
        _ => {
            job.add_error(format!("Invalid request. Expected parameter: [{key}]"));
            None
        }
    }
}
