//! Job record and its status state machine.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of status transitions kept on a job.
const MAX_TRANSITIONS: usize = 200;

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job was just created.
    Created,
    /// No worker could take the job when it was last offered.
    Unavailable,
    /// Job is waiting in the process queue.
    InQueue,
    /// A worker owns the job and is running it.
    Processing,
    /// Provider and every publisher succeeded.
    Completed,
    /// Some stage of the pipeline failed.
    Failed,
}

impl JobStatus {
    /// Check if this status allows transitioning to another status.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, target),
            (Created | Unavailable | InQueue, Processing)
                | (Created | Unavailable, InQueue)
                | (Created | InQueue, Unavailable)
                | (Processing, Completed | Failed)
                | (Completed | Failed, InQueue)
        )
    }

    /// Unprocessed statuses trigger a process event when entered.
    pub fn is_unprocessed(&self) -> bool {
        matches!(self, Self::Created | Self::Unavailable | Self::InQueue)
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Unavailable => "unavailable",
            Self::InQueue => "in_queue",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A status transition event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: JobStatus,
    pub to: JobStatus,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// A unit of work and its outcome.
///
/// `uuid`, `payload` and `provider_payload` are fixed at creation. The
/// outcome fields are written only by the worker that currently owns the
/// job, so the record carries no locking of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    uuid: Uuid,
    /// Parameter map source for providers and publishers (a JSON object).
    payload: String,
    /// What the provider executes, e.g. a command line.
    provider_payload: String,
    /// Registry name of the provider.
    pub provider: String,
    /// Registry names of the publishers, in the order they run.
    pub publishers: Vec<String>,
    pub status: JobStatus,
    /// Append-only audit trail.
    messages: Vec<String>,
    pub result: Option<Vec<u8>>,
    pub success: bool,
    completed: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub transitions: Vec<StatusTransition>,
}

impl Job {
    /// Create a job that runs `provider_payload` on the named provider.
    pub fn new(provider: impl Into<String>, provider_payload: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            payload: String::new(),
            provider_payload: provider_payload.into(),
            provider: provider.into(),
            publishers: Vec::new(),
            status: JobStatus::Created,
            messages: Vec::new(),
            result: None,
            success: false,
            completed: None,
            created: Utc::now(),
            started: None,
            transitions: Vec::new(),
        }
    }

    /// Set the parameter payload.
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Append a publisher to run after a successful provider.
    pub fn with_publisher(mut self, name: impl Into<String>) -> Self {
        self.publishers.push(name.into());
        self
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn provider_payload(&self) -> &str {
        &self.provider_payload
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// The most recent message, if any.
    pub fn last_message(&self) -> Option<&str> {
        self.messages.last().map(String::as_str)
    }

    pub fn completed(&self) -> Option<DateTime<Utc>> {
        self.completed
    }

    /// Append an informational message.
    pub fn add_message(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(job_id = %self.uuid, "{}", message);
        self.messages.push(message);
    }

    /// Append a message describing a failure.
    pub fn add_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(job_id = %self.uuid, "{}", message);
        self.messages.push(message);
    }

    /// Stamp the end of provider execution. Exactly once per run.
    pub fn mark_completed(&mut self) {
        debug_assert!(
            self.completed.is_none(),
            "job {} completion time stamped twice",
            self.uuid
        );
        if self.completed.is_some() {
            tracing::warn!(job_id = %self.uuid, "Completion time stamped twice");
        }
        self.completed = Some(Utc::now());
    }

    /// Parse the payload into a parameter map.
    ///
    /// The payload is a JSON object. Non-string scalar values are kept in
    /// their JSON text form; nulls are dropped. An empty payload is an
    /// empty map.
    pub fn parameters(&self) -> Result<HashMap<String, String>, serde_json::Error> {
        if self.payload.trim().is_empty() {
            return Ok(HashMap::new());
        }
        let raw: HashMap<String, serde_json::Value> = serde_json::from_str(&self.payload)?;
        Ok(raw
            .into_iter()
            .filter_map(|(key, value)| match value {
                serde_json::Value::Null => None,
                serde_json::Value::String(s) => Some((key, s)),
                other => Some((key, other.to_string())),
            })
            .collect())
    }

    /// Transition to a new status.
    pub fn transition_to(
        &mut self,
        new_status: JobStatus,
        reason: Option<String>,
    ) -> Result<(), String> {
        if !self.status.can_transition_to(new_status) {
            return Err(format!(
                "Cannot transition from {} to {}",
                self.status, new_status
            ));
        }

        self.transitions.push(StatusTransition {
            from: self.status,
            to: new_status,
            timestamp: Utc::now(),
            reason,
        });
        if self.transitions.len() > MAX_TRANSITIONS {
            let drain_count = self.transitions.len() - MAX_TRANSITIONS;
            self.transitions.drain(..drain_count);
        }

        self.status = new_status;
        if new_status == JobStatus::Processing {
            self.started = Some(Utc::now());
        }

        Ok(())
    }

    /// Clear the outcome of a previous run so the job can be processed again.
    pub(crate) fn reset_outcome(&mut self) {
        self.result = None;
        self.success = false;
        self.completed = None;
        self.started = None;
    }
}
