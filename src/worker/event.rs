//! Process events and the activity stream emitted while jobs run.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::JobStatus;

/// Raised when an unprocessed job (Created, Unavailable, or InQueue) is
/// scheduled to be processed. Exactly one worker handles each event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProcessEvent {
    pub job_id: Uuid,
}

impl JobProcessEvent {
    pub fn new(job_id: Uuid) -> Self {
        Self { job_id }
    }
}

/// Activity messages broadcast as jobs move through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobActivity {
    /// A process event was queued for the job.
    Queued { job_id: Uuid },
    /// The provider was initialized and is running.
    Started { job_id: Uuid, provider: String },
    /// The provider returned.
    ProviderFinished { job_id: Uuid, success: bool },
    /// A publisher returned.
    PublisherFinished {
        job_id: Uuid,
        publisher: String,
        success: bool,
    },
    /// The worker released the job with its final status.
    Finished { job_id: Uuid, status: JobStatus },
}

impl JobActivity {
    /// Get the job ID from any variant.
    pub fn job_id(&self) -> Uuid {
        match self {
            Self::Queued { job_id }
            | Self::Started { job_id, .. }
            | Self::ProviderFinished { job_id, .. }
            | Self::PublisherFinished { job_id, .. }
            | Self::Finished { job_id, .. } => *job_id,
        }
    }

    /// Whether this is the last event for a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. })
    }
}
