//! Error types for the job runner.

use std::io;

use uuid::Uuid;

use crate::job::JobStatus;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Failures while supervising a provider's child process.
///
/// `AbnormalExit` is a typed outcome rather than a fault: the process ran
/// but did not exit cleanly. Its text is the message recorded on the job.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Empty command")]
    EmptyCommand,

    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed waiting for process: {0}")]
    Wait(#[source] io::Error),

    #[error("Failed to capture {stream}: {reason}")]
    Capture { stream: &'static str, reason: String },

    #[error("Job terminated abnormally. Exit code: {code}")]
    AbnormalExit { code: i32 },
}

/// Failures while delivering a result to its destination.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Specified publishPath does not exist.")]
    NotFound,

    #[error("Specified publishPath is not a valid directory.")]
    NotADirectory,

    #[error("Cannot write to the specified publishPath.")]
    NotWritable,

    #[error("{0}")]
    Io(#[from] io::Error),
}

/// Errors surfaced by the dispatcher's control API.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Job {id} not found")]
    JobNotFound { id: Uuid },

    #[error("Job {id} already exists")]
    DuplicateJob { id: Uuid },

    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job queue is closed")]
    QueueClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_errors_render_job_messages() {
        assert_eq!(
            PublishError::NotFound.to_string(),
            "Specified publishPath does not exist."
        );
        assert_eq!(
            PublishError::NotWritable.to_string(),
            "Cannot write to the specified publishPath."
        );
    }

    #[test]
    fn abnormal_exit_renders_job_message() {
        assert_eq!(
            ExecutionError::AbnormalExit { code: 143 }.to_string(),
            "Job terminated abnormally. Exit code: 143"
        );
    }
}
