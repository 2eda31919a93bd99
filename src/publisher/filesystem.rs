//! File system publisher: writes the result to `<publishPath>/<job uuid>`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use uuid::Uuid;

use crate::error::PublishError;
use crate::job::Job;
use crate::publisher::{Publisher, job_parameters, require_param};

/// Parameter naming the destination directory.
pub const PUBLISH_PATH_PARAM: &str = "publishPath";

/// Publishes results to the file system.
#[derive(Debug, Default)]
pub struct FileSystemPublisher {
    publish_path: Option<PathBuf>,
}

impl FileSystemPublisher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Publisher for FileSystemPublisher {
    fn name(&self) -> &str {
        "File System"
    }

    fn description(&self) -> &str {
        "Publishes results to the file system."
    }

    async fn initialize(&mut self, job: &mut Job) -> bool {
        self.publish_path = None;
        let Some(params) = job_parameters(job) else {
            return false;
        };
        let Some(path) = require_param(job, &params, PUBLISH_PATH_PARAM) else {
            return false;
        };
        self.publish_path = Some(PathBuf::from(path));
        true
    }

    async fn publish(&self, job: &mut Job) -> bool {
        let Some(dir) = self.publish_path.as_deref() else {
            job.add_error(format!(
                "Invalid request. Expected parameter: [{PUBLISH_PATH_PARAM}]"
            ));
            return false;
        };

        let result = job.result.as_deref().unwrap_or_default();
        match write_report(dir, job.uuid(), result).await {
            Ok(report) => {
                tracing::info!(job_id = %job.uuid(), path = %report.display(), "Published result");
                job.add_message(format!("Report written to: {}", report.display()));
                true
            }
            Err(e) => {
                job.add_error(e.to_string());
                false
            }
        }
    }
}

/// Check the destination, then write the result bytes verbatim.
async fn write_report(dir: &Path, job_id: Uuid, result: &[u8]) -> Result<PathBuf, PublishError> {
    check_destination(dir).await?;
    let report = std::path::absolute(dir.join(job_id.to_string()))?;
    fs::write(&report, result).await?;
    Ok(report)
}

/// First failing check wins: exists, is a directory, is writable.
///
/// A directory with no write bit is unwritable even for root; otherwise the
/// running user's access decides.
async fn check_destination(dir: &Path) -> Result<(), PublishError> {
    let metadata = match fs::metadata(dir).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(PublishError::NotFound),
        Err(e) => return Err(e.into()),
    };
    if !metadata.is_dir() {
        return Err(PublishError::NotADirectory);
    }
    if metadata.permissions().readonly() || !user_can_write(dir) {
        return Err(PublishError::NotWritable);
    }
    Ok(())
}

#[cfg(unix)]
fn user_can_write(dir: &Path) -> bool {
    use nix::unistd::{AccessFlags, access};

    match access(dir, AccessFlags::W_OK) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(path = %dir.display(), error = %e, "Destination not writable");
            false
        }
    }
}

#[cfg(not(unix))]
fn user_can_write(_dir: &Path) -> bool {
    true
}
