//! Job runner — executes jobs on pluggable providers and delivers their
//! results through pluggable publishers.

pub mod config;
pub mod error;
pub mod job;
pub mod provider;
pub mod publisher;
pub mod registry;
pub mod worker;

pub use config::DispatcherConfig;
pub use job::{Job, JobStatus};
pub use registry::PluginRegistry;
pub use worker::{Dispatcher, JobActivity, PipelineOutcome};
