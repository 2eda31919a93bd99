//! Worker system — event-driven job execution.
//!
//! Core components:
//! - `event` — `JobProcessEvent` and the `JobActivity` broadcast stream
//! - `store` — in-memory job table with single-owner checkout
//! - `worker` — runs one job through provider then publishers
//! - `dispatcher` — event queue, worker pool, and cancellation

pub mod dispatcher;
pub mod event;
pub mod store;
pub mod worker;

pub use dispatcher::Dispatcher;
pub use event::{JobActivity, JobProcessEvent};
pub use store::JobStore;
pub use worker::{PipelineOutcome, Worker, WorkerDeps};
