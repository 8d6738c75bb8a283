//! services/api/src/jobs/mod.rs
//!
//! Background generation jobs: the dispatcher and the units of work it runs.

pub mod dispatcher;
mod report_task;
mod summary_task;

pub use dispatcher::{JobContext, JobDispatcher, JobError, JobOutcome};
