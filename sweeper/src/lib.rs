//! Periodic background jobs.
//!
//! A [`PeriodicTask`] owns one spawned tokio task that runs a [`Job`] on a fixed
//! interval, can be asked to run immediately, keeps counters, and stops when the
//! handle is dropped.

mod job;
mod stats;
mod task;

pub use job::{Job, JobResult};
pub use task::{MIN_INTERVAL, PeriodicTask, PeriodicTaskOptions, TaskError};
