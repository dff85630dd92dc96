//! Job Queue & Worker Pool
//!
//! - [`types`]: `ScrapeJob`, its forward-only status machine and requests
//! - [`store`]: durable job persistence (`SqliteJobStore`, `MemoryJobStore`)
//! - [`queue`]: priority queue with recovery and cancellation
//! - [`worker`]: bounded worker pool driving a [`JobHandler`]

pub mod queue;
pub mod store;
pub mod types;
pub mod worker;

pub use queue::JobQueue;
pub use store::{JobStore, MemoryJobStore, SqliteJobStore};
pub use types::{JobError, JobOptions, JobRequest, JobStatus, ScrapeJob, TargetType};
pub use worker::{JobHandler, WorkerPool};
