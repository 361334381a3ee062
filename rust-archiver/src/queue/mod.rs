//! Job queue: the store, its events and the worker draining it.

pub mod events;
pub mod job_store;
pub mod worker;

pub use events::{JobEvent, JobEventBroadcaster};
pub use job_store::{JobOutcome, JobStats, JobStore};
pub use worker::{Worker, WorkerConfig};
