//! Domain layer for rust-archiver.
//!
//! This module contains the job entity, its state machine, and the value
//! objects describing how a job is fetched.

pub mod job;
pub mod value_objects;

pub use job::{Job, JobOrigin, JobRequest, JobStatus};
pub use value_objects::*;
