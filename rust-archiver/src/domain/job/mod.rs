//! Job entity and lifecycle.

mod entity;
mod state;

pub use entity::{Job, JobRequest};
pub use state::{JobOrigin, JobStatus};
