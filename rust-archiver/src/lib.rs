//! rust-archiver: media archiving with a single-worker job queue,
//! a durable completion ledger and periodic playlist/channel monitoring.

pub mod config;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod inflight;
pub mod ledger;
pub mod logging;
pub mod monitor;
pub mod queue;
pub mod service;
pub mod utils;

pub use config::ArchiverConfig;
pub use error::{Error, Result};
pub use service::{ArchiveService, HealthReport};
