//! Monitoring of playlist and channel sources.

mod service;
mod sources;

pub use service::{CycleReport, SourceMonitor, SourceMonitorConfig};
pub use sources::{SourceKind, parse_source_list, read_source_file};
