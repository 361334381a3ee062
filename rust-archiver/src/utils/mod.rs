//! Shared helpers.

pub mod filename;
pub mod fs;
pub mod url;
