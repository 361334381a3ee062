//! Domain value objects.
//!
//! Value objects are immutable and defined by their attributes rather than
//! identity.

mod fetch_params;

pub use fetch_params::{Codec, FetchParams, Resolution};
