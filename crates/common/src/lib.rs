//! MoodLens Common Utilities
//!
//! Shared infrastructure for all MoodLens crates:
//! - Error types and result aliases
//! - Wall-clock timestamps for inference results
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
