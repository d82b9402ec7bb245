//! Shared utilities for lodestore.
//!
//! - Logging setup with tracing
//! - Data directory and workspace path helpers
//! - RAII-based timing for storage round trips

pub mod log;
pub mod path;
pub mod timing;

pub use timing::TimingGuard;
