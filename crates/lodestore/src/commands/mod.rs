//! Command handlers for the lodestore CLI.

pub mod config;
pub mod kv;
pub mod session;

pub use config::*;
pub use kv::*;
pub use session::*;
