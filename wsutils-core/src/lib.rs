//! wsutils core - shared infrastructure for the web-service toolkit
//!
//! Error taxonomy, layered site configuration and logging setup used by the
//! store, auth, service and CLI crates.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::*;
pub use error::*;
pub use logging::*;
pub use types::*;

// Re-export commonly used external types
pub use tracing;
