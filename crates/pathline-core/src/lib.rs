//! Core utilities and types shared across all Pathline crates

pub mod types;

// Re-export commonly used types
pub use types::*;

// Re-export external dependencies
pub use anyhow;
pub use chrono;
pub use serde;
pub use serde_json;
pub use thiserror;
pub use tracing;

// Re-export standard datetime type for use across all crates
pub use types::UtcDateTime;
