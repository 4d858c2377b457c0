//! # Salvage Utilities
//!
//! Shared utilities and helpers for Salvage.
//!
//! This crate owns the `tracing` subscriber setup used by the `salvage`
//! binary. Library crates log through the re-exported macros.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{
    init_logging, init_logging_for_session, init_logging_with, init_logging_with_level, LogFormat, LogLevel,
    LoggingConfig, LoggingError, LoggingGuard,
};
pub use tracing::{debug, error, info, trace, warn};
