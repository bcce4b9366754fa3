//! Error types and result handling for stream-cache-sync.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use stream_cache_sync::{Error, Result};
//!
//! fn pull_events() -> Result<()> {
//!     // Simulating a stream failure
//!     Err(Error::Source {
//!         message: "partition file unreadable".to_string(),
//!     })
//! }
//!
//! match pull_events() {
//!     Ok(()) => println!("Pulled"),
//!     Err(e @ Error::Source { .. }) => eprintln!("Stream error: {}", e),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use thiserror::Error;

/// The main error type for stream-cache-sync operations.
///
/// This enum represents all possible errors that can occur during
/// replication, from configuration issues to runtime failures.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error, typically from an invalid config file or
    /// environment override.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Cache client or protocol error.
    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    /// JSON serialization error when reading or writing events.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error, typically from checkpoint or spool file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure while pulling events from the source stream.
    #[error("Source stream error: {message}")]
    Source {
        /// Description of the source failure
        message: String,
    },

    /// Replication-level error not tied to a single component.
    #[error("Replication error: {message}")]
    Replication {
        /// Description of the replication error
        message: String,
    },

    /// Operation timeout.
    #[error("Timeout error: {message}")]
    Timeout {
        /// Description of what timed out
        message: String,
    },
}

/// A convenient Result type alias for stream-cache-sync operations.
///
/// This is equivalent to `std::result::Result<T, stream_cache_sync::Error>`.
///
/// # Example
///
/// ```rust
/// use stream_cache_sync::Result;
///
/// fn do_something() -> Result<String> {
///     Ok("Success".to_string())
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;
