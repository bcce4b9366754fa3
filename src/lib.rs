pub mod checkpoint;
pub mod config;
pub mod error;
pub mod processor;
pub mod replicator;
pub mod retry;

pub mod cache;
pub mod stream;

pub use config::Config;
pub use error::{Error, Result};
pub use replicator::Replicator;
