//! Checkpoint management for at-least-once delivery semantics.
//!
//! This module persists the last committed stream position per partition so
//! that replication can resume from there after a restart or failure. Resume
//! may re-deliver the tail of the last batch; the applier's idempotency
//! absorbs the duplicates.
//!
//! # Example
//!
//! ```rust,no_run
//! use stream_cache_sync::checkpoint::{Checkpoint, CheckpointManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = CheckpointManager::new("checkpoint.json");
//!
//!     // Load existing checkpoint
//!     if let Some(checkpoint) = manager.load().await? {
//!         println!("Resuming {} partitions", checkpoint.positions.len());
//!     }
//!
//!     // Save new checkpoint
//!     let mut checkpoint = Checkpoint::new();
//!     checkpoint.advance("shard-0", 42, 1);
//!     manager.save(&checkpoint).await?;
//!
//!     Ok(())
//! }
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};

/// The committed consumption position of every partition.
///
/// A position is the index of the next event to fetch; everything before it
/// has been applied to the cache and acknowledged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Committed position per partition
    pub positions: HashMap<String, u64>,
    /// When this checkpoint was last updated
    pub updated_at: chrono::DateTime<chrono::Utc>,
    /// Records applied since the checkpoint file was created
    pub record_count: u64,
}

impl Checkpoint {
    pub fn new() -> Self {
        Self {
            positions: HashMap::new(),
            updated_at: chrono::Utc::now(),
            record_count: 0,
        }
    }

    /// The committed position for `partition`, if it has ever committed.
    pub fn position(&self, partition: &str) -> Option<u64> {
        self.positions.get(partition).copied()
    }

    /// Records a successful batch: `partition` is committed at `position`
    /// after applying `records` records.
    pub fn advance(&mut self, partition: &str, position: u64, records: u64) {
        self.positions.insert(partition.to_string(), position);
        self.updated_at = chrono::Utc::now();
        self.record_count += records;
    }
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self::new()
    }
}

/// Manages checkpoint persistence to disk.
///
/// Writes are atomic (temp file, fsync, rename) so the checkpoint file is
/// never left partially written, even if the process crashes mid-save.
pub struct CheckpointManager {
    file_path: PathBuf,
}

impl CheckpointManager {
    pub fn new(checkpoint_path: impl AsRef<Path>) -> Self {
        Self {
            file_path: checkpoint_path.as_ref().to_path_buf(),
        }
    }

    /// Loads the checkpoint from disk if it exists.
    ///
    /// Returns `None` if the checkpoint file doesn't exist, which typically
    /// means this is the first run; the driver then falls back to the
    /// configured start position.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the file exists but cannot be read or does not parse
    /// as a checkpoint.
    pub async fn load(&self) -> Result<Option<Checkpoint>> {
        if !self.file_path.exists() {
            debug!("No checkpoint file found at {:?}", self.file_path);
            return Ok(None);
        }

        match fs::read_to_string(&self.file_path).await {
            Ok(content) => match serde_json::from_str::<Checkpoint>(&content) {
                Ok(checkpoint) => {
                    info!(
                        partitions = checkpoint.positions.len(),
                        records = checkpoint.record_count,
                        "Loaded checkpoint"
                    );
                    Ok(Some(checkpoint))
                }
                Err(e) => {
                    error!("Failed to parse checkpoint file: {}", e);
                    Err(Error::Config(format!("Invalid checkpoint file: {}", e)))
                }
            },
            Err(e) => {
                error!("Failed to read checkpoint file: {}", e);
                Err(Error::Io(e))
            }
        }
    }

    /// Saves the checkpoint to disk atomically.
    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        debug!(partitions = checkpoint.positions.len(), "Saving checkpoint");

        let temp_path = self.file_path.with_extension("tmp");

        let json = serde_json::to_string_pretty(checkpoint)?;
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, &self.file_path).await?;

        Ok(())
    }

    /// Deletes the checkpoint file if it exists, resetting replication to
    /// the configured start position on the next run.
    pub async fn delete(&self) -> Result<()> {
        if self.file_path.exists() {
            fs::remove_file(&self.file_path).await?;
            info!("Deleted checkpoint file");
        }
        Ok(())
    }
}
