use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

use super::types::StreamEvent;
use crate::config::StartPosition;
use crate::{Error, Result};

/// Boundary with the source change stream.
///
/// Delivery is at-least-once: a batch already processed may be fetched again
/// after a crash, and consumers must tolerate the duplicates. Ordering is
/// guaranteed only within a partition.
#[async_trait]
pub trait StreamSource: Send + Sync + 'static {
    /// Identifiers of the independently ordered shards of the stream.
    async fn partitions(&self) -> Result<Vec<String>>;

    /// The position to start from when no checkpoint exists for `partition`.
    async fn resolve_position(&self, partition: &str, start: StartPosition) -> Result<u64>;

    /// Up to `max_events` events at `position`, in stream order.
    /// Empty when the consumer is caught up.
    async fn fetch(
        &self,
        partition: &str,
        position: u64,
        max_events: usize,
    ) -> Result<Vec<StreamEvent>>;
}

/// File-backed stream source: one NDJSON file per partition under a spool
/// directory, one event per line, append-only. The line index is the
/// consumption position.
pub struct SpoolDirectorySource {
    dir: PathBuf,
}

impl SpoolDirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn partition_path(&self, partition: &str) -> PathBuf {
        self.dir.join(format!("{}.ndjson", partition))
    }
}

#[async_trait]
impl StreamSource for SpoolDirectorySource {
    async fn partitions(&self) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(&self.dir).await.map_err(|e| Error::Source {
            message: format!("cannot read spool directory {:?}: {}", self.dir, e),
        })?;

        let mut partitions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("ndjson") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                partitions.push(stem.to_string());
            }
        }

        partitions.sort();
        Ok(partitions)
    }

    async fn resolve_position(&self, partition: &str, start: StartPosition) -> Result<u64> {
        match start {
            StartPosition::Earliest => Ok(0),
            StartPosition::Latest => {
                let path = self.partition_path(partition);
                match fs::read_to_string(&path).await {
                    // Count the same way fetch consumes, ignoring blank lines.
                    Ok(content) => {
                        Ok(content.lines().filter(|l| !l.trim().is_empty()).count() as u64)
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
                    Err(e) => Err(Error::Io(e)),
                }
            }
        }
    }

    async fn fetch(
        &self,
        partition: &str,
        position: u64,
        max_events: usize,
    ) -> Result<Vec<StreamEvent>> {
        let path = self.partition_path(partition);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            // The partition file may not have been produced yet.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io(e)),
        };

        let mut events = Vec::new();
        for line in content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .skip(position as usize)
            .take(max_events)
        {
            events.push(serde_json::from_str(line)?);
        }

        if !events.is_empty() {
            debug!(
                partition,
                position,
                count = events.len(),
                "Fetched events from spool"
            );
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::types::{EventKind, RowImage};
    use chrono::Utc;
    use tempfile::TempDir;

    fn write_events(dir: &TempDir, partition: &str, count: u64) {
        let mut lines = String::new();
        for sequence in 0..count {
            let event = StreamEvent {
                kind: EventKind::Insert,
                sequence,
                created_at: Utc::now(),
                new_image: Some(
                    RowImage::new()
                        .with_attribute("id", &sequence.to_string())
                        .with_attribute("name", "Alice"),
                ),
                old_image: None,
            };
            lines.push_str(&serde_json::to_string(&event).unwrap());
            lines.push('\n');
        }
        std::fs::write(dir.path().join(format!("{}.ndjson", partition)), lines).unwrap();
    }

    #[tokio::test]
    async fn test_lists_partitions_sorted() {
        let dir = TempDir::new().unwrap();
        write_events(&dir, "shard-1", 1);
        write_events(&dir, "shard-0", 1);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let source = SpoolDirectorySource::new(dir.path());
        let partitions = source.partitions().await.unwrap();
        assert_eq!(partitions, vec!["shard-0", "shard-1"]);
    }

    #[tokio::test]
    async fn test_fetch_window() {
        let dir = TempDir::new().unwrap();
        write_events(&dir, "shard-0", 5);

        let source = SpoolDirectorySource::new(dir.path());
        let events = source.fetch("shard-0", 2, 2).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].sequence, 2);
        assert_eq!(events[1].sequence, 3);

        // Caught up past the end.
        let events = source.fetch("shard-0", 5, 2).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_missing_partition_is_empty() {
        let dir = TempDir::new().unwrap();
        let source = SpoolDirectorySource::new(dir.path());
        let events = source.fetch("shard-9", 0, 10).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_positions() {
        let dir = TempDir::new().unwrap();
        write_events(&dir, "shard-0", 3);

        let source = SpoolDirectorySource::new(dir.path());
        assert_eq!(
            source
                .resolve_position("shard-0", StartPosition::Earliest)
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            source
                .resolve_position("shard-0", StartPosition::Latest)
                .await
                .unwrap(),
            3
        );
        assert_eq!(
            source
                .resolve_position("shard-9", StartPosition::Latest)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_malformed_line_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("shard-0.ndjson"), "not json\n").unwrap();

        let source = SpoolDirectorySource::new(dir.path());
        assert!(source.fetch("shard-0", 0, 1).await.is_err());
    }
}
