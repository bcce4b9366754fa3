#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stream_cache_sync::cache::{ApplyError, CacheStore};
use stream_cache_sync::config::{
    CacheConfig, Config, ReplicationConfig, StartPosition, StreamConfig,
};
use stream_cache_sync::replicator::{HealthMap, PartitionHealth};
use stream_cache_sync::stream::{EventKind, RowImage, StreamEvent, StreamSource};
use stream_cache_sync::Result;

/// In-memory key-value store standing in for the cache service.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.entries.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn set(&mut self, key: &str, value: &str) -> std::result::Result<(), ApplyError> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&mut self, key: &str) -> std::result::Result<(), ApplyError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Fails the first `failures` operations with `CacheUnavailable`, then
/// behaves like the wrapped store.
#[derive(Clone)]
pub struct FlakyStore {
    inner: MemoryStore,
    remaining_failures: Arc<AtomicU32>,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore, failures: u32) -> Self {
        Self {
            inner,
            remaining_failures: Arc::new(AtomicU32::new(failures)),
        }
    }

    fn take_failure(&self) -> bool {
        self.remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl CacheStore for FlakyStore {
    async fn set(&mut self, key: &str, value: &str) -> std::result::Result<(), ApplyError> {
        if self.take_failure() {
            return Err(ApplyError::CacheUnavailable("injected failure".to_string()));
        }
        self.inner.set(key, value).await
    }

    async fn delete(&mut self, key: &str) -> std::result::Result<(), ApplyError> {
        if self.take_failure() {
            return Err(ApplyError::CacheUnavailable("injected failure".to_string()));
        }
        self.inner.delete(key).await
    }
}

/// In-memory ordered change stream with one event list per partition.
#[derive(Clone, Default)]
pub struct MemorySource {
    partitions: Arc<Mutex<HashMap<String, Vec<StreamEvent>>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, partition: &str, event: StreamEvent) {
        self.partitions
            .lock()
            .unwrap()
            .entry(partition.to_string())
            .or_default()
            .push(event);
    }

    pub fn push_all(&self, partition: &str, events: impl IntoIterator<Item = StreamEvent>) {
        for event in events {
            self.push(partition, event);
        }
    }
}

#[async_trait]
impl StreamSource for MemorySource {
    async fn partitions(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.partitions.lock().unwrap().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn resolve_position(&self, partition: &str, start: StartPosition) -> Result<u64> {
        let map = self.partitions.lock().unwrap();
        let len = map.get(partition).map(Vec::len).unwrap_or(0) as u64;
        Ok(match start {
            StartPosition::Earliest => 0,
            StartPosition::Latest => len,
        })
    }

    async fn fetch(
        &self,
        partition: &str,
        position: u64,
        max_events: usize,
    ) -> Result<Vec<StreamEvent>> {
        let map = self.partitions.lock().unwrap();
        let events = map.get(partition).map(Vec::as_slice).unwrap_or(&[]);
        Ok(events
            .iter()
            .skip(position as usize)
            .take(max_events)
            .cloned()
            .collect())
    }
}

/// Wraps a source and records the size of every fetch request and response.
#[derive(Clone)]
pub struct RecordingSource {
    inner: MemorySource,
    fetches: Arc<Mutex<Vec<(usize, usize)>>>,
}

impl RecordingSource {
    pub fn new(inner: MemorySource) -> Self {
        Self {
            inner,
            fetches: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// `(max_events requested, events returned)` per non-empty fetch.
    pub fn fetch_sizes(&self) -> Vec<(usize, usize)> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl StreamSource for RecordingSource {
    async fn partitions(&self) -> Result<Vec<String>> {
        self.inner.partitions().await
    }

    async fn resolve_position(&self, partition: &str, start: StartPosition) -> Result<u64> {
        self.inner.resolve_position(partition, start).await
    }

    async fn fetch(
        &self,
        partition: &str,
        position: u64,
        max_events: usize,
    ) -> Result<Vec<StreamEvent>> {
        let events = self.inner.fetch(partition, position, max_events).await?;
        if !events.is_empty() {
            self.fetches.lock().unwrap().push((max_events, events.len()));
        }
        Ok(events)
    }
}

pub fn upsert_event(sequence: u64, key: &str, value: &str) -> StreamEvent {
    StreamEvent {
        kind: EventKind::Insert,
        sequence,
        created_at: Utc::now(),
        new_image: Some(
            RowImage::new()
                .with_attribute("id", key)
                .with_attribute("name", value),
        ),
        old_image: None,
    }
}

pub fn remove_event(sequence: u64, key: &str) -> StreamEvent {
    StreamEvent {
        kind: EventKind::Remove,
        sequence,
        created_at: Utc::now(),
        new_image: None,
        old_image: Some(RowImage::new().with_attribute("id", key)),
    }
}

/// An event that fails decoding with `MissingSnapshot`.
pub fn broken_event(sequence: u64) -> StreamEvent {
    StreamEvent {
        kind: EventKind::Insert,
        sequence,
        created_at: Utc::now(),
        new_image: None,
        old_image: None,
    }
}

/// An upsert that originated `age_secs` ago.
pub fn aged_event(sequence: u64, key: &str, value: &str, age_secs: i64) -> StreamEvent {
    let mut event = upsert_event(sequence, key, value);
    event.created_at = Utc::now() - ChronoDuration::seconds(age_secs);
    event
}

/// A config with test-friendly timings: tight polling, fast retries, a
/// one-second backoff ceiling.
pub fn test_config(checkpoint_file: &Path) -> Config {
    Config {
        stream: StreamConfig {
            spool_dir: PathBuf::from("unused"),
            start_position: StartPosition::Earliest,
            poll_interval_ms: 20,
            max_record_age_secs: 3_600,
            key_attribute: "id".to_string(),
            value_attribute: "name".to_string(),
        },
        cache: CacheConfig {
            host: "localhost".to_string(),
            port: 6379,
            tls: false,
            connect_timeout_secs: 1,
            operation_timeout_secs: 1,
        },
        replication: ReplicationConfig {
            batch_size: 1,
            retry_attempts: 2,
            retry_initial_delay_ms: 10,
            retry_max_delay_secs: 1,
            checkpoint_file: checkpoint_file.to_path_buf(),
            health_interval_secs: 1,
            failure_channel: false,
            failure_log_file: PathBuf::from("unused-failures.ndjson"),
        },
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn eventually<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Polls the health registry until `predicate` holds for `partition`.
pub async fn eventually_health<F>(
    health: &HealthMap,
    partition: &str,
    predicate: F,
    timeout: Duration,
) -> bool
where
    F: Fn(&PartitionHealth) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        {
            let map = health.read().await;
            if map.get(partition).map(&predicate).unwrap_or(false) {
                return true;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
