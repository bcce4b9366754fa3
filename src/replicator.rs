//! The stream-consumption runtime: one worker per source partition, each
//! pulling batches in position order and feeding them through the batch
//! processor. Workers for different partitions run fully in parallel; within
//! a partition processing is strictly sequential, because per-key ordering
//! depends on it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::cache::{CacheApplier, CacheStore};
use crate::checkpoint::{Checkpoint, CheckpointManager};
use crate::config::{Config, StartPosition};
use crate::processor::{BatchError, BatchOutcome, BatchProcessor};
use crate::retry::RetryPolicy;
use crate::stream::{EventDecoder, StreamEvent, StreamSource};
use crate::{Error, Result};

/// Driver-visible state of one partition, distinguishing a stuck partition
/// (failed batch, not advancing) from one that is merely catching up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionHealth {
    /// The last fetch returned nothing; the partition is at the stream head.
    CaughtUp { position: u64 },
    /// Advancing, with backlog still ahead.
    Lagging { position: u64 },
    /// A batch has exhausted its retries and the partition is not advancing.
    /// Operator intervention is required: manual replay, cache recovery, or
    /// enabling the failure channel (accepting the ordering trade).
    Stuck { position: u64, error: String },
}

impl PartitionHealth {
    pub fn is_stuck(&self) -> bool {
        matches!(self, PartitionHealth::Stuck { .. })
    }
}

/// Shared per-partition health registry.
pub type HealthMap = Arc<RwLock<HashMap<String, PartitionHealth>>>;

pub struct Replicator<S, C> {
    config: Config,
    source: Arc<S>,
    store: C,
    health: HealthMap,
}

impl<S, C> Replicator<S, C>
where
    S: StreamSource,
    C: CacheStore + Clone + Sync,
{
    pub fn new(config: Config, source: S, store: C) -> Self {
        Self {
            config,
            source: Arc::new(source),
            store,
            health: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Handle for observing per-partition health from outside the driver.
    pub fn health(&self) -> HealthMap {
        Arc::clone(&self.health)
    }

    /// Runs until `shutdown` flips to `true`. Workers stop between batches,
    /// never mid-record; an uncommitted batch is simply redelivered on the
    /// next run.
    pub async fn run(&mut self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let manager = Arc::new(CheckpointManager::new(
            &self.config.replication.checkpoint_file,
        ));
        let checkpoint = Arc::new(Mutex::new(manager.load().await?.unwrap_or_default()));

        let partitions = self.source.partitions().await?;
        if partitions.is_empty() {
            warn!("Source reported no partitions; nothing to replicate yet");
        }
        info!(
            partitions = partitions.len(),
            batch_size = self.config.replication.batch_size,
            "Starting replication"
        );

        let failure_log = if self.config.replication.failure_channel {
            warn!(
                file = ?self.config.replication.failure_log_file,
                "Failure channel enabled; poison events will be skipped and per-key ordering may be violated"
            );
            Some(Arc::new(FailureLog::new(
                self.config.replication.failure_log_file.clone(),
            )))
        } else {
            None
        };

        let retry = RetryPolicy::from_config(&self.config.replication);
        let mut workers = Vec::with_capacity(partitions.len());
        for partition in partitions {
            let worker = PartitionWorker {
                partition,
                source: Arc::clone(&self.source),
                processor: BatchProcessor::new(
                    EventDecoder::new(
                        self.config.stream.key_attribute.clone(),
                        self.config.stream.value_attribute.clone(),
                    ),
                    CacheApplier::new(self.store.clone()),
                ),
                checkpoint: Arc::clone(&checkpoint),
                manager: Arc::clone(&manager),
                health: Arc::clone(&self.health),
                retry: retry.clone(),
                batch_size: self.config.replication.batch_size,
                poll_interval: self.config.stream.poll_interval(),
                max_record_age: chrono::Duration::seconds(
                    self.config.stream.max_record_age_secs as i64,
                ),
                start_position: self.config.stream.start_position,
                failure_log: failure_log.clone(),
                shutdown: shutdown.clone(),
                last_sequence: None,
            };
            workers.push(tokio::spawn(worker.run()));
        }

        let reporter = tokio::spawn(report_health(
            Arc::clone(&self.health),
            self.config.replication.health_interval(),
            shutdown.clone(),
        ));

        let results = join_all(workers).await;
        reporter.abort();

        for result in results {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(e) => {
                    return Err(Error::Replication {
                        message: format!("partition worker panicked: {}", e),
                    })
                }
            }
        }

        info!("Replicator stopped");
        Ok(())
    }
}

/// Outcome of driving one batch to completion.
enum BatchResult {
    Done,
    Shutdown,
}

struct PartitionWorker<S, C> {
    partition: String,
    source: Arc<S>,
    processor: BatchProcessor<C>,
    checkpoint: Arc<Mutex<Checkpoint>>,
    manager: Arc<CheckpointManager>,
    health: HealthMap,
    retry: RetryPolicy,
    batch_size: usize,
    poll_interval: Duration,
    max_record_age: chrono::Duration,
    start_position: StartPosition,
    failure_log: Option<Arc<FailureLog>>,
    shutdown: watch::Receiver<bool>,
    last_sequence: Option<u64>,
}

impl<S: StreamSource, C: CacheStore> PartitionWorker<S, C> {
    async fn run(mut self) -> Result<()> {
        let committed = { self.checkpoint.lock().await.position(&self.partition) };
        let mut position = match committed {
            Some(position) => {
                info!(partition = %self.partition, position, "Resuming from checkpoint");
                position
            }
            None => {
                let position = self
                    .source
                    .resolve_position(&self.partition, self.start_position)
                    .await?;
                info!(
                    partition = %self.partition,
                    position,
                    start = ?self.start_position,
                    "No checkpoint, starting from configured position"
                );
                position
            }
        };

        self.set_health(PartitionHealth::CaughtUp { position }).await;

        while !*self.shutdown.borrow() {
            let events = match self
                .source
                .fetch(&self.partition, position, self.batch_size)
                .await
            {
                Ok(events) => events,
                Err(e) => {
                    warn!(partition = %self.partition, error = %e, "Stream fetch failed; backing off");
                    if self.wait(self.retry.max_delay).await {
                        break;
                    }
                    continue;
                }
            };

            if events.is_empty() {
                self.set_health(PartitionHealth::CaughtUp { position }).await;
                if self.wait(self.poll_interval).await {
                    break;
                }
                continue;
            }

            let fetched = events.len();
            self.note_sequence_gaps(&events);
            let batch = self.discard_stale(events);

            if !batch.is_empty() {
                match self.drive_batch(batch, position).await? {
                    BatchResult::Done => {}
                    BatchResult::Shutdown => break,
                }
            }

            position += fetched as u64;
            self.commit(position, fetched as u64).await?;

            let state = if fetched == self.batch_size {
                PartitionHealth::Lagging { position }
            } else {
                PartitionHealth::CaughtUp { position }
            };
            self.set_health(state).await;
        }

        info!(partition = %self.partition, "Partition worker stopped");
        Ok(())
    }

    /// Retries the batch until it succeeds, the shutdown signal fires, or —
    /// with the failure channel enabled — the poison events have been routed
    /// aside. With the channel disabled a batch that exhausts its retries
    /// parks the partition: skipping forward would let a later event for the
    /// same key apply out of order, so the worker keeps re-trying at the
    /// backoff ceiling and leaves the decision to an operator.
    async fn drive_batch(
        &mut self,
        mut batch: Vec<StreamEvent>,
        position: u64,
    ) -> Result<BatchResult> {
        let mut attempt: u32 = 0;

        loop {
            match self.processor.process(&batch).await {
                BatchOutcome::Success { .. } => return Ok(BatchResult::Done),
                BatchOutcome::Failed {
                    failed_index,
                    error,
                } => {
                    if error.is_retriable() && attempt < self.retry.max_attempts {
                        attempt += 1;
                        let delay = self.retry.delay_for_attempt(attempt);
                        warn!(
                            partition = %self.partition,
                            failed_index,
                            attempt,
                            max_attempts = self.retry.max_attempts,
                            error = %error,
                            "Batch failed; retrying in {:?}", delay
                        );
                        if self.wait(delay).await {
                            return Ok(BatchResult::Shutdown);
                        }
                    } else if let Some(log) = self.failure_log.clone() {
                        error!(
                            partition = %self.partition,
                            failed_index,
                            error = %error,
                            "Routing poison event to the failure log and continuing past it"
                        );
                        log.record(&self.partition, &batch[failed_index], &error)
                            .await?;
                        // Events before the failing index are applied; drop
                        // them with the poison event and resume the tail.
                        batch.drain(..=failed_index);
                        attempt = 0;
                        if batch.is_empty() {
                            return Ok(BatchResult::Done);
                        }
                    } else {
                        self.set_health(PartitionHealth::Stuck {
                            position,
                            error: error.to_string(),
                        })
                        .await;
                        error!(
                            partition = %self.partition,
                            position,
                            failed_index,
                            error = %error,
                            "Partition stuck; holding position until the batch succeeds or an operator intervenes"
                        );
                        if self.wait(self.retry.max_delay).await {
                            return Ok(BatchResult::Shutdown);
                        }
                    }
                }
            }
        }
    }

    /// Flags holes in the source's per-partition sequence numbering. The
    /// sequence is diagnostic only; duplicates (sequence going backwards
    /// after a redelivery) are expected and not reported.
    fn note_sequence_gaps(&mut self, events: &[StreamEvent]) {
        for event in events {
            if let Some(last) = self.last_sequence {
                if event.sequence > last + 1 {
                    warn!(
                        partition = %self.partition,
                        after = last,
                        next = event.sequence,
                        "Gap in stream sequence numbering"
                    );
                }
            }
            self.last_sequence = Some(event.sequence);
        }
    }

    /// Drops events that aged past the source's retention window. These were
    /// no longer guaranteed deliverable by the source; treat them as upstream
    /// data loss, not as processing errors.
    fn discard_stale(&self, events: Vec<StreamEvent>) -> Vec<StreamEvent> {
        let now = Utc::now();
        let mut fresh = Vec::with_capacity(events.len());
        for event in events {
            let age = event.age(now);
            if age > self.max_record_age {
                warn!(
                    target: "stream_cache_sync::data_loss",
                    partition = %self.partition,
                    sequence = event.sequence,
                    age_secs = age.num_seconds(),
                    "Event aged past the retention window; dropping"
                );
            } else {
                fresh.push(event);
            }
        }
        fresh
    }

    async fn commit(&self, position: u64, events: u64) -> Result<()> {
        let mut checkpoint = self.checkpoint.lock().await;
        checkpoint.advance(&self.partition, position, events);
        self.manager.save(&checkpoint).await
    }

    async fn set_health(&self, state: PartitionHealth) {
        self.health
            .write()
            .await
            .insert(self.partition.clone(), state);
    }

    /// Sleeps, waking early on shutdown. Returns true when shutdown fired.
    async fn wait(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = sleep(duration) => *self.shutdown.borrow(),
            _ = self.shutdown.changed() => true,
        }
    }
}

/// Side channel for poison events, written only when the operator has
/// explicitly traded per-key ordering for availability.
struct FailureLog {
    path: PathBuf,
}

impl FailureLog {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn record(
        &self,
        partition: &str,
        event: &StreamEvent,
        error: &BatchError,
    ) -> Result<()> {
        let entry = serde_json::json!({
            "partition": partition,
            "error": error.to_string(),
            "recorded_at": Utc::now(),
            "event": event,
        });
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_all().await?;
        Ok(())
    }
}

async fn report_health(health: HealthMap, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = health.read().await;
                for (partition, state) in snapshot.iter() {
                    info!(partition = %partition, state = ?state, "Partition status");
                }
                let stuck = snapshot.values().filter(|h| h.is_stuck()).count();
                if stuck > 0 {
                    warn!(stuck, "Partitions are stuck and require operator intervention");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}
