//! Drives a batch of stream events through decode and apply, strictly in
//! arrival order. A later event for a key must never be applied before an
//! earlier one, so there is no skip-and-continue: the first failure aborts
//! the batch and nothing at or after the failing index is applied.

use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{ApplyError, CacheApplier, CacheStore};
use crate::stream::{DecodeError, EventDecoder, StreamEvent};

/// What went wrong with one record of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Apply(#[from] ApplyError),
}

impl BatchError {
    /// Decode failures are structural and never resolve on retry; apply
    /// failures are connectivity and do.
    pub fn is_retriable(&self) -> bool {
        matches!(self, BatchError::Apply(_))
    }
}

/// Result of one batch invocation. A batch is never partially acknowledged:
/// the driver either commits the whole batch or redelivers the whole batch,
/// relying on the applier's idempotency to absorb re-application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Success {
        /// Records actually applied (events decoding to no record are not
        /// counted).
        applied: usize,
    },
    Failed {
        /// Index into the batch of the first failing event. Events before it
        /// have been applied; events at or after it have not.
        failed_index: usize,
        error: BatchError,
    },
}

pub struct BatchProcessor<C> {
    decoder: EventDecoder,
    applier: CacheApplier<C>,
}

impl<C: CacheStore> BatchProcessor<C> {
    pub fn new(decoder: EventDecoder, applier: CacheApplier<C>) -> Self {
        Self { decoder, applier }
    }

    /// Decode record *i*, apply record *i*, only then move to record *i+1*.
    pub async fn process(&mut self, events: &[StreamEvent]) -> BatchOutcome {
        let mut applied = 0;

        for (index, event) in events.iter().enumerate() {
            let record = match self.decoder.decode(event) {
                Ok(Some(record)) => record,
                Ok(None) => {
                    debug!(sequence = event.sequence, "Event produced no record");
                    continue;
                }
                Err(e) => {
                    warn!(index, sequence = event.sequence, error = %e, "Decode failed");
                    return BatchOutcome::Failed {
                        failed_index: index,
                        error: e.into(),
                    };
                }
            };

            if let Err(e) = self.applier.apply(&record).await {
                warn!(index, key = %record.key, error = %e, "Apply failed");
                return BatchOutcome::Failed {
                    failed_index: index,
                    error: e.into(),
                };
            }

            applied += 1;
        }

        BatchOutcome::Success { applied }
    }
}
