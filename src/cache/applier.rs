use thiserror::Error;
use tracing::trace;

use super::store::CacheStore;
use crate::stream::{ChangeRecord, Operation};

/// Cache write failure. Transient: the batch that carried the record is
/// retried as a whole, which is safe because both mutations are idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),
}

/// Applies change records to the cache, one network write per record.
///
/// The store is injected at construction; the applier is the only component
/// that talks to the cache.
pub struct CacheApplier<C> {
    store: C,
}

impl<C: CacheStore> CacheApplier<C> {
    pub fn new(store: C) -> Self {
        Self { store }
    }

    pub async fn apply(&mut self, record: &ChangeRecord) -> Result<(), ApplyError> {
        match &record.operation {
            Operation::Upsert { value } => {
                trace!(key = %record.key, sequence = record.sequence, "SET");
                self.store.set(&record.key, value).await
            }
            Operation::Remove => {
                trace!(key = %record.key, sequence = record.sequence, "DEL");
                self.store.delete(&record.key).await
            }
        }
    }
}
