use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Event-type tag assigned by the source stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Insert,
    Modify,
    Remove,
    /// Tag this version does not understand; decoded to no record.
    #[serde(other)]
    Unknown,
}

/// Snapshot of a row's attributes as carried on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowImage {
    attributes: HashMap<String, String>,
}

impl RowImage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// One raw event as delivered by the source stream, in partition order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub kind: EventKind,
    /// Per-partition ordinal assigned by the source. Diagnostics only; the
    /// stream itself guarantees per-key order.
    pub sequence: u64,
    /// Origination time, used for the staleness bound.
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_image: Option<RowImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_image: Option<RowImage>,
}

impl StreamEvent {
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.created_at)
    }
}

/// The idempotent cache mutation a record maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Unconditional set of `key -> value`. The payload lives inside the
    /// variant so an upsert can never be constructed without one.
    Upsert { value: String },
    /// Unconditional delete of `key`.
    Remove,
}

/// A normalized row mutation, produced by the decoder and consumed
/// immediately by the applier. Never persisted or reused across batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub key: String,
    pub operation: Operation,
    pub sequence: u64,
}
