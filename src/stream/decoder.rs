use thiserror::Error;
use tracing::debug;

use super::types::{ChangeRecord, EventKind, Operation, RowImage, StreamEvent};

/// A structurally unprocessable event. Retrying never helps; the batch
/// processor reports these as permanent failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("event {sequence}: no row image attached")]
    MissingSnapshot { sequence: u64 },

    #[error("event {sequence}: key attribute '{attribute}' missing or empty")]
    MissingKey { attribute: String, sequence: u64 },

    #[error("event {sequence}: value attribute '{attribute}' missing or empty for upsert")]
    MissingValue { attribute: String, sequence: u64 },
}

/// Interprets raw stream events against the configured key schema.
///
/// `INSERT`/`MODIFY` read the new row image (falling back to the old one when
/// the source omits it), `REMOVE` reads the old image, which is the last known
/// state before deletion and still carries the key.
pub struct EventDecoder {
    key_attribute: String,
    value_attribute: String,
}

impl EventDecoder {
    pub fn new(key_attribute: impl Into<String>, value_attribute: impl Into<String>) -> Self {
        Self {
            key_attribute: key_attribute.into(),
            value_attribute: value_attribute.into(),
        }
    }

    /// Decodes one event into at most one change record. No side effects.
    pub fn decode(&self, event: &StreamEvent) -> Result<Option<ChangeRecord>, DecodeError> {
        let image = match event.kind {
            EventKind::Insert | EventKind::Modify => {
                event.new_image.as_ref().or(event.old_image.as_ref())
            }
            EventKind::Remove => event.old_image.as_ref().or(event.new_image.as_ref()),
            EventKind::Unknown => {
                debug!(sequence = event.sequence, "Skipping event with unrecognized type tag");
                return Ok(None);
            }
        };

        let image = image.ok_or(DecodeError::MissingSnapshot {
            sequence: event.sequence,
        })?;

        let key = self.required_attribute(image, &self.key_attribute, event.sequence)?;

        let operation = match event.kind {
            EventKind::Remove => Operation::Remove,
            _ => {
                let value = image
                    .get(&self.value_attribute)
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| DecodeError::MissingValue {
                        attribute: self.value_attribute.clone(),
                        sequence: event.sequence,
                    })?;
                Operation::Upsert {
                    value: value.to_string(),
                }
            }
        };

        Ok(Some(ChangeRecord {
            key,
            operation,
            sequence: event.sequence,
        }))
    }

    fn required_attribute(
        &self,
        image: &RowImage,
        attribute: &str,
        sequence: u64,
    ) -> Result<String, DecodeError> {
        image
            .get(attribute)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .ok_or_else(|| DecodeError::MissingKey {
                attribute: attribute.to_string(),
                sequence,
            })
    }
}
