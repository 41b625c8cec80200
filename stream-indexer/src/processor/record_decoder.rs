//! Record decoder implementation.
//!
//! Turns raw broker records into `IndexDocument` structures for indexing.

use std::str::FromStr;

use serde_json::Value;
use sha2::{Digest, Sha256};
use stream_indexer_shared::{IndexDocument, RawRecord};
use tracing::{debug, instrument};

use crate::errors::DecodeError;

/// Pointer to the id field of Wikimedia recent-change events.
pub const DEFAULT_ID_POINTER: &str = "/meta/id";

/// How the id of an indexed document is derived from its record.
///
/// Every strategy is deterministic, so reprocessing a record after a crash or
/// a retry overwrites the document it produced the first time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentIdStrategy {
    /// Value at a JSON pointer inside the payload. Falls back to the record
    /// key, then to the content hash, when the field is missing.
    Field(String),
    /// The record key, falling back to the content hash for keyless records.
    Key,
    /// `<topic>_<partition>_<offset>`.
    Coordinates,
    /// Hex SHA-256 of the payload.
    ContentHash,
}

impl Default for DocumentIdStrategy {
    fn default() -> Self {
        Self::Field(DEFAULT_ID_POINTER.to_string())
    }
}

impl FromStr for DocumentIdStrategy {
    type Err = String;

    /// Parse `field:<pointer>`, `key`, `coordinates` or `hash`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(pointer) = s.strip_prefix("field:") {
            if !pointer.starts_with('/') {
                return Err(format!(
                    "Id field '{}' must be a JSON pointer starting with '/'",
                    pointer
                ));
            }
            return Ok(Self::Field(pointer.to_string()));
        }

        match s.to_lowercase().as_str() {
            "key" => Ok(Self::Key),
            "coordinates" => Ok(Self::Coordinates),
            "hash" => Ok(Self::ContentHash),
            other => Err(format!(
                "Unknown document id strategy '{}', expected field:<pointer>, key, coordinates or hash",
                other
            )),
        }
    }
}

/// Decoder that turns raw records into search documents.
///
/// The decoder never panics on bad input: anything that is not a JSON object
/// comes back as a [`DecodeError`] for the caller to skip.
#[derive(Debug, Clone, Default)]
pub struct RecordDecoder {
    id_strategy: DocumentIdStrategy,
}

impl RecordDecoder {
    /// Create a decoder with the given id strategy.
    pub fn new(id_strategy: DocumentIdStrategy) -> Self {
        Self { id_strategy }
    }

    /// Decode a single record.
    ///
    /// # Arguments
    ///
    /// * `record` - The record to decode
    ///
    /// # Returns
    ///
    /// * `Ok(IndexDocument)` - The document to index
    /// * `Err(DecodeError)` - If the payload is empty, not JSON or not a JSON object
    #[instrument(skip_all, fields(topic = %record.topic, partition = record.partition, offset = record.offset))]
    pub fn decode(&self, record: &RawRecord) -> Result<IndexDocument, DecodeError> {
        if record.value.is_empty() {
            return Err(DecodeError::EmptyPayload);
        }

        let value: Value = serde_json::from_slice(&record.value)
            .map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

        let id = self.document_id(record, &value);

        let source = match value {
            Value::Object(map) => map,
            other => return Err(DecodeError::NotAnObject(json_kind(&other))),
        };

        debug!(document_id = %id, "Decoded record");

        Ok(IndexDocument::new(
            id,
            source,
            record.position(),
            record.value.len(),
        ))
    }

    fn document_id(&self, record: &RawRecord, value: &Value) -> String {
        match &self.id_strategy {
            DocumentIdStrategy::Field(pointer) => match value.pointer(pointer) {
                Some(Value::String(id)) if !id.is_empty() => id.clone(),
                Some(Value::Number(id)) => id.to_string(),
                _ => {
                    debug!(pointer = %pointer, "Id field missing, falling back to key");
                    key_id(record).unwrap_or_else(|| content_hash(&record.value))
                }
            },
            DocumentIdStrategy::Key => {
                key_id(record).unwrap_or_else(|| content_hash(&record.value))
            }
            DocumentIdStrategy::Coordinates => {
                format!("{}_{}_{}", record.topic, record.partition, record.offset)
            }
            DocumentIdStrategy::ContentHash => content_hash(&record.value),
        }
    }
}

fn key_id(record: &RawRecord) -> Option<String> {
    let key = record.key.as_deref().filter(|k| !k.is_empty())?;
    Some(match std::str::from_utf8(key) {
        Ok(text) => text.to_string(),
        Err(_) => hex::encode(key),
    })
}

fn content_hash(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
