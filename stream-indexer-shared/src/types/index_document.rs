//! Document types for the search index.
//!
//! This module defines the document structure that is written to the search
//! engine, together with the broker coordinates it was decoded from.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::partition::TopicPartition;

/// Where a document came from in the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPosition {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp: Option<i64>,
}

impl RecordPosition {
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }
}

impl fmt::Display for RecordPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

/// Document representation for the search index.
///
/// # Fields
///
/// - `id`: Document id in the index. Derived deterministically from the
///   record so that reprocessing the same record overwrites the same document.
/// - `source`: The JSON object that is indexed.
/// - `origin`: Broker position of the record the document was decoded from.
/// - `size_bytes`: Size of the original payload, used for batch byte limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub id: String,
    pub source: Map<String, Value>,
    pub origin: RecordPosition,
    pub size_bytes: usize,
}

impl IndexDocument {
    /// Create a new document.
    ///
    /// # Example
    ///
    /// ```
    /// use serde_json::{json, Map};
    /// use stream_indexer_shared::{IndexDocument, RecordPosition};
    ///
    /// let mut source = Map::new();
    /// source.insert("title".to_string(), json!("Main Page"));
    ///
    /// let doc = IndexDocument::new(
    ///     "abc-123",
    ///     source,
    ///     RecordPosition {
    ///         topic: "wikimedia_recentchange".to_string(),
    ///         partition: 0,
    ///         offset: 42,
    ///         timestamp: None,
    ///     },
    ///     27,
    /// );
    /// assert_eq!(doc.id, "abc-123");
    /// ```
    pub fn new(
        id: impl Into<String>,
        source: Map<String, Value>,
        origin: RecordPosition,
        size_bytes: usize,
    ) -> Self {
        Self {
            id: id.into(),
            source,
            origin,
            size_bytes,
        }
    }

    pub fn topic_partition(&self) -> TopicPartition {
        self.origin.topic_partition()
    }
}
