//! # Stream Indexer Shared
//!
//! This crate defines the data structures shared across the stream indexer:
//! raw broker records, the documents decoded from them, and the partition and
//! offset coordinates used to track delivery.

pub mod types;

pub use types::index_document::{IndexDocument, RecordPosition};
pub use types::partition::{describe_ranges, OffsetRange, PartitionRange, TopicPartition};
pub use types::raw_record::RawRecord;
