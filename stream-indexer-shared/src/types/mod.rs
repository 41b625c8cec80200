//! This module defines the core data structures used across the stream indexer.

pub mod index_document;
pub mod partition;
pub mod raw_record;

pub use index_document::{IndexDocument, RecordPosition};
pub use partition::{OffsetRange, PartitionRange, TopicPartition};
pub use raw_record::RawRecord;
