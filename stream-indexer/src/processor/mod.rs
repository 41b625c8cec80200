//! Processor module for the stream indexer ingest.
//!
//! Decodes raw records into search documents.

mod record_decoder;

pub use record_decoder::{DocumentIdStrategy, RecordDecoder, DEFAULT_ID_POINTER};
