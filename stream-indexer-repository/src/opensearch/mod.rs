//! OpenSearch implementation of the search index provider.
//!
//! This module provides a concrete implementation of `SearchIndexProvider`
//! using OpenSearch as the backend.

mod bulk;
mod index_config;
mod provider;

pub use index_config::{IndexConfig, IndexNaming};
pub use provider::OpenSearchProvider;
