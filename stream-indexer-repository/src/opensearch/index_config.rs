//! OpenSearch index configuration and settings.
//!
//! This module defines how documents are routed to indexes and the settings
//! used when the indexer creates an index or an index template.

use std::str::FromStr;

use serde_json::{json, Value};

use crate::errors::SearchIndexError;
use crate::utils::dated_index_name;

/// How the target index of a document is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexNaming {
    /// Every document goes to the configured index.
    Fixed,
    /// Documents go to `{name}-YYYY.MM.DD` based on the record timestamp.
    Daily,
}

impl FromStr for IndexNaming {
    type Err = SearchIndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "daily" => Ok(Self::Daily),
            other => Err(SearchIndexError::validation(format!(
                "Unknown index naming '{}', expected 'fixed' or 'daily'",
                other
            ))),
        }
    }
}

/// Configuration for the search index.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// The index name, or the prefix of dated indexes.
    pub name: String,
    /// How documents are routed to indexes.
    pub naming: IndexNaming,
    /// Number of primary shards for created indexes.
    pub shards: u32,
    /// Number of replicas for created indexes.
    pub replicas: u32,
}

impl IndexConfig {
    /// Create a configuration for a single fixed index with one shard and one replica.
    ///
    /// # Arguments
    ///
    /// * `name` - The index name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            naming: IndexNaming::Fixed,
            shards: 1,
            replicas: 1,
        }
    }

    pub fn with_naming(mut self, naming: IndexNaming) -> Self {
        self.naming = naming;
        self
    }

    pub fn with_shards(mut self, shards: u32, replicas: u32) -> Self {
        self.shards = shards;
        self.replicas = replicas;
        self
    }

    /// The index a document with the given record timestamp is written to.
    pub fn target_index(&self, timestamp_ms: Option<i64>) -> String {
        match self.naming {
            IndexNaming::Fixed => self.name.clone(),
            IndexNaming::Daily => dated_index_name(&self.name, timestamp_ms),
        }
    }

    /// Pattern matching every index this configuration can write to.
    pub fn index_pattern(&self) -> String {
        match self.naming {
            IndexNaming::Fixed => self.name.clone(),
            IndexNaming::Daily => format!("{}-*", self.name),
        }
    }

    /// Body used to create the index.
    ///
    /// Mappings are left dynamic: the indexer forwards arbitrary JSON objects
    /// and lets the index infer field types.
    pub fn index_settings(&self) -> Value {
        json!({
            "settings": {
                "number_of_shards": self.shards,
                "number_of_replicas": self.replicas
            },
            "mappings": {
                "dynamic": true
            }
        })
    }

    /// Body of the index template backing dated indexes.
    pub fn index_template(&self) -> Value {
        json!({
            "index_patterns": [self.index_pattern()],
            "template": self.index_settings()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_target_index() {
        let config = IndexConfig::new("wikimedia");
        assert_eq!(config.target_index(Some(1_700_000_000_000)), "wikimedia");
        assert_eq!(config.target_index(None), "wikimedia");
        assert_eq!(config.index_pattern(), "wikimedia");
    }

    #[test]
    fn test_daily_target_index() {
        let config = IndexConfig::new("wikimedia").with_naming(IndexNaming::Daily);
        assert_eq!(
            config.target_index(Some(1_700_000_000_000)),
            "wikimedia-2023.11.14"
        );
        assert_eq!(config.index_pattern(), "wikimedia-*");
    }

    #[test]
    fn test_index_settings_structure() {
        let settings = IndexConfig::new("wikimedia").with_shards(3, 2).index_settings();

        assert_eq!(settings["settings"]["number_of_shards"], 3);
        assert_eq!(settings["settings"]["number_of_replicas"], 2);
        assert_eq!(settings["mappings"]["dynamic"], true);
    }

    #[test]
    fn test_index_template_structure() {
        let template = IndexConfig::new("orders")
            .with_naming(IndexNaming::Daily)
            .index_template();

        assert_eq!(template["index_patterns"][0], "orders-*");
        assert_eq!(template["template"]["settings"]["number_of_shards"], 1);
    }

    #[test]
    fn test_parse_naming() {
        assert_eq!("fixed".parse::<IndexNaming>().unwrap(), IndexNaming::Fixed);
        assert_eq!(" Daily ".parse::<IndexNaming>().unwrap(), IndexNaming::Daily);
        assert!(matches!(
            "hourly".parse::<IndexNaming>().unwrap_err(),
            SearchIndexError::ValidationError(_)
        ));
    }
}
