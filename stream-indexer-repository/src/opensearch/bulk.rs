//! Encoding of `_bulk` request bodies and decoding of their responses.
//!
//! Kept free of any client so both directions can be tested without a cluster.

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::errors::SearchIndexError;
use crate::opensearch::index_config::IndexConfig;
use crate::types::{BulkItemResult, BulkItemStatus, IndexDocumentRequest};

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    items: Vec<HashMap<String, BulkResponseItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkResponseItem {
    #[serde(rename = "_index", default)]
    index: Option<String>,
    #[serde(rename = "_id", default)]
    id: Option<String>,
    status: u16,
    #[serde(default)]
    error: Option<Value>,
}

/// Build the newline-delimited operations of a bulk request.
///
/// Each document produces an `index` action line followed by its source.
/// `index` (rather than `create`) replaces existing documents, which keeps
/// replays idempotent.
pub(crate) fn bulk_operations(config: &IndexConfig, requests: &[IndexDocumentRequest]) -> Vec<Value> {
    let mut operations = Vec::with_capacity(requests.len() * 2);
    for request in requests {
        operations.push(json!({
            "index": {
                "_index": config.target_index(request.timestamp_ms),
                "_id": request.document_id
            }
        }));
        operations.push(Value::Object(request.source.clone()));
    }
    operations
}

/// Turn a bulk response body into one result per request.
///
/// OpenSearch answers items in request order. A response whose item count
/// does not match the request is reported as a parse error so the caller
/// retries the whole request instead of guessing which documents landed.
pub(crate) fn parse_bulk_response(
    body: Value,
    requests: &[IndexDocumentRequest],
    config: &IndexConfig,
) -> Result<Vec<BulkItemResult>, SearchIndexError> {
    let response: BulkResponse = serde_json::from_value(body)
        .map_err(|e| SearchIndexError::parse(format!("Invalid bulk response: {}", e)))?;

    if response.items.len() != requests.len() {
        return Err(SearchIndexError::parse(format!(
            "Bulk response has {} items for {} documents",
            response.items.len(),
            requests.len()
        )));
    }

    let mut results = Vec::with_capacity(requests.len());
    for (request, item) in requests.iter().zip(response.items) {
        let Some(item) = item.into_values().next() else {
            return Err(SearchIndexError::parse("Empty bulk response item"));
        };

        let reason = item
            .error
            .as_ref()
            .map(describe_item_error)
            .unwrap_or_else(|| format!("status {}", item.status));

        results.push(BulkItemResult {
            index: item
                .index
                .unwrap_or_else(|| config.target_index(request.timestamp_ms)),
            document_id: item.id.unwrap_or_else(|| request.document_id.clone()),
            status: BulkItemStatus::from_item_status(item.status, reason),
        });
    }

    if !response.errors && results.iter().any(|r| r.status != BulkItemStatus::Indexed) {
        tracing::debug!("Bulk response reported no errors but contains failed items");
    }

    Ok(results)
}

fn describe_item_error(error: &Value) -> String {
    let kind = error["type"].as_str().unwrap_or("unknown_error");
    match error["reason"].as_str() {
        Some(reason) => format!("{}: {}", kind, reason),
        None => kind.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn request(id: &str, timestamp_ms: Option<i64>) -> IndexDocumentRequest {
        let mut source = Map::new();
        source.insert("title".to_string(), json!(format!("doc {}", id)));
        IndexDocumentRequest {
            document_id: id.to_string(),
            timestamp_ms,
            source,
        }
    }

    #[test]
    fn test_bulk_operations_fixed_index() {
        let config = IndexConfig::new("wikimedia");
        let operations = bulk_operations(&config, &[request("a", None), request("b", None)]);

        assert_eq!(operations.len(), 4);
        assert_eq!(operations[0]["index"]["_index"], "wikimedia");
        assert_eq!(operations[0]["index"]["_id"], "a");
        assert_eq!(operations[1]["title"], "doc a");
        assert_eq!(operations[2]["index"]["_id"], "b");
        assert_eq!(operations[3]["title"], "doc b");
    }

    #[test]
    fn test_bulk_operations_daily_index() {
        let config =
            IndexConfig::new("wikimedia").with_naming(crate::opensearch::IndexNaming::Daily);
        let operations = bulk_operations(&config, &[request("a", Some(1_700_000_000_000))]);

        assert_eq!(operations[0]["index"]["_index"], "wikimedia-2023.11.14");
    }

    #[test]
    fn test_replayed_undated_document_targets_same_index() {
        let config =
            IndexConfig::new("wikimedia").with_naming(crate::opensearch::IndexNaming::Daily);
        let first = bulk_operations(&config, &[request("a", None)]);
        let replay = bulk_operations(&config, &[request("a", None)]);

        assert_eq!(first[0]["index"]["_index"], "wikimedia-undated");
        assert_eq!(first[0], replay[0]);

        let body = json!({ "items": [ { "index": { "status": 201 } } ] });
        let results = parse_bulk_response(body, &[request("a", None)], &config).unwrap();
        assert_eq!(results[0].index, "wikimedia-undated");
    }

    #[test]
    fn test_parse_mixed_response() {
        let config = IndexConfig::new("wikimedia");
        let requests = vec![request("a", None), request("b", None), request("c", None)];
        let body = json!({
            "took": 30,
            "errors": true,
            "items": [
                { "index": { "_index": "wikimedia", "_id": "a", "status": 201 } },
                { "index": { "_index": "wikimedia", "_id": "b", "status": 429,
                    "error": { "type": "es_rejected_execution_exception", "reason": "queue full" } } },
                { "index": { "_index": "wikimedia", "_id": "c", "status": 400,
                    "error": { "type": "mapper_parsing_exception", "reason": "failed to parse field [size]" } } }
            ]
        });

        let results = parse_bulk_response(body, &requests, &config).unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].status, BulkItemStatus::Indexed);
        assert_eq!(
            results[1].status,
            BulkItemStatus::Retryable("es_rejected_execution_exception: queue full".to_string())
        );
        assert_eq!(
            results[2].status,
            BulkItemStatus::Permanent(
                "mapper_parsing_exception: failed to parse field [size]".to_string()
            )
        );
        assert_eq!(results[2].document_id, "c");
    }

    #[test]
    fn test_parse_response_count_mismatch() {
        let config = IndexConfig::new("wikimedia");
        let body = json!({
            "errors": false,
            "items": [ { "index": { "_id": "a", "status": 201 } } ]
        });

        let result = parse_bulk_response(body, &[request("a", None), request("b", None)], &config);
        assert!(matches!(result.unwrap_err(), SearchIndexError::ParseError(_)));
    }

    #[test]
    fn test_parse_response_fills_missing_fields() {
        let config = IndexConfig::new("wikimedia");
        let body = json!({ "items": [ { "index": { "status": 200 } } ] });

        let results = parse_bulk_response(body, &[request("a", None)], &config).unwrap();
        assert_eq!(results[0].index, "wikimedia");
        assert_eq!(results[0].document_id, "a");
        assert_eq!(results[0].status, BulkItemStatus::Indexed);
    }
}
