//! Aggregation of paginated extraction results.
//!
//! Each page's result is merged into a running, deduplicated collection.
//! Equality is canonical: objects compare by key-sorted serialization,
//! so `{"a":1,"b":2}` and `{"b":2,"a":1}` are one item. Callers watch
//! the unique-item count across pages to decide when a pagination loop
//! has converged.

use std::collections::HashSet;

use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::debug;

use pagelens_core_types::{CoreError, CoreErrorKind};

#[derive(Clone, Debug, PartialEq)]
pub struct AggregateResult {
    pub items: Vec<Value>,
    pub pages: usize,
}

#[derive(Default)]
struct Run {
    items: Vec<Value>,
    seen: HashSet<String>,
    pages: usize,
}

#[derive(Default)]
pub struct Aggregator {
    runs: DashMap<String, Run>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one page's result into the run for `extraction_id`,
    /// returning how many previously unseen items it contributed.
    ///
    /// Accepted shapes: a list, or an object carrying at least one
    /// list-valued field (the first such field in key order is taken).
    /// Anything else fails schema validation with the raw value kept on
    /// the error for the caller to fall back on.
    pub fn add(&self, extraction_id: &str, result: Value) -> Result<usize, CoreError> {
        let items = extract_items(&result).ok_or_else(|| {
            CoreError::new(CoreErrorKind::SchemaValidation)
                .with_hint("expected a list or an object with a list-valued field")
                .with_data(result.clone())
        })?;

        let mut run = self.runs.entry(extraction_id.to_string()).or_default();
        run.pages += 1;
        let mut added = 0usize;
        for item in items {
            let key = canonical_key(item);
            if run.seen.insert(key) {
                run.items.push(item.clone());
                added += 1;
            }
        }
        debug!(
            target: "extraction-cache",
            extraction_id,
            added,
            total = run.items.len(),
            pages = run.pages,
            "page aggregated"
        );
        Ok(added)
    }

    /// The deduplicated items and page count accumulated so far.
    pub fn aggregate(&self, extraction_id: &str) -> AggregateResult {
        match self.runs.get(extraction_id) {
            Some(run) => AggregateResult {
                items: run.items.clone(),
                pages: run.pages,
            },
            None => AggregateResult {
                items: Vec::new(),
                pages: 0,
            },
        }
    }

    pub fn clear(&self, extraction_id: &str) {
        self.runs.remove(extraction_id);
    }
}

fn extract_items(result: &Value) -> Option<&Vec<Value>> {
    match result {
        Value::Array(items) => Some(items),
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            keys.into_iter()
                .find_map(|k| map.get(k).and_then(Value::as_array).map(|_| k))
                .and_then(|k| match map.get(k) {
                    Some(Value::Array(items)) => Some(items),
                    _ => None,
                })
        }
        _ => None,
    }
}

/// Key-sorted serialization; `serde_json::Map` iterates in insertion
/// order, so objects are rebuilt with sorted keys first.
fn canonical_key(value: &Value) -> String {
    canonicalize(value).to_string()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.clone(), canonicalize(v));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overlapping_pages_deduplicate() {
        let agg = Aggregator::new();
        agg.add("run", json!([{"id": 1}, {"id": 2}, {"id": 3}, {"id": 4}, {"id": 5}]))
            .unwrap();
        let added = agg
            .add("run", json!([{"id": 5}, {"id": 6}, {"id": 7}, {"id": 8}, {"id": 9}]))
            .unwrap();
        assert_eq!(added, 4);

        let result = agg.aggregate("run");
        assert_eq!(result.items.len(), 9);
        assert_eq!(result.pages, 2);
    }

    #[test]
    fn key_order_does_not_defeat_dedup() {
        let agg = Aggregator::new();
        agg.add("run", json!([{"a": 1, "b": 2}])).unwrap();
        let added = agg.add("run", json!([{"b": 2, "a": 1}])).unwrap();
        assert_eq!(added, 0);
        assert_eq!(agg.aggregate("run").items.len(), 1);
    }

    #[test]
    fn object_with_list_field_is_unwrapped() {
        let agg = Aggregator::new();
        let added = agg
            .add("run", json!({"total": 2, "items": [{"id": 1}, {"id": 2}]}))
            .unwrap();
        assert_eq!(added, 2);
    }

    #[test]
    fn scalar_result_fails_schema_validation_with_raw_retained() {
        let agg = Aggregator::new();
        let err = agg.add("run", json!("just text")).unwrap_err();
        assert_eq!(err.kind, CoreErrorKind::SchemaValidation);
        assert_eq!(err.data, Some(json!("just text")));
        // The failed page did not count.
        assert_eq!(agg.aggregate("run").pages, 0);
    }

    #[test]
    fn unknown_run_aggregates_empty() {
        let agg = Aggregator::new();
        let result = agg.aggregate("nope");
        assert!(result.items.is_empty());
        assert_eq!(result.pages, 0);
    }
}
