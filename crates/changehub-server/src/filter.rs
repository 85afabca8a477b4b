//! Translation of subscription filters into upstream match stages.
//!
//! Change events wrap the changed document under `fullDocument`, so plain
//! field names are rewritten to `fullDocument.<field>`. Operator keys (`$and`,
//! `$gt`, ...) stay where they are.

use bson::{doc, Bson, Document};

/// Upstream query-operator sigil.
const OPERATOR_SIGIL: char = '$';

/// Sub-path holding the post-change document in a change event.
const FULL_DOCUMENT_PREFIX: &str = "fullDocument.";

/// Translate a filter object into a match expression over change events.
///
/// Nested filter objects are translated the same way. Every other value,
/// lists included, is copied as written. Key order is preserved.
pub fn to_match_expression(filters: &Document) -> Document {
    filters
        .iter()
        .map(|(key, value)| {
            let key = if key.starts_with(OPERATOR_SIGIL) {
                key.clone()
            } else {
                format!("{}{}", FULL_DOCUMENT_PREFIX, key)
            };
            let value = match value {
                Bson::Document(nested) => Bson::Document(to_match_expression(nested)),
                other => other.clone(),
            };
            (key, value)
        })
        .collect()
}

/// Build the aggregation pipeline for a feed. Empty filters mean no stage.
pub fn build_pipeline(filters: &Document) -> Vec<Document> {
    if filters.is_empty() {
        return Vec::new();
    }
    vec![doc! { "$match": to_match_expression(filters) }]
}
