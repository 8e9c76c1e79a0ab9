//! GraphQL request normalization.
//!
//! Turns the raw body of a GraphQL-over-HTTP request into canonical text so
//! requests that differ only in formatting map to the same cache key:
//!
//! - the body is read as a JSON envelope (`query`, `operationName`,
//!   `variables`); a body that is not one is taken as the document itself
//! - the document is parsed and re-printed with comments and whitespace
//!   dropped and arguments sorted (see [`normalize_document`])
//! - variables are rendered as JSON with sorted object keys
//!
//! A document that does not parse keeps its raw text. That case is reported
//! through [`Normalization::Failed`] and a warning, never silently.

mod normalize;
mod operation;

use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

pub use normalize::normalize_document;
pub use operation::{detect as detect_operation, detect_lexically};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("invalid GraphQL document: {0}")]
    Parse(String),

    #[error("document holds no operation to normalize")]
    EmptyDocument,
}

/// The three GraphQL operation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

/// How the canonical text of a request was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    /// The document parsed and was rendered in canonical form.
    Applied,
    /// Normalization is turned off; the raw body is used.
    Disabled,
    /// The document did not parse; the raw body is used and two
    /// differently formatted copies of it will not share a key.
    Failed,
}

/// Canonical form of one request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRequest {
    pub text: String,
    pub operation: Option<OperationKind>,
    pub normalization: Normalization,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    query: String,
    #[serde(default)]
    operation_name: Option<String>,
    #[serde(default)]
    variables: Option<JsonValue>,
}

/// Normalizes a bare GraphQL document, falling back to the input text when it
/// does not parse.
///
/// ```
/// use graphql_proxy_cache::graphql::normalize;
///
/// assert_eq!(normalize("{ a(y: 1, x: 2) }"), normalize("{\n  a(x: 2, y: 1) # two args\n}"));
/// assert_eq!(normalize("{ broken"), "{ broken");
/// ```
pub fn normalize(source_text: &str) -> String {
    match normalize_document(source_text, None) {
        Ok(text) => text,
        Err(error) => {
            tracing::warn!(%error, "GraphQL normalization failed, using raw document text");
            source_text.to_owned()
        }
    }
}

/// Produces the text a cache key is computed from, plus the operation kind.
///
/// With `normalize` unset the raw body is returned unchanged, but the
/// operation kind is still detected so mutations are never cached.
pub fn canonicalize(body: &str, normalize: bool) -> CanonicalRequest {
    let envelope = serde_json::from_str::<Envelope>(body).ok();

    let (document, operation_name) = match &envelope {
        Some(envelope) => (envelope.query.as_str(), envelope.operation_name.as_deref()),
        None => (body, None),
    };

    let operation = detect_operation(document, operation_name);

    if !normalize {
        return CanonicalRequest {
            text: body.to_owned(),
            operation: operation.or_else(|| detect_lexically(document)),
            normalization: Normalization::Disabled,
        };
    }

    let normalized = match normalize_document(document, operation_name) {
        Ok(normalized) => normalized,
        Err(error) => {
            tracing::warn!(%error, "GraphQL normalization failed, hashing raw request body");
            return CanonicalRequest {
                text: body.to_owned(),
                operation: operation.or_else(|| detect_lexically(document)),
                normalization: Normalization::Failed,
            };
        }
    };

    let variables = envelope
        .as_ref()
        .and_then(|envelope| envelope.variables.as_ref())
        .map(sorted_json)
        .filter(|variables| !is_empty_json(variables))
        .unwrap_or(JsonValue::Null);

    // A JSON array keeps the three parts unambiguous.
    let text = serde_json::json!([normalized, operation_name, variables]).to_string();

    CanonicalRequest {
        text,
        operation,
        normalization: Normalization::Applied,
    }
}

fn sorted_json(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            JsonValue::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sorted_json(v)))
                    .collect(),
            )
        }
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(sorted_json).collect()),
        other => other.clone(),
    }
}

fn is_empty_json(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::Object(map) => map.is_empty(),
        _ => false,
    }
}
