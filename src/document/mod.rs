//! Spec document acquisition and analysis.
//!
//! A tracked document is the JSON API-specification file monitored for
//! structural drift. This module fetches candidate versions over HTTP,
//! validates the top-level document shape, and precomputes the two lookup
//! tables the classification pipeline needs: which endpoints use a contract,
//! and which contracts are nested inside other contracts.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

/// Top-level sections a spec document must carry to be tracked.
pub const REQUIRED_SECTIONS: [&str; 6] =
    ["swagger", "info", "host", "schemes", "paths", "definitions"];

/// contract name → endpoints ("method path") that use it.
pub type ContractUsage = BTreeMap<String, Vec<String>>;

/// contract name → contract names referenced inside it.
pub type NestedContracts = BTreeMap<String, Vec<String>>;

#[derive(Debug, Error)]
pub enum DocumentError {
    /// Network-level failure while downloading the document.
    #[error("failed to fetch spec document: {0}")]
    Fetch(#[source] reqwest::Error),
    /// The response body could not be decoded as JSON.
    #[error("spec document body is not valid JSON: {0}")]
    NotJson(#[source] reqwest::Error),
    /// The document parses but is not a spec document we can track.
    #[error("spec document is missing required section `{0}`")]
    MissingSection(&'static str),
}

impl DocumentError {
    /// Transient failures are retried on the next detection cycle; the rest
    /// indicate a document that cannot be tracked as-is.
    pub fn is_transient(&self) -> bool {
        matches!(self, DocumentError::Fetch(_))
    }
}

/// Download and JSON-decode the document at `url`.
///
/// The client's configured timeout applies. HTTP error statuses are not
/// special-cased here: a non-JSON error page simply fails decoding, which
/// callers treat the same as any other malformed body.
pub async fn fetch_document(http: &reqwest::Client, url: &str) -> Result<Value, DocumentError> {
    let response = http.get(url).send().await.map_err(DocumentError::Fetch)?;
    response.json::<Value>().await.map_err(DocumentError::NotJson)
}

/// Check that `doc` carries every required top-level section.
pub fn validate_structure(doc: &Value) -> Result<(), DocumentError> {
    for section in REQUIRED_SECTIONS {
        if doc.get(section).is_none() {
            return Err(DocumentError::MissingSection(section));
        }
    }
    Ok(())
}

/// Map each contract to the endpoints that use it.
///
/// For every `method` under every `path`, the first `$ref` encountered in the
/// operation body (depth-first, keys before nested values) names the contract
/// the endpoint works with; the endpoint is recorded as `"method path"`.
pub fn endpoint_contract_usage(paths: &Value) -> ContractUsage {
    let mut usage = ContractUsage::new();
    let Some(paths) = paths.as_object() else {
        return usage;
    };

    for (path, methods) in paths {
        let Some(methods) = methods.as_object() else {
            continue;
        };
        for (method, details) in methods {
            let Some(reference) = first_ref(details) else {
                continue;
            };
            usage
                .entry(contract_name(reference))
                .or_default()
                .push(format!("{method} {path}"));
        }
    }

    usage
}

/// Map each contract to the contracts referenced anywhere inside it.
/// Contracts with no nested references are omitted.
pub fn nested_contract_refs(definitions: &Value) -> NestedContracts {
    let mut nested = NestedContracts::new();
    let Some(definitions) = definitions.as_object() else {
        return nested;
    };

    for (contract, body) in definitions {
        let mut refs = Vec::new();
        collect_refs(body, &mut refs);
        if !refs.is_empty() {
            nested.insert(contract.clone(), refs);
        }
    }

    nested
}

/// First `$ref` value in `value`, traversing depth-first with each key
/// checked before its value is descended into.
fn first_ref(value: &Value) -> Option<&str> {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                if k == "$ref" {
                    if let Some(s) = v.as_str() {
                        return Some(s);
                    }
                }
                if let Some(found) = first_ref(v) {
                    return Some(found);
                }
            }
            None
        }
        Value::Array(items) => items.iter().find_map(first_ref),
        _ => None,
    }
}

/// Collect every `$ref` value in `value`, as contract names, in traversal
/// order.
fn collect_refs(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                if k == "$ref" {
                    if let Some(s) = v.as_str() {
                        out.push(contract_name(s));
                    }
                }
                collect_refs(v, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_refs(item, out);
            }
        }
        _ => {}
    }
}

/// `#/definitions/Pet` → `Pet`.
fn contract_name(reference: &str) -> String {
    reference
        .rsplit('/')
        .next()
        .unwrap_or(reference)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn usage_takes_the_first_ref_per_operation() {
        let paths = json!({
            "/pet": {
                "post": {
                    "parameters": [{"schema": {"$ref": "#/definitions/Pet"}}],
                    "responses": {"200": {"schema": {"$ref": "#/definitions/ApiResponse"}}}
                }
            }
        });
        let usage = endpoint_contract_usage(&paths);
        assert_eq!(usage.get("Pet"), Some(&vec!["post /pet".to_string()]));
        assert!(!usage.contains_key("ApiResponse"));
    }

    #[test]
    fn usage_records_every_method_using_a_contract() {
        let paths = json!({
            "/pet": {
                "get": {"responses": {"200": {"schema": {"$ref": "#/definitions/Pet"}}}},
                "post": {"responses": {"200": {"schema": {"$ref": "#/definitions/Pet"}}}}
            },
            "/store": {
                "get": {"responses": {}}
            }
        });
        let usage = endpoint_contract_usage(&paths);
        assert_eq!(
            usage.get("Pet"),
            Some(&vec!["get /pet".to_string(), "post /pet".to_string()])
        );
    }

    #[test]
    fn nested_refs_are_collected_per_contract() {
        let definitions = json!({
            "Order": {"properties": {"pet": {"$ref": "#/definitions/Pet"}, "tag": {"$ref": "#/definitions/Tag"}}},
            "Pet": {"properties": {"id": {"type": "integer"}}}
        });
        let nested = nested_contract_refs(&definitions);
        assert_eq!(
            nested.get("Order"),
            Some(&vec!["Pet".to_string(), "Tag".to_string()])
        );
        assert!(!nested.contains_key("Pet"));
    }

    #[test]
    fn structure_validation_names_the_missing_section() {
        let doc = json!({
            "swagger": "2.0", "info": {}, "host": "x", "schemes": [], "paths": {}
        });
        match validate_structure(&doc) {
            Err(DocumentError::MissingSection(s)) => assert_eq!(s, "definitions"),
            other => panic!("expected MissingSection, got {other:?}"),
        }
    }

    #[test]
    fn complete_document_validates() {
        let doc = json!({
            "swagger": "2.0", "info": {}, "host": "x", "schemes": [],
            "paths": {}, "definitions": {}
        });
        assert!(validate_structure(&doc).is_ok());
    }
}
