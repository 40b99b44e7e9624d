//! Classification pipeline for spec-document diffs.
//!
//! Interprets the raw structural diff between two spec documents as domain
//! changes: additions and removals of endpoints, methods, contracts, and
//! contract properties. The pipeline is a linear chain of stage functions
//! (filter → route → transform → save) invoked synchronously per diff op,
//! with all accumulation state private to the pipeline. It must be closed
//! explicitly once the diff sequence is exhausted; closing consumes the
//! pipeline and yields the accumulated [`ChangeSet`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::diff::{DiffOp, Path, Segment};
use crate::document::{ContractUsage, NestedContracts};

// ─── Output types ────────────────────────────────────────────────────────────

/// Where a change happened. Endpoint/method/contract changes carry a plain
/// location string; contract-property changes carry the contract context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Location {
    Path(String),
    Contract(ContractContext),
}

/// Context for a contract-property change: the contract itself, the endpoints
/// that use it, and the contracts it is nested inside (if any).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractContext {
    pub contract: String,
    pub endpoints: Vec<String>,
    pub nested_in_other_contracts: Option<Vec<String>>,
}

/// One categorized change: where it happened and what was added or removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    #[serde(rename = "where")]
    pub location: Location,
    pub what: Vec<String>,
}

/// The four per-category change lists for one direction (added or removed).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryChanges {
    pub endpoints: Vec<ChangeEntry>,
    pub methods: Vec<ChangeEntry>,
    pub contracts: Vec<ChangeEntry>,
    pub contract_properties: Vec<ChangeEntry>,
}

impl CategoryChanges {
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
            && self.methods.is_empty()
            && self.contracts.is_empty()
            && self.contract_properties.is_empty()
    }
}

/// Full categorized diff between two spec-document versions. This is the
/// shape persisted on a change record and served to reviewers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub additions: CategoryChanges,
    pub removals: CategoryChanges,
}

impl ChangeSet {
    /// True when no change was registered in any of the eight lists.
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }
}

// ─── Pipeline ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum ChangeKind {
    Addition,
    Removal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Endpoints,
    Methods,
    Contracts,
    ContractProperties,
}

pub struct DiffClassificationPipeline<'a> {
    usage: &'a ContractUsage,
    nested: &'a NestedContracts,
    changes: ChangeSet,
}

impl<'a> DiffClassificationPipeline<'a> {
    /// Build a pipeline over the lookup tables precomputed from the candidate
    /// document version.
    pub fn new(usage: &'a ContractUsage, nested: &'a NestedContracts) -> Self {
        Self {
            usage,
            nested,
            changes: ChangeSet::default(),
        }
    }

    /// Push one diff op through the stage chain.
    pub fn feed(&mut self, op: &DiffOp) {
        let Some((kind, path, entries)) = Self::filter(op) else {
            return;
        };
        let Some(category) = Self::route(path) else {
            return;
        };
        let Some(entry) = self.transform(category, path, entries) else {
            return;
        };
        self.save(kind, category, entry);
    }

    /// Close the pipeline, releasing all stage state and yielding the result.
    pub fn close(self) -> ChangeSet {
        self.changes
    }

    /// Stage 1 — only additions and removals participate in the taxonomy;
    /// value edits (`change` ops) carry no category and are dropped.
    fn filter(op: &DiffOp) -> Option<(ChangeKind, &Path, &[(Segment, Value)])> {
        match op {
            DiffOp::Add { path, entries } => Some((ChangeKind::Addition, path, entries)),
            DiffOp::Remove { path, entries } => Some((ChangeKind::Removal, path, entries)),
            DiffOp::Change { .. } => None,
        }
    }

    /// Stage 2 — route by path shape. Precedence mirrors the document layout:
    /// the endpoints container itself, the definitions container itself,
    /// anything deeper inside the endpoints container, then a contract's
    /// properties object. Everything else (metadata edits and the like) is
    /// dropped silently.
    fn route(path: &Path) -> Option<Category> {
        let last = path.last().and_then(Segment::key);
        if last == Some("paths") {
            return Some(Category::Endpoints);
        }
        if last == Some("definitions") {
            return Some(Category::Contracts);
        }
        if path.first().and_then(Segment::key) == Some("paths") && path.len() > 1 {
            return Some(Category::Methods);
        }
        if last == Some("properties") {
            return Some(Category::ContractProperties);
        }
        None
    }

    /// Stage 3 — shape the routed op into a `{where, what}` entry.
    fn transform(
        &self,
        category: Category,
        path: &Path,
        entries: &[(Segment, Value)],
    ) -> Option<ChangeEntry> {
        let what: Vec<String> = entries.iter().map(|(k, _)| k.as_str()).collect();

        let location = match category {
            Category::Endpoints | Category::Contracts => Location::Path(dotted(path)),
            Category::Methods => {
                // The endpoint is the last key segment of the path.
                let endpoint = path.iter().rev().find_map(Segment::key)?;
                Location::Path(endpoint.to_string())
            }
            Category::ContractProperties => {
                // Path shape is [..., <contract>, "properties"].
                let contract = path.get(path.len().checked_sub(2)?)?.key()?;
                let nested_in: Vec<String> = self
                    .nested
                    .iter()
                    .filter(|(_, inner)| inner.iter().any(|c| c == contract))
                    .map(|(outer, _)| outer.clone())
                    .collect();
                Location::Contract(ContractContext {
                    contract: contract.to_string(),
                    endpoints: self.usage.get(contract).cloned().unwrap_or_default(),
                    nested_in_other_contracts: if nested_in.is_empty() {
                        None
                    } else {
                        Some(nested_in)
                    },
                })
            }
        };

        Some(ChangeEntry { location, what })
    }

    /// Stage 4 — append into the matching result bucket.
    fn save(&mut self, kind: ChangeKind, category: Category, entry: ChangeEntry) {
        let side = match kind {
            ChangeKind::Addition => &mut self.changes.additions,
            ChangeKind::Removal => &mut self.changes.removals,
        };
        let bucket = match category {
            Category::Endpoints => &mut side.endpoints,
            Category::Methods => &mut side.methods,
            Category::Contracts => &mut side.contracts,
            Category::ContractProperties => &mut side.contract_properties,
        };
        bucket.push(entry);
    }
}

fn dotted(path: &Path) -> String {
    path.iter()
        .map(Segment::as_str)
        .collect::<Vec<_>>()
        .join(".")
}

/// Run the full classification: diff the two document versions and feed every
/// op through a pipeline built over the candidate's lookup tables.
pub fn classify(
    baseline: &Value,
    candidate: &Value,
    usage: &ContractUsage,
    nested: &NestedContracts,
) -> ChangeSet {
    let mut pipeline = DiffClassificationPipeline::new(usage, nested);
    for op in crate::diff::diff(baseline, candidate) {
        pipeline.feed(&op);
    }
    pipeline.close()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{endpoint_contract_usage, nested_contract_refs};
    use serde_json::json;

    fn baseline() -> Value {
        json!({
            "swagger": "2.0",
            "info": {"title": "petstore", "version": "1.0.0"},
            "host": "petstore.example.com",
            "schemes": ["https"],
            "paths": {
                "/pet": {
                    "post": {"responses": {"200": {"schema": {"$ref": "#/definitions/Pet"}}}}
                },
                "/pet/{petId}": {
                    "get": {"responses": {"200": {"schema": {"$ref": "#/definitions/Pet"}}}}
                }
            },
            "definitions": {
                "Pet": {"properties": {"id": {"type": "integer"}, "name": {"type": "string"}}},
                "Order": {"properties": {"pet": {"$ref": "#/definitions/Pet"}}}
            }
        })
    }

    fn candidate() -> Value {
        json!({
            "swagger": "2.0",
            "info": {"title": "petstore", "version": "1.1.0"},
            "host": "petstore.example.com",
            "schemes": ["https"],
            "paths": {
                "/pet": {
                    "post": {"responses": {"200": {"schema": {"$ref": "#/definitions/Pet"}}}},
                    "get": {"responses": {"200": {"schema": {"$ref": "#/definitions/Pet"}}}}
                },
                "/pet/findByStatus": {
                    "get": {"responses": {"200": {"schema": {"$ref": "#/definitions/Pet"}}}}
                }
            },
            "definitions": {
                "Pet": {"properties": {"id": {"type": "integer"}, "name": {"type": "string"}, "tags": {"type": "array"}}},
                "Order": {"properties": {"pet": {"$ref": "#/definitions/Pet"}}},
                "Category": {"properties": {"id": {"type": "integer"}}},
                "Tag": {"properties": {"id": {"type": "integer"}}}
            }
        })
    }

    fn run(a: &Value, b: &Value) -> ChangeSet {
        let usage = endpoint_contract_usage(&b["paths"]);
        let nested = nested_contract_refs(&b["definitions"]);
        classify(a, b, &usage, &nested)
    }

    #[test]
    fn identical_documents_classify_to_empty() {
        let doc = baseline();
        let changes = run(&doc, &doc);
        assert!(changes.is_empty());
    }

    #[test]
    fn endpoint_addition_and_removal_are_routed() {
        let changes = run(&baseline(), &candidate());

        let added: Vec<&str> = changes.additions.endpoints[0]
            .what
            .iter()
            .map(String::as_str)
            .collect();
        assert_eq!(added, vec!["/pet/findByStatus"]);
        assert_eq!(
            changes.additions.endpoints[0].location,
            Location::Path("paths".to_string())
        );

        let removed: Vec<&str> = changes.removals.endpoints[0]
            .what
            .iter()
            .map(String::as_str)
            .collect();
        assert_eq!(removed, vec!["/pet/{petId}"]);
    }

    #[test]
    fn method_addition_names_the_endpoint() {
        let changes = run(&baseline(), &candidate());
        assert_eq!(changes.additions.methods.len(), 1);
        let entry = &changes.additions.methods[0];
        assert_eq!(entry.location, Location::Path("/pet".to_string()));
        assert_eq!(entry.what, vec!["get"]);
    }

    #[test]
    fn contract_additions_are_grouped() {
        let changes = run(&baseline(), &candidate());
        assert_eq!(changes.additions.contracts.len(), 1);
        let entry = &changes.additions.contracts[0];
        assert_eq!(entry.location, Location::Path("definitions".to_string()));
        assert_eq!(entry.what, vec!["Category", "Tag"]);
    }

    #[test]
    fn contract_property_carries_usage_and_nesting_context() {
        let changes = run(&baseline(), &candidate());
        assert_eq!(changes.additions.contract_properties.len(), 1);
        let entry = &changes.additions.contract_properties[0];
        assert_eq!(entry.what, vec!["tags"]);
        match &entry.location {
            Location::Contract(ctx) => {
                assert_eq!(ctx.contract, "Pet");
                assert!(ctx.endpoints.contains(&"get /pet".to_string()));
                assert!(ctx.endpoints.contains(&"post /pet".to_string()));
                assert_eq!(
                    ctx.nested_in_other_contracts,
                    Some(vec!["Order".to_string()])
                );
            }
            other => panic!("expected contract context, got {other:?}"),
        }
    }

    #[test]
    fn property_on_unused_contract_yields_empty_context() {
        let a = json!({"paths": {}, "definitions": {"Lone": {"properties": {}}}});
        let b = json!({"paths": {}, "definitions": {"Lone": {"properties": {"x": {}}}}});
        let changes = run(&a, &b);
        let entry = &changes.additions.contract_properties[0];
        match &entry.location {
            Location::Contract(ctx) => {
                assert!(ctx.endpoints.is_empty());
                assert_eq!(ctx.nested_in_other_contracts, None);
            }
            other => panic!("expected contract context, got {other:?}"),
        }
    }

    #[test]
    fn value_edits_and_metadata_changes_are_dropped() {
        // Version bump inside info + host change: neither matches a category.
        let a = json!({"info": {"version": "1.0"}, "host": "a.example.com", "paths": {}, "definitions": {}});
        let b = json!({"info": {"version": "2.0"}, "host": "b.example.com", "paths": {}, "definitions": {}});
        assert!(run(&a, &b).is_empty());
    }

    #[test]
    fn classification_is_deterministic() {
        let a = baseline();
        let b = candidate();
        assert_eq!(run(&a, &b), run(&a, &b));
    }

    #[test]
    fn serialized_shape_matches_the_exposed_contract() {
        let changes = run(&baseline(), &candidate());
        let value = serde_json::to_value(&changes).unwrap();
        assert!(value["additions"]["endpoints"].is_array());
        assert!(value["removals"]["contract_properties"].is_array());
        let prop = &value["additions"]["contract_properties"][0];
        assert_eq!(prop["where"]["contract"], "Pet");
        assert_eq!(prop["what"][0], "tags");
    }
}
