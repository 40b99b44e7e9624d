//! Per-project detection worker.
//!
//! One worker invocation handles one candidate: download the current
//! document version, classify the structural diff against the stored
//! baseline, and deposit the outcome into the cycle's shared batch.

use chrono::Utc;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::detection::batch::DetectionBatch;
use crate::diff::pipeline::{classify, ChangeSet};
use crate::document::{self, endpoint_contract_usage, nested_contract_refs};
use crate::storage::{ChangeRecordRow, DetectionCandidate, DocumentRow};

/// Process one candidate end to end. Failures are isolated to this task:
/// the project stays eligible and is retried on the next cycle.
pub async fn process_candidate(
    http: &reqwest::Client,
    candidate: DetectionCandidate,
    batch: &DetectionBatch,
) {
    let new_version = match document::fetch_document(http, &candidate.project.spec_url).await {
        Ok(doc) => doc,
        Err(e) => {
            warn!(project = %candidate.project.name, error = %e, "candidate fetch failed — skipping this cycle");
            return;
        }
    };

    let baseline: Value = match serde_json::from_str(&candidate.document.body) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(project = %candidate.project.name, error = %e, "stored baseline is not valid JSON — skipping");
            return;
        }
    };

    let changes = classify_documents(&baseline, &new_version);
    record_outcome(candidate, new_version, changes, batch).await;
}

/// Build the candidate version's lookup tables and run the classification
/// pipeline over the structural diff.
pub fn classify_documents(baseline: &Value, candidate: &Value) -> ChangeSet {
    let usage = endpoint_contract_usage(&candidate["paths"]);
    let nested = nested_contract_refs(&candidate["definitions"]);
    classify(baseline, candidate, &usage, &nested)
}

/// Deposit the decision for one processed candidate:
/// - drift + open record → complete the record (update),
/// - drift + no record → new terminal record with empty provenance (create),
/// - no drift + open record → the claimed change never materialized (delete),
/// - no drift + no record → nothing.
/// Whenever drift was found, the baseline document is also queued for
/// wholesale replacement.
pub async fn record_outcome(
    candidate: DetectionCandidate,
    new_version: Value,
    changes: ChangeSet,
    batch: &DetectionBatch,
) {
    let DetectionCandidate {
        project,
        open_record,
        ..
    } = candidate;

    if changes.is_empty() {
        if let Some(open) = open_record {
            batch.push_delete(open.id).await;
        }
        return;
    }

    let changes_json = match serde_json::to_string(&changes) {
        Ok(json) => json,
        Err(e) => {
            warn!(project = %project.name, error = %e, "change set not serializable — skipping");
            return;
        }
    };
    let now = Utc::now().to_rfc3339();

    match open_record {
        Some(mut open) => {
            open.changes = changes_json;
            open.changes_added_at = Some(now);
            batch.push_update(open).await;
        }
        None => {
            batch
                .push_create(ChangeRecordRow {
                    id: Uuid::new_v4().to_string(),
                    project_id: project.id.clone(),
                    provenance: "[]".to_string(),
                    changes: changes_json,
                    changes_added_at: Some(now.clone()),
                    created_at: now,
                })
                .await;
        }
    }

    batch
        .push_document(DocumentRow {
            project_id: project.id,
            body: new_version.to_string(),
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ProjectRow;
    use serde_json::json;

    fn project() -> ProjectRow {
        ProjectRow {
            id: "p1".to_string(),
            name: "petstore".to_string(),
            spec_url: "http://specs.example.com/petstore.json".to_string(),
            use_vcs: false,
            account_id: None,
            repo_name: None,
            repo_branch: None,
            webhook_id: None,
            created_at: "t0".to_string(),
            updated_at: "t0".to_string(),
        }
    }

    fn open_record() -> ChangeRecordRow {
        ChangeRecordRow {
            id: "r1".to_string(),
            project_id: "p1".to_string(),
            provenance: r#"[{"pushed_by":"jdoe","timestamp":"t1","commit_urls":[]}]"#.to_string(),
            changes: "{}".to_string(),
            changes_added_at: None,
            created_at: "t1".to_string(),
        }
    }

    fn candidate(open: Option<ChangeRecordRow>) -> DetectionCandidate {
        DetectionCandidate {
            project: project(),
            document: DocumentRow {
                project_id: "p1".to_string(),
                body: "{}".to_string(),
            },
            open_record: open,
        }
    }

    fn drift() -> ChangeSet {
        let baseline = json!({"paths": {}, "definitions": {}});
        let new_version = json!({"paths": {"/pet": {}}, "definitions": {}});
        classify_documents(&baseline, &new_version)
    }

    #[tokio::test]
    async fn drift_with_open_record_updates_it() {
        let batch = DetectionBatch::new();
        record_outcome(candidate(Some(open_record())), json!({}), drift(), &batch).await;

        let data = batch.into_data();
        assert_eq!(data.records_to_update.len(), 1);
        assert!(data.records_to_create.is_empty());
        assert!(data.records_to_delete.is_empty());
        assert_eq!(data.documents_to_update.len(), 1);

        let updated = &data.records_to_update[0];
        assert_eq!(updated.id, "r1");
        assert!(!updated.is_open());
        assert!(updated.changes_added_at.is_some());
        // Provenance gathered by the webhook stays on the completed record.
        assert!(updated.provenance.contains("jdoe"));
    }

    #[tokio::test]
    async fn drift_without_open_record_creates_a_terminal_record() {
        let batch = DetectionBatch::new();
        record_outcome(candidate(None), json!({}), drift(), &batch).await;

        let data = batch.into_data();
        assert_eq!(data.records_to_create.len(), 1);
        assert!(data.records_to_update.is_empty());

        let created = &data.records_to_create[0];
        assert_eq!(created.project_id, "p1");
        assert_eq!(created.provenance, "[]");
        assert!(!created.is_open());
    }

    #[tokio::test]
    async fn no_drift_deletes_a_stale_open_record() {
        let batch = DetectionBatch::new();
        record_outcome(
            candidate(Some(open_record())),
            json!({}),
            ChangeSet::default(),
            &batch,
        )
        .await;

        let data = batch.into_data();
        assert_eq!(data.records_to_delete, vec!["r1".to_string()]);
        assert!(data.records_to_create.is_empty());
        assert!(data.records_to_update.is_empty());
        assert!(data.documents_to_update.is_empty());
    }

    #[tokio::test]
    async fn no_drift_and_no_record_is_a_no_op() {
        let batch = DetectionBatch::new();
        record_outcome(candidate(None), json!({}), ChangeSet::default(), &batch).await;
        assert!(batch.into_data().is_empty());
    }

    #[tokio::test]
    async fn document_replacement_rides_along_with_drift() {
        let batch = DetectionBatch::new();
        let new_version = json!({"paths": {"/pet": {}}, "definitions": {}});
        record_outcome(candidate(None), new_version.clone(), drift(), &batch).await;

        let data = batch.into_data();
        assert_eq!(data.documents_to_update.len(), 1);
        let stored: Value = serde_json::from_str(&data.documents_to_update[0].body).unwrap();
        assert_eq!(stored, new_version);
    }
}
