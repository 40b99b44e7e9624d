//! Shared result buckets for one detection cycle.

use tokio::sync::Mutex;

use crate::storage::{ChangeRecordRow, DetectionBatchData, DocumentRow};

/// Four append-only result lists, one per outcome category, each behind its
/// own lock so workers only contend when they land in the same bucket.
#[derive(Default)]
pub struct DetectionBatch {
    records_to_create: Mutex<Vec<ChangeRecordRow>>,
    records_to_update: Mutex<Vec<ChangeRecordRow>>,
    records_to_delete: Mutex<Vec<String>>,
    documents_to_update: Mutex<Vec<DocumentRow>>,
}

impl DetectionBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_create(&self, record: ChangeRecordRow) {
        self.records_to_create.lock().await.push(record);
    }

    pub async fn push_update(&self, record: ChangeRecordRow) {
        self.records_to_update.lock().await.push(record);
    }

    pub async fn push_delete(&self, record_id: String) {
        self.records_to_delete.lock().await.push(record_id);
    }

    pub async fn push_document(&self, document: DocumentRow) {
        self.documents_to_update.lock().await.push(document);
    }

    /// Collapse into plain data. Only valid once all workers have joined —
    /// sole ownership proves no lock is still held.
    pub fn into_data(self) -> DetectionBatchData {
        DetectionBatchData {
            records_to_create: self.records_to_create.into_inner(),
            records_to_update: self.records_to_update.into_inner(),
            records_to_delete: self.records_to_delete.into_inner(),
            documents_to_update: self.documents_to_update.into_inner(),
        }
    }
}
