//! Storage unit tests — no running daemon, temp-dir SQLite via Storage::new
//! (same migration path as production).

use specwatch::storage::{
    ChangeRecordRow, DetectionBatchData, DocumentRow, Storage, OPEN_CHANGES_SENTINEL,
};

async fn make_storage() -> (Storage, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir failed");
    let storage = Storage::new(dir.path()).await.expect("Storage::new failed");
    (storage, dir)
}

// ─── Open records ────────────────────────────────────────────────────────────

#[tokio::test]
async fn get_or_create_is_idempotent_per_project() {
    let (storage, _dir) = make_storage().await;
    let project = storage
        .create_project("petstore", "http://specs.example.com/p.json", None)
        .await
        .unwrap();

    let first = storage.get_or_create_open_record(&project.id).await.unwrap();
    let second = storage.get_or_create_open_record(&project.id).await.unwrap();

    assert_eq!(first.id, second.id);
    assert!(first.is_open());
    assert_eq!(storage.list_change_records(&project.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_get_or_create_yields_one_record() {
    let (storage, _dir) = make_storage().await;
    let project = storage
        .create_project("petstore", "http://specs.example.com/p.json", None)
        .await
        .unwrap();

    let s1 = storage.clone();
    let s2 = storage.clone();
    let id1 = project.id.clone();
    let id2 = project.id.clone();
    let (a, b) = tokio::join!(
        tokio::spawn(async move { s1.get_or_create_open_record(&id1).await }),
        tokio::spawn(async move { s2.get_or_create_open_record(&id2).await }),
    );
    let a = a.unwrap().unwrap();
    let b = b.unwrap().unwrap();

    assert_eq!(a.id, b.id);
    assert_eq!(storage.list_change_records(&project.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn terminal_records_do_not_satisfy_the_open_lookup() {
    let (storage, _dir) = make_storage().await;
    let project = storage
        .create_project("petstore", "http://specs.example.com/p.json", None)
        .await
        .unwrap();

    // Complete the open record, then ask again — a fresh one must appear.
    let open = storage.get_or_create_open_record(&project.id).await.unwrap();
    let batch = DetectionBatchData {
        records_to_update: vec![ChangeRecordRow {
            changes: r#"{"additions":{}}"#.to_string(),
            changes_added_at: Some("t1".to_string()),
            ..open.clone()
        }],
        ..Default::default()
    };
    storage.apply_detection_batch(&batch).await.unwrap();

    let fresh = storage.get_or_create_open_record(&project.id).await.unwrap();
    assert_ne!(fresh.id, open.id);
    assert_eq!(storage.list_change_records(&project.id).await.unwrap().len(), 2);
}

// ─── Eligibility ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn candidates_cover_unlinked_projects_and_open_records_only() {
    let (storage, _dir) = make_storage().await;
    let account = storage
        .create_account("acme", "BB", "O", "sealed-at", Some("sealed-rt"))
        .await
        .unwrap();

    // Unlinked project with a baseline: always eligible.
    let plain = storage
        .create_project("plain", "http://specs.example.com/plain.json", None)
        .await
        .unwrap();
    storage.create_document(&plain.id, "{}").await.unwrap();

    // VCS-linked project with a baseline: only eligible once a webhook fires.
    let linked = storage
        .create_project(
            "linked",
            "http://specs.example.com/linked.json",
            Some((&account.id, "linked-repo", "main")),
        )
        .await
        .unwrap();
    storage.create_document(&linked.id, "{}").await.unwrap();

    // Unlinked project without a baseline document: never eligible.
    storage
        .create_project("no-doc", "http://specs.example.com/nodoc.json", None)
        .await
        .unwrap();

    let names: Vec<String> = storage
        .list_detection_candidates()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.project.name)
        .collect();
    assert_eq!(names, vec!["plain"]);

    // A webhook-created open record makes the linked project eligible.
    storage.get_or_create_open_record(&linked.id).await.unwrap();
    let candidates = storage.list_detection_candidates().await.unwrap();
    assert_eq!(candidates.len(), 2);
    let linked_candidate = candidates
        .iter()
        .find(|c| c.project.name == "linked")
        .unwrap();
    assert!(linked_candidate.open_record.is_some());
}

// ─── Batch application ───────────────────────────────────────────────────────

#[tokio::test]
async fn batch_failure_rolls_back_every_list() {
    let (storage, _dir) = make_storage().await;
    let project = storage
        .create_project("petstore", "http://specs.example.com/p.json", None)
        .await
        .unwrap();
    storage.create_document(&project.id, "{}").await.unwrap();
    let open = storage.get_or_create_open_record(&project.id).await.unwrap();

    // The update is valid; the create collides with the existing record's
    // primary key and must drag the whole batch down with it.
    let batch = DetectionBatchData {
        records_to_update: vec![ChangeRecordRow {
            changes: r#"{"additions":{}}"#.to_string(),
            changes_added_at: Some("t1".to_string()),
            ..open.clone()
        }],
        records_to_create: vec![ChangeRecordRow {
            id: open.id.clone(),
            project_id: project.id.clone(),
            provenance: "[]".to_string(),
            changes: r#"{"removals":{}}"#.to_string(),
            changes_added_at: Some("t1".to_string()),
            created_at: "t1".to_string(),
        }],
        documents_to_update: vec![DocumentRow {
            project_id: project.id.clone(),
            body: r#"{"replaced": true}"#.to_string(),
        }],
        ..Default::default()
    };

    assert!(storage.apply_detection_batch(&batch).await.is_err());

    // Nothing from the failed batch may be observable.
    let records = storage.list_change_records(&project.id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].changes, OPEN_CHANGES_SENTINEL);
    let document = storage.get_document(&project.id).await.unwrap().unwrap();
    assert_eq!(document.body, "{}");
}

#[tokio::test]
async fn batch_applies_all_four_lists_together() {
    let (storage, _dir) = make_storage().await;
    let keep = storage
        .create_project("keep", "http://specs.example.com/keep.json", None)
        .await
        .unwrap();
    let discard = storage
        .create_project("discard", "http://specs.example.com/discard.json", None)
        .await
        .unwrap();
    storage.create_document(&keep.id, "{}").await.unwrap();
    let stale = storage.get_or_create_open_record(&discard.id).await.unwrap();

    let batch = DetectionBatchData {
        records_to_create: vec![ChangeRecordRow {
            id: "new-record".to_string(),
            project_id: keep.id.clone(),
            provenance: "[]".to_string(),
            changes: r#"{"additions":{}}"#.to_string(),
            changes_added_at: Some("t1".to_string()),
            created_at: "t1".to_string(),
        }],
        records_to_delete: vec![stale.id.clone()],
        documents_to_update: vec![DocumentRow {
            project_id: keep.id.clone(),
            body: r#"{"v":2}"#.to_string(),
        }],
        ..Default::default()
    };
    storage.apply_detection_batch(&batch).await.unwrap();

    assert_eq!(storage.list_change_records(&keep.id).await.unwrap().len(), 1);
    assert!(storage.list_change_records(&discard.id).await.unwrap().is_empty());
    assert_eq!(
        storage.get_document(&keep.id).await.unwrap().unwrap().body,
        r#"{"v":2}"#
    );
}

// ─── Accounts ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn refresh_listing_skips_accounts_without_refresh_tokens() {
    let (storage, _dir) = make_storage().await;
    storage
        .create_account("gh-acct", "GH", "U", "sealed-at", None)
        .await
        .unwrap();
    storage
        .create_account("bb-acct", "BB", "U", "sealed-at", Some("sealed-rt"))
        .await
        .unwrap();

    let eligible = storage.list_accounts_with_refresh_token().await.unwrap();
    assert_eq!(eligible.len(), 1);
    assert_eq!(eligible[0].account_name, "bb-acct");
}

#[tokio::test]
async fn bulk_token_update_covers_every_account() {
    let (storage, _dir) = make_storage().await;
    let mut a = storage
        .create_account("one", "BB", "U", "old-a", Some("old-ra"))
        .await
        .unwrap();
    let mut b = storage
        .create_account("two", "BB", "U", "old-b", Some("old-rb"))
        .await
        .unwrap();

    a.access_token = "new-a".to_string();
    a.refresh_token = Some("new-ra".to_string());
    b.access_token = "new-b".to_string();
    b.refresh_token = Some("new-rb".to_string());
    storage
        .bulk_update_account_tokens(&[a.clone(), b.clone()])
        .await
        .unwrap();

    let stored_a = storage.get_account(&a.id).await.unwrap().unwrap();
    let stored_b = storage.get_account(&b.id).await.unwrap().unwrap();
    assert_eq!(stored_a.access_token, "new-a");
    assert_eq!(stored_a.refresh_token, Some("new-ra".to_string()));
    assert_eq!(stored_b.access_token, "new-b");
}

#[tokio::test]
async fn webhook_id_is_shared_per_repository() {
    let (storage, _dir) = make_storage().await;
    let account = storage
        .create_account("acme", "GH", "O", "sealed-at", None)
        .await
        .unwrap();
    let first = storage
        .create_project(
            "first",
            "http://specs.example.com/a.json",
            Some((&account.id, "shared-repo", "main")),
        )
        .await
        .unwrap();
    storage
        .create_project(
            "second",
            "http://specs.example.com/b.json",
            Some((&account.id, "shared-repo", "develop")),
        )
        .await
        .unwrap();

    assert_eq!(storage.find_webhook_id_for_repo("shared-repo").await.unwrap(), None);
    storage.set_project_webhook_id(&first.id, "wh-42").await.unwrap();
    assert_eq!(
        storage.find_webhook_id_for_repo("shared-repo").await.unwrap(),
        Some("wh-42".to_string())
    );
}
