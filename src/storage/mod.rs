//! SQLite persistence for accounts, projects, documents, and change records.

use anyhow::{Context as _, Result};
use chrono::Utc;
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::{path::Path, str::FromStr};
use uuid::Uuid;

/// The `changes` value of an open change record: provenance has been
/// registered but no detection cycle has populated the categorized changes
/// yet.
pub const OPEN_CHANGES_SENTINEL: &str = "{}";

// ─── Rows ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountRow {
    pub id: String,
    pub account_name: String,
    /// Provider code: `"GH"` | `"BB"`.
    pub provider: String,
    /// `"U"` user | `"O"` organization.
    pub account_type: String,
    /// Sealed access token (see `vault`).
    pub access_token: String,
    /// Sealed refresh token; NULL when the provider issues none.
    pub refresh_token: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProjectRow {
    pub id: String,
    pub name: String,
    pub spec_url: String,
    pub use_vcs: bool,
    pub account_id: Option<String>,
    pub repo_name: Option<String>,
    pub repo_branch: Option<String>,
    /// Webhook registration id remembered per repository.
    pub webhook_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DocumentRow {
    pub project_id: String,
    /// The baseline spec snapshot, as a JSON blob.
    pub body: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChangeRecordRow {
    pub id: String,
    pub project_id: String,
    /// JSON array of commit-provenance entries.
    pub provenance: String,
    /// Serialized `ChangeSet`, or the open sentinel `{}`.
    pub changes: String,
    pub changes_added_at: Option<String>,
    pub created_at: String,
}

impl ChangeRecordRow {
    pub fn is_open(&self) -> bool {
        self.changes == OPEN_CHANGES_SENTINEL
    }
}

/// One unit of detection work: a project, its baseline document, and the
/// open change record a webhook may have left behind.
#[derive(Debug, Clone)]
pub struct DetectionCandidate {
    pub project: ProjectRow,
    pub document: DocumentRow,
    pub open_record: Option<ChangeRecordRow>,
}

/// The four result lists a detection cycle commits in one transaction.
#[derive(Debug, Default)]
pub struct DetectionBatchData {
    pub records_to_create: Vec<ChangeRecordRow>,
    pub records_to_update: Vec<ChangeRecordRow>,
    pub records_to_delete: Vec<String>,
    pub documents_to_update: Vec<DocumentRow>,
}

impl DetectionBatchData {
    pub fn is_empty(&self) -> bool {
        self.records_to_create.is_empty()
            && self.records_to_update.is_empty()
            && self.records_to_delete.is_empty()
            && self.documents_to_update.is_empty()
    }
}

// ─── Storage ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("specwatch.db");
        let opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true);

        let pool = SqlitePool::connect_with(opts).await?;
        sqlx::migrate!("src/storage/migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(Self { pool })
    }

    /// Return a clone of the connection pool (cheap — Arc-backed).
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    // ─── Accounts ────────────────────────────────────────────────────────────

    pub async fn create_account(
        &self,
        account_name: &str,
        provider: &str,
        account_type: &str,
        sealed_access_token: &str,
        sealed_refresh_token: Option<&str>,
    ) -> Result<AccountRow> {
        let now = Utc::now().to_rfc3339();
        let row = AccountRow {
            id: Uuid::new_v4().to_string(),
            account_name: account_name.to_string(),
            provider: provider.to_string(),
            account_type: account_type.to_string(),
            access_token: sealed_access_token.to_string(),
            refresh_token: sealed_refresh_token.map(str::to_string),
            created_at: now.clone(),
            updated_at: now,
        };
        sqlx::query(
            "INSERT INTO vcs_accounts \
             (id, account_name, provider, account_type, access_token, refresh_token, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.id)
        .bind(&row.account_name)
        .bind(&row.provider)
        .bind(&row.account_type)
        .bind(&row.access_token)
        .bind(&row.refresh_token)
        .bind(&row.created_at)
        .bind(&row.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_account(&self, id: &str) -> Result<Option<AccountRow>> {
        Ok(sqlx::query_as("SELECT * FROM vcs_accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn find_account_id(
        &self,
        account_name: &str,
        provider: &str,
    ) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT id FROM vcs_accounts WHERE account_name = ? AND provider = ?")
                .bind(account_name)
                .bind(provider)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id,)| id))
    }

    pub async fn delete_account(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM vcs_accounts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Accounts eligible for a token refresh cycle.
    pub async fn list_accounts_with_refresh_token(&self) -> Result<Vec<AccountRow>> {
        Ok(
            sqlx::query_as("SELECT * FROM vcs_accounts WHERE refresh_token IS NOT NULL")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    /// Persist refreshed token pairs for all `accounts` in one transaction.
    pub async fn bulk_update_account_tokens(&self, accounts: &[AccountRow]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().to_rfc3339();
        for account in accounts {
            sqlx::query(
                "UPDATE vcs_accounts SET access_token = ?, refresh_token = ?, updated_at = ? \
                 WHERE id = ?",
            )
            .bind(&account.access_token)
            .bind(&account.refresh_token)
            .bind(&now)
            .bind(&account.id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // ─── Projects ────────────────────────────────────────────────────────────

    pub async fn create_project(
        &self,
        name: &str,
        spec_url: &str,
        vcs: Option<(&str, &str, &str)>,
    ) -> Result<ProjectRow> {
        let now = Utc::now().to_rfc3339();
        let (account_id, repo_name, repo_branch) = match vcs {
            Some((account, repo, branch)) => (
                Some(account.to_string()),
                Some(repo.to_string()),
                Some(branch.to_string()),
            ),
            None => (None, None, None),
        };
        let row = ProjectRow {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            spec_url: spec_url.to_string(),
            use_vcs: vcs.is_some(),
            account_id,
            repo_name,
            repo_branch,
            webhook_id: None,
            created_at: now.clone(),
            updated_at: now,
        };
        sqlx::query(
            "INSERT INTO projects \
             (id, name, spec_url, use_vcs, account_id, repo_name, repo_branch, webhook_id, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.id)
        .bind(&row.name)
        .bind(&row.spec_url)
        .bind(row.use_vcs)
        .bind(&row.account_id)
        .bind(&row.repo_name)
        .bind(&row.repo_branch)
        .bind(&row.webhook_id)
        .bind(&row.created_at)
        .bind(&row.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_project(&self, id: &str) -> Result<Option<ProjectRow>> {
        Ok(sqlx::query_as("SELECT * FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn delete_project(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Project lookup used by the webhook router: scoped to an account and a
    /// (repo, branch) pair.
    pub async fn find_project_id(
        &self,
        account_id: &str,
        repo_name: &str,
        repo_branch: &str,
    ) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM projects WHERE account_id = ? AND repo_name = ? AND repo_branch = ?",
        )
        .bind(account_id)
        .bind(repo_name)
        .bind(repo_branch)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id,)| id))
    }

    /// Webhook ids are registered per repository; projects sharing a repo
    /// share the registration.
    pub async fn find_webhook_id_for_repo(&self, repo_name: &str) -> Result<Option<String>> {
        let row: Option<(Option<String>,)> = sqlx::query_as(
            "SELECT webhook_id FROM projects WHERE repo_name = ? AND webhook_id IS NOT NULL LIMIT 1",
        )
        .bind(repo_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|(id,)| id))
    }

    pub async fn set_project_webhook_id(&self, id: &str, webhook_id: &str) -> Result<()> {
        sqlx::query("UPDATE projects SET webhook_id = ?, updated_at = ? WHERE id = ?")
            .bind(webhook_id)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ─── Documents ───────────────────────────────────────────────────────────

    pub async fn create_document(&self, project_id: &str, body: &str) -> Result<DocumentRow> {
        sqlx::query("INSERT INTO documents (project_id, body) VALUES (?, ?)")
            .bind(project_id)
            .bind(body)
            .execute(&self.pool)
            .await?;
        Ok(DocumentRow {
            project_id: project_id.to_string(),
            body: body.to_string(),
        })
    }

    pub async fn get_document(&self, project_id: &str) -> Result<Option<DocumentRow>> {
        Ok(
            sqlx::query_as("SELECT project_id, body FROM documents WHERE project_id = ?")
                .bind(project_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    // ─── Change records ──────────────────────────────────────────────────────

    /// Atomically fetch the project's open change record, creating an empty
    /// one when none exists. The partial unique index on open records
    /// arbitrates concurrent callers; this is the only synchronization
    /// between the webhook router and the detection scheduler.
    pub async fn get_or_create_open_record(&self, project_id: &str) -> Result<ChangeRecordRow> {
        sqlx::query(
            "INSERT OR IGNORE INTO change_records (id, project_id, provenance, changes, changes_added_at, created_at) \
             VALUES (?, ?, '[]', ?, NULL, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(project_id)
        .bind(OPEN_CHANGES_SENTINEL)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        let row: ChangeRecordRow = sqlx::query_as(
            "SELECT * FROM change_records WHERE project_id = ? AND changes = ? LIMIT 1",
        )
        .bind(project_id)
        .bind(OPEN_CHANGES_SENTINEL)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Overwrite a record's provenance list. Read-modify-write: two webhook
    /// bursts for the same project may lose one update (known limitation).
    pub async fn update_record_provenance(&self, id: &str, provenance: &str) -> Result<()> {
        sqlx::query("UPDATE change_records SET provenance = ? WHERE id = ?")
            .bind(provenance)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_change_records(&self, project_id: &str) -> Result<Vec<ChangeRecordRow>> {
        Ok(sqlx::query_as(
            "SELECT * FROM change_records WHERE project_id = ? ORDER BY created_at DESC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn open_record_for(&self, project_id: &str) -> Result<Option<ChangeRecordRow>> {
        Ok(sqlx::query_as(
            "SELECT * FROM change_records WHERE project_id = ? AND changes = ? LIMIT 1",
        )
        .bind(project_id)
        .bind(OPEN_CHANGES_SENTINEL)
        .fetch_optional(&self.pool)
        .await?)
    }

    // ─── Detection ───────────────────────────────────────────────────────────

    /// Projects due for a comparison: every project with no VCS linkage, plus
    /// every project whose webhook left an open change record behind. Only
    /// projects with a baseline document qualify.
    pub async fn list_detection_candidates(&self) -> Result<Vec<DetectionCandidate>> {
        let projects: Vec<ProjectRow> = sqlx::query_as(
            "SELECT p.* FROM projects p \
             JOIN documents d ON d.project_id = p.id \
             WHERE p.use_vcs = 0 \
                OR EXISTS (SELECT 1 FROM change_records c \
                           WHERE c.project_id = p.id AND c.changes = ?)",
        )
        .bind(OPEN_CHANGES_SENTINEL)
        .fetch_all(&self.pool)
        .await?;

        let mut candidates = Vec::with_capacity(projects.len());
        for project in projects {
            let Some(document) = self.get_document(&project.id).await? else {
                continue;
            };
            let open_record = self.open_record_for(&project.id).await?;
            candidates.push(DetectionCandidate {
                project,
                document,
                open_record,
            });
        }
        Ok(candidates)
    }

    /// Apply a full detection cycle's results in one transaction. Nothing is
    /// written if any statement fails — an updated baseline without its
    /// change record (or vice versa) must never be observable.
    pub async fn apply_detection_batch(&self, batch: &DetectionBatchData) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for record in &batch.records_to_update {
            sqlx::query("UPDATE change_records SET changes = ?, changes_added_at = ? WHERE id = ?")
                .bind(&record.changes)
                .bind(&record.changes_added_at)
                .bind(&record.id)
                .execute(&mut *tx)
                .await?;
        }

        for record in &batch.records_to_create {
            sqlx::query(
                "INSERT INTO change_records (id, project_id, provenance, changes, changes_added_at, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&record.id)
            .bind(&record.project_id)
            .bind(&record.provenance)
            .bind(&record.changes)
            .bind(&record.changes_added_at)
            .bind(&record.created_at)
            .execute(&mut *tx)
            .await?;
        }

        for id in &batch.records_to_delete {
            sqlx::query("DELETE FROM change_records WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        for document in &batch.documents_to_update {
            sqlx::query("UPDATE documents SET body = ? WHERE project_id = ?")
                .bind(&document.body)
                .bind(&document.project_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
