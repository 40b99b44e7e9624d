//! Background lifecycle jobs.
//!
//! Project and account CRUD happen outside this daemon; these jobs carry the
//! side effects that must follow: pulling and validating the baseline
//! document when a project appears, registering and deleting repository
//! webhooks, and revoking OAuth tokens when an account goes away. Everything
//! runs through the shared bounded pool with observable completion — no
//! per-event fire-and-forget tasks.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::document;
use crate::pool::{run_pool, TaskQueue};
use crate::storage::{AccountRow, ProjectRow};
use crate::vcs::{Provider, VcsError};
use crate::AppContext;

#[derive(Debug, Clone)]
pub enum Job {
    /// Fetch and validate the baseline document for a new project. A project
    /// whose document cannot be acquired is not trackable and is removed.
    ValidateDocument { project_id: String },
    /// Register the push webhook for a new VCS-linked project.
    RegisterWebhook { project_id: String },
    /// Delete a repository webhook after its project is gone. Carries its own
    /// data — the rows it refers to no longer exist.
    DeleteWebhook {
        provider_code: String,
        account_name: String,
        repo_name: String,
        webhook_id: String,
        sealed_access_token: String,
    },
    /// Revoke a deleted account's access token.
    RevokeToken {
        provider_code: String,
        sealed_access_token: String,
    },
}

impl Job {
    /// Compose the webhook cleanup for a just-deleted project, capturing
    /// everything the job needs before the rows disappear. `None` when the
    /// project had no webhook registration.
    pub fn for_deleted_project(project: &ProjectRow, account: &AccountRow) -> Option<Job> {
        Some(Job::DeleteWebhook {
            provider_code: account.provider.clone(),
            account_name: account.account_name.clone(),
            repo_name: project.repo_name.clone()?,
            webhook_id: project.webhook_id.clone()?,
            sealed_access_token: account.access_token.clone(),
        })
    }

    /// Compose the token revocation for a just-deleted account.
    pub fn for_deleted_account(account: &AccountRow) -> Job {
        Job::RevokeToken {
            provider_code: account.provider.clone(),
            sealed_access_token: account.access_token.clone(),
        }
    }
}

/// Persistent consumer of lifecycle jobs.
pub struct JobRunner {
    queue: Arc<TaskQueue<Job>>,
    handle: tokio::task::JoinHandle<()>,
}

impl JobRunner {
    pub fn start(ctx: AppContext) -> Self {
        let queue = TaskQueue::new();
        let workers = ctx.config.job_workers;
        let handle = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move {
                let handler = move |job: Job| {
                    let ctx = ctx.clone();
                    async move {
                        run_job(&ctx, job).await;
                    }
                };
                run_pool(queue, workers, handler).await;
            }
        });
        Self { queue, handle }
    }

    pub async fn submit(&self, job: Job) {
        self.queue.push(job).await;
    }

    /// Drain the remaining jobs, then stop the workers.
    pub async fn shutdown(self) {
        self.queue.close();
        let _ = self.handle.await;
    }
}

async fn run_job(ctx: &AppContext, job: Job) {
    match job {
        Job::ValidateDocument { project_id } => validate_document(ctx, &project_id).await,
        Job::RegisterWebhook { project_id } => register_webhook(ctx, &project_id).await,
        Job::DeleteWebhook {
            provider_code,
            account_name,
            repo_name,
            webhook_id,
            sealed_access_token,
        } => {
            delete_webhook(
                ctx,
                &provider_code,
                &account_name,
                &repo_name,
                &webhook_id,
                &sealed_access_token,
            )
            .await
        }
        Job::RevokeToken {
            provider_code,
            sealed_access_token,
        } => revoke_token(ctx, &provider_code, &sealed_access_token).await,
    }
}

/// Pull the new project's document. Network failure, a non-JSON body, or a
/// missing required section all make the project untrackable: it is deleted
/// rather than left behind with no baseline.
async fn validate_document(ctx: &AppContext, project_id: &str) {
    let project = match ctx.storage.get_project(project_id).await {
        Ok(Some(project)) => project,
        Ok(None) => return,
        Err(e) => {
            warn!(project = project_id, error = %e, "project lookup failed");
            return;
        }
    };

    let doc = match document::fetch_document(&ctx.http, &project.spec_url).await {
        Ok(doc) => doc,
        Err(e) => {
            warn!(project = %project.name, error = %e, "document acquisition failed — removing project");
            remove_project(ctx, &project.id).await;
            return;
        }
    };
    if let Err(e) = document::validate_structure(&doc) {
        warn!(project = %project.name, error = %e, "not a trackable spec document — removing project");
        remove_project(ctx, &project.id).await;
        return;
    }

    if let Err(e) = ctx.storage.create_document(&project.id, &doc.to_string()).await {
        warn!(project = %project.name, error = %e, "failed to store baseline document");
        return;
    }
    debug!(project = %project.name, "baseline document stored");
}

async fn remove_project(ctx: &AppContext, project_id: &str) {
    if let Err(e) = ctx.storage.delete_project(project_id).await {
        warn!(project = project_id, error = %e, "failed to remove invalid project");
    }
}

async fn register_webhook(ctx: &AppContext, project_id: &str) {
    let project = match ctx.storage.get_project(project_id).await {
        Ok(Some(project)) => project,
        Ok(None) => return,
        Err(e) => {
            warn!(project = project_id, error = %e, "project lookup failed");
            return;
        }
    };
    if !project.use_vcs {
        return;
    }
    let (Some(account_id), Some(repo_name)) = (&project.account_id, &project.repo_name) else {
        return;
    };

    // Webhook ids are per repository — a sibling project tracking the same
    // repo already carries the registration.
    match ctx.storage.find_webhook_id_for_repo(repo_name).await {
        Ok(Some(existing)) => {
            if let Err(e) = ctx.storage.set_project_webhook_id(&project.id, &existing).await {
                warn!(project = %project.name, error = %e, "failed to store shared webhook id");
            }
            return;
        }
        Ok(None) => {}
        Err(e) => {
            warn!(project = %project.name, error = %e, "webhook id lookup failed");
            return;
        }
    }

    let account = match ctx.storage.get_account(account_id).await {
        Ok(Some(account)) => account,
        Ok(None) => return,
        Err(e) => {
            warn!(project = %project.name, error = %e, "account lookup failed");
            return;
        }
    };
    let Ok(provider) = provider_or_log(&account.provider) else {
        return;
    };
    let access_token = match ctx.vault.open(&account.access_token) {
        Ok(token) => token,
        Err(e) => {
            warn!(account = %account.account_name, error = %e, "stored access token unreadable");
            return;
        }
    };

    match ctx
        .vcs
        .register_webhook(provider, &account.account_name, repo_name, &access_token)
        .await
    {
        Ok(webhook_id) => {
            if let Err(e) = ctx
                .storage
                .set_project_webhook_id(&project.id, &webhook_id)
                .await
            {
                warn!(project = %project.name, error = %e, "failed to store webhook id");
            } else {
                debug!(project = %project.name, webhook_id = %webhook_id, "repository webhook registered");
            }
        }
        Err(VcsError::RepositoryNotFound) => {
            warn!(project = %project.name, repo = %repo_name, "repository not found — webhook not registered");
        }
        Err(e) => {
            warn!(project = %project.name, error = %e, "webhook registration failed");
        }
    }
}

async fn delete_webhook(
    ctx: &AppContext,
    provider_code: &str,
    account_name: &str,
    repo_name: &str,
    webhook_id: &str,
    sealed_access_token: &str,
) {
    // Another project may still share this repository's registration.
    match ctx.storage.find_webhook_id_for_repo(repo_name).await {
        Ok(Some(_)) => return,
        Ok(None) => {}
        Err(e) => {
            warn!(repo = repo_name, error = %e, "webhook id lookup failed");
            return;
        }
    }

    let Ok(provider) = provider_or_log(provider_code) else {
        return;
    };
    let access_token = match ctx.vault.open(sealed_access_token) {
        Ok(token) => token,
        Err(e) => {
            warn!(account = account_name, error = %e, "stored access token unreadable");
            return;
        }
    };
    if let Err(e) = ctx
        .vcs
        .delete_webhook(provider, account_name, repo_name, webhook_id, &access_token)
        .await
    {
        warn!(repo = repo_name, error = %e, "webhook deletion failed");
    }
}

async fn revoke_token(ctx: &AppContext, provider_code: &str, sealed_access_token: &str) {
    let Ok(provider) = provider_or_log(provider_code) else {
        return;
    };
    let access_token = match ctx.vault.open(sealed_access_token) {
        Ok(token) => token,
        Err(e) => {
            warn!(error = %e, "stored access token unreadable");
            return;
        }
    };
    if let Err(e) = ctx.vcs.revoke_token(provider, &access_token).await {
        warn!(error = %e, "token revocation failed");
    }
}

fn provider_or_log(code: &str) -> Result<Provider, ()> {
    Provider::from_code(code).map_err(|e| {
        // Registry defect, not bad external input — make it loud.
        tracing::error!(error = %e, "job references an unsupported provider");
    })
}
