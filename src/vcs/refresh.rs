//! Access-token refresh scheduler.
//!
//! Periodically renews OAuth access tokens for every account that holds a
//! refresh token. Same shape as the detection scheduler: fill the queue,
//! close it, let the bounded pool drain it, then persist all successfully
//! refreshed accounts in one bulk update. Accounts whose refresh call fails
//! are logged and excluded — a partially refreshed pair is never written.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::pool::{run_pool, TaskQueue};
use crate::storage::AccountRow;
use crate::vcs::Provider;
use crate::AppContext;

/// Run one refresh cycle; returns how many accounts were renewed.
pub async fn run_refresh_cycle(ctx: &AppContext) -> Result<usize> {
    let accounts = ctx.storage.list_accounts_with_refresh_token().await?;
    if accounts.is_empty() {
        return Ok(0);
    }

    let queue = TaskQueue::new();
    for account in accounts {
        queue.push(account).await;
    }
    queue.close();

    let refreshed: Arc<Mutex<Vec<AccountRow>>> = Arc::new(Mutex::new(Vec::new()));

    let handler = {
        let ctx = ctx.clone();
        let refreshed = Arc::clone(&refreshed);
        move |account: AccountRow| {
            let ctx = ctx.clone();
            let refreshed = Arc::clone(&refreshed);
            async move {
                refresh_account(&ctx, account, &refreshed).await;
            }
        }
    };
    run_pool(queue, ctx.config.refresh_workers, handler).await;

    let refreshed = Arc::try_unwrap(refreshed)
        .map_err(|_| anyhow::anyhow!("refresh workers still hold the result list"))?
        .into_inner();
    if !refreshed.is_empty() {
        ctx.storage.bulk_update_account_tokens(&refreshed).await?;
    }
    Ok(refreshed.len())
}

async fn refresh_account(
    ctx: &AppContext,
    mut account: AccountRow,
    refreshed: &Mutex<Vec<AccountRow>>,
) {
    let provider = match Provider::from_code(&account.provider) {
        Ok(provider) => provider,
        Err(e) => {
            // Registry defect, not bad external input — make it loud.
            tracing::error!(account = %account.account_name, error = %e, "refusing to refresh");
            return;
        }
    };

    let Some(sealed_refresh) = account.refresh_token.as_deref() else {
        return;
    };
    let refresh_token = match ctx.vault.open(sealed_refresh) {
        Ok(token) => token,
        Err(e) => {
            warn!(account = %account.account_name, error = %e, "stored refresh token unreadable");
            return;
        }
    };

    let pair = match ctx.vcs.refresh_tokens(provider, &refresh_token).await {
        Ok(pair) => pair,
        Err(e) => {
            warn!(account = %account.account_name, error = %e, "token refresh failed — excluded from this cycle");
            return;
        }
    };

    let sealed_access = match ctx.vault.seal(&pair.access_token) {
        Ok(sealed) => sealed,
        Err(e) => {
            warn!(account = %account.account_name, error = %e, "failed to seal refreshed access token");
            return;
        }
    };
    let sealed_refresh = match pair.refresh_token.as_deref().map(|t| ctx.vault.seal(t)) {
        Some(Ok(sealed)) => Some(sealed),
        Some(Err(e)) => {
            warn!(account = %account.account_name, error = %e, "failed to seal refreshed refresh token");
            return;
        }
        None => None,
    };

    account.access_token = sealed_access;
    account.refresh_token = sealed_refresh;
    refreshed.lock().await.push(account);
}

/// Spawn the periodic refresh loop.
pub fn spawn(ctx: AppContext) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(ctx.config.refresh_interval_secs));
        interval.tick().await; // skip the immediate first tick
        loop {
            interval.tick().await;
            match run_refresh_cycle(&ctx).await {
                Ok(0) => {}
                Ok(count) => info!(refreshed = count, "token refresh cycle complete"),
                Err(e) => warn!(error = %e, "token refresh cycle failed"),
            }
        }
    });
}
