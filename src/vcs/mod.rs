//! VCS provider adapter — OAuth and repository-webhook operations.
//!
//! Each capability (token exchange, refresh, revoke, webhook registration and
//! deletion) maps to exactly one outbound HTTP call. All per-provider
//! differences live in the pure strategy tables in [`api`]; adding a provider
//! means adding match arms there, nothing else.

pub mod api;
pub mod refresh;

use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{DaemonConfig, ProviderCredentials};

// ─── Provider ────────────────────────────────────────────────────────────────

/// Supported VCS providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    GitHub,
    Bitbucket,
}

impl Provider {
    /// Resolve a stored provider code. An unknown code reaching the adapter
    /// is a registry/config defect, surfaced immediately.
    pub fn from_code(code: &str) -> Result<Self, VcsError> {
        match code {
            "GH" => Ok(Provider::GitHub),
            "BB" => Ok(Provider::Bitbucket),
            other => Err(VcsError::UnsupportedProvider(other.to_string())),
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Provider::GitHub => "GH",
            Provider::Bitbucket => "BB",
        }
    }

    /// Resolve the provider announced by an inbound webhook request.
    /// Providers identify themselves by User-Agent prefix ("GitHub-Hookshot/…",
    /// "Bitbucket-Webhooks/…"); anything else is not ours to handle.
    pub fn from_webhook_agent(agent: &str) -> Option<Self> {
        if agent.starts_with("GitHub") {
            Some(Provider::GitHub)
        } else if agent.starts_with("Bitbucket") {
            Some(Provider::Bitbucket)
        } else {
            None
        }
    }
}

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum VcsError {
    /// Contract violation: a provider code outside the registry.
    #[error("unsupported VCS provider code `{0}`")]
    UnsupportedProvider(String),
    /// Webhook registration was rejected by the provider.
    #[error("provided repository does not exist")]
    RepositoryNotFound,
    /// The temporary OAuth code could not be exchanged.
    #[error("temporary OAuth token is invalid or has expired")]
    InvalidTemporaryToken,
    /// The provider issues no refresh tokens; nothing to renew.
    #[error("provider `{0}` does not support token refresh")]
    RefreshUnsupported(&'static str),
    #[error("provider response missing `{0}`")]
    MalformedResponse(&'static str),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Access/refresh token pair returned by a provider. `refresh_token` is an
/// explicit `None` for providers that issue none — never an omitted field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

// ─── Client ──────────────────────────────────────────────────────────────────

/// Thin HTTP client over the per-provider strategy tables.
pub struct VcsClient {
    http: reqwest::Client,
    config: Arc<DaemonConfig>,
}

impl VcsClient {
    pub fn new(http: reqwest::Client, config: Arc<DaemonConfig>) -> Self {
        Self { http, config }
    }

    fn credentials(&self, provider: Provider) -> &ProviderCredentials {
        match provider {
            Provider::GitHub => &self.config.github,
            Provider::Bitbucket => &self.config.bitbucket,
        }
    }

    /// Exchange a temporary OAuth code for a token pair.
    pub async fn exchange_code(
        &self,
        provider: Provider,
        code: &str,
    ) -> Result<TokenPair, VcsError> {
        let payload = api::token_exchange_payload(provider, self.credentials(provider), code);
        let response = self
            .http
            .post(api::token_endpoint(provider))
            .form(&payload)
            .send()
            .await?;
        let body = response.text().await?;
        api::parse_token_response(provider, &body)
            .map_err(|_| VcsError::InvalidTemporaryToken)
    }

    /// Renew an access token from a refresh token.
    pub async fn refresh_tokens(
        &self,
        provider: Provider,
        refresh_token: &str,
    ) -> Result<TokenPair, VcsError> {
        let Some(endpoint) = api::refresh_endpoint(provider) else {
            return Err(VcsError::RefreshUnsupported(provider.code()));
        };
        let payload = api::refresh_payload(provider, self.credentials(provider), refresh_token)
            .expect("providers with a refresh endpoint define a refresh payload");
        let response = self.http.post(endpoint).form(&payload).send().await?;
        let body = response.text().await?;
        api::parse_token_response(provider, &body)
    }

    /// Revoke an access token. A no-op for providers without a revocation
    /// endpoint.
    pub async fn revoke_token(
        &self,
        provider: Provider,
        access_token: &str,
    ) -> Result<(), VcsError> {
        let creds = self.credentials(provider);
        let Some(endpoint) = api::revoke_endpoint(provider, creds) else {
            return Ok(());
        };
        let mut request = self.http.delete(&endpoint);
        if api::revoke_uses_basic_auth(provider) {
            request = request.basic_auth(&creds.client_id, Some(&creds.client_secret));
        }
        if let Some(payload) = api::revoke_payload(provider, access_token) {
            request = request.json(&payload);
        }
        request.send().await?;
        Ok(())
    }

    /// Register a push webhook on a repository; returns the provider's
    /// webhook id. An HTTP error status means the repository is not there
    /// (or not visible to this token).
    pub async fn register_webhook(
        &self,
        provider: Provider,
        account_name: &str,
        repo_name: &str,
        access_token: &str,
    ) -> Result<String, VcsError> {
        let endpoint = api::webhook_registration_endpoint(provider, account_name, repo_name);
        let payload =
            api::webhook_registration_payload(provider, &self.config.webhook_callback_url());
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(access_token)
            .json(&payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(VcsError::RepositoryNotFound);
        }
        let body: Value = response.json().await?;
        api::parse_webhook_registration_response(provider, &body)
    }

    /// Delete a previously registered repository webhook.
    pub async fn delete_webhook(
        &self,
        provider: Provider,
        account_name: &str,
        repo_name: &str,
        webhook_id: &str,
        access_token: &str,
    ) -> Result<(), VcsError> {
        let endpoint =
            api::webhook_deletion_endpoint(provider, account_name, repo_name, webhook_id);
        self.http
            .delete(&endpoint)
            .bearer_auth(access_token)
            .send()
            .await?;
        Ok(())
    }
}

/// Link a new VCS account: exchange the temporary OAuth code, seal both
/// tokens, and persist the account. Called by the tenant-facing CRUD layer
/// (external to this daemon), which surfaces
/// [`VcsError::InvalidTemporaryToken`] to the user.
pub async fn link_account(
    ctx: &crate::AppContext,
    provider: Provider,
    account_name: &str,
    account_type: &str,
    temp_code: &str,
) -> anyhow::Result<crate::storage::AccountRow> {
    let pair = ctx.vcs.exchange_code(provider, temp_code).await?;
    let sealed_access = ctx.vault.seal(&pair.access_token)?;
    let sealed_refresh = pair
        .refresh_token
        .as_deref()
        .map(|token| ctx.vault.seal(token))
        .transpose()?;
    let account = ctx
        .storage
        .create_account(
            account_name,
            provider.code(),
            account_type,
            &sealed_access,
            sealed_refresh.as_deref(),
        )
        .await?;
    Ok(account)
}
