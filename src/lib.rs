pub mod config;
pub mod detection;
pub mod diff;
pub mod document;
pub mod jobs;
pub mod pool;
pub mod retry;
pub mod storage;
pub mod vault;
pub mod vcs;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use config::DaemonConfig;
use storage::Storage;
use vault::TokenVault;
use vcs::VcsClient;

/// Shared application state passed to every scheduler, job worker, and
/// ingress handler.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<DaemonConfig>,
    pub storage: Arc<Storage>,
    /// Shared outbound HTTP client; carries the configured default timeout.
    pub http: reqwest::Client,
    /// Seals OAuth tokens before they touch the store.
    pub vault: Arc<TokenVault>,
    /// Provider adapter for OAuth and webhook operations.
    pub vcs: Arc<VcsClient>,
}

impl AppContext {
    pub fn new(config: DaemonConfig, storage: Storage) -> Result<Self> {
        let config = Arc::new(config);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()?;
        let vault = Arc::new(TokenVault::new(&config.token_seal_key)?);
        let vcs = Arc::new(VcsClient::new(http.clone(), Arc::clone(&config)));
        Ok(Self {
            config,
            storage: Arc::new(storage),
            http,
            vault,
            vcs,
        })
    }
}
