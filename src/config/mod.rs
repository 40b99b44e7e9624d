//! Daemon configuration.
//!
//! Priority: CLI / env var  >  TOML (`{data_dir}/config.toml`)  >  built-in
//! default. The resolved [`DaemonConfig`] is computed once at startup,
//! immutable, and passed explicitly to every consumer — nothing reads
//! configuration from shared mutable state after boot.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_PORT: u16 = 4500;
const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
// 10 workers is the measured sweet spot; larger pools contend on the result
// buckets and the upstream fetch limits.
const DEFAULT_DETECTION_WORKERS: usize = 10;
const DEFAULT_REFRESH_WORKERS: usize = 10;
const DEFAULT_JOB_WORKERS: usize = 2;
const DEFAULT_DETECTION_INTERVAL_SECS: u64 = 900;
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 3600;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 15;

// ─── Provider credentials ────────────────────────────────────────────────────

/// OAuth app credentials for one VCS provider
/// (`[provider.github]` / `[provider.bitbucket]` in config.toml).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderCredentials {
    pub client_id: String,
    pub client_secret: String,
}

// ─── TOML config file ────────────────────────────────────────────────────────

/// `{data_dir}/config.toml` — all fields are optional overrides.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// Webhook ingress port (default: 4500).
    port: Option<u16>,
    /// Bind address for the ingress listener (default: "127.0.0.1").
    bind_address: Option<String>,
    /// Log level filter string, e.g. "debug", "info,specwatch=trace".
    log: Option<String>,
    /// Log output format: "pretty" (default) | "json".
    log_format: Option<String>,
    /// Detection worker pool size (default: 10).
    detection_workers: Option<usize>,
    /// Token refresh worker pool size (default: 10).
    refresh_workers: Option<usize>,
    /// Background lifecycle job workers (default: 2).
    job_workers: Option<usize>,
    /// Seconds between detection cycles (default: 900).
    detection_interval_secs: Option<u64>,
    /// Seconds between token refresh cycles (default: 3600).
    refresh_interval_secs: Option<u64>,
    /// Timeout for spec-document and provider HTTP calls (default: 15).
    fetch_timeout_secs: Option<u64>,
    /// Public base URL registered as the push-webhook callback target.
    callback_base_url: Option<String>,
    /// Secret the token vault derives its sealing key from.
    token_seal_key: Option<String>,
    /// Per-provider OAuth app credentials (`[provider.github]`, …).
    provider: Option<std::collections::HashMap<String, ProviderCredentials>>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

// ─── Resolved config ─────────────────────────────────────────────────────────

/// CLI/env values that take precedence over the TOML file.
#[derive(Debug, Default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub bind_address: Option<String>,
    pub log: Option<String>,
    pub log_format: Option<String>,
}

/// Fully resolved, immutable daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub data_dir: PathBuf,
    pub bind_address: String,
    pub port: u16,
    pub log: String,
    pub log_format: String,
    pub detection_workers: usize,
    pub refresh_workers: usize,
    pub job_workers: usize,
    pub detection_interval_secs: u64,
    pub refresh_interval_secs: u64,
    pub fetch_timeout_secs: u64,
    /// Public base URL this daemon is reachable under; providers POST push
    /// events to `{callback_base_url}/v1/webhook-callback`.
    pub callback_base_url: String,
    /// Secret for the token vault. Override the built-in development value
    /// in any real deployment.
    pub token_seal_key: String,
    pub github: ProviderCredentials,
    pub bitbucket: ProviderCredentials,
}

impl DaemonConfig {
    pub fn load(data_dir: PathBuf, overrides: ConfigOverrides) -> Self {
        let mut toml_cfg = load_toml(&data_dir).unwrap_or_default();

        let mut providers = toml_cfg.provider.take().unwrap_or_default();
        let github = providers.remove("github").unwrap_or_default();
        let bitbucket = providers.remove("bitbucket").unwrap_or_default();

        let port = overrides.port.or(toml_cfg.port).unwrap_or(DEFAULT_PORT);
        let bind_address = overrides
            .bind_address
            .or(toml_cfg.bind_address)
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        Self {
            data_dir,
            bind_address,
            log: overrides
                .log
                .or(toml_cfg.log)
                .unwrap_or_else(|| "info".to_string()),
            log_format: overrides
                .log_format
                .or(toml_cfg.log_format)
                .unwrap_or_else(|| "pretty".to_string()),
            detection_workers: toml_cfg
                .detection_workers
                .unwrap_or(DEFAULT_DETECTION_WORKERS),
            refresh_workers: toml_cfg.refresh_workers.unwrap_or(DEFAULT_REFRESH_WORKERS),
            job_workers: toml_cfg.job_workers.unwrap_or(DEFAULT_JOB_WORKERS),
            detection_interval_secs: toml_cfg
                .detection_interval_secs
                .unwrap_or(DEFAULT_DETECTION_INTERVAL_SECS),
            refresh_interval_secs: toml_cfg
                .refresh_interval_secs
                .unwrap_or(DEFAULT_REFRESH_INTERVAL_SECS),
            fetch_timeout_secs: toml_cfg
                .fetch_timeout_secs
                .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS),
            callback_base_url: toml_cfg
                .callback_base_url
                .unwrap_or_else(|| format!("http://{DEFAULT_BIND_ADDRESS}:{port}")),
            token_seal_key: toml_cfg
                .token_seal_key
                .unwrap_or_else(|| "specwatch-dev-seal-key".to_string()),
            github,
            bitbucket,
            port,
        }
    }

    /// The full callback URL registered with providers.
    pub fn webhook_callback_url(&self) -> String {
        format!(
            "{}/v1/webhook-callback",
            self.callback_base_url.trim_end_matches('/')
        )
    }
}
