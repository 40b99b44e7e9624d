//! specwatchd — always-on spec drift detection daemon.
//!
//! Boots storage, starts the periodic detection and token-refresh schedulers
//! plus the lifecycle job runner, and serves the webhook ingress.

use anyhow::{Context as _, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

use specwatch::config::{ConfigOverrides, DaemonConfig};
use specwatch::jobs::JobRunner;
use specwatch::storage::Storage;
use specwatch::{detection, vcs, webhook, AppContext};

#[derive(Parser)]
#[command(
    name = "specwatchd",
    about = "Specwatch — spec drift detection daemon",
    version
)]
struct Args {
    /// Data directory for the SQLite database and config.toml
    #[arg(long, env = "SPECWATCH_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Webhook ingress port
    #[arg(long, env = "SPECWATCH_PORT")]
    port: Option<u16>,

    /// Bind address for the ingress listener (default: 127.0.0.1)
    #[arg(long, env = "SPECWATCH_BIND")]
    bind_address: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "SPECWATCH_LOG")]
    log: Option<String>,

    /// Log output format: "pretty" (human-readable) | "json"
    #[arg(long, env = "SPECWATCH_LOG_FORMAT")]
    log_format: Option<String>,
}

fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".specwatch"))
        .unwrap_or_else(|| PathBuf::from(".specwatch"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let data_dir = args.data_dir.unwrap_or_else(default_data_dir);
    let config = DaemonConfig::load(
        data_dir.clone(),
        ConfigOverrides {
            port: args.port,
            bind_address: args.bind_address,
            log: args.log,
            log_format: args.log_format,
        },
    );
    setup_logging(&config.log, &config.log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %data_dir.display(),
        "specwatchd starting"
    );

    let storage = Storage::new(&config.data_dir)
        .await
        .context("failed to open storage")?;
    let ctx = AppContext::new(config, storage)?;

    let jobs = JobRunner::start(ctx.clone());
    detection::spawn(ctx.clone());
    vcs::refresh::spawn(ctx.clone());

    let bind = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
    let addr: SocketAddr = bind.parse().context("invalid bind address")?;
    let router = build_router(ctx);

    info!("webhook ingress listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let queued lifecycle jobs finish before exiting.
    jobs.shutdown().await;
    info!("specwatchd stopped");
    Ok(())
}

fn build_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/webhook-callback", post(webhook_callback))
        .with_state(ctx)
}

/// Webhook ingress. Senders are always acknowledged with 200 — anything else
/// gets the hook disabled on the provider side.
async fn webhook_callback(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    match serde_json::from_slice(&body) {
        Ok(payload) => webhook::handle_push_event(&ctx.storage, agent, &payload).await,
        Err(e) => tracing::debug!(error = %e, "webhook body is not JSON — ignored"),
    }
    StatusCode::OK
}

async fn health(State(ctx): State<AppContext>) -> Json<serde_json::Value> {
    let db_ok = sqlx::query("SELECT 1")
        .execute(&ctx.storage.pool())
        .await
        .is_ok();
    Json(serde_json::json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

fn setup_logging(log_level: &str, log_format: &str) {
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(log_level)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(log_level)
            .compact()
            .init();
    }
}
