//! rav-punchlist - RenovationAdvisor punch-list service
//!
//! Turns homeowner voice notes into punch-list items, assigns each item to
//! the best-matching contractor, and handles the contractors' SMS/WhatsApp
//! replies.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rav_common::config::{AppConfig, CliOverrides};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter};

use rav_punchlist::services::{
    worker, HttpMediaFetcher, JobQueue, JobWorker, KeywordExtractor, MediaFetcher, OpenAiExtractor,
    PunchListPipeline, TaskExtractor, TwilioGateway, WhisperTranscriber,
};
use rav_punchlist::{build_router, AppState};

/// Command-line arguments for rav-punchlist
#[derive(Parser, Debug)]
#[command(name = "rav-punchlist")]
#[command(about = "RenovationAdvisor punch-list pipeline service")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// SQLite database file
    #[arg(short, long)]
    database: Option<PathBuf>,
}

fn build_pipeline(config: &AppConfig, db: sqlx::SqlitePool) -> Result<PunchListPipeline> {
    let fetcher: Arc<dyn MediaFetcher> = Arc::new(HttpMediaFetcher::new(
        config.whatsapp.graph_base_url.clone(),
        config.whatsapp.access_token.clone(),
        Duration::from_secs(config.transcription.timeout_secs),
    )?);
    let transcriber = Arc::new(WhisperTranscriber::from_config(config, fetcher)?);

    let extractor: Arc<dyn TaskExtractor> = match OpenAiExtractor::new(&config.openai) {
        Ok(extractor) => Arc::new(extractor),
        Err(e) => {
            warn!("{}; falling back to keyword extraction", e);
            Arc::new(KeywordExtractor)
        }
    };

    let gateway = Arc::new(TwilioGateway::new(&config.twilio)?);

    Ok(PunchListPipeline::new(
        db,
        transcriber,
        extractor,
        gateway,
        config.pipeline.clone(),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Start from RUST_LOG (or info); logging.level replaces it once config is loaded
    let rust_log_set = std::env::var_os("RUST_LOG").is_some();
    let (filter, filter_handle) = reload::Layer::new(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting RenovationAdvisor punch-list service (rav-punchlist) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("RAV_GIT_HASH"),
        env!("RAV_BUILD_TIMESTAMP"),
        env!("RAV_BUILD_PROFILE")
    );

    let args = Args::parse();
    let config = rav_common::config::resolve(&CliOverrides {
        config_path: args.config,
        port: args.port,
        database_path: args.database,
    })
    .context("Failed to resolve configuration")?;

    if !rust_log_set {
        filter_handle
            .reload(EnvFilter::new(&config.logging.level))
            .context("Failed to apply logging.level")?;
    }

    info!("Database: {}", config.database.path.display());
    let db_pool = rav_punchlist::db::init_database_pool(&config.database.path)
        .await
        .context("Failed to open database")?;
    info!("Database connection established");

    let pipeline = Arc::new(build_pipeline(&config, db_pool.clone())?);
    info!(
        transcriber = pipeline.transcriber_configured(),
        extractor = pipeline.extractor_name(),
        gateway = pipeline.gateway_configured(),
        "Pipeline adapters constructed"
    );

    let jobs = JobQueue::new(db_pool.clone(), config.pipeline.job_max_attempts);
    let cancel = CancellationToken::new();

    let worker = JobWorker::new(
        jobs.clone(),
        pipeline.clone(),
        Duration::from_secs(config.pipeline.worker_poll_secs.max(1)),
    );
    let worker_handle = tokio::spawn(worker.run(cancel.clone()));

    let scheduler_handle = if config.pipeline.scheduler_interval_secs > 0 {
        Some(tokio::spawn(worker::run_scheduler(
            pipeline.clone(),
            Duration::from_secs(config.pipeline.scheduler_interval_secs),
            cancel.clone(),
        )))
    } else {
        info!("In-process scheduler disabled; relying on the cron endpoint");
        None
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(db_pool, Arc::new(config), pipeline, jobs);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await
        .context("Server error")?;

    cancel.cancel();
    if let Err(e) = worker_handle.await {
        warn!("Job worker task ended abnormally: {}", e);
    }
    if let Some(handle) = scheduler_handle {
        if let Err(e) = handle.await {
            warn!("Scheduler task ended abnormally: {}", e);
        }
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
