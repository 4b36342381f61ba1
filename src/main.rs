use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::info;
use tracing_subscriber::EnvFilter;

use servify::api::{self, AppState};
use servify::compactor;
use servify::config::Config;
use servify::notify::NotifyHub;
use servify::scheduler::{Scheduler, SystemClock};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    servify::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let scheduler = Arc::new(Scheduler::open(
        config.journal_path(),
        Arc::new(NotifyHub::new()),
        Arc::new(SystemClock),
    )?);

    let compactor_scheduler = scheduler.clone();
    let threshold = config.compact_threshold;
    tokio::spawn(async move {
        compactor::run_compactor(compactor_scheduler, threshold).await;
    });

    if let Some(name) = config.bootstrap_admin.clone() {
        match scheduler.bootstrap_admin(name).await? {
            Some(admin) => info!(user = %admin.id, "bootstrap administrator created"),
            None => info!("administrator already present, bootstrap skipped"),
        }
    }
    if config.session_issuer_key.is_none() {
        tracing::warn!("SERVIFY_SESSION_ISSUER_KEY not set, sessions cannot be opened");
    }

    let app = api::router(AppState::new(scheduler, config.session_issuer_key.as_deref()));

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("servify listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  compact_threshold: {}", config.compact_threshold);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    // Stop accepting on SIGTERM/ctrl-c, then give in-flight requests a
    // bounded window. Change-feed streams never finish on their own.
    let stop = Arc::new(Notify::new());
    let server = axum::serve(listener, app).with_graceful_shutdown({
        let stop = stop.clone();
        async move { stop.notified().await }
    });
    let server = tokio::spawn(server.into_future());

    shutdown_signal().await;
    stop.notify_one();
    match tokio::time::timeout(DRAIN_TIMEOUT, server).await {
        Ok(result) => result??,
        Err(_) => tracing::warn!("drain timeout, dropping open connections"),
    }

    info!("servify stopped");
    Ok(())
}

/// Resolves on SIGTERM or Ctrl-C. If a handler cannot be installed, that
/// signal source is ignored rather than shutting down immediately.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to register SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining in-flight requests");
}
