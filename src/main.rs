use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use slotbook::clock::SystemClock;
use slotbook::config::Config;
use slotbook::engine::Engine;
use slotbook::notify::NotifyHub;
use slotbook::{api, sweeper};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    slotbook::observability::init(config.metrics_port);

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let clock = Arc::new(SystemClock::new(config.utc_offset));
    let engine = Arc::new(Engine::new(
        config.wal_path(),
        Arc::new(config.catalog.clone()),
        clock,
        Arc::new(NotifyHub::new()),
    )?);

    let shutdown_token = CancellationToken::new();
    let background = [
        tokio::spawn(sweeper::run_sweeper(
            engine.clone(),
            config.sweep_interval,
            shutdown_token.clone(),
        )),
        tokio::spawn(sweeper::run_retention(
            engine.clone(),
            config.retention_interval,
            shutdown_token.clone(),
        )),
        tokio::spawn(sweeper::run_compactor(
            engine.clone(),
            config.sweep_interval,
            config.compact_threshold,
            shutdown_token.clone(),
        )),
    ];

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("slotbook listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  utc_offset: {}", config.utc_offset);
    info!("  slots: {}", config.catalog.len());
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let on_shutdown = {
        let engine = engine.clone();
        let token = shutdown_token.clone();
        async move {
            shutdown_signal().await;
            info!("shutdown signal received, draining connections");
            token.cancel();
            // Open event streams would otherwise hold the drain forever.
            engine.notify.close_all();
        }
    };
    axum::serve(listener, api::router(engine.clone()))
        .with_graceful_shutdown(on_shutdown)
        .await?;

    for task in background {
        if let Err(e) = task.await {
            tracing::warn!("background task ended abnormally: {e}");
        }
    }

    info!("slotbook stopped");
    Ok(())
}

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
