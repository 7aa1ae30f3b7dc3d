// src/main.rs

//! # Livesite Main Entry Point
//!
//! Loads configuration, initializes logging, binds the HTTP listener and
//! launches the change notifier (unless `--no-reload`) next to the web server.
//! Startup failures exit with status 1; Ctrl-C shuts everything down and exits 0.

use anyhow::Result;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use livesite::config::ServerConfig;
use livesite::state::ServerContext;
use livesite::{watcher, web};

/// How long open connections (SSE streams, WebSockets) may delay shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

fn exit_with(message: impl std::fmt::Display) -> ! {
    eprintln!("{}", message);
    std::process::exit(1);
}

/// The main entry point for the Livesite application.
///
/// 1. Loads the configuration from CLI, file, and environment.
/// 2. Initializes the tracing subscriber for logging.
/// 3. Binds the listener; a taken port or bad address is fatal.
/// 4. Spawns the change notifier and the web server.
/// 5. Waits for a Ctrl-C signal to initiate graceful shutdown of all tasks.
#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::load().unwrap_or_else(|e| exit_with(e));

    // Initialize tracing subscriber for logging with environment filter and max level.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_max_level(tracing::Level::TRACE)
        .with_writer(std::io::stderr) // Log to stderr
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Setting default tracing subscriber failed: {}", e);
    }

    tracing::debug!("Livesite starting with configuration: {:?}", config);

    let listener = web::bind(config.socket_addr)
        .await
        .unwrap_or_else(|e| exit_with(e));
    tracing::info!(
        "Bound {}:{} ({})",
        config.bind_address,
        config.port,
        config.socket_addr
    );

    let ctx = ServerContext::new(config);

    // Shutdown signal channel for graceful shutdown of all tasks.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut tasks = Vec::new();

    if ctx.config.live_reload {
        let notifier = watcher::spawn_notifier(&ctx.config, ctx.reload.clone(), shutdown_rx.clone())
            .unwrap_or_else(|e| exit_with(e));
        tasks.push(notifier);
        tracing::info!(
            "Live reload: on ({} mode, every {:?})",
            ctx.config.watch_mode,
            ctx.config.poll_interval
        );
        tracing::info!("Inspect mode: add ?inspect=1 to a page URL, then click elements to copy a selector");
    } else {
        tracing::info!("Live reload: off");
    }

    let web_ctx = ctx.clone();
    let web_shutdown_rx = shutdown_rx.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = web::start_server(listener, web_ctx, web_shutdown_rx).await {
            tracing::error!("Web server exited with error: {}", e);
        }
    }));

    // Wait for Ctrl-C signal to initiate shutdown.
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Ctrl-C received, initiating shutdown...");
        }
        Err(err) => {
            tracing::error!("Failed to listen for Ctrl-C signal: {}", err);
        }
    }

    // Signal all tasks to shutdown.
    if shutdown_tx.send(true).is_err() {
        tracing::error!("Failed to send shutdown signal");
    }

    // Wait for all tasks to complete, abandoning long-lived connections after the grace period.
    for task in tasks {
        match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("A task panicked or exited with error: {}", e),
            Err(_) => tracing::warn!("A task did not stop within {:?}; abandoning it", SHUTDOWN_GRACE),
        }
    }

    tracing::info!("Livesite shut down gracefully.");
    Ok(())
}
