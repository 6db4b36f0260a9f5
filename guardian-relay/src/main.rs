//! guardian-relay binary entry point.
//!
//! Usage:
//! ```bash
//! guardian-relay --config relay.toml
//! RUST_LOG=guardian_relay=debug guardian-relay
//! ```

use anyhow::Context;
use guardian_relay::cleanup::spawn_cleanup_task;
use guardian_relay::config::Config;
use guardian_relay::http::{build_router, health};
use guardian_relay::server::Relay;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = get_config_path();
    let mut config = if config_path.exists() {
        Config::from_file(&config_path)
            .with_context(|| format!("failed to load {}", config_path.display()))?
    } else {
        warn!(
            "Config file {} not found, using defaults",
            config_path.display()
        );
        Config::default()
    };
    config.apply_env_overrides();

    health::init_start_time();

    let relay = Arc::new(Relay::open(config).await.context("failed to start relay")?);
    let bind_address = relay.config().server.bind_address.clone();
    let cleanup = spawn_cleanup_task(relay.clone(), relay.config().cleanup.clone());

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    info!(
        "guardian-relay v{} listening on {}",
        env!("CARGO_PKG_VERSION"),
        bind_address
    );

    axum::serve(listener, build_router(relay))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    cleanup.abort();
    info!("guardian-relay stopped");
    Ok(())
}

fn get_config_path() -> PathBuf {
    std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("relay.toml"))
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM, then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
