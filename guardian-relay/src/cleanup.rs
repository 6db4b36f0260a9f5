//! Background maintenance task.
//!
//! Runs periodically to expire unconsumed blobs, remove stale temporary
//! files, and evict idle rate-limiter entries.

use crate::config::CleanupConfig;
use crate::server::Relay;
use crate::storage::SweepReport;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// Spawn a background cleanup task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_task(relay: Arc<Relay>, config: CleanupConfig) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Cleanup task disabled");
            return;
        }

        let interval_secs = config.interval_secs;
        tracing::info!("Cleanup task started (interval: {}s)", interval_secs);

        let mut timer = interval(Duration::from_secs(interval_secs));

        loop {
            timer.tick().await;
            run_once(&relay).await;
        }
    })
}

/// One maintenance pass. Errors are logged, never propagated.
pub async fn run_once(relay: &Relay) -> Option<SweepReport> {
    relay.rate_limits().shrink();

    let blob_ttl = match relay.config().storage.blob_ttl_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };

    match relay.blobs().sweep(blob_ttl).await {
        Ok(report) => {
            if report == SweepReport::default() {
                tracing::debug!("Cleanup: nothing to remove");
            } else {
                tracing::info!(
                    "Cleanup: removed {} expired blobs, {} stale files",
                    report.expired_blobs,
                    report.stale_files
                );
            }
            Some(report)
        }
        Err(e) => {
            tracing::error!("Cleanup error: {}", e);
            None
        }
    }
}
