//! Prometheus metrics endpoint.

use super::api::{admin_rejection, basic_credentials};
use crate::server::Relay;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::{http::header::CONTENT_TYPE, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Gated by the admin credentials, since the gauges expose the same figures
/// as the admin stats. Counters are monotonic since startup.
pub async fn metrics_handler(
    Extension(relay): Extension<Arc<Relay>>,
    headers: HeaderMap,
) -> Response {
    let (username, password) = basic_credentials(&headers).unwrap_or_default();
    // Storage failures are logged by the relay and fail the scrape
    let stats = match relay.stats(&username, &password).await {
        Ok(stats) => stats,
        Err(err) => return admin_rejection(err),
    };

    let m = relay.metrics();

    let auth_ok = m.auth_success_total.load(Ordering::Relaxed);
    let auth_failed = m.auth_failure_total.load(Ordering::Relaxed);
    let queued = m.messages_queued_total.load(Ordering::Relaxed);
    let delivered = m.messages_delivered_total.load(Ordering::Relaxed);
    let stored = m.blobs_stored_total.load(Ordering::Relaxed);
    let fetched = m.blobs_fetched_total.load(Ordering::Relaxed);
    let bytes_rx = m.bytes_received.load(Ordering::Relaxed);
    let bytes_tx = m.bytes_sent.load(Ordering::Relaxed);
    let rate_limits = m.rate_limit_hits.load(Ordering::Relaxed);
    let errors = m.errors_total.load(Ordering::Relaxed);

    let body = format!(
        r#"# HELP guardian_relay_info Server information
# TYPE guardian_relay_info gauge
guardian_relay_info{{version="{version}"}} 1

# HELP guardian_relay_auth_success_total Tokens issued
# TYPE guardian_relay_auth_success_total counter
guardian_relay_auth_success_total {auth_ok}

# HELP guardian_relay_auth_failure_total Rejected credentials and tokens
# TYPE guardian_relay_auth_failure_total counter
guardian_relay_auth_failure_total {auth_failed}

# HELP guardian_relay_messages_queued_total Messages accepted into a queue
# TYPE guardian_relay_messages_queued_total counter
guardian_relay_messages_queued_total {queued}

# HELP guardian_relay_messages_delivered_total Messages handed out by polls
# TYPE guardian_relay_messages_delivered_total counter
guardian_relay_messages_delivered_total {delivered}

# HELP guardian_relay_blobs_stored_total Blobs uploaded
# TYPE guardian_relay_blobs_stored_total counter
guardian_relay_blobs_stored_total {stored}

# HELP guardian_relay_blobs_fetched_total Blobs consumed by a download
# TYPE guardian_relay_blobs_fetched_total counter
guardian_relay_blobs_fetched_total {fetched}

# HELP guardian_relay_bytes_received_total Upload bytes received
# TYPE guardian_relay_bytes_received_total counter
guardian_relay_bytes_received_total {bytes_rx}

# HELP guardian_relay_bytes_sent_total Download bytes sent
# TYPE guardian_relay_bytes_sent_total counter
guardian_relay_bytes_sent_total {bytes_tx}

# HELP guardian_relay_rate_limit_hits_total Total rate limit rejections
# TYPE guardian_relay_rate_limit_hits_total counter
guardian_relay_rate_limit_hits_total {rate_limits}

# HELP guardian_relay_errors_total Storage failures
# TYPE guardian_relay_errors_total counter
guardian_relay_errors_total {errors}

# HELP guardian_relay_trusted_devices Devices in the trust registry
# TYPE guardian_relay_trusted_devices gauge
guardian_relay_trusted_devices {devices}

# HELP guardian_relay_pending_messages Messages waiting to be polled
# TYPE guardian_relay_pending_messages gauge
guardian_relay_pending_messages {pending}

# HELP guardian_relay_storage_bytes Bytes held by unconsumed blobs
# TYPE guardian_relay_storage_bytes gauge
guardian_relay_storage_bytes {bytes}

# HELP guardian_relay_limiter_device_keys Devices tracked by the request limiter
# TYPE guardian_relay_limiter_device_keys gauge
guardian_relay_limiter_device_keys {device_keys}

# HELP guardian_relay_limiter_auth_keys Identities tracked by the auth limiter
# TYPE guardian_relay_limiter_auth_keys gauge
guardian_relay_limiter_auth_keys {auth_keys}
"#,
        version = env!("CARGO_PKG_VERSION"),
        devices = stats.devices_count,
        pending = stats.total_messages,
        bytes = stats.storage_bytes,
        device_keys = relay.rate_limits().request_keys_count(),
        auth_keys = relay.rate_limits().auth_keys_count(),
    );

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}
