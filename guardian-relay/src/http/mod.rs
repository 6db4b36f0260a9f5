//! HTTP endpoints for guardian-relay.
//!
//! Device API, admin statistics, health checks and metrics. State is shared
//! with handlers through `Extension<Arc<Relay>>`.

mod api;
pub mod health;
mod metrics;

use crate::error::RelayError;
use crate::server::Relay;
use axum::extract::DefaultBodyLimit;
use axum::http::header::WWW_AUTHENTICATE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use guardian_types::ErrorBody;
use std::sync::Arc;

pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
pub fn build_router(relay: Arc<Relay>) -> Router {
    Router::new()
        .route("/", get(api::root))
        .route("/api/auth/device", post(api::authenticate))
        .route("/api/data", get(api::protected_data))
        .route("/api/chat/send", post(api::send))
        .route("/api/chat/poll", get(api::poll))
        // Size is enforced by the blob store while streaming
        .route(
            "/api/files/upload",
            post(api::upload).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/files/:file_id", get(api::download))
        .route("/api/admin/stats", get(api::admin_stats))
        .route("/health", get(health::health_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(Extension(relay))
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match &self {
            RelayError::Unauthorized => StatusCode::UNAUTHORIZED,
            RelayError::NotFound => StatusCode::NOT_FOUND,
            RelayError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            RelayError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            RelayError::Infrastructure(_) | RelayError::Config(_) | RelayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let error = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed: {}", self);
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        let mut response = (status, Json(ErrorBody { error })).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
