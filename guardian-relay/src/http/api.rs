//! Device and admin API handlers.
//!
//! Handlers only move data between HTTP and [`Relay`]; every decision is
//! made by the relay.

use crate::error::RelayError;
use crate::server::Relay;
use crate::storage::ByteStream;
use axum::body::Body;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::{StreamExt, TryStreamExt};
use guardian_types::{
    AdminStats, QueuedMessage, SendAck, SendRequest, TokenResponse, UploadResponse, WhoAmI,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Query parameters of the device authentication endpoint.
#[derive(Debug, Deserialize)]
pub struct DeviceCredentials {
    device_id: String,
    device_key: String,
}

/// Body of the protected data endpoint.
#[derive(Debug, Serialize)]
pub struct DataResponse {
    message: &'static str,
    #[serde(flatten)]
    whoami: WhoAmI,
}

/// `POST /api/auth/device`
pub async fn authenticate(
    Extension(relay): Extension<Arc<Relay>>,
    query: Result<Query<DeviceCredentials>, QueryRejection>,
) -> Result<Json<TokenResponse>, RelayError> {
    let Query(creds) = query.map_err(|e| RelayError::BadRequest {
        reason: e.body_text(),
    })?;
    relay
        .authenticate(&creds.device_id, &creds.device_key)
        .map(Json)
}

/// `GET /api/data`
pub async fn protected_data(
    Extension(relay): Extension<Arc<Relay>>,
    headers: HeaderMap,
) -> Result<Json<DataResponse>, RelayError> {
    let whoami = relay.whoami(bearer_token(&headers))?;
    Ok(Json(DataResponse {
        message: "Hello! This is protected data.",
        whoami,
    }))
}

/// `POST /api/chat/send`
pub async fn send(
    Extension(relay): Extension<Arc<Relay>>,
    headers: HeaderMap,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<SendAck>, RelayError> {
    let token = bearer_token(&headers);
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            // Credentials are judged before the body
            relay.whoami(token)?;
            return Err(RelayError::BadRequest {
                reason: rejection.body_text(),
            });
        }
    };
    relay.send(token, request).await.map(Json)
}

/// `GET /api/chat/poll`
pub async fn poll(
    Extension(relay): Extension<Arc<Relay>>,
    headers: HeaderMap,
) -> Result<Json<Vec<QueuedMessage>>, RelayError> {
    relay.poll(bearer_token(&headers)).await.map(Json)
}

/// `POST /api/files/upload`
///
/// The request body is the file content, streamed to disk as it arrives.
pub async fn upload(
    Extension(relay): Extension<Arc<Relay>>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<UploadResponse>, RelayError> {
    let counter = relay.clone();
    let content: ByteStream = body
        .into_data_stream()
        .map_err(std::io::Error::other)
        .inspect_ok(move |chunk| counter.record_upload_bytes(chunk.len() as u64))
        .boxed();
    relay.upload(bearer_token(&headers), content).await.map(Json)
}

/// `GET /api/files/:file_id`
pub async fn download(
    Extension(relay): Extension<Arc<Relay>>,
    headers: HeaderMap,
    Path(file_id): Path<String>,
) -> Result<Response, RelayError> {
    let content = relay.download(bearer_token(&headers), &file_id).await?;
    Ok(([(CONTENT_TYPE, "application/octet-stream")], content).into_response())
}

/// `GET /api/admin/stats`
pub async fn admin_stats(
    Extension(relay): Extension<Arc<Relay>>,
    headers: HeaderMap,
) -> Result<Json<AdminStats>, Response> {
    let (username, password) = basic_credentials(&headers).unwrap_or_default();
    relay
        .stats(&username, &password)
        .await
        .map(Json)
        .map_err(admin_rejection)
}

/// Error response for admin endpoints, challenging for Basic credentials.
pub(crate) fn admin_rejection(err: RelayError) -> Response {
    let challenge = matches!(err, RelayError::Unauthorized);
    let mut response = err.into_response();
    if challenge {
        response.headers_mut().insert(
            WWW_AUTHENTICATE,
            HeaderValue::from_static("Basic realm=\"guardian-relay\""),
        );
    }
    response
}

/// `GET /`
pub async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "GuardianT relay is running" }))
}

/// Extract the token from `Authorization: Bearer <token>`.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then_some(token.trim())
        .filter(|t| !t.is_empty())
}

/// Extract `(username, password)` from `Authorization: Basic <base64>`.
pub(crate) fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}
