//! Request and response bodies for the relay surface.
//!
//! Field names match what deployed GuardianT clients already send and parse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BlobId, DeviceId};

/// A message waiting in a recipient's queue.
///
/// The recipient is the queue key and is not repeated here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    /// Device that sent the message (taken from its access token).
    pub from: DeviceId,
    /// Encrypted payload, opaque to the relay.
    pub data: String,
    /// When the relay accepted the message (RFC 3339, UTC).
    pub timestamp: DateTime<Utc>,
}

/// Access token issued after successful device authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Signed token to present as `Authorization: Bearer <token>`.
    pub access_token: String,
    /// Always `"bearer"`.
    pub token_type: String,
    /// Validity window in seconds.
    pub expires_in: u64,
}

impl TokenResponse {
    /// Build a bearer token response.
    pub fn bearer(access_token: String, expires_in: u64) -> Self {
        Self {
            access_token,
            token_type: "bearer".to_string(),
            expires_in,
        }
    }
}

/// Body of a send request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    /// Recipient device. Not required to be registered.
    pub to_device: DeviceId,
    /// Encrypted payload, opaque to the relay.
    pub encrypted_data: String,
}

/// Acknowledgement that a message was queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendAck {
    /// Always `"queued"`.
    pub status: String,
    /// Recipient the message was queued for.
    pub target: DeviceId,
}

impl SendAck {
    /// Acknowledge a message queued for `target`.
    pub fn queued(target: DeviceId) -> Self {
        Self {
            status: "queued".to_string(),
            target,
        }
    }
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Identifier to hand to the recipient for download.
    pub file_id: BlobId,
}

/// Identity bound to the presented access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhoAmI {
    /// Device the token was issued to.
    pub accessed_by_device: DeviceId,
}

/// Depth of one recipient queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStat {
    /// Recipient device.
    pub device_id: DeviceId,
    /// Pending message count (always > 0).
    pub count: u64,
    /// Timestamp of the most recently queued message.
    pub last_msg: Option<DateTime<Utc>>,
}

/// Administrative overview of relay state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AdminStats {
    /// Number of devices in the trust registry.
    pub devices_count: usize,
    /// Pending messages across all queues.
    pub total_messages: u64,
    /// Bytes held by unconsumed blobs.
    pub storage_bytes: u64,
    /// Non-empty queues.
    pub queues: Vec<QueueStat>,
}

impl AdminStats {
    /// Look up the queue depth for a device, 0 if it has no pending messages.
    pub fn depth_of(&self, device: &DeviceId) -> u64 {
        self.queues
            .iter()
            .find(|q| &q.device_id == device)
            .map(|q| q.count)
            .unwrap_or(0)
    }
}

/// JSON error envelope returned with every failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable reason.
    pub error: String,
}
