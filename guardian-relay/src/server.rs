//! Relay service.
//!
//! [`Relay`] composes the credential authority, the message queue and the
//! blob store. Every operation other than authentication validates the
//! caller's token first and touches storage only once that succeeds.

use crate::auth::{AdminCredentials, CredentialAuthority, StaticRegistry, TrustRegistry};
use crate::config::Config;
use crate::error::{RelayError, Result, StorageError};
use crate::limits::RateLimits;
use crate::storage::{BlobStore, ByteStream, FsBlobStore, MessageQueue, SqliteQueue};
use chrono::{DateTime, Utc};
use guardian_types::{
    AdminStats, BlobId, DeviceId, QueuedMessage, SendAck, SendRequest, TokenResponse,
    UploadResponse, WhoAmI,
};
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Tokens issued.
    pub auth_success_total: AtomicU64,
    /// Rejected authentication attempts and rejected tokens.
    pub auth_failure_total: AtomicU64,
    /// Messages accepted into a queue.
    pub messages_queued_total: AtomicU64,
    /// Messages handed out by polls.
    pub messages_delivered_total: AtomicU64,
    /// Blobs stored.
    pub blobs_stored_total: AtomicU64,
    /// Blobs consumed by a download.
    pub blobs_fetched_total: AtomicU64,
    /// Upload bytes accepted.
    pub bytes_received: AtomicU64,
    /// Download bytes served.
    pub bytes_sent: AtomicU64,
    /// Rate limit rejections.
    pub rate_limit_hits: AtomicU64,
    /// Storage failures.
    pub errors_total: AtomicU64,
}

impl RelayMetrics {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

/// Main relay service.
pub struct Relay {
    config: Config,
    authority: CredentialAuthority,
    admin: AdminCredentials,
    queue: Arc<dyn MessageQueue>,
    blobs: Arc<dyn BlobStore>,
    rate_limits: RateLimits,
    metrics: RelayMetrics,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("config", &self.config)
            .field("authority", &self.authority)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl Relay {
    /// Assemble a relay from its parts.
    pub fn new(
        config: Config,
        authority: CredentialAuthority,
        queue: Arc<dyn MessageQueue>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        let rate_limits = RateLimits::new(&config.limits);
        let admin = AdminCredentials::new(
            config.auth.admin_user.clone(),
            config.auth.admin_pass.clone(),
        );
        Self {
            config,
            authority,
            admin,
            queue,
            blobs,
            rate_limits,
            metrics: RelayMetrics::default(),
        }
    }

    /// Validate `config` and open the configured stores.
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let registry = StaticRegistry::from_config(&config.auth)?;
        if registry.is_empty() {
            tracing::warn!("No trusted devices configured; every authentication will fail");
        }
        let authority = CredentialAuthority::new(
            Arc::new(registry),
            config.auth.token_secret.as_bytes(),
            config.auth.token_ttl_secs,
        );

        let queue = SqliteQueue::new(&config.storage.database)
            .await
            .map_err(RelayError::Infrastructure)?;
        let blobs = FsBlobStore::open(&config.storage.blob_dir)
            .await
            .map_err(RelayError::Infrastructure)?;

        tracing::info!(
            "Relay storage ready (database: {:?}, blobs: {:?})",
            config.storage.database,
            config.storage.blob_dir
        );

        Ok(Self::new(config, authority, Arc::new(queue), Arc::new(blobs)))
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get access to the blob store.
    pub fn blobs(&self) -> &dyn BlobStore {
        self.blobs.as_ref()
    }

    /// Exchange a device's shared secret for an access token.
    pub fn authenticate(&self, identity: &str, secret: &str) -> Result<TokenResponse> {
        self.check_global()?;
        let presented = DeviceId::parse(identity).ok();
        if let Err(e) = self.rate_limits.check_auth(presented.as_ref()) {
            match &presented {
                Some(device) => tracing::warn!("Authentication rate limited for {}: {}", device, e),
                None => tracing::warn!("Authentication rate limited for malformed identities: {}", e),
            }
            return Err(self.rate_limited(e));
        }

        match self.authority.authenticate(identity, secret) {
            Ok(issued) => {
                RelayMetrics::bump(&self.metrics.auth_success_total, 1);
                tracing::info!("Device authenticated: {}", issued.device);
                Ok(TokenResponse::bearer(issued.token, issued.expires_in))
            }
            Err(e) => {
                RelayMetrics::bump(&self.metrics.auth_failure_total, 1);
                match &presented {
                    None => tracing::warn!("Authentication failed for a malformed identity"),
                    Some(device) if self.authority.trusted_devices() == 0 => tracing::warn!(
                        "Unknown device {} tried to authenticate; add it to [auth.devices]",
                        device
                    ),
                    Some(device) => tracing::warn!("Authentication failed for {}", device),
                }
                Err(e)
            }
        }
    }

    /// Report which device a token belongs to.
    pub fn whoami(&self, token: Option<&str>) -> Result<WhoAmI> {
        let device = self.authorize(token)?;
        Ok(WhoAmI {
            accessed_by_device: device,
        })
    }

    /// Queue an encrypted payload for another device.
    ///
    /// The sender is always the token's device. The recipient need not be
    /// registered.
    pub async fn send(&self, token: Option<&str>, request: SendRequest) -> Result<SendAck> {
        let sender = self.authorize(token)?;
        let recipient = request.to_device;

        let message = QueuedMessage {
            from: sender.clone(),
            data: request.encrypted_data,
            timestamp: now_millis(),
        };
        self.queue
            .enqueue(&recipient, message)
            .await
            .map_err(|e| self.storage_failure("send", &recipient, e))?;

        RelayMetrics::bump(&self.metrics.messages_queued_total, 1);
        tracing::debug!("Queued message from {} for {}", sender, recipient);
        Ok(SendAck::queued(recipient))
    }

    /// Drain the caller's own queue.
    ///
    /// The queue key comes from the token, never from the request. Messages
    /// returned here are gone from the relay.
    pub async fn poll(&self, token: Option<&str>) -> Result<Vec<QueuedMessage>> {
        let device = self.authorize(token)?;

        let messages = self
            .queue
            .drain(&device)
            .await
            .map_err(|e| self.storage_failure("poll", &device, e))?;

        if !messages.is_empty() {
            RelayMetrics::bump(
                &self.metrics.messages_delivered_total,
                messages.len() as u64,
            );
            tracing::debug!("Delivered {} messages to {}", messages.len(), device);
        }
        Ok(messages)
    }

    /// Store an upload, bounded by `storage.max_blob_size`.
    pub async fn upload(&self, token: Option<&str>, content: ByteStream) -> Result<UploadResponse> {
        let device = self.authorize(token)?;
        let limit = self.config.storage.max_blob_size;

        let blob_id = self
            .blobs
            .store(content, limit)
            .await
            .map_err(|e| self.storage_failure("upload", &device, e))?;

        RelayMetrics::bump(&self.metrics.blobs_stored_total, 1);
        tracing::info!("Device {} uploaded blob {}", device, blob_id);
        Ok(UploadResponse { file_id: blob_id })
    }

    /// Return a blob's content and delete it.
    ///
    /// Any authenticated device may fetch any blob id it knows.
    pub async fn download(&self, token: Option<&str>, file_id: &str) -> Result<Vec<u8>> {
        let device = self.authorize(token)?;
        let blob_id = BlobId::parse(file_id).map_err(|_| RelayError::NotFound)?;

        let content = self
            .blobs
            .fetch_and_delete(&blob_id)
            .await
            .map_err(|e| self.storage_failure("download", &blob_id, e))?;

        RelayMetrics::bump(&self.metrics.blobs_fetched_total, 1);
        RelayMetrics::bump(&self.metrics.bytes_sent, content.len() as u64);
        tracing::info!("Device {} downloaded blob {}", device, blob_id);
        Ok(content)
    }

    /// Record bytes accepted by the transport for an upload.
    pub fn record_upload_bytes(&self, bytes: u64) {
        RelayMetrics::bump(&self.metrics.bytes_received, bytes);
    }

    /// Administrative overview. Gated by admin credentials, not device tokens.
    pub async fn stats(&self, username: &str, password: &str) -> Result<AdminStats> {
        self.authorize_admin(username, password)?;

        let snapshot = self
            .queue
            .stats()
            .await
            .map_err(|e| self.storage_failure("stats", &"queues", e))?;
        let usage = self
            .blobs
            .usage()
            .await
            .map_err(|e| self.storage_failure("stats", &"blobs", e))?;

        Ok(AdminStats {
            devices_count: self.authority.trusted_devices(),
            total_messages: snapshot.total_messages,
            storage_bytes: usage.bytes,
            queues: snapshot.queues,
        })
    }

    /// Check admin credentials, under the global rate limit.
    pub fn authorize_admin(&self, username: &str, password: &str) -> Result<()> {
        self.check_global()?;
        if !self.admin.verify(username, password) {
            RelayMetrics::bump(&self.metrics.auth_failure_total, 1);
            tracing::warn!("Rejected admin credentials");
            return Err(RelayError::Unauthorized);
        }
        Ok(())
    }

    /// Validate a token and apply rate limits. Fails closed.
    fn authorize(&self, token: Option<&str>) -> Result<DeviceId> {
        let Some(token) = token else {
            RelayMetrics::bump(&self.metrics.auth_failure_total, 1);
            return Err(RelayError::Unauthorized);
        };

        let device = self.authority.validate(token).inspect_err(|_| {
            RelayMetrics::bump(&self.metrics.auth_failure_total, 1);
        })?;

        if self.config.auth.require_registered && !self.authority.is_trusted(&device) {
            tracing::warn!("Token for deregistered device {} rejected", device);
            RelayMetrics::bump(&self.metrics.auth_failure_total, 1);
            return Err(RelayError::Unauthorized);
        }

        self.check_global()?;
        if let Err(e) = self.rate_limits.check_request(&device) {
            tracing::warn!("Request rate limited for device {}: {}", device, e);
            return Err(self.rate_limited(e));
        }

        Ok(device)
    }

    fn check_global(&self) -> Result<()> {
        self.rate_limits.check_global().map_err(|e| {
            tracing::warn!("Global rate limit exceeded: {}", e);
            self.rate_limited(e)
        })
    }

    fn rate_limited(&self, err: crate::limits::RateLimitError) -> RelayError {
        RelayMetrics::bump(&self.metrics.rate_limit_hits, 1);
        RelayError::RateLimited {
            reason: err.to_string(),
        }
    }

    /// Convert a storage error, logging infrastructure failures with context.
    fn storage_failure(
        &self,
        operation: &'static str,
        subject: &dyn Display,
        err: StorageError,
    ) -> RelayError {
        let err = RelayError::from(err);
        if let RelayError::Infrastructure(inner) = &err {
            RelayMetrics::bump(&self.metrics.errors_total, 1);
            tracing::error!(operation, subject = %subject, "Storage failure: {}", inner);
        }
        err
    }
}

/// Current time, truncated to the millisecond precision the queue stores.
fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::<Utc>::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}
