//! Storage layer for guardian-relay.
//!
//! Two stores with their own internal synchronization:
//! - [`MessageQueue`]: per-recipient FIFO of pending messages
//! - [`BlobStore`]: uploaded files, consumed by their first download

mod blobs;
mod queue;

pub use blobs::FsBlobStore;
pub use queue::SqliteQueue;

use crate::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use guardian_types::{BlobId, DeviceId, QueueStat, QueuedMessage};
use std::time::Duration;

/// Upload body, delivered in chunks.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Consistent view of all non-empty queues.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSnapshot {
    /// One entry per non-empty queue, ordered by recipient.
    pub queues: Vec<QueueStat>,
    /// Sum of all queue depths.
    pub total_messages: u64,
}

/// Space held by unconsumed blobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlobUsage {
    /// Number of blobs.
    pub blobs: u64,
    /// Total size in bytes.
    pub bytes: u64,
}

/// Outcome of a maintenance sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Unconsumed blobs removed for exceeding their TTL.
    pub expired_blobs: u64,
    /// Leftover partial uploads and interrupted downloads removed.
    pub stale_files: u64,
}

/// Trait for message queue backends.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Append a message to `recipient`'s queue, creating it if absent.
    async fn enqueue(
        &self,
        recipient: &DeviceId,
        message: QueuedMessage,
    ) -> Result<(), StorageError>;

    /// Remove and return every message queued for `recipient`, oldest first.
    ///
    /// Returns an empty vector for an absent or empty queue.
    async fn drain(&self, recipient: &DeviceId) -> Result<Vec<QueuedMessage>, StorageError>;

    /// Depth and last activity of every non-empty queue.
    async fn stats(&self) -> Result<QueueSnapshot, StorageError>;
}

/// Trait for blob storage backends.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store an upload of at most `size_limit` bytes under a fresh id.
    ///
    /// Nothing becomes visible unless the whole upload succeeds.
    async fn store(&self, content: ByteStream, size_limit: u64) -> Result<BlobId, StorageError>;

    /// Return a blob's content and remove it.
    ///
    /// Of any number of concurrent calls for the same id, at most one succeeds.
    async fn fetch_and_delete(&self, blob_id: &BlobId) -> Result<Vec<u8>, StorageError>;

    /// Whether `blob_id` can currently be fetched.
    async fn contains(&self, blob_id: &BlobId) -> Result<bool, StorageError>;

    /// Space held by unconsumed blobs.
    async fn usage(&self) -> Result<BlobUsage, StorageError>;

    /// Remove stale temporary files, and blobs older than `blob_max_age` if set.
    async fn sweep(&self, blob_max_age: Option<Duration>) -> Result<SweepReport, StorageError>;
}
