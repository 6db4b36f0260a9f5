//! Filesystem blob backend.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<blob id>            published, fetchable blobs
//! <root>/.partial/<blob id>   uploads in progress
//! <root>/.claimed/<blob id>   downloads in progress
//! ```
//!
//! Publishing and claiming are both `rename(2)`, which is atomic within a
//! filesystem: a blob is either fully written and visible, or not visible,
//! and exactly one downloader wins the rename out of the published set.
//!
//! Files under `.partial` and `.claimed` that belong to a running upload or
//! download are tracked in memory. The periodic sweep skips them whatever
//! their mtime says, since a rename keeps the upload's mtime.

use super::{BlobStore, BlobUsage, ByteStream, SweepReport};
use crate::error::StorageError;
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use guardian_types::BlobId;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::io::AsyncWriteExt;

const PARTIAL_DIR: &str = ".partial";
const CLAIMED_DIR: &str = ".claimed";

/// Temporary files older than this belong to requests that are long gone.
const STALE_TEMP_AGE: Duration = Duration::from_secs(60 * 60);

/// Blob store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    partial_dir: PathBuf,
    claimed_dir: PathBuf,
    /// Blobs with an upload or download in progress, with a count of
    /// concurrent holders.
    in_flight: Arc<DashMap<BlobId, usize>>,
}

impl FsBlobStore {
    /// Open the store, creating directories as needed.
    ///
    /// Temporary files left by a previous process are discarded: a partial
    /// upload was never acknowledged, and a claimed blob was already handed
    /// to (or lost by) a downloader.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        let store = Self {
            partial_dir: root.join(PARTIAL_DIR),
            claimed_dir: root.join(CLAIMED_DIR),
            root,
            in_flight: Arc::new(DashMap::new()),
        };

        for dir in [&store.root, &store.partial_dir, &store.claimed_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StorageError::io(dir, e))?;
        }

        // Nothing can be in flight before the store exists
        let purged = remove_older_than(&store.partial_dir, Duration::ZERO, None).await?
            + remove_older_than(&store.claimed_dir, Duration::ZERO, None).await?;
        if purged > 0 {
            tracing::info!("Blob store: discarded {} interrupted transfers", purged);
        }

        Ok(store)
    }

    /// Mark `blob_id` as in flight until the returned guard is dropped.
    fn track(&self, blob_id: BlobId) -> InFlight {
        *self.in_flight.entry(blob_id).or_insert(0) += 1;
        InFlight {
            holders: self.in_flight.clone(),
            blob_id,
        }
    }

    fn blob_path(&self, blob_id: &BlobId) -> PathBuf {
        self.root.join(blob_id.to_string())
    }

    /// Atomically take a published blob out of the fetchable set.
    ///
    /// Callers hold a [`InFlight`] guard for `blob_id` until the claimed
    /// file is gone.
    async fn claim(&self, blob_id: &BlobId) -> Result<PathBuf, StorageError> {
        let source = self.blob_path(blob_id);
        let claimed = self.claimed_dir.join(blob_id.to_string());

        match tokio::fs::rename(&source, &claimed).await {
            Ok(()) => Ok(claimed),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::BlobNotFound { blob_id: *blob_id })
            }
            Err(e) => Err(StorageError::io(source, e)),
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn store(
        &self,
        mut content: ByteStream,
        size_limit: u64,
    ) -> Result<BlobId, StorageError> {
        let blob_id = BlobId::new();
        let partial = self.partial_dir.join(blob_id.to_string());

        // Declared before the partial guard so it is released last.
        let _tracked = self.track(blob_id);

        // Removes the partial file on every early return, and when the
        // caller drops this future mid-upload.
        let mut guard = PartialFile::new(partial.clone());

        let mut file = tokio::fs::File::create(&partial)
            .await
            .map_err(|e| StorageError::io(&partial, e))?;

        let mut written: u64 = 0;
        while let Some(chunk) = content.next().await {
            let chunk = chunk.map_err(StorageError::UploadAborted)?;
            written += chunk.len() as u64;
            if written > size_limit {
                tracing::debug!(blob = %blob_id, "Upload exceeded {} bytes", size_limit);
                return Err(StorageError::BlobTooLarge { limit: size_limit });
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| StorageError::io(&partial, e))?;
        }

        file.flush().await.map_err(|e| StorageError::io(&partial, e))?;
        file.sync_all()
            .await
            .map_err(|e| StorageError::io(&partial, e))?;
        drop(file);

        let published = self.blob_path(&blob_id);
        tokio::fs::rename(&partial, &published)
            .await
            .map_err(|e| StorageError::io(&published, e))?;
        guard.disarm();

        tracing::debug!(blob = %blob_id, bytes = written, "Stored blob");
        Ok(blob_id)
    }

    async fn fetch_and_delete(&self, blob_id: &BlobId) -> Result<Vec<u8>, StorageError> {
        let _tracked = self.track(*blob_id);
        let claimed = self.claim(blob_id).await?;

        match tokio::fs::read(&claimed).await {
            Ok(content) => {
                if let Err(e) = tokio::fs::remove_file(&claimed).await {
                    // Already unreachable; the next sweep or restart removes it.
                    tracing::warn!(blob = %blob_id, "Failed to remove consumed blob: {}", e);
                }
                Ok(content)
            }
            Err(e) => {
                // Put it back so a retry can still succeed.
                let source = self.blob_path(blob_id);
                if let Err(rollback) = tokio::fs::rename(&claimed, &source).await {
                    tracing::error!(
                        blob = %blob_id,
                        "Failed to restore blob after read error: {}",
                        rollback
                    );
                }
                Err(StorageError::io(claimed, e))
            }
        }
    }

    async fn contains(&self, blob_id: &BlobId) -> Result<bool, StorageError> {
        let path = self.blob_path(blob_id);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StorageError::io(path, e))
    }

    async fn usage(&self) -> Result<BlobUsage, StorageError> {
        let mut usage = BlobUsage::default();
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| StorageError::io(&self.root, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&self.root, e))?
        {
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                // Consumed between listing and stat
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::io(entry.path(), e)),
            };
            if metadata.is_file() {
                usage.blobs += 1;
                usage.bytes += metadata.len();
            }
        }
        Ok(usage)
    }

    async fn sweep(&self, blob_max_age: Option<Duration>) -> Result<SweepReport, StorageError> {
        let in_flight = Some(&*self.in_flight);
        let mut report = SweepReport {
            stale_files: remove_older_than(&self.partial_dir, STALE_TEMP_AGE, in_flight).await?
                + remove_older_than(&self.claimed_dir, STALE_TEMP_AGE, in_flight).await?,
            ..SweepReport::default()
        };

        let Some(max_age) = blob_max_age else {
            return Ok(report);
        };

        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| StorageError::io(&self.root, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&self.root, e))?
        {
            let Some(blob_id) = entry.file_name().to_str().and_then(|n| BlobId::parse(n).ok())
            else {
                continue;
            };
            match entry.metadata().await {
                Ok(m) if m.is_file() && age_of(&m) >= max_age => {}
                _ => continue,
            }
            // Claim first so an expiring blob cannot also be downloaded.
            match self.claim(&blob_id).await {
                Ok(claimed) => {
                    tokio::fs::remove_file(&claimed)
                        .await
                        .map_err(|e| StorageError::io(claimed, e))?;
                    report.expired_blobs += 1;
                }
                Err(StorageError::BlobNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }
}

/// Removes a blob id from the in-flight set on drop.
struct InFlight {
    holders: Arc<DashMap<BlobId, usize>>,
    blob_id: BlobId,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Some(mut count) = self.holders.get_mut(&self.blob_id) {
            *count = count.saturating_sub(1);
        }
        self.holders.remove_if(&self.blob_id, |_, count| *count == 0);
    }
}

/// Deletes an upload's partial file unless disarmed.
struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != ErrorKind::NotFound {
                    tracing::warn!("Failed to remove partial upload {:?}: {}", self.path, e);
                }
            }
        }
    }
}

fn age_of(metadata: &std::fs::Metadata) -> Duration {
    metadata
        .modified()
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .unwrap_or(Duration::ZERO)
}

/// Remove regular files in `dir` at least `min_age` old, except those named
/// after an in-flight blob. Returns the count.
async fn remove_older_than(
    dir: &Path,
    min_age: Duration,
    in_flight: Option<&DashMap<BlobId, usize>>,
) -> Result<u64, StorageError> {
    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| StorageError::io(dir, e))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StorageError::io(dir, e))?
    {
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if !metadata.is_file() || age_of(&metadata) < min_age {
            continue;
        }
        if let Some(in_flight) = in_flight {
            let busy = entry
                .file_name()
                .to_str()
                .and_then(|name| BlobId::parse(name).ok())
                .is_some_and(|id| in_flight.contains_key(&id));
            if busy {
                continue;
            }
        }
        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::io(entry.path(), e)),
        }
    }
    Ok(removed)
}
