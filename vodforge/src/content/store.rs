//! Content store implementation.
//!
//! Layout under the data directory:
//!
//! ```text
//! content/<hh>/<hash>/{manifests,init,video,audio,segments}/...
//! metadata/<hh>/<hash>.json
//! ```
//!
//! where `hh` is the first two hex chars of the hash. A content directory is
//! only addressable once its metadata file exists; metadata is written to a
//! temp file and renamed into place, so readers never observe a half
//! published entry.
//!
//! Concurrency: one reader-writer lock over the in-memory metadata index.
//! The lock is never held across filesystem or channel operations; writes
//! for a given hash are already serialised by the coordinator.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use abr::SegmentKind;

use crate::content::hash::{is_valid_content_hash, shard};
use crate::content::metadata::{ContentMetadata, StreamingStatus};
use crate::utils::fs as fsutil;
use crate::{Error, Result};

/// Per-segment ingest information supplied by the event pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentIngestInfo {
    /// Actual segment duration when the encoder reported one; the nominal
    /// duration from the stream metadata is used otherwise.
    pub duration_secs: Option<f64>,
}

/// Aggregate statistics over the store.
#[derive(Debug, Clone, Default, Serialize, utoipa::ToSchema)]
pub struct ContentStats {
    pub total_count: u64,
    pub total_size_bytes: u64,
    /// Entry count by container format.
    pub by_format: HashMap<String, u64>,
    /// Total bytes by media id.
    pub by_media: HashMap<String, u64>,
    pub oldest_access: Option<DateTime<Utc>>,
    pub newest_access: Option<DateTime<Utc>>,
}

/// Content-addressable store for finished and streaming outputs.
pub struct ContentStore {
    content_root: PathBuf,
    metadata_root: PathBuf,
    default_retention_days: i64,
    index: RwLock<HashMap<String, ContentMetadata>>,
    access_tx: mpsc::UnboundedSender<String>,
    /// Receiver parked here until the flusher task claims it.
    access_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl ContentStore {
    /// Open (or initialise) a store rooted at the given directories and
    /// load the metadata index from disk.
    pub async fn open(
        content_root: impl Into<PathBuf>,
        metadata_root: impl Into<PathBuf>,
        default_retention_days: i64,
    ) -> Result<Self> {
        let content_root = content_root.into();
        let metadata_root = metadata_root.into();
        fsutil::ensure_dir_all(&content_root).await?;
        fsutil::ensure_dir_all(&metadata_root).await?;

        let (access_tx, access_rx) = mpsc::unbounded_channel();
        let store = Self {
            content_root,
            metadata_root,
            default_retention_days,
            index: RwLock::new(HashMap::new()),
            access_tx,
            access_rx: Mutex::new(Some(access_rx)),
        };
        store.load_index().await?;
        Ok(store)
    }

    /// Directory that holds the content for `hash`.
    pub fn content_dir(&self, hash: &str) -> PathBuf {
        self.content_root.join(shard(hash)).join(hash)
    }

    fn metadata_path(&self, hash: &str) -> PathBuf {
        self.metadata_root
            .join(shard(hash))
            .join(format!("{hash}.json"))
    }

    /// Whether an entry for `hash` is published.
    pub fn contains(&self, hash: &str) -> bool {
        self.index.read().contains_key(hash)
    }

    /// Load every metadata file into the in-memory index.
    async fn load_index(&self) -> Result<()> {
        let mut loaded = 0usize;
        let mut shards = tokio::fs::read_dir(&self.metadata_root)
            .await
            .map_err(|e| fsutil::storage_error("reading metadata root", &self.metadata_root, e))?;

        while let Some(shard_entry) = shards
            .next_entry()
            .await
            .map_err(|e| fsutil::storage_error("reading metadata root", &self.metadata_root, e))?
        {
            let shard_path = shard_entry.path();
            if !shard_path.is_dir() {
                continue;
            }
            let mut entries = tokio::fs::read_dir(&shard_path)
                .await
                .map_err(|e| fsutil::storage_error("reading metadata shard", &shard_path, e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| fsutil::storage_error("reading metadata shard", &shard_path, e))?
            {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                match tokio::fs::read(&path).await {
                    Ok(bytes) => match serde_json::from_slice::<ContentMetadata>(&bytes) {
                        Ok(meta) => {
                            self.index.write().insert(meta.content_hash.clone(), meta);
                            loaded += 1;
                        }
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "Skipping unreadable metadata file")
                        }
                    },
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping unreadable metadata file")
                    }
                }
            }
        }

        info!(entries = loaded, "Content metadata index loaded");
        Ok(())
    }

    /// Retry a storage operation once on failure. The cross-device copy
    /// fallback inside `move_dir` is a defined behavior, not a retry; this
    /// covers genuinely transient I/O errors.
    async fn retry_storage<T, F, Fut>(op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match op().await {
            Ok(value) => Ok(value),
            Err(first) => {
                warn!(error = %first, "Storage operation failed, retrying once");
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                op().await
            }
        }
    }

    /// Write a metadata document atomically (temp file + rename).
    async fn persist_metadata(&self, meta: &ContentMetadata) -> Result<()> {
        let path = self.metadata_path(&meta.content_hash);
        fsutil::ensure_parent_dir(&path).await?;

        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(meta)?;
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| fsutil::storage_error("writing metadata", &tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| fsutil::storage_error("publishing metadata", &path, e))
    }

    /// Store a finished output directory under its content hash.
    ///
    /// The source directory is renamed into the CAS location (recursive copy
    /// + delete across devices). If the metadata write fails, the content
    /// directory is removed again so no unaddressed content survives.
    /// A pre-existing entry short-circuits successfully.
    pub async fn store(
        &self,
        hash: &str,
        source_dir: &Path,
        mut metadata: ContentMetadata,
    ) -> Result<PathBuf> {
        validate_hash(hash)?;
        let content_dir = self.content_dir(hash);

        if self.contains(hash) {
            debug!(hash, "Content already stored, skipping ingest");
            return Ok(content_dir);
        }

        Self::retry_storage(|| fsutil::move_dir(source_dir, &content_dir)).await?;
        metadata.content_hash = hash.to_string();
        metadata.size_bytes = fsutil::dir_size(&content_dir).await?;

        if let Err(e) = Self::retry_storage(|| self.persist_metadata(&metadata)).await {
            // Roll the content back out; an unaddressable directory would
            // otherwise leak until the cleanup sweep.
            if let Err(rm) = tokio::fs::remove_dir_all(&content_dir).await {
                warn!(hash, error = %rm, "Failed to roll back content directory");
            }
            return Err(e);
        }

        self.index.write().insert(hash.to_string(), metadata);
        info!(hash, path = %content_dir.display(), "Content stored");
        Ok(content_dir)
    }

    /// Create an entry for a stream that is still being encoded.
    ///
    /// The content directory skeleton and an `active` metadata document are
    /// published immediately so clients can pull segments by CAS URL while
    /// the encoder runs.
    pub async fn create_streaming(&self, mut metadata: ContentMetadata) -> Result<PathBuf> {
        let hash = metadata.content_hash.clone();
        validate_hash(&hash)?;
        let content_dir = self.content_dir(&hash);

        if self.contains(&hash) {
            return Ok(content_dir);
        }

        for kind in [
            SegmentKind::Manifest,
            SegmentKind::Init,
            SegmentKind::Video,
            SegmentKind::Audio,
            SegmentKind::Media,
        ] {
            fsutil::ensure_dir_all(&content_dir.join(kind.subdir())).await?;
        }

        metadata.size_bytes = 0;
        self.persist_metadata(&metadata).await?;
        self.index.write().insert(hash.clone(), metadata);
        info!(hash, "Streaming content entry created");
        Ok(content_dir)
    }

    /// Ingest one segment file produced by a live encode.
    ///
    /// The file is classified by name, moved into the matching
    /// subdirectory, and the streaming counters are updated.
    pub async fn add_segment(
        &self,
        hash: &str,
        segment_path: &Path,
        _info: SegmentIngestInfo,
    ) -> Result<PathBuf> {
        validate_hash(hash)?;
        if !self.contains(hash) {
            return Err(Error::not_found("Content", hash));
        }

        let kind = SegmentKind::classify(segment_path);
        let file_name = segment_path
            .file_name()
            .ok_or_else(|| Error::storage(format!("segment has no file name: {}", segment_path.display())))?;
        let dest_dir = self.content_dir(hash).join(kind.subdir());
        fsutil::ensure_dir_all(&dest_dir).await?;
        let dest = dest_dir.join(file_name);

        let size_bytes = tokio::fs::metadata(segment_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        match tokio::fs::rename(segment_path, &dest).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
                tokio::fs::copy(segment_path, &dest)
                    .await
                    .map_err(|e| fsutil::storage_error("copying segment", segment_path, e))?;
                let _ = tokio::fs::remove_file(segment_path).await;
            }
            Err(e) => return Err(fsutil::storage_error("moving segment", segment_path, e)),
        }

        // Manifests are republished in place on every refresh; only media
        // and init files advance the segment counters.
        let updated = {
            let mut index = self.index.write();
            let Some(meta) = index.get_mut(hash) else {
                return Err(Error::not_found("Content", hash));
            };
            if kind != SegmentKind::Manifest {
                meta.record_segment(Utc::now(), size_bytes);
            }
            meta.clone()
        };
        self.persist_metadata(&updated).await?;

        debug!(hash, file = %dest.display(), kind = ?kind, "Segment ingested");
        Ok(dest)
    }

    /// Close out a streaming entry, fixing its final size and status.
    pub async fn finalize_streaming(&self, hash: &str, status: StreamingStatus) -> Result<()> {
        validate_hash(hash)?;
        let content_dir = self.content_dir(hash);
        let size_bytes = fsutil::dir_size(&content_dir).await.unwrap_or(0);

        let updated = {
            let mut index = self.index.write();
            let Some(meta) = index.get_mut(hash) else {
                return Err(Error::not_found("Content", hash));
            };
            meta.size_bytes = size_bytes;
            if let Some(streaming) = &mut meta.streaming {
                streaming.status = status;
            }
            meta.clone()
        };
        self.persist_metadata(&updated).await?;
        info!(hash, ?status, "Streaming content finalized");
        Ok(())
    }

    /// Look up an entry, returning its metadata and content directory.
    ///
    /// The access touch (last-accessed + access count) is queued to a
    /// background task and never blocks the caller.
    pub async fn get(&self, hash: &str) -> Result<(ContentMetadata, PathBuf)> {
        validate_hash(hash)?;

        let meta = self
            .index
            .read()
            .get(hash)
            .cloned()
            .ok_or_else(|| Error::not_found("Content", hash))?;

        let content_dir = self.content_dir(hash);
        if !tokio::fs::try_exists(&content_dir).await.unwrap_or(false) {
            // Index and filesystem disagree; treat as missing rather than
            // serving a dangling entry.
            return Err(Error::not_found("Content", hash));
        }

        let _ = self.access_tx.send(hash.to_string());
        Ok((meta, content_dir))
    }

    /// Resolve a client-supplied relative path inside a content directory.
    ///
    /// Rejects absolute paths and parent-directory traversal.
    pub fn resolve_file(&self, hash: &str, relative: &str) -> Result<PathBuf> {
        validate_hash(hash)?;
        let rel = Path::new(relative);
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(Error::validation(format!("invalid content path '{relative}'")));
        }
        Ok(self.content_dir(hash).join(rel))
    }

    /// Delete an entry: content directory, metadata file and index row.
    pub async fn delete(&self, hash: &str) -> Result<()> {
        validate_hash(hash)?;
        let content_dir = self.content_dir(hash);
        let metadata_path = self.metadata_path(hash);

        self.index.write().remove(hash);

        if let Err(e) = tokio::fs::remove_dir_all(&content_dir).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            return Err(fsutil::storage_error("removing content directory", &content_dir, e));
        }
        if let Err(e) = tokio::fs::remove_file(&metadata_path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            return Err(fsutil::storage_error("removing metadata", &metadata_path, e));
        }

        info!(hash, "Content entry deleted");
        Ok(())
    }

    /// Entries whose retention window has passed.
    pub fn list_expired(&self) -> Vec<ContentMetadata> {
        let now = Utc::now();
        self.index
            .read()
            .values()
            .filter(|m| m.is_expired(now, self.default_retention_days))
            .cloned()
            .collect()
    }

    /// Entries for a media id.
    pub fn list_by_media_id(&self, media_id: &str) -> Vec<ContentMetadata> {
        self.index
            .read()
            .values()
            .filter(|m| m.media_id == media_id)
            .cloned()
            .collect()
    }

    /// All entries ordered by last access, oldest first. Used by the
    /// emergency eviction pass.
    pub fn list_by_last_accessed(&self) -> Vec<ContentMetadata> {
        let mut entries: Vec<ContentMetadata> = self.index.read().values().cloned().collect();
        entries.sort_by_key(|m| m.last_accessed);
        entries
    }

    /// Total bytes across all entries.
    pub fn total_size(&self) -> u64 {
        self.index.read().values().map(|m| m.size_bytes).sum()
    }

    /// Aggregate statistics.
    pub fn stats(&self) -> ContentStats {
        let index = self.index.read();
        let mut stats = ContentStats {
            total_count: index.len() as u64,
            ..Default::default()
        };
        for meta in index.values() {
            stats.total_size_bytes += meta.size_bytes;
            *stats.by_format.entry(meta.format.clone()).or_default() += 1;
            *stats.by_media.entry(meta.media_id.clone()).or_default() += meta.size_bytes;
            stats.oldest_access = Some(match stats.oldest_access {
                Some(t) if t <= meta.last_accessed => t,
                _ => meta.last_accessed,
            });
            stats.newest_access = Some(match stats.newest_access {
                Some(t) if t >= meta.last_accessed => t,
                _ => meta.last_accessed,
            });
        }
        stats
    }

    /// Start the background task that applies queued access touches.
    ///
    /// On shutdown the queue is drained before the task exits, so the last
    /// touch is never lost.
    pub fn start_access_flusher(
        self: &Arc<Self>,
        cancel_token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        let mut rx = store
            .access_rx
            .lock()
            .take()
            .expect("access flusher started twice");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        while let Ok(hash) = rx.try_recv() {
                            store.apply_touch(&hash).await;
                        }
                        debug!("Access flusher drained and shut down");
                        break;
                    }
                    received = rx.recv() => {
                        match received {
                            Some(hash) => store.apply_touch(&hash).await,
                            None => break,
                        }
                    }
                }
            }
        })
    }

    async fn apply_touch(&self, hash: &str) {
        let updated = {
            let mut index = self.index.write();
            let Some(meta) = index.get_mut(hash) else {
                return;
            };
            meta.touch();
            meta.clone()
        };
        if let Err(e) = self.persist_metadata(&updated).await {
            warn!(hash, error = %e, "Failed to persist access touch");
        }
    }
}

fn validate_hash(hash: &str) -> Result<()> {
    if !is_valid_content_hash(hash) {
        return Err(Error::validation(format!("invalid content hash '{hash}'")));
    }
    Ok(())
}
