//! src/services/store_service.rs
//!
//! UploadStore — the upload/validate/reclaim lifecycle backed by a single
//! transient directory on disk. There is no database: every stored file is
//! addressed by a random token handed to exactly one client, and is deleted
//! on validation failure, after its one download, or by the expiry sweep.

use crate::models::upload::StoredUpload;
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    io::{self, ErrorKind},
    path::PathBuf,
    time::Duration,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

/// Entry path inside the archive that gates validation success.
const MARKER_ENTRY: &str = "index.html";

const MAX_TOKEN_LEN: usize = 128;
const TMP_PREFIX: &str = ".tmp-";

/// Fixed artificial build duration. The "build" is only this wait; the
/// artifact served afterwards is the upload itself.
pub const DEFAULT_BUILD_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("upload exceeds the {limit}-byte limit")]
    UploadTooLarge { limit: u64 },
    #[error("invalid download token")]
    InvalidToken,
    #[error("stored file `{0}` not found")]
    NotFound(String),
    #[error(transparent)]
    BadArchive(#[from] zip::result::ZipError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// UploadStore provides the per-upload lifecycle operations:
/// - Save an incoming byte stream under a fresh random token
/// - Inspect the stored archive for the required marker entry
/// - Open a stored file for its single download, with reclamation attached
/// - Sweep files that outlived the configured age
#[derive(Clone)]
pub struct UploadStore {
    /// Directory on disk holding every stored upload.
    pub root: PathBuf,

    /// Ceiling enforced while streaming an upload to disk.
    pub max_upload_bytes: u64,

    /// How long the simulated build suspends a request.
    pub build_delay: Duration,
}

impl UploadStore {
    /// Create a new UploadStore rooted at `root`. The directory must already
    /// exist (main creates it at startup).
    pub fn new(root: impl Into<PathBuf>, max_upload_bytes: u64, build_delay: Duration) -> Self {
        Self {
            root: root.into(),
            max_upload_bytes,
            build_delay,
        }
    }

    /// Validate a download token before it touches the filesystem.
    ///
    /// Issued tokens are `<uuid>.zip`, so anything outside a narrow
    /// filename alphabet is rejected outright. In particular `/`, `\`,
    /// `..`, and leading dots never reach a path join.
    fn ensure_token_safe(&self, token: &str) -> StoreResult<()> {
        if token.is_empty() || token.len() > MAX_TOKEN_LEN {
            return Err(StoreError::InvalidToken);
        }
        if token.starts_with('.') || token.contains("..") {
            return Err(StoreError::InvalidToken);
        }
        if !token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
        {
            return Err(StoreError::InvalidToken);
        }
        Ok(())
    }

    /// Resolve a token against the storage root. Callers must have run
    /// `ensure_token_safe` first.
    fn stored_path(&self, token: &str) -> PathBuf {
        self.root.join(token)
    }

    /// Stream an upload to disk under a fresh random token.
    ///
    /// - Writes bytes incrementally to a temporary file.
    /// - Counts size while streaming and aborts past `max_upload_bytes`.
    /// - Renames into the final token name only once the stream completes.
    ///
    /// Ensures durable writes (fsync) and removes the temp file on every
    /// error path.
    pub async fn save_stream<S>(&self, original_name: &str, stream: S) -> StoreResult<StoredUpload>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let token = format!("{}.zip", Uuid::new_v4());
        let tmp_path = self.root.join(format!("{}{}", TMP_PREFIX, Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: u64 = 0;
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StoreError::Io(err));
                }
            };
            size_bytes += chunk.len() as u64;
            if size_bytes > self.max_upload_bytes {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::UploadTooLarge {
                    limit: self.max_upload_bytes,
                });
            }
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        let final_path = self.stored_path(&token);
        if let Err(err) = fs::rename(&tmp_path, &final_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        debug!(
            "stored upload `{}` ({} bytes) as {}",
            original_name, size_bytes, token
        );

        Ok(StoredUpload {
            stored_name: token,
            original_name: original_name.to_string(),
            size_bytes,
            received_at: Utc::now(),
        })
    }

    /// Check the stored archive for an entry named `index.html` or ending in
    /// `/index.html`.
    ///
    /// Only entry names are enumerated; no entry body is read. The ZIP
    /// central directory parse runs on a blocking thread. A file that cannot
    /// be parsed as an archive surfaces as `BadArchive`.
    pub async fn has_marker_entry(&self, token: &str) -> StoreResult<bool> {
        self.ensure_token_safe(token)?;
        let path = self.stored_path(token);
        tokio::task::spawn_blocking(move || -> StoreResult<bool> {
            let file = std::fs::File::open(&path)?;
            let archive = zip::ZipArchive::new(file)?;
            Ok(archive
                .file_names()
                .any(|name| name == MARKER_ENTRY || name.ends_with("/index.html")))
        })
        .await
        .map_err(|err| StoreError::Io(io::Error::new(ErrorKind::Other, err)))?
    }

    /// Open a stored file for its one download.
    ///
    /// Returns the payload size, an open handle ready for streaming out,
    /// and a guard that deletes the file when the response body is dropped,
    /// whether the transfer completed or aborted mid-stream.
    pub async fn open_download(&self, token: &str) -> StoreResult<(u64, File, ReclaimOnDrop)> {
        self.ensure_token_safe(token)?;
        let path = self.stored_path(token);
        let file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::NotFound(token.to_string())
            } else {
                StoreError::Io(err)
            }
        })?;
        let size = file.metadata().await?.len();

        Ok((size, file, ReclaimOnDrop::new(path)))
    }

    /// Best-effort removal of a stored upload after a failed validation.
    ///
    /// Missing files are fine (the sweep may have raced us); other errors
    /// are logged and swallowed so they never mask the response already
    /// being produced.
    pub async fn discard(&self, token: &str) {
        let path = self.stored_path(token);
        match fs::remove_file(&path).await {
            Ok(_) => debug!("discarded stored file {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => debug!("failed to discard {}: {}", path.display(), err),
        }
    }

    /// Remove every regular file in the storage root older than `max_age`.
    ///
    /// Covers stored uploads whose download never happened as well as
    /// orphaned `.tmp-*` files from interrupted streams. Races with a
    /// concurrent download are benign: names are unique and removal is
    /// best-effort on both sides.
    pub async fn sweep_expired(&self, max_age: Duration) -> StoreResult<usize> {
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(err) => {
                    debug!("could not stat {}: {}", entry.path().display(), err);
                    continue;
                }
            };
            if !meta.is_file() {
                continue;
            }
            let Some(age) = meta.modified().ok().and_then(|m| m.elapsed().ok()) else {
                continue;
            };
            if age <= max_age {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(_) => {
                    removed += 1;
                    debug!("swept stale file {}", entry.path().display());
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => debug!("failed to sweep {}: {}", entry.path().display(), err),
            }
        }
        Ok(removed)
    }
}

/// Deletes the guarded file when dropped.
///
/// Attached to a download's response body so reclamation runs on every exit
/// path of the transfer. The unlink is a single syscall on a small file.
#[derive(Debug)]
pub struct ReclaimOnDrop {
    path: PathBuf,
}

impl ReclaimOnDrop {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Drop for ReclaimOnDrop {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(_) => debug!("reclaimed stored file {}", self.path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => debug!("failed to reclaim {}: {}", self.path.display(), err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::io::Write;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> UploadStore {
        UploadStore::new(dir.path(), 1024, Duration::ZERO)
    }

    fn zip_with_entries(entries: &[&str]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::FileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for entry in entries {
            writer.start_file(*entry, options).unwrap();
            writer.write_all(b"<!doctype html>").unwrap();
        }
        writer.finish().unwrap();
        drop(writer);
        cursor.into_inner()
    }

    fn byte_stream(data: Vec<u8>) -> impl Stream<Item = io::Result<Bytes>> + Send {
        stream::iter(vec![Ok(Bytes::from(data))])
    }

    #[tokio::test]
    async fn marker_found_at_archive_root() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let upload = store
            .save_stream("site.zip", byte_stream(zip_with_entries(&["index.html"])))
            .await
            .unwrap();
        assert!(store.has_marker_entry(&upload.stored_name).await.unwrap());
    }

    #[tokio::test]
    async fn marker_found_in_subdirectory() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let upload = store
            .save_stream(
                "site.zip",
                byte_stream(zip_with_entries(&["dist/index.html", "dist/app.js"])),
            )
            .await
            .unwrap();
        assert!(store.has_marker_entry(&upload.stored_name).await.unwrap());
    }

    #[tokio::test]
    async fn marker_absent_when_only_other_entries() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let upload = store
            .save_stream("site.zip", byte_stream(zip_with_entries(&["style.css"])))
            .await
            .unwrap();
        assert!(!store.has_marker_entry(&upload.stored_name).await.unwrap());
    }

    #[tokio::test]
    async fn similarly_named_entry_does_not_count() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let upload = store
            .save_stream(
                "site.zip",
                byte_stream(zip_with_entries(&["my-index.html", "notindex.html"])),
            )
            .await
            .unwrap();
        assert!(!store.has_marker_entry(&upload.stored_name).await.unwrap());
    }

    #[tokio::test]
    async fn garbage_bytes_report_bad_archive() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let upload = store
            .save_stream("junk.zip", byte_stream(b"not a zip at all".to_vec()))
            .await
            .unwrap();
        let err = store.has_marker_entry(&upload.stored_name).await.unwrap_err();
        assert!(matches!(err, StoreError::BadArchive(_)));
    }

    #[tokio::test]
    async fn oversized_stream_is_cut_off() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let err = store
            .save_stream("big.zip", byte_stream(vec![0u8; 2048]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UploadTooLarge { limit: 1024 }));
        // nothing left behind, not even the temp file
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn traversal_shaped_tokens_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        for token in ["", "../etc/passwd", "a/b.zip", "..", ".hidden", "a\\b.zip"] {
            let err = store.open_download(token).await.unwrap_err();
            assert!(matches!(err, StoreError::InvalidToken), "token {:?}", token);
        }
        let long = "a".repeat(MAX_TOKEN_LEN + 1);
        assert!(matches!(
            store.open_download(&long).await.unwrap_err(),
            StoreError::InvalidToken
        ));
    }

    #[tokio::test]
    async fn issued_tokens_pass_validation_and_missing_files_are_not_found() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let token = format!("{}.zip", Uuid::new_v4());
        let err = store.open_download(&token).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn reclaim_guard_deletes_on_drop() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let upload = store
            .save_stream("site.zip", byte_stream(zip_with_entries(&["index.html"])))
            .await
            .unwrap();
        let (_, _, guard) = store.open_download(&upload.stored_name).await.unwrap();
        drop(guard);
        assert!(!dir.path().join(&upload.stored_name).exists());
    }

    #[tokio::test]
    async fn sweep_removes_old_files_and_keeps_fresh_ones() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .save_stream("site.zip", byte_stream(zip_with_entries(&["index.html"])))
            .await
            .unwrap();
        std::fs::write(dir.path().join(".tmp-orphan"), b"partial").unwrap();

        // a generous cutoff keeps everything
        assert_eq!(
            store.sweep_expired(Duration::from_secs(3600)).await.unwrap(),
            0
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);

        // a zero cutoff reclaims both the upload and the orphaned temp file
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.sweep_expired(Duration::ZERO).await.unwrap(), 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
