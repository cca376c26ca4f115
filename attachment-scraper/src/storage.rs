//! Attachment storage
//!
//! The sink writes through [`AttachmentStore`] so tests and alternative
//! backends can replace the local directory.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Suffix of in-progress files; they are renamed over the target once synced
const PARTIAL_SUFFIX: &str = "part";

static PARTIAL_SEQ: AtomicU64 = AtomicU64::new(0);

/// Errors raised while persisting an attachment
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid attachment filename: {0:?}")]
    InvalidName(String),

    #[error("failed to create directory {}: {source}", path.display())]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("failed to create file {}: {source}", path.display())]
    Create { path: PathBuf, source: io::Error },

    #[error("failed to write file {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
}

/// Destination for decoded attachments
#[async_trait::async_trait]
pub trait AttachmentStore: Send + Sync {
    /// Persists `bytes` under `filename`, replacing any existing entry, and
    /// returns where it was written.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the name is unusable or any write fails.
    async fn persist(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf, StoreError>;
}

/// A writer whose contents can be forced to durable storage
#[async_trait::async_trait]
trait SyncWrite: AsyncWrite + Unpin + Send {
    async fn sync(&mut self) -> io::Result<()>;
}

#[async_trait::async_trait]
impl SyncWrite for fs::File {
    async fn sync(&mut self) -> io::Result<()> {
        self.sync_all().await
    }
}

/// Stores attachments as flat files in one directory, created on first use.
///
/// Each attachment is written to a uniquely named partial file next to the
/// target and renamed into place after it is synced, so concurrent writers of
/// one name never mix their bytes and a failed write leaves no partial file.
#[derive(Debug, Clone)]
pub struct LocalDirStore {
    root: PathBuf,
}

impl LocalDirStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn target(&self, filename: &str) -> Result<PathBuf, StoreError> {
        let is_plain = !filename.is_empty()
            && filename != "."
            && filename != ".."
            && !filename.contains(['/', '\\', '\0']);
        if !is_plain {
            return Err(StoreError::InvalidName(filename.to_string()));
        }
        Ok(self.root.join(filename))
    }

    fn partial_path(&self) -> PathBuf {
        let seq = PARTIAL_SEQ.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(format!(".{}-{seq}.{PARTIAL_SUFFIX}", std::process::id()))
    }
}

#[async_trait::async_trait]
impl AttachmentStore for LocalDirStore {
    async fn persist(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf, StoreError> {
        let path = self.target(filename)?;

        fs::create_dir_all(&self.root)
            .await
            .map_err(|source| StoreError::CreateDir {
                path: self.root.clone(),
                source,
            })?;

        let partial = self.partial_path();
        let file = fs::File::create(&partial)
            .await
            .map_err(|source| StoreError::Create {
                path: path.clone(),
                source,
            })?;

        commit(file, &partial, &path, bytes).await?;

        debug!(path = %path.display(), bytes = bytes.len(), "Saved attachment");
        Ok(path)
    }
}

/// Writes and syncs `bytes` through `writer`, which is backed by `partial`,
/// then renames `partial` over `target`. On failure only `partial` is removed.
async fn commit<W: SyncWrite>(
    mut writer: W,
    partial: &Path,
    target: &Path,
    bytes: &[u8],
) -> Result<(), StoreError> {
    let written = async {
        writer.write_all(bytes).await?;
        writer.flush().await?;
        writer.sync().await?;
        drop(writer);
        fs::rename(partial, target).await
    }
    .await;

    let Err(source) = written else {
        return Ok(());
    };

    match fs::remove_file(partial).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            warn!(path = %partial.display(), error = %e, "Failed to remove partial attachment");
        }
    }
    Err(StoreError::Write {
        path: target.to_path_buf(),
        source,
    })
}
