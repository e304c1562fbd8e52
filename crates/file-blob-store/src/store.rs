//! File-based blob storage keyed by hashed names

use crate::error::Result;
use crate::types::StoreUsage;
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::{debug, info};

const COMPRESSED_EXTENSION: &str = "lz4";
const TEMP_EXTENSION: &str = "tmp";

/// A durable key to bytes store rooted at a single directory.
///
/// Each operation is independent per key. There is no transactional
/// guarantee across keys.
pub struct BlobStore {
    /// Directory owning every stored file
    root: PathBuf,
    /// Sequence used to give concurrent writes distinct temp files
    write_seq: AtomicU64,
}

impl BlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            write_seq: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ensure the root directory exists
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        info!(root = ?self.root, "Blob store initialized");
        Ok(())
    }

    /// Filesystem-safe name for a key (hex SHA-256)
    pub fn file_name(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.root.join(Self::file_name(key))
    }

    fn compressed_path(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}", Self::file_name(key), COMPRESSED_EXTENSION))
    }

    /// Persist `data` under `key`, replacing any previous value.
    ///
    /// A compressed variant left over from the previous value is dropped.
    pub async fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        self.write_atomic(&self.blob_path(key), data).await?;
        remove_if_present(&self.compressed_path(key)).await?;
        debug!(key, size = data.len(), "Persisted blob");
        Ok(())
    }

    /// Persist an LZ4-compressed variant of `data` next to the full blob
    pub async fn write_compressed(&self, key: &str, data: &[u8]) -> Result<()> {
        let compressed = compress_prepend_size(data);
        self.write_atomic(&self.compressed_path(key), &compressed)
            .await?;
        debug!(
            key,
            size = data.len(),
            compressed_size = compressed.len(),
            "Persisted compressed blob"
        );
        Ok(())
    }

    /// Read the full blob for `key`, `None` if it was never written
    pub async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        read_if_present(&self.blob_path(key)).await
    }

    /// Read and decompress the compressed variant for `key`
    pub async fn read_compressed(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match read_if_present(&self.compressed_path(key)).await? {
            Some(data) => Ok(Some(decompress_size_prepended(&data)?)),
            None => Ok(None),
        }
    }

    /// Remove both variants for `key`; absent files are not an error
    pub async fn remove(&self, key: &str) -> Result<()> {
        remove_if_present(&self.blob_path(key)).await?;
        remove_if_present(&self.compressed_path(key)).await?;
        Ok(())
    }

    /// Remove every stored blob and recreate an empty root
    pub async fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&self.root).await?;
        info!(root = ?self.root, "Blob store cleared");
        Ok(())
    }

    /// Count files and bytes currently on disk
    pub async fn usage(&self) -> Result<StoreUsage> {
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(StoreUsage::default()),
            Err(e) => return Err(e.into()),
        };

        let mut usage = StoreUsage::default();
        while let Some(entry) = dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            if metadata.is_file() {
                usage.files += 1;
                usage.total_size += metadata.len();
            }
        }
        Ok(usage)
    }

    /// Write through a temp file and rename, so readers never see a partial blob
    async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = self
            .root
            .join(format!(".{}.{}.{}", file_name, seq, TEMP_EXTENSION));

        let written = match fs::write(&temp, data).await {
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // Root was removed underneath us
                fs::create_dir_all(&self.root).await?;
                fs::write(&temp, data).await
            }
            other => other,
        };

        let result = match written {
            Ok(()) => fs::rename(&temp, path).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

async fn read_if_present(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
