//! Payload storage on the local filesystem.
//!
//! Payloads are stored under generated names, sharded by the first two
//! characters:
//! ```text
//! {root}/
//! ├── ab/
//! │   └── ab12cd34-5678-90ab-cdef-123456789012
//! └── ...
//! ```
//! Stored names never derive from client input.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

use crate::error::{AppError, Result};

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct BlobStorage {
    root: PathBuf,
}

/// A payload written to disk but not yet attached to a record.
#[derive(Debug)]
pub struct StoredBlob {
    pub name: String,
    pub size_bytes: u64,
}

impl BlobStorage {
    /// Create the storage root if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn generate_name() -> String {
        let id = Uuid::new_v4().simple().to_string();
        format!("{}/{}", &id[..2], id)
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Stream `source` into a new payload, aborting once more than
    /// `max_bytes` have been read. An aborted write leaves nothing on disk.
    pub async fn write<R>(&self, source: R, max_bytes: u64) -> Result<StoredBlob>
    where
        R: AsyncRead,
    {
        let name = Self::generate_name();
        let path = self.path_of(&name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        match copy_capped(source, &path, max_bytes).await {
            Ok(size_bytes) => Ok(StoredBlob { name, size_bytes }),
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&path).await {
                    if cleanup.kind() != io::ErrorKind::NotFound {
                        tracing::warn!(path = %path.display(), error = %cleanup, "failed to remove partial upload");
                    }
                }
                Err(e)
            }
        }
    }

    pub async fn open(&self, name: &str) -> Result<fs::File> {
        match fs::File::open(self.path_of(name)).await {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(AppError::NotFound("File not found".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a payload. Returns `false` when it was already absent.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        match fs::remove_file(self.path_of(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self, name: &str) -> bool {
        fs::try_exists(self.path_of(name)).await.unwrap_or(false)
    }
}

async fn copy_capped<R>(source: R, path: &Path, max_bytes: u64) -> Result<u64>
where
    R: AsyncRead,
{
    tokio::pin!(source);
    let mut file = fs::File::create(path).await?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total: u64 = 0;

    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        total += n as u64;
        if total > max_bytes {
            return Err(AppError::Validation("File too large".to_string()));
        }
        file.write_all(&buf[..n]).await?;
    }

    file.flush().await?;
    Ok(total)
}
