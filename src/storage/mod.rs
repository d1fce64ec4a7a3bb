//! Storage collaborator: resolves, reads, and writes file contents behind [`FileRef`]s.

mod local;

pub use local::LocalStorage;

use crate::source::FileRef;
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while touching stored content.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem operation failed for the given path.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path involved in the failing operation.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Content-addressable-by-reference file access.
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Filesystem path holding the referenced content.
    fn resolve_path(&self, file: &FileRef) -> PathBuf;

    /// Read the referenced bytes.
    async fn read(&self, file: &FileRef) -> Result<Vec<u8>, StorageError>;

    /// Store `bytes` under a new reference derived from `name`.
    async fn write(&self, name: &str, mime_type: &str, bytes: &[u8])
    -> Result<FileRef, StorageError>;

    /// Remove the referenced content. Missing content is not an error.
    async fn delete(&self, file: &FileRef) -> Result<(), StorageError>;
}

/// Read referenced content as UTF-8, replacing invalid sequences.
pub async fn read_text(storage: &dyn FileStorage, file: &FileRef) -> Result<String, StorageError> {
    let bytes = storage.read(file).await?;
    Ok(match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(error) => {
            tracing::warn!(file_id = %file.id, "Stored text is not valid UTF-8; decoding lossily");
            String::from_utf8_lossy(error.as_bytes()).into_owned()
        }
    })
}
