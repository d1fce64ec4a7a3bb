use std::path::{Path, PathBuf};

use async_trait::async_trait;
use uuid::Uuid;

use crate::source::FileRef;

use super::{FileStorage, StorageError};

/// Stores files under a root directory, one file per reference.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Use `root` as the base for relative locations and new files.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Base directory of this storage.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Strip directory components so a caller-provided name cannot escape the root.
fn file_name_component(name: &str) -> &str {
    Path::new(name)
        .file_name()
        .and_then(|value| value.to_str())
        .filter(|value| !value.is_empty())
        .unwrap_or("file")
}

#[async_trait]
impl FileStorage for LocalStorage {
    fn resolve_path(&self, file: &FileRef) -> PathBuf {
        if file.location.is_absolute() {
            file.location.clone()
        } else {
            self.root.join(&file.location)
        }
    }

    async fn read(&self, file: &FileRef) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve_path(file);
        tokio::fs::read(&path)
            .await
            .map_err(|error| io_error(&path, error))
    }

    async fn write(
        &self,
        name: &str,
        mime_type: &str,
        bytes: &[u8],
    ) -> Result<FileRef, StorageError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|error| io_error(&self.root, error))?;

        let name = file_name_component(name);
        let stored_name = format!("{}-{name}", Uuid::new_v4());
        let path = self.root.join(&stored_name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|error| io_error(&path, error))?;

        tracing::debug!(path = %path.display(), size = bytes.len(), "Stored file");
        Ok(FileRef::new(
            name,
            bytes.len() as u64,
            mime_type,
            PathBuf::from(stored_name),
        ))
    }

    async fn delete(&self, file: &FileRef) -> Result<(), StorageError> {
        let path = self.resolve_path(file);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Removed stored file");
                Ok(())
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(io_error(&path, error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::TEXT_PLAIN;
    use crate::storage::read_text;

    #[tokio::test]
    async fn write_then_read_returns_same_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = LocalStorage::new(dir.path());

        let file = storage
            .write("summary.txt", TEXT_PLAIN, "Kurzfassung".as_bytes())
            .await
            .expect("write");

        assert_eq!(file.name, "summary.txt");
        assert_eq!(file.size, "Kurzfassung".len() as u64);
        assert!(storage.resolve_path(&file).starts_with(dir.path()));
        assert_eq!(read_text(&storage, &file).await.expect("read"), "Kurzfassung");
    }

    #[tokio::test]
    async fn write_ignores_directory_components_in_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = LocalStorage::new(dir.path());

        let file = storage
            .write("../../etc/passwd", TEXT_PLAIN, b"x")
            .await
            .expect("write");

        assert_eq!(file.name, "passwd");
        assert_eq!(storage.resolve_path(&file).parent(), Some(dir.path()));
    }

    #[tokio::test]
    async fn absolute_locations_are_used_verbatim() {
        let storage = LocalStorage::new("uploads");
        let file = FileRef::new("out.txt", 0, TEXT_PLAIN, "/tmp/out.txt");
        assert_eq!(storage.resolve_path(&file), PathBuf::from("/tmp/out.txt"));
    }

    #[tokio::test]
    async fn delete_removes_file_and_tolerates_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = LocalStorage::new(dir.path());
        let file = storage
            .write("draft.txt", TEXT_PLAIN, b"entwurf")
            .await
            .expect("write");

        storage.delete(&file).await.expect("delete");
        assert!(!storage.resolve_path(&file).exists());
        storage.delete(&file).await.expect("delete again");
    }

    #[tokio::test]
    async fn reading_missing_file_reports_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = LocalStorage::new(dir.path());
        let file = FileRef::new("gone.txt", 0, TEXT_PLAIN, "gone.txt");

        let error = storage.read(&file).await.expect_err("missing");
        assert!(error.to_string().contains("gone.txt"));
    }
}
