use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;

/// Byte storage for attachment payloads, addressed by an opaque reference.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` and return a reference that `read` and `delete` accept.
    async fn write(&self, filename: &str, data: &[u8]) -> Result<String>;

    async fn read(&self, blob_ref: &str) -> Result<Vec<u8>>;

    /// Deleting a missing blob is not an error.
    async fn delete(&self, blob_ref: &str) -> Result<()>;
}

/// Blobs stored as flat files named `<uuid>-<filename>` under one directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, blob_ref: &str) -> io::Result<PathBuf> {
        if blob_ref.is_empty()
            || blob_ref.contains('/')
            || blob_ref.contains('\\')
            || blob_ref.contains("..")
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid blob reference '{blob_ref}'"),
            ));
        }
        Ok(self.root.join(blob_ref))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn write(&self, filename: &str, data: &[u8]) -> Result<String> {
        tokio::fs::create_dir_all(&self.root).await?;
        // Filenames arrive sanitized, but keep the ref flat regardless.
        let safe: String = filename
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect::<String>()
            .replace("..", "_");
        let blob_ref = format!("{}-{safe}", uuid::Uuid::new_v4());
        tokio::fs::write(self.root.join(&blob_ref), data).await?;
        Ok(blob_ref)
    }

    async fn read(&self, blob_ref: &str) -> Result<Vec<u8>> {
        let path = self.resolve(blob_ref)?;
        Ok(tokio::fs::read(path).await?)
    }

    async fn delete(&self, blob_ref: &str) -> Result<()> {
        let path = self.resolve(blob_ref)?;
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn write_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = FsBlobStore::new(dir.path().join("attachments"));

        let blob_ref = blobs.write("report.pdf", b"%PDF-1.4\n").await.unwrap();
        assert!(blob_ref.ends_with("-report.pdf"));
        assert_eq!(blobs.read(&blob_ref).await.unwrap(), b"%PDF-1.4\n");

        blobs.delete(&blob_ref).await.unwrap();
        assert!(blobs.read(&blob_ref).await.is_err());
        blobs.delete(&blob_ref).await.unwrap();
    }

    #[tokio::test]
    async fn same_filename_gets_distinct_refs() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = FsBlobStore::new(dir.path());
        let a = blobs.write("same.txt", b"a").await.unwrap();
        let b = blobs.write("same.txt", b"b").await.unwrap();
        assert_ne!(a, b);
        assert_eq!(blobs.read(&a).await.unwrap(), b"a");
        assert_eq!(blobs.read(&b).await.unwrap(), b"b");
    }

    #[tokio::test]
    async fn traversal_refs_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = FsBlobStore::new(dir.path());
        for bad in ["../secret", "a/b", "a\\b", ""] {
            let err = blobs.read(bad).await.unwrap_err();
            assert!(matches!(err, Error::Blob(_)), "{bad}: {err:?}");
            assert!(blobs.delete(bad).await.is_err());
        }
    }

    #[tokio::test]
    async fn unsafe_filename_stays_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = FsBlobStore::new(dir.path());
        let blob_ref = blobs.write("../../escape.txt", b"x").await.unwrap();
        assert!(!blob_ref.contains('/'));
        assert!(!blob_ref.contains(".."));
        assert!(dir.path().join(&blob_ref).exists());
    }
}
