//! Flat-file store for per-identity reference images: `<dir>/<token>.img`.

use std::io;
use std::path::{Path, PathBuf};

const BLOB_EXTENSION: &str = "img";

#[derive(Debug, Clone)]
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the blob for `token`. Tokens are provider-issued identifiers;
    /// anything that could escape the directory is refused.
    fn path(&self, token: &str) -> io::Result<PathBuf> {
        let safe = !token.is_empty()
            && token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !safe {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid blob name '{token}'"),
            ));
        }
        Ok(self.dir.join(format!("{token}.{BLOB_EXTENSION}")))
    }

    pub async fn write(&self, token: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.path(token)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(path, bytes).await
    }

    /// Blob bytes, or `None` when absent.
    pub async fn read(&self, token: &str) -> io::Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path(token)?).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn exists(&self, token: &str) -> io::Result<bool> {
        tokio::fs::try_exists(self.path(token)?).await
    }

    /// Delete a blob. Returns whether one existed.
    pub async fn delete(&self, token: &str) -> io::Result<bool> {
        match tokio::fs::remove_file(self.path(token)?).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Tokens of every stored blob. A missing directory lists nothing.
    pub async fn list(&self) -> io::Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut tokens = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(BLOB_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                tokens.push(stem.to_string());
            }
        }
        tokens.sort();
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = BlobStore::new(dir.path().join("userdata"));

        blobs.write("abc", b"jpeg").await.unwrap();
        assert!(blobs.exists("abc").await.unwrap());
        assert_eq!(blobs.read("abc").await.unwrap().as_deref(), Some(&b"jpeg"[..]));

        assert!(blobs.delete("abc").await.unwrap());
        assert!(!blobs.delete("abc").await.unwrap());
        assert_eq!(blobs.read("abc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = BlobStore::new(dir.path());
        blobs.write("b", b"2").await.unwrap();
        blobs.write("a", b"1").await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        assert_eq!(blobs.list().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_list_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = BlobStore::new(dir.path().join("never-created"));
        assert!(blobs.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = BlobStore::new(dir.path());
        let err = blobs.read("../settings").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
