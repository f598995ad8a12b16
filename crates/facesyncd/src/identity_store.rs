//! Identity store: enrolled identities and their reference images.
//!
//! Metadata is the `face_set` settings key (token -> Identity); images live
//! in the blob store. `upsert` and `remove` always touch both, and every
//! write (including the orphan sweep) holds the store's write lock so a sweep
//! never sees a blob whose metadata is still being written.

use crate::blobs::BlobStore;
use crate::settings::{SettingsError, SettingsStore, FACE_SET_KEY};
use facesync_core::{validate_label, validate_token, Identity, ValidationError};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("no identity enrolled for token {0}")]
    NotFound(String),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("reference image I/O for {token}: {source}")]
    Io {
        token: String,
        #[source]
        source: std::io::Error,
    },
}

fn io_err(token: &str) -> impl FnOnce(std::io::Error) -> StoreError {
    let token = token.to_string();
    move |source| StoreError::Io { token, source }
}

/// Clone-safe handle to the identity store.
#[derive(Clone)]
pub struct IdentityStore {
    settings: Arc<SettingsStore>,
    blobs: BlobStore,
    writes: Arc<Mutex<()>>,
}

impl IdentityStore {
    pub fn new(settings: Arc<SettingsStore>, blobs: BlobStore) -> Self {
        Self {
            settings,
            blobs,
            writes: Arc::new(Mutex::new(())),
        }
    }

    /// All identities keyed by token.
    pub async fn list(&self) -> Result<HashMap<String, Identity>, StoreError> {
        Ok(self
            .settings
            .get::<HashMap<String, Identity>>(FACE_SET_KEY)
            .await?
            .unwrap_or_default())
    }

    pub async fn get(&self, token: &str) -> Result<Option<Identity>, StoreError> {
        Ok(self.list().await?.remove(token))
    }

    /// Insert or replace an identity together with its reference image.
    /// Nothing is written unless the token and label are valid.
    pub async fn upsert(&self, identity: Identity, image: &[u8]) -> Result<Identity, StoreError> {
        validate_token(&identity.token)?;
        let identity = Identity {
            label: validate_label(&identity.label)?,
            ..identity
        };

        let _writes = self.writes.lock().await;
        self.blobs
            .write(&identity.token, image)
            .await
            .map_err(io_err(&identity.token))?;

        let mut faces = self.list().await?;
        faces.insert(identity.token.clone(), identity.clone());
        self.settings.set(FACE_SET_KEY, &faces).await?;

        tracing::info!(token = %identity.token, label = %identity.label, "identity stored");
        Ok(identity)
    }

    /// Change the label of an enrolled identity.
    pub async fn relabel(&self, token: &str, label: &str) -> Result<Identity, StoreError> {
        let label = validate_label(label)?;
        let _writes = self.writes.lock().await;
        let mut faces = self.list().await?;
        let identity = faces
            .get_mut(token)
            .ok_or_else(|| StoreError::NotFound(token.to_string()))?;
        identity.label = label;
        let updated = identity.clone();
        self.settings.set(FACE_SET_KEY, &faces).await?;

        tracing::info!(token, label = %updated.label, "identity relabeled");
        Ok(updated)
    }

    /// Delete the reference image, then the metadata. Both steps tolerate
    /// absence. Returns whether an identity existed.
    pub async fn remove(&self, token: &str) -> Result<bool, StoreError> {
        let _writes = self.writes.lock().await;
        self.blobs.delete(token).await.map_err(io_err(token))?;

        let mut faces = self.list().await?;
        let existed = faces.remove(token).is_some();
        if existed {
            self.settings.set(FACE_SET_KEY, &faces).await?;
            tracing::info!(token, "identity removed");
        }
        Ok(existed)
    }

    pub async fn reference_image(&self, token: &str) -> Result<Vec<u8>, StoreError> {
        self.blobs
            .read(token)
            .await
            .map_err(io_err(token))?
            .ok_or_else(|| StoreError::NotFound(token.to_string()))
    }

    pub async fn has_reference_image(&self, token: &str) -> Result<bool, StoreError> {
        self.blobs.exists(token).await.map_err(io_err(token))
    }

    /// Blob tokens that have no identity.
    pub async fn orphaned_images(&self) -> Result<Vec<String>, StoreError> {
        let faces = self.list().await?;
        let blobs = self
            .blobs
            .list()
            .await
            .map_err(io_err(&self.blobs.dir().display().to_string()))?;
        Ok(blobs.into_iter().filter(|t| !faces.contains_key(t)).collect())
    }

    /// Delete every orphaned reference image. A blob that cannot be deleted
    /// is logged and left for the next sweep. Returns the removed tokens.
    pub async fn remove_orphaned_images(&self) -> Result<Vec<String>, StoreError> {
        let _writes = self.writes.lock().await;
        let mut removed = Vec::new();
        for token in self.orphaned_images().await? {
            match self.blobs.delete(&token).await {
                Ok(_) => removed.push(token),
                Err(e) => tracing::warn!(token = %token, error = %e, "cannot delete orphaned image"),
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facesync_core::FaceAttributes;

    fn identity(token: &str, label: &str) -> Identity {
        Identity {
            token: token.to_string(),
            label: label.to_string(),
            attributes: FaceAttributes::default(),
        }
    }

    fn store(dir: &std::path::Path) -> IdentityStore {
        IdentityStore::new(
            Arc::new(SettingsStore::in_memory()),
            BlobStore::new(dir.join("userdata")),
        )
    }

    #[tokio::test]
    async fn test_upsert_writes_blob_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let token = "a".repeat(32);

        let stored = store.upsert(identity(&token, "  Alice "), b"img").await.unwrap();
        assert_eq!(stored.label, "Alice");
        assert!(store.has_reference_image(&token).await.unwrap());
        assert_eq!(store.get(&token).await.unwrap().unwrap().label, "Alice");
    }

    #[tokio::test]
    async fn test_upsert_rejects_bad_token_without_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let err = store.upsert(identity("short", "Bob"), b"img").await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert!(store.list().await.unwrap().is_empty());
        assert!(store.orphaned_images().await.unwrap().is_empty());
        assert!(!dir.path().join("userdata").exists());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let token = "b".repeat(32);
        store.upsert(identity(&token, "Bob"), b"img").await.unwrap();

        assert!(store.remove(&token).await.unwrap());
        assert!(!store.remove(&token).await.unwrap());
        assert!(!store.has_reference_image(&token).await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_relabel() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let token = "c".repeat(32);
        store.upsert(identity(&token, "Carol"), b"img").await.unwrap();

        assert_eq!(store.relabel(&token, "Caroline").await.unwrap().label, "Caroline");
        assert!(matches!(
            store.relabel(&"d".repeat(32), "Dan").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_orphaned_images() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let kept = "e".repeat(32);
        let orphan = "f".repeat(32);
        store.upsert(identity(&kept, "Eve"), b"img").await.unwrap();
        BlobStore::new(dir.path().join("userdata"))
            .write(&orphan, b"stale")
            .await
            .unwrap();

        assert_eq!(store.orphaned_images().await.unwrap(), vec![orphan]);
    }

    #[tokio::test]
    async fn test_reference_image_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        assert!(matches!(
            store.reference_image(&"g".repeat(32)).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_orphan_sweep_waits_for_in_flight_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let token = "h".repeat(32);

        // Blob written, metadata not yet: the state mid-way through upsert.
        let writes = store.writes.lock().await;
        store.blobs.write(&token, b"img").await.unwrap();
        let sweep = tokio::spawn({
            let store = store.clone();
            async move { store.remove_orphaned_images().await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(store.blobs.exists(&token).await.unwrap());

        let faces = HashMap::from([(token.clone(), identity(&token, "Hana"))]);
        store.settings.set(FACE_SET_KEY, &faces).await.unwrap();
        drop(writes);

        assert!(sweep.await.unwrap().unwrap().is_empty());
        assert!(store.has_reference_image(&token).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_orphaned_images() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let kept = "i".repeat(32);
        let orphan = "j".repeat(32);
        store.upsert(identity(&kept, "Ivan"), b"img").await.unwrap();
        store.blobs.write(&orphan, b"stale").await.unwrap();

        assert_eq!(store.remove_orphaned_images().await.unwrap(), vec![orphan.clone()]);
        assert!(!store.blobs.exists(&orphan).await.unwrap());
        assert!(store.has_reference_image(&kept).await.unwrap());
    }
}
