use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Short-lived cropped face images, retrievable by handle until they expire.
///
/// Expiry is fixed at registration time and does not depend on whether the
/// snapshot was ever fetched.
#[derive(Clone)]
pub struct SnapshotRegistry {
    images: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    ttl: Duration,
}

impl SnapshotRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            images: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.images.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store `jpeg` under a fresh handle and schedule its removal.
    /// Must be called from within the tokio runtime.
    pub fn register(&self, jpeg: Vec<u8>) -> String {
        let handle = uuid::Uuid::new_v4().to_string();
        self.guard().insert(handle.clone(), jpeg);

        let images = Arc::clone(&self.images);
        let ttl = self.ttl;
        let key = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let mut images = images.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if images.remove(&key).is_some() {
                tracing::trace!(handle = %key, "snapshot expired");
            }
        });

        handle
    }

    pub fn get(&self, handle: &str) -> Option<Vec<u8>> {
        self.guard().get(handle).cloned()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }
}
