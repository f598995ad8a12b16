//! Durable key/value settings store.
//!
//! All keys live in one JSON document written atomically (temp file +
//! rename). Every successful `set` publishes the key on the single-consumer
//! change channel returned by [`SettingsStore::on_change`].

use facesync_cloud::Credentials;
use facesync_core::DEFAULT_THRESHOLD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

/// App settings: credentials and match threshold.
pub const SETTINGS_KEY: &str = "settings";
/// Enrolled identities, token -> Identity.
pub const FACE_SET_KEY: &str = "face_set";
/// Stable per-installation UUID.
pub const INSTALLATION_ID_KEY: &str = "installation_id";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("settings I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("settings file {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("settings value for '{key}' is malformed: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot encode settings value for '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

pub struct SettingsStore {
    /// None for the in-memory store used in tests.
    path: Option<PathBuf>,
    values: Mutex<Map<String, Value>>,
    changes: std::sync::Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl SettingsStore {
    /// Open the store at `path`. A missing file starts empty.
    pub async fn open(path: PathBuf) -> Result<Self, SettingsError> {
        let values = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice::<Map<String, Value>>(&raw).map_err(|source| {
                SettingsError::Corrupt {
                    path: path.clone(),
                    source,
                }
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(source) => return Err(SettingsError::Io { path, source }),
        };
        tracing::debug!(path = %path.display(), keys = values.len(), "settings loaded");

        Ok(Self {
            path: Some(path),
            values: Mutex::new(values),
            changes: std::sync::Mutex::new(None),
        })
    }

    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: Mutex::new(Map::new()),
            changes: std::sync::Mutex::new(None),
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SettingsError> {
        let values = self.values.lock().await;
        match values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => serde_json::from_value(v.clone())
                .map(Some)
                .map_err(|source| SettingsError::Malformed {
                    key: key.to_string(),
                    source,
                }),
        }
    }

    /// Store `value` under `key`, persist, then notify the change consumer.
    /// On a persistence failure the in-memory value is rolled back.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), SettingsError> {
        let encoded = serde_json::to_value(value).map_err(|source| SettingsError::Encode {
            key: key.to_string(),
            source,
        })?;

        {
            let mut values = self.values.lock().await;
            let previous = values.insert(key.to_string(), encoded);
            if let Err(e) = self.persist(&values).await {
                match previous {
                    Some(v) => values.insert(key.to_string(), v),
                    None => values.remove(key),
                };
                return Err(e);
            }
        }

        self.notify(key);
        Ok(())
    }

    /// Take over the change channel. Only the most recent consumer receives keys.
    pub fn on_change(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self
            .changes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(tx);
        rx
    }

    /// App settings, defaulting when never saved.
    pub async fn app_settings(&self) -> Result<AppSettings, SettingsError> {
        Ok(self.get(SETTINGS_KEY).await?.unwrap_or_default())
    }

    /// The installation UUID, generated and saved on first use.
    pub async fn installation_id(&self) -> Result<String, SettingsError> {
        if let Some(id) = self.get::<String>(INSTALLATION_ID_KEY).await? {
            return Ok(id);
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.set(INSTALLATION_ID_KEY, &id).await?;
        tracing::info!(installation_id = %id, "generated installation id");
        Ok(id)
    }

    fn notify(&self, key: &str) {
        let changes = self
            .changes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(tx) = changes.as_ref() {
            if tx.send(key.to_string()).is_err() {
                tracing::debug!(key, "settings change consumer is gone");
            }
        }
    }

    async fn persist(&self, values: &Map<String, Value>) -> Result<(), SettingsError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let io_err = |source| SettingsError::Io {
            path: path.clone(),
            source,
        };
        let json = serde_json::to_vec_pretty(values).map_err(|source| SettingsError::Encode {
            key: "*".to_string(),
            source,
        })?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
        Ok(())
    }
}

/// The `settings` key as saved by the settings panel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    /// Accepts a number or a numeric string; anything else reads as unset.
    #[serde(default, deserialize_with = "lenient_number")]
    pub threshold: Option<f64>,
}

impl AppSettings {
    /// Credentials, when both parts are present.
    pub fn credentials(&self) -> Option<Credentials> {
        let key = self.api_key.trim();
        let secret = self.api_secret.trim();
        if key.is_empty() || secret.is_empty() {
            return None;
        }
        Some(Credentials {
            api_key: key.to_string(),
            api_secret: secret.to_string(),
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
            .filter(|t| t.is_finite())
            .unwrap_or(DEFAULT_THRESHOLD)
    }
}

fn lenient_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_roundtrip_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let store = SettingsStore::open(path.clone()).await.unwrap();
        store.set("answer", &42u32).await.unwrap();

        let reopened = SettingsStore::open(path).await.unwrap();
        assert_eq!(reopened.get::<u32>("answer").await.unwrap(), Some(42));
        assert_eq!(reopened.get::<u32>("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, b"{not json").unwrap();
        let err = SettingsStore::open(path).await.err().unwrap();
        assert!(matches!(err, SettingsError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_change_channel_reports_keys() {
        let store = SettingsStore::in_memory();
        let mut rx = store.on_change();
        store.set(SETTINGS_KEY, &AppSettings::default()).await.unwrap();
        store.set(FACE_SET_KEY, &json!({})).await.unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some(SETTINGS_KEY));
        assert_eq!(rx.recv().await.as_deref(), Some(FACE_SET_KEY));
    }

    #[tokio::test]
    async fn test_malformed_value() {
        let store = SettingsStore::in_memory();
        store.set("n", &"not a number").await.unwrap();
        assert!(matches!(
            store.get::<u32>("n").await,
            Err(SettingsError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn test_installation_id_is_stable() {
        let store = SettingsStore::in_memory();
        let first = store.installation_id().await.unwrap();
        assert_eq!(store.installation_id().await.unwrap(), first);
    }

    #[test]
    fn test_threshold_accepts_strings() {
        let s: AppSettings =
            serde_json::from_value(json!({ "apiKey": "k", "apiSecret": "s", "threshold": "80" }))
                .unwrap();
        assert_eq!(s.threshold(), 80.0);
        assert!(s.credentials().is_some());
    }

    #[test]
    fn test_threshold_defaults() {
        let s: AppSettings = serde_json::from_value(json!({ "threshold": "" })).unwrap();
        assert_eq!(s.threshold(), DEFAULT_THRESHOLD);
        assert!(s.credentials().is_none());
    }
}
