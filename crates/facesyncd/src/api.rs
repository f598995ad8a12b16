//! Typed operations exposed by the daemon. The D-Bus interface is a thin
//! shell around these.

use crate::context::AppContext;
use crate::enrollment::{decode_image, decode_reference_image, EnrollError, EnrollOutcome};
use crate::identity_store::{IdentityStore, StoreError};
use crate::logbuf::LogBuffer;
use crate::reconciler::ReconcileReport;
use crate::recognizer::RecognizeError;
use crate::settings::{AppSettings, SettingsError, SettingsStore, SETTINGS_KEY};
use crate::snapshots::SnapshotRegistry;
use crate::supervisor::SupervisorHandle;
use facesync_cloud::ProviderError;
use facesync_core::{validate_token, DetectedFace, Identity, RecognitionResult, ValidationError};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("No API key entered in app settings")]
    NotConfigured,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("{0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Validation(v) => ApiError::Validation(v),
            StoreError::NotFound(token) => ApiError::NotFound(format!("identity {token}")),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<EnrollError> for ApiError {
    fn from(e: EnrollError) -> Self {
        match e {
            EnrollError::Validation(v) => ApiError::Validation(v),
            EnrollError::Store(s) => s.into(),
            EnrollError::Provider(p) => ApiError::Provider(p),
        }
    }
}

impl From<RecognizeError> for ApiError {
    fn from(e: RecognizeError) -> Self {
        match e {
            RecognizeError::Detection(p) => ApiError::Provider(p),
            RecognizeError::Store(s) => s.into(),
        }
    }
}

impl From<SettingsError> for ApiError {
    fn from(e: SettingsError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub version: &'static str,
    pub configured: bool,
    pub set_id: Option<String>,
    pub threshold: Option<f64>,
    pub identities: usize,
    /// Identities whose reference image is missing on disk.
    pub missing_images: Vec<String>,
    pub snapshots: usize,
    pub log_lines: usize,
}

#[derive(Clone)]
pub struct Api {
    supervisor: SupervisorHandle,
    settings: Arc<SettingsStore>,
    store: IdentityStore,
    snapshots: SnapshotRegistry,
    logs: LogBuffer,
    logs_path: Option<PathBuf>,
}

impl Api {
    pub fn new(
        supervisor: SupervisorHandle,
        settings: Arc<SettingsStore>,
        store: IdentityStore,
        snapshots: SnapshotRegistry,
        logs: LogBuffer,
        logs_path: Option<PathBuf>,
    ) -> Self {
        Self {
            supervisor,
            settings,
            store,
            snapshots,
            logs,
            logs_path,
        }
    }

    async fn context(&self) -> Result<Arc<AppContext>, ApiError> {
        self.supervisor.current().await.ok_or(ApiError::NotConfigured)
    }

    pub fn get_logs(&self) -> Vec<String> {
        self.logs.lines()
    }

    /// Clear the log buffer and its saved copy.
    pub fn delete_logs(&self) -> Result<usize, ApiError> {
        let removed = self.logs.clear();
        if let Some(path) = &self.logs_path {
            self.logs
                .save(path)
                .map_err(|e| ApiError::Internal(format!("cannot save logs: {e}")))?;
        }
        Ok(removed)
    }

    pub async fn get_faces(&self) -> Result<HashMap<String, Identity>, ApiError> {
        Ok(self.store.list().await?)
    }

    /// Raw detection, used to pick a face before enrolling it.
    pub async fn detect(&self, image_b64: &str) -> Result<Vec<DetectedFace>, ApiError> {
        let image = decode_image(image_b64)?;
        let ctx = self.context().await?;
        let faces = ctx.provider.detect_faces(&image).await?;
        tracing::info!(faces = faces.len(), "detect finished");
        Ok(faces)
    }

    pub async fn enroll(&self, image_b64: &str, identity: Identity) -> Result<EnrollOutcome, ApiError> {
        validate_token(&identity.token)?;
        let image = decode_reference_image(image_b64)?;
        let ctx = self.context().await?;
        Ok(ctx.mutations.enroll(&image, identity).await?)
    }

    pub async fn unenroll(&self, token: &str) -> Result<bool, ApiError> {
        validate_token(token)?;
        let ctx = self.context().await?;
        Ok(ctx.mutations.unenroll(token).await?)
    }

    pub async fn recognize(
        &self,
        image_b64: &str,
        origin: Option<&str>,
    ) -> Result<Vec<RecognitionResult>, ApiError> {
        let image = decode_image(image_b64)?;
        let ctx = self.context().await?;
        match ctx.recognizer.recognize(&image, origin).await {
            Ok(results) => Ok(results),
            Err(e) => {
                tracing::error!(error = %e, "recognition failed");
                Err(e.into())
            }
        }
    }

    /// Reconcile the remote set with the identity store now.
    pub async fn sync(&self) -> Result<ReconcileReport, ApiError> {
        self.context().await?;
        self.supervisor.reconcile().await.ok_or(ApiError::NotConfigured)
    }

    pub fn snapshot(&self, handle: &str) -> Result<Vec<u8>, ApiError> {
        self.snapshots
            .get(handle)
            .ok_or_else(|| ApiError::NotFound(format!("snapshot {handle} (expired or unknown)")))
    }

    pub async fn reference_image(&self, token: &str) -> Result<Vec<u8>, ApiError> {
        Ok(self.store.reference_image(token).await?)
    }

    pub async fn relabel(&self, token: &str, label: &str) -> Result<Identity, ApiError> {
        Ok(self.store.relabel(token, label).await?)
    }

    /// Save credentials and threshold. The supervisor picks the change up
    /// and rebuilds the context.
    pub async fn configure(
        &self,
        api_key: &str,
        api_secret: &str,
        threshold: Option<f64>,
    ) -> Result<(), ApiError> {
        if let Some(t) = threshold {
            if !(0.0..=100.0).contains(&t) {
                return Err(ValidationError::InvalidPayload(format!(
                    "threshold {t} is outside 0-100"
                ))
                .into());
            }
        }
        let settings = AppSettings {
            api_key: api_key.trim().to_string(),
            api_secret: api_secret.trim().to_string(),
            threshold,
        };
        self.settings.set(SETTINGS_KEY, &settings).await?;
        tracing::info!(configured = settings.credentials().is_some(), "app settings saved");
        Ok(())
    }

    pub async fn status(&self) -> Result<Status, ApiError> {
        let ctx = self.supervisor.current().await;
        let faces = self.store.list().await?;
        let mut missing_images = Vec::new();
        for token in faces.keys() {
            if !self.store.has_reference_image(token).await? {
                missing_images.push(token.clone());
            }
        }
        if !missing_images.is_empty() {
            tracing::warn!(missing = missing_images.len(), "identities without reference images");
        }
        missing_images.sort();
        Ok(Status {
            version: env!("CARGO_PKG_VERSION"),
            configured: ctx.is_some(),
            set_id: ctx.as_ref().map(|c| c.set_id.clone()),
            threshold: ctx.as_ref().map(|c| c.threshold),
            identities: faces.len(),
            missing_images,
            snapshots: self.snapshots.len(),
            log_lines: self.logs.lines().len(),
        })
    }
}
