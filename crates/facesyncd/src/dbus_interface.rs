use crate::api::{Api, ApiError};
use crate::enrollment::EnrollOutcome;
use facesync_core::Identity;
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.facesync.Daemon1";
pub const OBJECT_PATH: &str = "/org/facesync/Daemon1";

/// D-Bus interface for the FaceSync daemon.
///
/// Bus name: org.facesync.Daemon1
/// Object path: /org/facesync/Daemon1
pub struct FaceSyncService {
    api: Api,
}

impl FaceSyncService {
    pub fn new(api: Api) -> Self {
        Self { api }
    }
}

fn to_fdo(e: ApiError) -> zbus::fdo::Error {
    match e {
        ApiError::Validation(v) => zbus::fdo::Error::InvalidArgs(v.to_string()),
        ApiError::NotFound(what) => zbus::fdo::Error::FileNotFound(what),
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

#[interface(name = "org.facesync.Daemon1")]
impl FaceSyncService {
    /// Recent log lines, oldest first.
    async fn get_logs(&self) -> Vec<String> {
        self.api.get_logs()
    }

    async fn delete_logs(&self) -> zbus::fdo::Result<bool> {
        let removed = self.api.delete_logs().map_err(to_fdo)?;
        tracing::info!(removed, "logs cleared");
        Ok(true)
    }

    /// Enrolled identities as JSON, keyed by token.
    async fn get_faces(&self) -> zbus::fdo::Result<String> {
        to_json(&self.api.get_faces().await.map_err(to_fdo)?)
    }

    /// Detect faces in a base64 image; JSON list of faces.
    async fn detect(&self, image: &str) -> zbus::fdo::Result<String> {
        to_json(&self.api.detect(image).await.map_err(to_fdo)?)
    }

    /// Enroll a detected face. `identity` is JSON `{token, label, attributes}`.
    async fn enroll(&self, image: &str, identity: &str) -> zbus::fdo::Result<bool> {
        let identity: Identity = serde_json::from_str(identity)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("identity: {e}")))?;
        tracing::info!(token = %identity.token, label = %identity.label, "enroll requested");
        let outcome = self.api.enroll(image, identity).await.map_err(to_fdo)?;
        let stored = outcome.identity();
        tracing::info!(
            token = %stored.token,
            label = %stored.label,
            relabeled = matches!(outcome, EnrollOutcome::Relabeled(_)),
            "enroll finished"
        );
        Ok(true)
    }

    async fn unenroll(&self, token: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(token, "unenroll requested");
        self.api.unenroll(token).await.map_err(to_fdo)
    }

    /// Recognize every face in a base64 image; JSON list of results.
    /// An empty origin means "undefined".
    async fn recognize(&self, image: &str, origin: &str) -> zbus::fdo::Result<String> {
        let results = self.api.recognize(image, Some(origin)).await.map_err(to_fdo)?;
        to_json(&results)
    }

    async fn get_snapshot(&self, handle: &str) -> zbus::fdo::Result<Vec<u8>> {
        self.api.snapshot(handle).map_err(to_fdo)
    }

    async fn get_reference_image(&self, token: &str) -> zbus::fdo::Result<Vec<u8>> {
        self.api.reference_image(token).await.map_err(to_fdo)
    }

    async fn relabel(&self, token: &str, label: &str) -> zbus::fdo::Result<bool> {
        self.api.relabel(token, label).await.map_err(to_fdo)?;
        Ok(true)
    }

    /// Save credentials. A threshold of 0 or less keeps the default.
    async fn configure(
        &self,
        api_key: &str,
        api_secret: &str,
        threshold: f64,
    ) -> zbus::fdo::Result<bool> {
        let threshold = (threshold > 0.0).then_some(threshold);
        self.api
            .configure(api_key, api_secret, threshold)
            .await
            .map_err(to_fdo)?;
        Ok(true)
    }

    /// Run a reconcile pass now; JSON report, or an error when unconfigured.
    async fn sync(&self) -> zbus::fdo::Result<String> {
        to_json(&self.api.sync().await.map_err(to_fdo)?)
    }

    async fn status(&self) -> zbus::fdo::Result<String> {
        to_json(&self.api.status().await.map_err(to_fdo)?)
    }

    /// Emitted once per recognized face with the flat trigger payload as JSON.
    #[zbus(signal)]
    pub async fn face_detected(emitter: &SignalEmitter<'_>, payload: &str) -> zbus::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use facesync_core::ValidationError;

    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            to_fdo(ApiError::Validation(ValidationError::EmptyLabel)),
            zbus::fdo::Error::InvalidArgs(_)
        ));
        assert!(matches!(
            to_fdo(ApiError::NotFound("snapshot x".into())),
            zbus::fdo::Error::FileNotFound(_)
        ));
        match to_fdo(ApiError::NotConfigured) {
            zbus::fdo::Error::Failed(msg) => assert_eq!(msg, "No API key entered in app settings"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
