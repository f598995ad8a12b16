use crate::events::TriggerBus;
use crate::identity_store::{IdentityStore, StoreError};
use crate::snapshots::SnapshotRegistry;
use facesync_cloud::{FaceProvider, ProviderError};
use facesync_core::{
    BoundingBox, DetectedFace, Identity, Matcher, RecognitionResult, SourceImage,
    ThresholdMatcher,
};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Origin reported when the caller supplies none.
pub const DEFAULT_ORIGIN: &str = "undefined";

#[derive(Error, Debug)]
pub enum RecognizeError {
    #[error("face detection failed: {0}")]
    Detection(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Detect -> crop -> search -> threshold -> emit, over one image.
pub struct Recognizer {
    provider: Arc<dyn FaceProvider>,
    store: IdentityStore,
    set_id: String,
    matcher: ThresholdMatcher,
    snapshots: SnapshotRegistry,
    triggers: TriggerBus,
}

impl Recognizer {
    pub fn new(
        provider: Arc<dyn FaceProvider>,
        store: IdentityStore,
        set_id: String,
        threshold: f64,
        snapshots: SnapshotRegistry,
        triggers: TriggerBus,
    ) -> Self {
        Self {
            provider,
            store,
            set_id,
            matcher: ThresholdMatcher { threshold },
            snapshots,
            triggers,
        }
    }

    /// Recognize every face in `image`. Each face yields exactly one result,
    /// emitted on the trigger bus before this returns. Only a detection
    /// failure fails the call; per-face search failures report NO_MATCH.
    pub async fn recognize(
        &self,
        image: &[u8],
        origin: Option<&str>,
    ) -> Result<Vec<RecognitionResult>, RecognizeError> {
        let origin = origin
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .unwrap_or(DEFAULT_ORIGIN);

        // Mutations made while this call is in flight may or may not be seen.
        let gallery = self.store.list().await?;

        let faces = self.provider.detect_faces(image).await?;
        if faces.is_empty() {
            tracing::info!("No faces found in image {origin}");
            return Ok(Vec::new());
        }
        tracing::debug!(origin, faces = faces.len(), "faces detected");

        let source = decode_source(image).await;
        let branches = faces
            .into_iter()
            .map(|face| self.recognize_face(source.clone(), origin, face, &gallery));
        let results = join_all(branches).await;

        tracing::info!(
            origin,
            faces = results.len(),
            matched = results.iter().filter(|r| r.is_match()).count(),
            "recognition finished"
        );
        Ok(results)
    }

    async fn recognize_face(
        &self,
        source: Option<Arc<SourceImage>>,
        origin: &str,
        face: DetectedFace,
        gallery: &HashMap<String, Identity>,
    ) -> RecognitionResult {
        let mut result = RecognitionResult::unmatched(origin, &face);

        if let Some(source) = source {
            if let Some(jpeg) = crop_snapshot(source, face.bounding_box, &face.token).await {
                result.face_image_token = self.snapshots.register(jpeg);
            }
        }

        if gallery.is_empty() {
            tracing::debug!(token = %face.token, "no identities enrolled; skipping search");
        } else {
            match self.provider.search_in_set(&self.set_id, &face.token).await {
                Ok(ranked) => {
                    let outcome = self.matcher.select(&ranked, gallery);
                    outcome.apply(&mut result);
                    tracing::debug!(
                        token = %face.token,
                        label = %result.label,
                        best = ?outcome.best_confidence,
                        "face searched"
                    );
                }
                Err(e) => {
                    tracing::warn!(token = %face.token, error = %e, "face search failed");
                }
            }
        }

        self.triggers.emit(result.clone());
        result
    }
}

/// Decode the submitted image once, off the async workers. `None` when it
/// cannot be decoded; results then carry no snapshot.
async fn decode_source(image: &[u8]) -> Option<Arc<SourceImage>> {
    let bytes = image.to_vec();
    match tokio::task::spawn_blocking(move || SourceImage::decode(&bytes)).await {
        Ok(Ok(source)) => Some(Arc::new(source)),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "cannot decode image for face snapshots");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "snapshot decode task failed");
            None
        }
    }
}

async fn crop_snapshot(source: Arc<SourceImage>, face: BoundingBox, token: &str) -> Option<Vec<u8>> {
    match tokio::task::spawn_blocking(move || source.crop_face(&face)).await {
        Ok(Ok(jpeg)) => Some(jpeg),
        Ok(Err(e)) => {
            tracing::warn!(token, error = %e, "cannot crop face snapshot");
            None
        }
        Err(e) => {
            tracing::warn!(token, error = %e, "snapshot crop task failed");
            None
        }
    }
}
