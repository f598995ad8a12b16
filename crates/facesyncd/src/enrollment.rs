//! Enroll and unenroll: identity store, blob store and remote set together.
//!
//! Local state is written first and kept when the remote step fails; the
//! next reconcile pass retries the remote side.

use crate::identity_store::{IdentityStore, StoreError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use facesync_cloud::{FaceProvider, ProviderError, RemoveTarget};
use facesync_core::{validate_label, validate_token, Identity, ValidationError};
use std::sync::Arc;
use thiserror::Error;

/// Largest accepted base64 image payload, in characters.
pub const MAX_IMAGE_BASE64_LEN: usize = 1_048_000;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("remote face set update failed: {0}")]
    Provider(#[from] ProviderError),
}

/// Decode a base64 image, optionally wrapped as a `data:` URL.
pub fn decode_image(payload: &str) -> Result<Vec<u8>, ValidationError> {
    let encoded = base64_body(payload)?;
    STANDARD
        .decode(encoded)
        .map_err(|e| ValidationError::InvalidPayload(format!("image is not valid base64: {e}")))
}

/// Like [`decode_image`], but refuses payloads over [`MAX_IMAGE_BASE64_LEN`].
/// Reference images are kept on disk, so enrollment bounds their size.
pub fn decode_reference_image(payload: &str) -> Result<Vec<u8>, ValidationError> {
    let len = base64_body(payload)?.len();
    if len > MAX_IMAGE_BASE64_LEN {
        return Err(ValidationError::InvalidPayload(format!(
            "image too large ({len} characters, limit {MAX_IMAGE_BASE64_LEN})"
        )));
    }
    decode_image(payload)
}

fn base64_body(payload: &str) -> Result<&str, ValidationError> {
    let payload = payload.trim();
    let encoded = match payload.strip_prefix("data:") {
        Some(rest) => rest
            .split_once("base64,")
            .map(|(_, data)| data)
            .ok_or_else(|| ValidationError::InvalidPayload("data URL is not base64".into()))?,
        None => payload,
    };
    if encoded.is_empty() {
        return Err(ValidationError::InvalidPayload("image is empty".into()));
    }
    Ok(encoded)
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnrollOutcome {
    Enrolled(Identity),
    /// The token was already enrolled; only its label changed.
    Relabeled(Identity),
}

impl EnrollOutcome {
    pub fn identity(&self) -> &Identity {
        match self {
            EnrollOutcome::Enrolled(i) | EnrollOutcome::Relabeled(i) => i,
        }
    }
}

pub struct IdentityMutations {
    provider: Arc<dyn FaceProvider>,
    store: IdentityStore,
    set_id: String,
}

impl IdentityMutations {
    pub fn new(provider: Arc<dyn FaceProvider>, store: IdentityStore, set_id: String) -> Self {
        Self {
            provider,
            store,
            set_id,
        }
    }

    /// Reference image, then metadata, then the remote add. Input is fully
    /// validated before anything is written.
    pub async fn enroll(&self, image: &[u8], identity: Identity) -> Result<EnrollOutcome, EnrollError> {
        validate_token(&identity.token)?;
        let label = validate_label(&identity.label)?;

        if self.store.get(&identity.token).await?.is_some() {
            let updated = self.store.relabel(&identity.token, &label).await?;
            return Ok(EnrollOutcome::Relabeled(updated));
        }
        if image.is_empty() {
            return Err(ValidationError::InvalidPayload("image is empty".into()).into());
        }

        let stored = self.store.upsert(Identity { label, ..identity }, image).await?;
        self.provider.add_to_set(&self.set_id, &stored.token).await?;

        tracing::info!(token = %stored.token, label = %stored.label, "face enrolled");
        Ok(EnrollOutcome::Enrolled(stored))
    }

    /// Reference image, then metadata, then the remote remove. Removing a
    /// token that is not enrolled succeeds. Returns whether it was enrolled.
    pub async fn unenroll(&self, token: &str) -> Result<bool, EnrollError> {
        validate_token(token)?;
        let existed = self.store.remove(token).await?;
        self.provider
            .remove_from_set(&self.set_id, RemoveTarget::Token(token))
            .await?;

        tracing::info!(token, existed, "face unenrolled");
        Ok(existed)
    }
}
