use async_trait::async_trait;
use facesync_core::{DetectedFace, RankedMatch};
use std::time::Duration;
use thiserror::Error;

/// Provider message returned when a face set has never been created.
pub const MISSING_SET_MESSAGE: &str = "INVALID_OUTER_ID";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Business error reported by the provider in `error_message`.
    #[error("{0}")]
    Api(String),
    #[error("provider returned HTTP {0}")]
    Status(u16),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// True when the failure means the remote set does not exist yet.
    pub fn is_missing_set(&self) -> bool {
        matches!(self, ProviderError::Api(msg) if msg.contains(MISSING_SET_MESSAGE))
    }
}

/// Which members to drop from a remote set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveTarget<'a> {
    Token(&'a str),
    All,
}

/// The four remote operations the daemon relies on.
///
/// Implementations hold credentials and transport; they keep no state
/// between calls and never retry.
#[async_trait]
pub trait FaceProvider: Send + Sync {
    /// Detect faces (with attributes) in an encoded image.
    async fn detect_faces(&self, image: &[u8]) -> Result<Vec<DetectedFace>, ProviderError>;

    /// Rank the members of `set_id` against `face_token`, in provider order.
    async fn search_in_set(
        &self,
        set_id: &str,
        face_token: &str,
    ) -> Result<Vec<RankedMatch>, ProviderError>;

    /// Add a token to the set, creating the set on first use. Idempotent.
    async fn add_to_set(&self, set_id: &str, face_token: &str) -> Result<(), ProviderError>;

    /// Remove one token or all tokens. A set that does not exist yet is not an error.
    async fn remove_from_set(
        &self,
        set_id: &str,
        target: RemoveTarget<'_>,
    ) -> Result<(), ProviderError>;
}
