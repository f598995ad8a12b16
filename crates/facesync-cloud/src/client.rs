//! Face++ v3 HTTPS client.

use crate::provider::{FaceProvider, ProviderError, RemoveTarget};
use crate::wire::{DetectResponse, SearchResponse};
use async_trait::async_trait;
use base64::Engine;
use facesync_core::{DetectedFace, RankedMatch};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api-us.faceplusplus.com";

const DETECT_EP: &str = "/facepp/v3/detect";
const SEARCH_EP: &str = "/facepp/v3/search";
// faceset/create with force_merge=1 creates the set on first use and merges
// tokens into it afterwards.
const FACESET_CREATE_EP: &str = "/facepp/v3/faceset/create";
const FACESET_REMOVE_EP: &str = "/facepp/v3/faceset/removeface";

const RETURN_ATTRIBUTES: &str =
    "gender,age,smiling,facequality,eyestatus,emotion,beauty,mouthstatus,eyegaze,skinstatus";
const REMOVE_ALL_TOKENS: &str = "RemoveAllFaceTokens";

/// API credentials injected into every request.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Transport settings.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Scheme and host, without a trailing slash.
    pub base_url: String,
    /// Upper bound on one request, including reading the body.
    pub timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Face++ client. Cheap to clone; clones share the connection pool.
#[derive(Clone, Debug)]
pub struct FacePlusPlus {
    http: reqwest::Client,
    credentials: Credentials,
    base_url: String,
    timeout: Duration,
}

impl FacePlusPlus {
    pub fn new(credentials: Credentials, options: ClientOptions) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|e| ProviderError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            credentials,
            base_url: options.base_url.trim_end_matches('/').to_string(),
            timeout: options.timeout,
        })
    }

    /// POST a form-encoded request and decode the JSON body.
    ///
    /// A non-empty `error_message` wins over the HTTP status; an unparseable
    /// body is treated as an empty object.
    async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        mut form: Vec<(&'static str, String)>,
    ) -> Result<T, ProviderError> {
        form.push(("api_key", self.credentials.api_key.clone()));
        form.push(("api_secret", self.credentials.api_secret.clone()));

        let url = format!("{}{}", self.base_url, endpoint);
        let response = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.transport_error(e))?;
        let body: Value =
            serde_json::from_str(&text).unwrap_or_else(|_| Value::Object(Default::default()));

        if let Some(message) = body
            .get("error_message")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
        {
            tracing::debug!(endpoint, status = status.as_u16(), error = message, "provider error");
            return Err(ProviderError::Api(message.to_string()));
        }
        if status != reqwest::StatusCode::OK {
            return Err(ProviderError::Status(status.as_u16()));
        }

        serde_json::from_value(body).map_err(|e| ProviderError::Decode(format!("{endpoint}: {e}")))
    }

    fn transport_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else {
            ProviderError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl FaceProvider for FacePlusPlus {
    async fn detect_faces(&self, image: &[u8]) -> Result<Vec<DetectedFace>, ProviderError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let resp: DetectResponse = self
            .call(
                DETECT_EP,
                vec![
                    ("return_attributes", RETURN_ATTRIBUTES.to_string()),
                    ("image_base64", encoded),
                ],
            )
            .await?;
        Ok(resp.faces.into_iter().map(Into::into).collect())
    }

    async fn search_in_set(
        &self,
        set_id: &str,
        face_token: &str,
    ) -> Result<Vec<RankedMatch>, ProviderError> {
        let resp: SearchResponse = self
            .call(
                SEARCH_EP,
                vec![
                    ("outer_id", set_id.to_string()),
                    ("face_token", face_token.to_string()),
                ],
            )
            .await?;
        Ok(resp.results.into_iter().map(Into::into).collect())
    }

    async fn add_to_set(&self, set_id: &str, face_token: &str) -> Result<(), ProviderError> {
        let _: IgnoredAny = self
            .call(
                FACESET_CREATE_EP,
                vec![
                    ("force_merge", "1".to_string()),
                    ("outer_id", set_id.to_string()),
                    ("face_tokens", face_token.to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn remove_from_set(
        &self,
        set_id: &str,
        target: RemoveTarget<'_>,
    ) -> Result<(), ProviderError> {
        let tokens = match target {
            RemoveTarget::Token(token) => token.to_string(),
            RemoveTarget::All => REMOVE_ALL_TOKENS.to_string(),
        };
        let result: Result<IgnoredAny, _> = self
            .call(
                FACESET_REMOVE_EP,
                vec![("outer_id", set_id.to_string()), ("face_tokens", tokens)],
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_missing_set() => {
                tracing::debug!(set_id, "face set does not exist yet; nothing to remove");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
