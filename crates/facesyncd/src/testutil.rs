//! In-memory `FaceProvider` for daemon tests.
//!
//! Keeps remote set membership like the real provider would (add merges,
//! remove-all clears, removing from an unknown set succeeds) and records
//! every call in order.

use async_trait::async_trait;
use crate::context::ProviderFactory;
use facesync_cloud::{Credentials, FaceProvider, ProviderError, RemoveTarget};
use facesync_core::{BoundingBox, DetectedFace, FaceAttributes, Identity, RankedMatch};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Detect,
    Search { set_id: String, token: String },
    Add { set_id: String, token: String },
    Remove { set_id: String, token: String },
    RemoveAll { set_id: String },
}

pub struct FakeProvider {
    detect: Mutex<Result<Vec<DetectedFace>, ProviderError>>,
    search: Mutex<HashMap<String, Result<Vec<RankedMatch>, ProviderError>>>,
    failing_adds: Mutex<HashSet<String>>,
    remove_error: Mutex<Option<ProviderError>>,
    sets: Mutex<HashMap<String, BTreeSet<String>>>,
    calls: Mutex<Vec<Call>>,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self {
            detect: Mutex::new(Ok(Vec::new())),
            search: Mutex::new(HashMap::new()),
            failing_adds: Mutex::new(HashSet::new()),
            remove_error: Mutex::new(None),
            sets: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl FakeProvider {
    pub fn set_faces(&self, faces: Vec<DetectedFace>) {
        *self.detect.lock().unwrap() = Ok(faces);
    }

    pub fn fail_detect(&self, error: ProviderError) {
        *self.detect.lock().unwrap() = Err(error);
    }

    /// Search response for probe `token`.
    pub fn set_search(&self, token: &str, response: Result<Vec<RankedMatch>, ProviderError>) {
        self.search.lock().unwrap().insert(token.to_string(), response);
    }

    pub fn fail_add(&self, token: &str) {
        self.failing_adds.lock().unwrap().insert(token.to_string());
    }

    pub fn fail_remove(&self, error: ProviderError) {
        *self.remove_error.lock().unwrap() = Some(error);
    }

    pub fn seed_set(&self, set_id: &str, tokens: &[&str]) {
        self.sets
            .lock()
            .unwrap()
            .entry(set_id.to_string())
            .or_default()
            .extend(tokens.iter().map(|t| t.to_string()));
    }

    pub fn members(&self, set_id: &str) -> BTreeSet<String> {
        self.sets
            .lock()
            .unwrap()
            .get(set_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn search_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Search { .. }))
            .count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl FaceProvider for FakeProvider {
    async fn detect_faces(&self, _image: &[u8]) -> Result<Vec<DetectedFace>, ProviderError> {
        self.record(Call::Detect);
        self.detect.lock().unwrap().clone()
    }

    async fn search_in_set(
        &self,
        set_id: &str,
        face_token: &str,
    ) -> Result<Vec<RankedMatch>, ProviderError> {
        self.record(Call::Search {
            set_id: set_id.to_string(),
            token: face_token.to_string(),
        });
        self.search
            .lock()
            .unwrap()
            .get(face_token)
            .cloned()
            .unwrap_or(Ok(Vec::new()))
    }

    async fn add_to_set(&self, set_id: &str, face_token: &str) -> Result<(), ProviderError> {
        self.record(Call::Add {
            set_id: set_id.to_string(),
            token: face_token.to_string(),
        });
        if self.failing_adds.lock().unwrap().contains(face_token) {
            return Err(ProviderError::Api("INVALID_FACE_TOKENS_SET".into()));
        }
        self.seed_set(set_id, &[face_token]);
        Ok(())
    }

    async fn remove_from_set(
        &self,
        set_id: &str,
        target: RemoveTarget<'_>,
    ) -> Result<(), ProviderError> {
        self.record(match target {
            RemoveTarget::Token(token) => Call::Remove {
                set_id: set_id.to_string(),
                token: token.to_string(),
            },
            RemoveTarget::All => Call::RemoveAll {
                set_id: set_id.to_string(),
            },
        });
        if let Some(error) = self.remove_error.lock().unwrap().clone() {
            if !error.is_missing_set() {
                return Err(error);
            }
        }
        let mut sets = self.sets.lock().unwrap();
        if let Some(members) = sets.get_mut(set_id) {
            match target {
                RemoveTarget::Token(token) => {
                    members.remove(token);
                }
                RemoveTarget::All => members.clear(),
            }
        }
        Ok(())
    }
}

/// A provider factory that ignores credentials and hands out `provider`.
pub fn fake_factory(provider: Arc<FakeProvider>) -> ProviderFactory {
    Arc::new(
        move |_: Credentials| -> Result<Arc<dyn FaceProvider>, ProviderError> {
            Ok(provider.clone())
        },
    )
}

pub fn token(c: char) -> String {
    std::iter::repeat(c).take(32).collect()
}

pub fn identity(c: char, label: &str) -> Identity {
    Identity {
        token: token(c),
        label: label.to_string(),
        attributes: FaceAttributes::default(),
    }
}

pub fn face(c: char, bounding_box: BoundingBox) -> DetectedFace {
    DetectedFace {
        token: token(c),
        bounding_box,
        attributes: FaceAttributes {
            quality: 88.0,
            gender: "Female".into(),
            age: 31,
            glass: "Normal".into(),
            mask: false,
            emotion: "happiness".into(),
        },
    }
}

/// A plain PNG large enough to crop faces out of.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([120, 80, 40]));
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}
