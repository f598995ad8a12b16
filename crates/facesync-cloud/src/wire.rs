//! Face++ v3 JSON response shapes and their mapping into core types.
//!
//! Every attribute block is optional: the provider omits blocks it was not
//! asked for, and a missing block falls back to the core defaults.

use facesync_core::{BoundingBox, DetectedFace, FaceAttributes, RankedMatch};
use serde::Deserialize;
use std::collections::BTreeMap;

/// `mouthstatus.surgical_mask_or_respirator` score above which a mask is reported.
const MASK_SCORE_THRESHOLD: f64 = 50.0;

#[derive(Debug, Deserialize)]
pub(crate) struct DetectResponse {
    #[serde(default)]
    pub faces: Vec<WireFace>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireFace {
    pub face_token: String,
    #[serde(default)]
    pub face_rectangle: WireRect,
    #[serde(default)]
    pub attributes: Option<WireAttributes>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireRect {
    pub top: u32,
    pub left: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ValueOf<T> {
    pub value: T,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireAttributes {
    pub gender: Option<ValueOf<String>>,
    pub age: Option<ValueOf<f64>>,
    pub facequality: Option<ValueOf<f64>>,
    pub glass: Option<ValueOf<String>>,
    pub eyestatus: Option<WireEyeStatus>,
    pub emotion: Option<BTreeMap<String, f64>>,
    pub mouthstatus: Option<WireMouthStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireMouthStatus {
    #[serde(default)]
    pub surgical_mask_or_respirator: f64,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireEyeStatus {
    pub left_eye_status: Option<WireEye>,
    pub right_eye_status: Option<WireEye>,
}

/// Per-eye confidences (0-100) as reported by `eyestatus`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct WireEye {
    pub no_glass_eye_open: f64,
    pub no_glass_eye_close: f64,
    pub normal_glass_eye_open: f64,
    pub normal_glass_eye_close: f64,
    pub dark_glasses: f64,
}

impl WireEyeStatus {
    /// "None", "Normal" or "Dark": whichever class scores highest over both
    /// eyes. `None` when neither eye was reported.
    fn glass(&self) -> Option<&'static str> {
        let eyes = [&self.left_eye_status, &self.right_eye_status];
        let mut reported = eyes.into_iter().flatten().peekable();
        reported.peek()?;

        let (mut none, mut normal, mut dark) = (0.0, 0.0, 0.0);
        for eye in reported {
            none += eye.no_glass_eye_open + eye.no_glass_eye_close;
            normal += eye.normal_glass_eye_open + eye.normal_glass_eye_close;
            dark += eye.dark_glasses;
        }
        Some(if dark > normal && dark > none {
            "Dark"
        } else if normal > none {
            "Normal"
        } else {
            "None"
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchResponse {
    #[serde(default)]
    pub results: Vec<WireMatch>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireMatch {
    pub face_token: String,
    pub confidence: f64,
}

impl From<WireAttributes> for FaceAttributes {
    fn from(a: WireAttributes) -> Self {
        let defaults = FaceAttributes::default();
        let emotion = match &a.emotion {
            Some(scores) => {
                FaceAttributes::dominant_emotion(scores.iter().map(|(k, v)| (k.as_str(), *v)))
            }
            None => defaults.emotion.clone(),
        };
        Self {
            quality: a.facequality.map_or(defaults.quality, |q| q.value),
            gender: a.gender.map_or(defaults.gender, |g| g.value),
            age: a.age.map_or(defaults.age, |age| age.value.round().max(0.0) as u32),
            glass: match (a.eyestatus.as_ref().and_then(WireEyeStatus::glass), a.glass) {
                (Some(glass), _) => glass.to_string(),
                (None, Some(g)) => g.value,
                (None, None) => defaults.glass,
            },
            mask: a
                .mouthstatus
                .is_some_and(|m| m.surgical_mask_or_respirator > MASK_SCORE_THRESHOLD),
            emotion,
        }
    }
}

impl From<WireFace> for DetectedFace {
    fn from(f: WireFace) -> Self {
        Self {
            token: f.face_token,
            bounding_box: BoundingBox {
                top: f.face_rectangle.top,
                left: f.face_rectangle.left,
                width: f.face_rectangle.width,
                height: f.face_rectangle.height,
            },
            attributes: f.attributes.map(Into::into).unwrap_or_default(),
        }
    }
}

impl From<WireMatch> for RankedMatch {
    fn from(m: WireMatch) -> Self {
        Self {
            face_token: m.face_token,
            confidence: m.confidence,
        }
    }
}
