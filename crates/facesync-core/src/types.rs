use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length of a provider-assigned face token.
pub const TOKEN_LEN: usize = 32;

/// Label reported for a face that matched no enrolled identity.
pub const NO_MATCH: &str = "NO_MATCH";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no face token; cannot add face")]
    MissingToken,
    #[error("invalid face token '{token}': expected 32 characters, got {len}")]
    MalformedToken { token: String, len: usize },
    #[error("label must not be empty")]
    EmptyLabel,
    #[error("{0}")]
    InvalidPayload(String),
}

/// Check that `token` has the provider's token shape.
pub fn validate_token(token: &str) -> Result<(), ValidationError> {
    if token.is_empty() {
        return Err(ValidationError::MissingToken);
    }
    let len = token.chars().count();
    if len != TOKEN_LEN {
        return Err(ValidationError::MalformedToken {
            token: token.to_string(),
            len,
        });
    }
    Ok(())
}

/// Trim a user-supplied label, rejecting blank ones.
pub fn validate_label(label: &str) -> Result<String, ValidationError> {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyLabel);
    }
    Ok(trimmed.to_string())
}

/// Face rectangle in source image pixels, as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BoundingBox {
    pub top: u32,
    pub left: u32,
    pub width: u32,
    pub height: u32,
}

/// Provider-reported traits of one face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceAttributes {
    /// Face quality score (0–100).
    pub quality: f64,
    pub gender: String,
    pub age: u32,
    /// Glasses classification: "None", "Normal" or "Dark".
    pub glass: String,
    pub mask: bool,
    /// Dominant emotion, or "undefined" when the provider reported none.
    pub emotion: String,
}

impl Default for FaceAttributes {
    fn default() -> Self {
        Self {
            quality: 0.0,
            gender: String::new(),
            age: 0,
            glass: "None".to_string(),
            mask: false,
            emotion: "undefined".to_string(),
        }
    }
}

impl FaceAttributes {
    pub fn normal_glass(&self) -> bool {
        self.glass == "Normal"
    }

    pub fn sunglass(&self) -> bool {
        self.glass == "Dark"
    }

    /// Pick the emotion with the highest score. Ties keep the first seen.
    pub fn dominant_emotion<'a, I>(scores: I) -> String
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let mut best: Option<(&str, f64)> = None;
        for (name, value) in scores {
            match best {
                Some((_, v)) if value <= v => {}
                _ => best = Some((name, value)),
            }
        }
        best.map(|(name, _)| name.to_string())
            .unwrap_or_else(|| "undefined".to_string())
    }
}

/// One enrolled face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub token: String,
    pub label: String,
    #[serde(default)]
    pub attributes: FaceAttributes,
}

/// A face found by one detect call. The token is only meaningful within the
/// detection session unless the face is enrolled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub token: String,
    pub bounding_box: BoundingBox,
    pub attributes: FaceAttributes,
}

/// One entry of a search-against-set response, in provider order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedMatch {
    pub face_token: String,
    /// Provider confidence (0–100).
    pub confidence: f64,
}

/// Outcome of recognizing one detected face. Serializes to the flat trigger
/// payload carried by `face_detected` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub origin: String,
    pub label: String,
    pub confidence: f64,
    /// Identity token when matched, else the detection-session token.
    pub token: String,
    pub quality: f64,
    pub gender: String,
    pub age: u32,
    pub emotion: String,
    pub normalglass: bool,
    pub sunglass: bool,
    pub mask: bool,
    /// Handle of the cropped snapshot; empty when cropping failed.
    pub face_image_token: String,
}

impl RecognitionResult {
    /// Start from an unmatched result for `face`.
    pub fn unmatched(origin: &str, face: &DetectedFace) -> Self {
        let a = &face.attributes;
        Self {
            origin: origin.to_string(),
            label: NO_MATCH.to_string(),
            confidence: 0.0,
            token: face.token.clone(),
            quality: a.quality,
            gender: a.gender.clone(),
            age: a.age,
            emotion: a.emotion.clone(),
            normalglass: a.normal_glass(),
            sunglass: a.sunglass(),
            mask: a.mask,
            face_image_token: String::new(),
        }
    }

    pub fn is_match(&self) -> bool {
        self.label != NO_MATCH
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_token_accepts_32_chars() {
        assert!(validate_token(&"a".repeat(32)).is_ok());
    }

    #[test]
    fn test_validate_token_rejects_short() {
        let err = validate_token("abc").unwrap_err();
        assert_eq!(
            err,
            ValidationError::MalformedToken { token: "abc".into(), len: 3 }
        );
    }

    #[test]
    fn test_validate_token_rejects_empty() {
        assert_eq!(validate_token(""), Err(ValidationError::MissingToken));
    }

    #[test]
    fn test_validate_label_trims() {
        assert_eq!(validate_label("  Alice ").unwrap(), "Alice");
        assert_eq!(validate_label("   "), Err(ValidationError::EmptyLabel));
    }

    #[test]
    fn test_dominant_emotion() {
        let scores = [("anger", 0.1), ("happiness", 92.9), ("surprise", 5.2)];
        assert_eq!(FaceAttributes::dominant_emotion(scores), "happiness");
    }

    #[test]
    fn test_dominant_emotion_empty() {
        assert_eq!(FaceAttributes::dominant_emotion(std::iter::empty()), "undefined");
    }

    #[test]
    fn test_unmatched_result_carries_attributes() {
        let face = DetectedFace {
            token: "t".repeat(32),
            bounding_box: BoundingBox::default(),
            attributes: FaceAttributes {
                quality: 89.5,
                gender: "Female".into(),
                age: 26,
                glass: "Normal".into(),
                mask: false,
                emotion: "happiness".into(),
            },
        };
        let result = RecognitionResult::unmatched("door", &face);
        assert_eq!(result.label, NO_MATCH);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.token, face.token);
        assert!(result.normalglass);
        assert!(!result.sunglass);
        assert!(!result.is_match());
    }

    #[test]
    fn test_result_payload_field_names() {
        let face = DetectedFace {
            token: "t".repeat(32),
            bounding_box: BoundingBox::default(),
            attributes: FaceAttributes::default(),
        };
        let value = serde_json::to_value(RecognitionResult::unmatched("o", &face)).unwrap();
        for key in [
            "origin", "label", "confidence", "token", "quality", "gender", "age", "emotion",
            "normalglass", "sunglass", "mask", "face_image_token",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }
}
