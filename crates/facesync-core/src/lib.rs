//! facesync-core — Face identity model and recognition policy.
//!
//! Provider-independent types shared by the cloud client and the daemon:
//! enrolled identities, detected faces, ranked matches, and the thresholded
//! best-match selection that turns a search response into a label.

pub mod crop;
pub mod matcher;
pub mod types;

pub use crop::{crop_face, CropError, SourceImage};
pub use matcher::{best_match, MatchOutcome, Matcher, ThresholdMatcher, DEFAULT_THRESHOLD};
pub use types::{
    validate_label, validate_token, BoundingBox, DetectedFace, FaceAttributes, Identity,
    RankedMatch, RecognitionResult, ValidationError, NO_MATCH, TOKEN_LEN,
};
