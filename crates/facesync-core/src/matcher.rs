//! Best-match selection over a provider search response.

use crate::types::{Identity, RankedMatch, RecognitionResult};
use std::collections::HashMap;

/// Default confidence a match must exceed to adopt an identity's label.
pub const DEFAULT_THRESHOLD: f64 = 75.0;

/// Result of resolving a ranked search response against the enrolled gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    /// The identity adopted for the face, if any.
    pub identity: Option<Identity>,
    /// Confidence of the adopted match; 0 when unmatched.
    pub confidence: f64,
    /// Highest confidence the provider reported, matched or not.
    pub best_confidence: Option<f64>,
}

impl MatchOutcome {
    pub fn unmatched() -> Self {
        Self {
            identity: None,
            confidence: 0.0,
            best_confidence: None,
        }
    }

    pub fn is_match(&self) -> bool {
        self.identity.is_some()
    }

    /// Copy label, confidence and identity token into `result`.
    pub fn apply(&self, result: &mut RecognitionResult) {
        if let Some(identity) = &self.identity {
            result.label = identity.label.clone();
            result.confidence = self.confidence;
            result.token = identity.token.clone();
        }
    }
}

/// Strategy for turning a ranked search response into a match decision.
pub trait Matcher {
    fn select(&self, ranked: &[RankedMatch], gallery: &HashMap<String, Identity>) -> MatchOutcome;
}

/// Pick the maximum-confidence entry (first wins on ties) and accept it only
/// when its confidence is strictly greater than the threshold.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdMatcher {
    pub threshold: f64,
}

impl Default for ThresholdMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// Highest-confidence entry; ties resolve to the earliest in provider order.
pub fn best_match(ranked: &[RankedMatch]) -> Option<&RankedMatch> {
    let mut best: Option<&RankedMatch> = None;
    for candidate in ranked {
        match best {
            Some(b) if candidate.confidence <= b.confidence => {}
            _ => best = Some(candidate),
        }
    }
    best
}

impl Matcher for ThresholdMatcher {
    fn select(&self, ranked: &[RankedMatch], gallery: &HashMap<String, Identity>) -> MatchOutcome {
        let Some(best) = best_match(ranked) else {
            return MatchOutcome::unmatched();
        };

        let mut outcome = MatchOutcome {
            best_confidence: Some(best.confidence),
            ..MatchOutcome::unmatched()
        };

        if best.confidence > self.threshold {
            match gallery.get(&best.face_token) {
                Some(identity) => {
                    outcome.identity = Some(identity.clone());
                    outcome.confidence = best.confidence;
                }
                None => {
                    // Remote set still holds a token the local store no longer has.
                    tracing::warn!(
                        token = %best.face_token,
                        confidence = best.confidence,
                        "best match is not an enrolled identity"
                    );
                }
            }
        }

        outcome
    }
}
