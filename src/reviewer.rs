use crate::error::{Result, SpendError};
use crate::models::{Method, ReviewTier};

/// Methods that auto-accept at or above this confidence regardless of the
/// configured high threshold.
const TRUSTED_METHOD_FLOOR: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub high: f64,
    pub medium: f64,
}

impl Thresholds {
    /// Both thresholds must lie in (0, 1] with `medium < high`.
    pub fn new(high: f64, medium: f64) -> Result<Self> {
        let in_range = |v: f64| v > 0.0 && v <= 1.0;
        if !in_range(high) {
            return Err(SpendError::Config(format!(
                "classification.confidence_high must be in (0, 1], got {high}"
            )));
        }
        if !in_range(medium) {
            return Err(SpendError::Config(format!(
                "classification.confidence_medium must be in (0, 1], got {medium}"
            )));
        }
        if medium >= high {
            return Err(SpendError::Config(format!(
                "classification.confidence_medium ({medium}) must be below confidence_high ({high})"
            )));
        }
        Ok(Self { high, medium })
    }
}

pub fn assign(method: Method, confidence: f64, thresholds: &Thresholds) -> ReviewTier {
    let trusted = matches!(method, Method::CategoryMapping | Method::KeywordRule);
    if confidence >= thresholds.high || (trusted && confidence >= TRUSTED_METHOD_FLOOR) {
        ReviewTier::AutoAccept
    } else if confidence >= thresholds.medium {
        ReviewTier::QuickReview
    } else {
        ReviewTier::ManualReview
    }
}
