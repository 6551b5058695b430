//! Pairwise scoring and the acceptance policy for near-duplicates.
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::processing::histogram::Histogram;
use crate::types::ContentHash;

/// Scores at or below this floor mean "nothing like this item"
///
/// The pruning flag is only set for items whose every score stays at or below
/// this floor, so it must not exceed any usable confidence.
pub const MIN_CONFIDENCE: f64 = 0.9;

/// Confidence used when the caller does not choose one
pub const DEFAULT_CONFIDENCE: f64 = 0.95;

/// Absorbs rounding in `1 - (1 - c)^2` so boundary scores compare as written
const SCORE_EPSILON: f64 = 1e-9;

/// Which side of a pair must be colourful for the relaxed threshold to apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorfulBias {
    /// At least one of the two histograms is colourful
    #[default]
    EitherSide,
    /// Both histograms are colourful
    BothSides,
}

/// Tunable parameters for accepting a pair as similar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityPolicy {
    /// User confidence in `(0, 1]`
    pub confidence: f64,

    /// When false, pairs of black-and-white histograms score 0
    pub compare_black_and_white: bool,

    pub colorful_bias: ColorfulBias,
}

impl Default for SimilarityPolicy {
    fn default() -> Self {
        Self {
            confidence: DEFAULT_CONFIDENCE,
            compare_black_and_white: false,
            colorful_bias: ColorfulBias::EitherSide,
        }
    }
}

impl SimilarityPolicy {
    pub fn with_confidence(confidence: f64) -> Self {
        Self {
            confidence,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.confidence > 0.0 && self.confidence <= 1.0) {
            return Err(Error::Configuration(format!(
                "Confidence must be in (0, 1], got {}",
                self.confidence
            )));
        }
        Ok(())
    }

    /// `1 - (1 - c)^2`
    pub fn confidence_square(&self) -> f64 {
        confidence_square(self.confidence)
    }

    /// Whether pruning flags may be trusted at this confidence
    pub fn allows_pruning(&self) -> bool {
        self.confidence > MIN_CONFIDENCE
    }

    /// Decide whether a score is a match
    pub fn accepts(&self, score: f64, a_colorful: bool, b_colorful: bool) -> bool {
        if score + SCORE_EPSILON >= self.confidence_square() {
            return true;
        }
        if score + SCORE_EPSILON < self.confidence {
            return false;
        }
        match self.colorful_bias {
            ColorfulBias::EitherSide => a_colorful || b_colorful,
            ColorfulBias::BothSides => a_colorful && b_colorful,
        }
    }
}

pub fn confidence_square(confidence: f64) -> f64 {
    let miss = 1.0 - confidence;
    1.0 - miss * miss
}

/// A consistent view of the comparable data of one item
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fingerprint {
    pub content_hash: Option<ContentHash>,
    pub histogram: Option<Arc<Histogram>>,
}

impl Fingerprint {
    pub fn new(content_hash: Option<ContentHash>, histogram: Option<Histogram>) -> Self {
        Self {
            content_hash,
            histogram: histogram.map(Arc::new),
        }
    }

    /// An item is comparable when it has a histogram
    pub fn is_eligible(&self) -> bool {
        self.histogram.is_some()
    }
}

/// Result of scoring one pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    /// Score before black-and-white suppression
    pub raw_score: f64,
    /// Score under the policy
    pub score: f64,
    pub accepted: bool,
}

/// Scores pairs of fingerprints under one policy
#[derive(Debug, Clone, Copy)]
pub struct SimilarityScorer {
    policy: SimilarityPolicy,
}

impl SimilarityScorer {
    pub fn new(policy: SimilarityPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SimilarityPolicy {
        &self.policy
    }

    /// Score of a pair under the policy, `None` when the pair is not comparable
    ///
    /// Equal content hashes score exactly 1 whatever the histograms say.
    pub fn score(&self, a: &Fingerprint, b: &Fingerprint) -> Result<Option<f64>> {
        Ok(self.evaluate(a, b)?.map(|comparison| comparison.score))
    }

    /// Score a pair and apply the acceptance policy
    pub fn evaluate(&self, a: &Fingerprint, b: &Fingerprint) -> Result<Option<Comparison>> {
        if let (Some(ha), Some(hb)) = (a.content_hash, b.content_hash) {
            if ha == hb {
                return Ok(Some(Comparison {
                    raw_score: 1.0,
                    score: 1.0,
                    accepted: true,
                }));
            }
        }

        let (Some(ha), Some(hb)) = (a.histogram.as_deref(), b.histogram.as_deref()) else {
            return Ok(None);
        };

        // Stored histograms can be damaged after loading
        ha.validate()?;
        hb.validate()?;
        let raw_score = ha.similarity(hb);

        let score = if !self.policy.compare_black_and_white
            && ha.is_black_and_white()
            && hb.is_black_and_white()
        {
            0.0
        } else {
            raw_score
        };

        let accepted = self
            .policy
            .accepts(score, ha.is_colorful(), hb.is_colorful());
        Ok(Some(Comparison {
            raw_score,
            score,
            accepted,
        }))
    }
}
