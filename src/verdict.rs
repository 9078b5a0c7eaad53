// Score-to-decision mapping. State-free; thresholds come from configuration.
// See DESIGN.md: Verdict Policy

use serde::{Deserialize, Serialize};

use crate::types::VerdictThresholds;

/// Qualitative band of an authenticity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchBand {
    High,
    Probable,
    Questionable,
    Low,
}

impl MatchBand {
    pub fn is_authentic(&self) -> bool {
        matches!(self, MatchBand::High | MatchBand::Probable)
    }
}

/// Binary decision plus band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub is_authentic: bool,
    pub band: MatchBand,
}

/// Maps (score, confidence) to a verdict using fixed band boundaries.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerdictPolicy {
    thresholds: VerdictThresholds,
}

impl VerdictPolicy {
    pub fn new(thresholds: VerdictThresholds) -> Self {
        VerdictPolicy { thresholds }
    }

    pub fn thresholds(&self) -> &VerdictThresholds {
        &self.thresholds
    }

    /// Confidence does not move the band today; it is carried so callers can
    /// apply their own minimum without a signature change.
    pub fn decide(&self, score: f64, _confidence: f64) -> Verdict {
        let band = self.band(score);
        Verdict {
            is_authentic: band.is_authentic(),
            band,
        }
    }

    pub fn band(&self, score: f64) -> MatchBand {
        let t = &self.thresholds;
        if score >= t.high {
            MatchBand::High
        } else if score >= t.probable {
            MatchBand::Probable
        } else if score >= t.questionable {
            MatchBand::Questionable
        } else {
            MatchBand::Low
        }
    }
}
