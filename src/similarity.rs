// Candidate-vs-template comparison.
// Per-feature similarity in [0,1], weighted composite, key-feature discrimination,
// confidence from cross-feature agreement.
// See DESIGN.md: Similarity Engine

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SignatureError};
use crate::features::{Feature, FeatureKind, FeatureVector};
use crate::types::MatcherConfig;
use crate::verdict::{MatchBand, VerdictPolicy};

/// Values closer to zero than this are treated as zero.
const EPSILON: f64 = 1e-9;
/// Absolute tolerance for bounded features whose template value is zero.
const ZERO_TEMPLATE_TOLERANCE: f64 = 0.01;
/// Largest possible standard deviation of values in [0, 1].
const MAX_SPREAD: f64 = 0.5;

/// Raw comparison output, before the verdict is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityScore {
    /// Weighted mean of per-feature similarities, before any penalty.
    pub weighted_score: f64,
    /// Composite score after the key-feature penalty, in [0, 1].
    pub authenticity_score: f64,
    pub confidence_level: f64,
    pub key_penalty_applied: bool,
    pub feature_breakdown: BTreeMap<Feature, f64>,
}

const SHAPE_FEATURES: [Feature; 4] = [
    Feature::AspectRatio,
    Feature::Density,
    Feature::Compactness,
    Feature::Eccentricity,
];
const STROKE_FEATURES: [Feature; 3] = [
    Feature::StrokeWidthMean,
    Feature::StrokeWidthStd,
    Feature::PenLifts,
];
const QUALITY_FEATURES: [Feature; 2] = [Feature::Solidity, Feature::Convexity];

/// Outcome of one comparison. Produced fresh per call, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub authenticity_score: f64,
    pub confidence_level: f64,
    pub is_authentic: bool,
    pub band: MatchBand,
    pub key_penalty_applied: bool,
    pub feature_breakdown: BTreeMap<Feature, f64>,
    pub details: MatchDetails,
}

impl MatchResult {
    pub fn recommendation(&self) -> &'static str {
        recommendation(self.is_authentic)
    }
}

/// Candidate values grouped for a reviewer, alongside the overall outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchDetails {
    pub feature_analysis: BTreeMap<Feature, f64>,
    pub stroke_analysis: BTreeMap<Feature, f64>,
    pub quality_indicators: BTreeMap<Feature, f64>,
    pub overall_score: f64,
    pub recommendation: String,
}

impl MatchDetails {
    fn describe(candidate: &FeatureVector, score: f64, is_authentic: bool) -> Self {
        let pick = |features: &[Feature]| -> BTreeMap<Feature, f64> {
            features.iter().map(|&f| (f, candidate.get(f))).collect()
        };
        MatchDetails {
            feature_analysis: pick(&SHAPE_FEATURES),
            stroke_analysis: pick(&STROKE_FEATURES),
            quality_indicators: pick(&QUALITY_FEATURES),
            overall_score: score,
            recommendation: recommendation(is_authentic).to_string(),
        }
    }
}

fn recommendation(is_authentic: bool) -> &'static str {
    if is_authentic {
        "Authentic"
    } else {
        "Suspicious"
    }
}

/// Compares feature vectors under a fixed calibration.
pub struct SimilarityEngine {
    config: MatcherConfig,
    policy: VerdictPolicy,
}

impl SimilarityEngine {
    pub fn new(config: MatcherConfig, policy: VerdictPolicy) -> Self {
        SimilarityEngine { config, policy }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Compare and decide.
    pub fn compare(
        &self,
        candidate: &FeatureVector,
        template: &FeatureVector,
    ) -> Result<MatchResult> {
        let score = self.score(candidate, template)?;
        let verdict = self
            .policy
            .decide(score.authenticity_score, score.confidence_level);

        let details =
            MatchDetails::describe(candidate, score.authenticity_score, verdict.is_authentic);
        Ok(MatchResult {
            authenticity_score: score.authenticity_score,
            confidence_level: score.confidence_level,
            is_authentic: verdict.is_authentic,
            band: verdict.band,
            key_penalty_applied: score.key_penalty_applied,
            feature_breakdown: score.feature_breakdown,
            details,
        })
    }

    /// Composite similarity without a verdict.
    pub fn score(
        &self,
        candidate: &FeatureVector,
        template: &FeatureVector,
    ) -> Result<SimilarityScore> {
        if candidate.is_sentinel() {
            return Err(SignatureError::InsufficientData(
                "candidate carries no signature".to_string(),
            ));
        }
        if template.is_sentinel() {
            return Err(SignatureError::InsufficientData(
                "template carries no signature".to_string(),
            ));
        }
        if candidate.schema_version != template.schema_version {
            return Err(SignatureError::SchemaMismatch(format!(
                "candidate schema v{} vs template schema v{}",
                candidate.schema_version, template.schema_version
            )));
        }

        let total_weight: f64 = self.config.weights.values().sum();
        if !(total_weight > 0.0) {
            return Err(SignatureError::InvalidConfig(
                "feature weights must not sum to zero".to_string(),
            ));
        }

        let mut breakdown = BTreeMap::new();
        let mut weighted_sum = 0.0;
        for (&feature, &weight) in &self.config.weights {
            let similarity =
                self.feature_similarity(feature, candidate.get(feature), template.get(feature));
            weighted_sum += weight * similarity;
            breakdown.insert(feature, similarity);
        }
        let weighted_score = (weighted_sum / total_weight).clamp(0.0, 1.0);

        let variance = self
            .config
            .weights
            .iter()
            .map(|(feature, weight)| {
                let s = breakdown.get(feature).copied().unwrap_or(0.0);
                weight * (s - weighted_score).powi(2)
            })
            .sum::<f64>()
            / total_weight;
        let mut confidence = (1.0 - variance.sqrt() / MAX_SPREAD).clamp(0.0, 1.0);

        let key_penalty_applied = self.key_feature_diverges(candidate, template);
        let mut score = weighted_score;
        if key_penalty_applied {
            score *= self.config.key_penalty;
            confidence *= self.config.confidence_penalty;
        }

        Ok(SimilarityScore {
            weighted_score,
            authenticity_score: finite_unit(score),
            confidence_level: finite_unit(confidence),
            key_penalty_applied,
            feature_breakdown: breakdown,
        })
    }

    /// Similarity of one feature pair, in [0, 1].
    pub fn feature_similarity(&self, feature: Feature, candidate: f64, template: f64) -> f64 {
        let diff = (candidate - template).abs();
        let similarity = match feature.kind() {
            FeatureKind::Ratio => {
                let (a, b) = (candidate.abs(), template.abs());
                let larger = a.max(b);
                if larger < EPSILON {
                    1.0
                } else {
                    a.min(b) / larger
                }
            }
            FeatureKind::Bounded => {
                if template.abs() > EPSILON {
                    1.0 - (diff / template.abs()) / self.config.bounded_tolerance
                } else if diff < ZERO_TEMPLATE_TOLERANCE {
                    1.0
                } else {
                    0.0
                }
            }
            FeatureKind::Position => 1.0 - self.config.position_scale * diff,
            FeatureKind::Count => {
                let tolerance = self.config.count_tolerance;
                if diff <= tolerance {
                    1.0
                } else {
                    1.0 - (diff - tolerance) * 0.5
                }
            }
        };
        finite_unit(similarity)
    }

    /// True when any key feature differs from the template by more than the
    /// discrimination threshold. Zero template values carry no relative scale
    /// and are skipped.
    fn key_feature_diverges(&self, candidate: &FeatureVector, template: &FeatureVector) -> bool {
        self.config.key_features.iter().any(|&feature| {
            let t = template.get(feature);
            if t.abs() <= EPSILON {
                return false;
            }
            let relative = (candidate.get(feature) - t).abs() / t.abs();
            relative > self.config.discrimination_threshold
        })
    }
}

impl Default for SimilarityEngine {
    fn default() -> Self {
        Self::new(MatcherConfig::default(), VerdictPolicy::default())
    }
}

fn finite_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
