// Template-free plausibility check.
// Scores how much a feature vector looks like a handwritten signature at all,
// for enrollment-time screening when no reference exists yet.
// See DESIGN.md: Plausibility

use serde::{Deserialize, Serialize};

use crate::error::{Result, SignatureError};
use crate::features::{Feature, FeatureVector};

const BASE_SCORE: f64 = 0.5;
/// Confidence is discounted because no reference is involved.
const CONFIDENCE_FACTOR: f64 = 0.8;

/// (feature, open lower bound, open upper bound, score bonus)
const RULES: [(Feature, f64, f64, f64); 5] = [
    (Feature::AspectRatio, 0.2, 5.0, 0.10),
    (Feature::Density, 0.01, 0.5, 0.10),
    (Feature::CentroidX, 0.2, 0.8, 0.05),
    (Feature::CentroidY, 0.2, 0.8, 0.05),
    (Feature::Compactness, 0.1, 0.9, 0.10),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlausibilityCheck {
    pub feature: Feature,
    pub value: f64,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlausibilityReport {
    pub score: f64,
    pub confidence: f64,
    pub checks: Vec<PlausibilityCheck>,
}

/// Rule-based plausibility of a single vector.
pub fn assess(features: &FeatureVector) -> Result<PlausibilityReport> {
    if features.is_sentinel() {
        return Err(SignatureError::InsufficientData(
            "nothing to assess".to_string(),
        ));
    }

    let mut score = BASE_SCORE;
    let checks = RULES
        .iter()
        .map(|&(feature, low, high, bonus)| {
            let value = features.get(feature);
            let passed = value > low && value < high;
            if passed {
                score += bonus;
            }
            PlausibilityCheck {
                feature,
                value,
                passed,
            }
        })
        .collect();

    let score = score.min(1.0);
    Ok(PlausibilityReport {
        score,
        confidence: score * CONFIDENCE_FACTOR,
        checks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureSource;

    fn typical() -> FeatureVector {
        let mut v = FeatureVector::no_signature();
        v.source = FeatureSource::Strokes;
        v.aspect_ratio = 2.5;
        v.density = 0.12;
        v.centroid_x = 0.5;
        v.centroid_y = 0.45;
        v.compactness = 0.6;
        v
    }

    #[test]
    fn typical_signature_passes_every_rule() {
        let report = assess(&typical()).unwrap();
        assert!((report.score - 0.9).abs() < 1e-9);
        assert!((report.confidence - 0.72).abs() < 1e-9);
        assert!(report.checks.iter().all(|c| c.passed));
        assert_eq!(report.checks.len(), 5);
    }

    #[test]
    fn bounds_are_exclusive() {
        let mut v = typical();
        v.aspect_ratio = 5.0;
        v.density = 0.01;
        let report = assess(&v).unwrap();
        assert!((report.score - 0.7).abs() < 1e-9);
        let failed: Vec<_> = report
            .checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.feature)
            .collect();
        assert_eq!(failed, vec![Feature::AspectRatio, Feature::Density]);
    }

    #[test]
    fn implausible_vector_keeps_base_score() {
        let mut v = typical();
        v.aspect_ratio = 40.0;
        v.density = 0.9;
        v.centroid_x = 0.05;
        v.centroid_y = 0.95;
        v.compactness = 0.0;
        let report = assess(&v).unwrap();
        assert_eq!(report.score, 0.5);
        assert!(report.confidence < report.score);
    }

    #[test]
    fn sentinel_is_rejected() {
        assert!(matches!(
            assess(&FeatureVector::no_signature()),
            Err(SignatureError::InsufficientData(_))
        ));
    }
}
