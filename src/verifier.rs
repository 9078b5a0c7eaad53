// Native pipeline facade: extraction, comparison and plausibility under one config.
// Holds no per-request state, so one instance can serve concurrent callers.
// See DESIGN.md: Verifier

use tracing::debug;

use crate::error::Result;
use crate::extractor::FeatureExtractor;
use crate::features::{FeatureVector, Template};
use crate::plausibility::{self, PlausibilityReport};
use crate::similarity::{MatchResult, SimilarityEngine};
use crate::types::*;
use crate::verdict::VerdictPolicy;

pub struct Verifier {
    extractor: FeatureExtractor,
    engine: SimilarityEngine,
}

impl Verifier {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Verifier {
            extractor: FeatureExtractor::new(config.extractor),
            engine: SimilarityEngine::new(config.matcher, VerdictPolicy::new(config.verdict)),
        })
    }

    /// Build from a JSON config. Missing sections fall back to defaults.
    pub fn from_json(config_json: &str) -> Result<Self> {
        Self::new(EngineConfig::from_json(config_json)?)
    }

    pub fn extract_strokes(&self, strokes: &StrokeSet) -> Result<FeatureVector> {
        let features = self.extractor.extract_strokes(strokes)?;
        log_extraction(&features);
        Ok(features)
    }

    pub fn extract_raster(&self, image: &PixelBuffer) -> Result<FeatureVector> {
        let features = self.extractor.extract_raster(image)?;
        log_extraction(&features);
        Ok(features)
    }

    pub fn extract_capture(
        &self,
        strokes: &StrokeSet,
        canvas: &PixelBuffer,
    ) -> Result<FeatureVector> {
        let features = self.extractor.extract_capture(strokes, canvas)?;
        log_extraction(&features);
        Ok(features)
    }

    pub fn compare(
        &self,
        candidate: &FeatureVector,
        template: &FeatureVector,
    ) -> Result<MatchResult> {
        let result = self.engine.compare(candidate, template)?;
        log_match(&result, None);
        Ok(result)
    }

    /// Compare two serialized vectors. Both are schema-checked before scoring.
    pub fn compare_json(&self, candidate_json: &str, template_json: &str) -> Result<MatchResult> {
        let candidate = FeatureVector::from_json(candidate_json)?;
        let template = FeatureVector::from_json(template_json)?;
        self.compare(&candidate, &template)
    }

    /// Compare against a stored template.
    pub fn verify(&self, candidate: &FeatureVector, template: &Template) -> Result<MatchResult> {
        let result = self.engine.compare(candidate, &template.features)?;
        log_match(&result, Some(template.id.as_str()));
        Ok(result)
    }

    pub fn assess(&self, features: &FeatureVector) -> Result<PlausibilityReport> {
        plausibility::assess(features)
    }
}

impl Default for Verifier {
    fn default() -> Self {
        Verifier {
            extractor: FeatureExtractor::default(),
            engine: SimilarityEngine::default(),
        }
    }
}

fn log_extraction(features: &FeatureVector) {
    debug!(
        source = ?features.source,
        stroke_count = features.stroke_count,
        density = features.density,
        "features extracted"
    );
}

fn log_match(result: &MatchResult, template_id: Option<&str>) {
    debug!(
        template_id = template_id.unwrap_or("-"),
        score = result.authenticity_score,
        confidence = result.confidence_level,
        band = ?result.band,
        key_penalty = result.key_penalty_applied,
        "signature compared"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SignatureError;
    use crate::features::FeatureSource;
    use crate::verdict::MatchBand;

    fn signature(offset: f64) -> StrokeSet {
        let first = Stroke::new(vec![
            Point::new(offset, 30.0, 0),
            Point::new(offset + 20.0, 0.0, 60),
            Point::new(offset + 40.0, 28.0, 120),
            Point::new(offset + 70.0, 8.0, 180),
        ])
        .unwrap();
        let second = Stroke::new(vec![
            Point::new(offset + 80.0, 20.0, 400),
            Point::new(offset + 110.0, 25.0, 460),
            Point::new(offset + 150.0, 10.0, 520),
        ])
        .unwrap();
        StrokeSet::from_strokes(vec![first, second])
    }

    #[test]
    fn verifier_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Verifier>();
    }

    #[test]
    fn single_point_signature() {
        let verifier = Verifier::default();
        let strokes =
            StrokeSet::from_strokes(vec![Stroke::new(vec![Point::new(12.0, 7.0, 0)]).unwrap()]);
        let features = verifier.extract_strokes(&strokes).unwrap();
        assert_eq!(features.source, FeatureSource::Strokes);
        assert_eq!(features.stroke_count, 1.0);
        assert_eq!(features.pen_lifts, 0.0);
        assert_eq!(features.total_length, 0.0);
        assert_eq!(features.aspect_ratio, 0.0);
        assert!(features.is_finite());
    }

    #[test]
    fn enrolled_template_verifies_redrawn_signature() {
        let verifier = Verifier::default();
        let enrolled = verifier.extract_strokes(&signature(0.0)).unwrap();
        let template = Template::new(
            "tpl-1",
            "primary",
            Timestamp::from_millis(1_700_000_000_000),
            enrolled,
        );

        let candidate = verifier.extract_strokes(&signature(25.0)).unwrap();
        let result = verifier.verify(&candidate, &template).unwrap();
        assert_eq!(result.band, MatchBand::High);
        assert!(result.is_authentic);
    }

    #[test]
    fn template_missing_feature_is_schema_mismatch() {
        let verifier = Verifier::default();
        let features = verifier.extract_strokes(&signature(0.0)).unwrap();
        let candidate_json = features.to_json().unwrap();

        let mut value: serde_json::Value = serde_json::from_str(&candidate_json).unwrap();
        value.as_object_mut().unwrap().remove("density");
        let template_json = value.to_string();

        match verifier.compare_json(&candidate_json, &template_json) {
            Err(SignatureError::SchemaMismatch(msg)) => assert!(msg.contains("density")),
            other => panic!("expected schema mismatch, got {:?}", other),
        }
    }

    #[test]
    fn empty_template_is_insufficient_data() {
        let verifier = Verifier::default();
        let candidate = verifier.extract_strokes(&signature(0.0)).unwrap();
        assert!(matches!(
            verifier.compare(&candidate, &FeatureVector::no_signature()),
            Err(SignatureError::InsufficientData(_))
        ));
    }

    #[test]
    fn config_from_json_recalibrates_bands() {
        let verifier =
            Verifier::from_json(r#"{"verdict":{"high":0.99,"probable":0.98,"questionable":0.9}}"#)
                .unwrap();
        let t = verifier.extract_strokes(&signature(0.0)).unwrap();
        let mut c = t.clone();
        c.aspect_ratio *= 1.3;
        let result = verifier.compare(&c, &t).unwrap();
        assert!(result.authenticity_score < 0.98);
        assert!(!result.is_authentic);
    }

    #[test]
    fn invalid_config_is_rejected() {
        assert!(matches!(
            Verifier::from_json(r#"{"verdict":{"high":0.5,"probable":0.7,"questionable":0.6}}"#),
            Err(SignatureError::InvalidConfig(_))
        ));
        assert!(matches!(
            Verifier::from_json("not json"),
            Err(SignatureError::InvalidConfig(_))
        ));
    }

    #[test]
    fn raster_capture_is_assessed() {
        let mut canvas = PixelBuffer::blank(120, 60);
        for x in 10..110 {
            for y in 25..29 {
                canvas.set_gray(x, y, 0);
            }
        }
        let verifier = Verifier::default();
        let features = verifier.extract_raster(&canvas).unwrap();
        assert_eq!(features.source, FeatureSource::Raster);
        let report = verifier.assess(&features).unwrap();
        assert!(report.score >= 0.5);
        assert!(report.confidence <= report.score);
    }
}
