// Versioned feature schema. A fixed record instead of a free-form dictionary, so
// version skew between extractor and comparer is caught at the JSON boundary.
// See DESIGN.md: Feature schema

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SignatureError};
use crate::types::{Bounds, Timestamp};

/// Current feature schema version. Bump when a feature is added, removed or redefined.
pub const FEATURE_SCHEMA_VERSION: u32 = 1;

/// Scalar features of the schema, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    StrokeCount,
    PenLifts,
    TotalLength,
    AverageSpeed,
    TimeSpan,
    AspectRatio,
    Density,
    Complexity,
    CurvatureStd,
    CentroidX,
    CentroidY,
    Compactness,
    Eccentricity,
    Solidity,
    Convexity,
    StrokeWidthMean,
    StrokeWidthStd,
    TextureMean,
    TextureStd,
    GradientMean,
    GradientStd,
}

/// How a feature pair is turned into a similarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    /// Strictly positive scale quantity, compared by `min / max`.
    Ratio,
    /// Bounded shape quantity, compared by relative difference with a tolerance.
    Bounded,
    /// Normalized position inside the bounds.
    Position,
    /// Discrete count.
    Count,
}

impl Feature {
    pub const ALL: [Feature; 21] = [
        Feature::StrokeCount,
        Feature::PenLifts,
        Feature::TotalLength,
        Feature::AverageSpeed,
        Feature::TimeSpan,
        Feature::AspectRatio,
        Feature::Density,
        Feature::Complexity,
        Feature::CurvatureStd,
        Feature::CentroidX,
        Feature::CentroidY,
        Feature::Compactness,
        Feature::Eccentricity,
        Feature::Solidity,
        Feature::Convexity,
        Feature::StrokeWidthMean,
        Feature::StrokeWidthStd,
        Feature::TextureMean,
        Feature::TextureStd,
        Feature::GradientMean,
        Feature::GradientStd,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Feature::StrokeCount => "stroke_count",
            Feature::PenLifts => "pen_lifts",
            Feature::TotalLength => "total_length",
            Feature::AverageSpeed => "average_speed",
            Feature::TimeSpan => "time_span",
            Feature::AspectRatio => "aspect_ratio",
            Feature::Density => "density",
            Feature::Complexity => "complexity",
            Feature::CurvatureStd => "curvature_std",
            Feature::CentroidX => "centroid_x",
            Feature::CentroidY => "centroid_y",
            Feature::Compactness => "compactness",
            Feature::Eccentricity => "eccentricity",
            Feature::Solidity => "solidity",
            Feature::Convexity => "convexity",
            Feature::StrokeWidthMean => "stroke_width_mean",
            Feature::StrokeWidthStd => "stroke_width_std",
            Feature::TextureMean => "texture_mean",
            Feature::TextureStd => "texture_std",
            Feature::GradientMean => "gradient_mean",
            Feature::GradientStd => "gradient_std",
        }
    }

    pub fn kind(&self) -> FeatureKind {
        match self {
            Feature::StrokeCount | Feature::PenLifts => FeatureKind::Count,
            Feature::CentroidX | Feature::CentroidY => FeatureKind::Position,
            Feature::AspectRatio
            | Feature::Density
            | Feature::Compactness
            | Feature::Eccentricity
            | Feature::Solidity
            | Feature::Convexity
            | Feature::Complexity
            | Feature::CurvatureStd => FeatureKind::Bounded,
            Feature::TotalLength
            | Feature::AverageSpeed
            | Feature::TimeSpan
            | Feature::StrokeWidthMean
            | Feature::StrokeWidthStd
            | Feature::TextureMean
            | Feature::TextureStd
            | Feature::GradientMean
            | Feature::GradientStd => FeatureKind::Ratio,
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which input a vector was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSource {
    /// Pen trajectory only; raster features come from rendering the strokes.
    Strokes,
    /// Static image without a capture trace.
    Raster,
    /// Pen trajectory together with the canvas it was drawn on.
    Capture,
    /// "Nothing drawn" sentinel. Never comparable.
    Empty,
}

/// Canonical numeric summary of a signature. Every value is finite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub schema_version: u32,
    pub source: FeatureSource,
    pub bounds: Bounds,
    pub stroke_count: f64,
    pub pen_lifts: f64,
    pub total_length: f64,
    pub average_speed: f64,
    pub time_span: f64,
    pub aspect_ratio: f64,
    pub density: f64,
    pub complexity: f64,
    pub curvature_std: f64,
    pub centroid_x: f64,
    pub centroid_y: f64,
    pub compactness: f64,
    pub eccentricity: f64,
    pub solidity: f64,
    pub convexity: f64,
    pub stroke_width_mean: f64,
    pub stroke_width_std: f64,
    pub texture_mean: f64,
    pub texture_std: f64,
    pub gradient_mean: f64,
    pub gradient_std: f64,
}

impl FeatureVector {
    /// The sentinel stored when a capture produced no drawable content.
    pub fn no_signature() -> Self {
        FeatureVector {
            schema_version: FEATURE_SCHEMA_VERSION,
            source: FeatureSource::Empty,
            bounds: Bounds::default(),
            stroke_count: 0.0,
            pen_lifts: 0.0,
            total_length: 0.0,
            average_speed: 0.0,
            time_span: 0.0,
            aspect_ratio: 0.0,
            density: 0.0,
            complexity: 0.0,
            curvature_std: 0.0,
            centroid_x: 0.0,
            centroid_y: 0.0,
            compactness: 0.0,
            eccentricity: 0.0,
            solidity: 0.0,
            convexity: 0.0,
            stroke_width_mean: 0.0,
            stroke_width_std: 0.0,
            texture_mean: 0.0,
            texture_std: 0.0,
            gradient_mean: 0.0,
            gradient_std: 0.0,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.source == FeatureSource::Empty
    }

    pub fn get(&self, feature: Feature) -> f64 {
        match feature {
            Feature::StrokeCount => self.stroke_count,
            Feature::PenLifts => self.pen_lifts,
            Feature::TotalLength => self.total_length,
            Feature::AverageSpeed => self.average_speed,
            Feature::TimeSpan => self.time_span,
            Feature::AspectRatio => self.aspect_ratio,
            Feature::Density => self.density,
            Feature::Complexity => self.complexity,
            Feature::CurvatureStd => self.curvature_std,
            Feature::CentroidX => self.centroid_x,
            Feature::CentroidY => self.centroid_y,
            Feature::Compactness => self.compactness,
            Feature::Eccentricity => self.eccentricity,
            Feature::Solidity => self.solidity,
            Feature::Convexity => self.convexity,
            Feature::StrokeWidthMean => self.stroke_width_mean,
            Feature::StrokeWidthStd => self.stroke_width_std,
            Feature::TextureMean => self.texture_mean,
            Feature::TextureStd => self.texture_std,
            Feature::GradientMean => self.gradient_mean,
            Feature::GradientStd => self.gradient_std,
        }
    }

    pub fn set(&mut self, feature: Feature, value: f64) {
        let slot = match feature {
            Feature::StrokeCount => &mut self.stroke_count,
            Feature::PenLifts => &mut self.pen_lifts,
            Feature::TotalLength => &mut self.total_length,
            Feature::AverageSpeed => &mut self.average_speed,
            Feature::TimeSpan => &mut self.time_span,
            Feature::AspectRatio => &mut self.aspect_ratio,
            Feature::Density => &mut self.density,
            Feature::Complexity => &mut self.complexity,
            Feature::CurvatureStd => &mut self.curvature_std,
            Feature::CentroidX => &mut self.centroid_x,
            Feature::CentroidY => &mut self.centroid_y,
            Feature::Compactness => &mut self.compactness,
            Feature::Eccentricity => &mut self.eccentricity,
            Feature::Solidity => &mut self.solidity,
            Feature::Convexity => &mut self.convexity,
            Feature::StrokeWidthMean => &mut self.stroke_width_mean,
            Feature::StrokeWidthStd => &mut self.stroke_width_std,
            Feature::TextureMean => &mut self.texture_mean,
            Feature::TextureStd => &mut self.texture_std,
            Feature::GradientMean => &mut self.gradient_mean,
            Feature::GradientStd => &mut self.gradient_std,
        };
        *slot = value;
    }

    /// True when every scalar and bound is finite.
    pub fn is_finite(&self) -> bool {
        Feature::ALL.iter().all(|f| self.get(*f).is_finite())
            && [
                self.bounds.x,
                self.bounds.y,
                self.bounds.width,
                self.bounds.height,
            ]
            .iter()
            .all(|v| v.is_finite())
    }

    /// Replace any non-finite value with 0.
    pub(crate) fn sanitize(mut self) -> Self {
        for feature in Feature::ALL {
            let value = self.get(feature);
            if !value.is_finite() {
                self.set(feature, 0.0);
            }
        }
        for v in [
            &mut self.bounds.x,
            &mut self.bounds.y,
            &mut self.bounds.width,
            &mut self.bounds.height,
        ] {
            if !v.is_finite() {
                *v = 0.0;
            }
        }
        self
    }

    /// Parse a stored vector, checking version and key set before decoding.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            SignatureError::SchemaMismatch("feature vector must be a JSON object".to_string())
        })?;

        match object.get("schema_version").and_then(Value::as_u64) {
            Some(v) if v == FEATURE_SCHEMA_VERSION as u64 => {}
            Some(v) => {
                return Err(SignatureError::SchemaMismatch(format!(
                    "schema_version {} does not match supported version {}",
                    v, FEATURE_SCHEMA_VERSION
                )))
            }
            None => {
                return Err(SignatureError::SchemaMismatch(
                    "missing key `schema_version`".to_string(),
                ))
            }
        }

        for key in ["source", "bounds"] {
            if !object.contains_key(key) {
                return Err(SignatureError::SchemaMismatch(format!("missing key `{}`", key)));
            }
        }
        for feature in Feature::ALL {
            match object.get(feature.name()) {
                Some(v) if v.is_number() => {}
                Some(_) => {
                    return Err(SignatureError::SchemaMismatch(format!(
                        "key `{}` must be a number",
                        feature
                    )))
                }
                None => {
                    return Err(SignatureError::SchemaMismatch(format!(
                        "missing key `{}`",
                        feature
                    )))
                }
            }
        }

        serde_json::from_value(value).map_err(|e| SignatureError::SchemaMismatch(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A named, persisted feature vector used as the comparison baseline.
/// Owned by the persistence layer; the kernel only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub created_at: Timestamp,
    pub features: FeatureVector,
}

impl Template {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        created_at: Timestamp,
        features: FeatureVector,
    ) -> Self {
        Template {
            id: id.into(),
            name: name.into(),
            created_at,
            features,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FeatureVector {
        let mut v = FeatureVector::no_signature();
        v.source = FeatureSource::Strokes;
        v.bounds = Bounds::new(0.0, 0.0, 200.0, 50.0);
        v.stroke_count = 2.0;
        v.pen_lifts = 1.0;
        v.aspect_ratio = 4.0;
        v.density = 0.12;
        v.compactness = 0.5;
        v
    }

    #[test]
    fn feature_names_match_serde() {
        for feature in Feature::ALL {
            let json = serde_json::to_string(&feature).unwrap();
            assert_eq!(json, format!("\"{}\"", feature.name()));
        }
    }

    #[test]
    fn get_and_set_agree() {
        let mut v = FeatureVector::no_signature();
        for (i, feature) in Feature::ALL.iter().enumerate() {
            v.set(*feature, i as f64 + 0.5);
        }
        for (i, feature) in Feature::ALL.iter().enumerate() {
            assert_eq!(v.get(*feature), i as f64 + 0.5);
        }
    }

    #[test]
    fn json_roundtrip_through_schema_check() {
        let v = sample();
        let parsed = FeatureVector::from_json(&v.to_json().unwrap()).unwrap();
        assert_eq!(parsed, v);
    }

    #[test]
    fn missing_density_is_schema_mismatch() {
        let mut value = serde_json::to_value(sample()).unwrap();
        value.as_object_mut().unwrap().remove("density");
        match FeatureVector::from_value(value) {
            Err(SignatureError::SchemaMismatch(msg)) => assert!(msg.contains("density")),
            other => panic!("expected schema mismatch, got {:?}", other),
        }
    }

    #[test]
    fn hull_features_are_required_keys() {
        for key in ["solidity", "convexity"] {
            let mut value = serde_json::to_value(sample()).unwrap();
            value.as_object_mut().unwrap().remove(key);
            match FeatureVector::from_value(value) {
                Err(SignatureError::SchemaMismatch(msg)) => assert!(msg.contains(key)),
                other => panic!("expected schema mismatch, got {:?}", other),
            }
        }
        assert_eq!(Feature::Solidity.kind(), FeatureKind::Bounded);
        assert_eq!(Feature::Convexity.kind(), FeatureKind::Bounded);
    }

    #[test]
    fn wrong_version_is_schema_mismatch() {
        let mut value = serde_json::to_value(sample()).unwrap();
        value["schema_version"] = Value::from(99);
        assert!(matches!(
            FeatureVector::from_value(value),
            Err(SignatureError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn non_object_is_schema_mismatch() {
        assert!(matches!(
            FeatureVector::from_json("[1, 2, 3]"),
            Err(SignatureError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn sanitize_replaces_non_finite() {
        let mut v = sample();
        v.average_speed = f64::NAN;
        v.bounds.width = f64::INFINITY;
        assert!(!v.is_finite());
        let clean = v.sanitize();
        assert!(clean.is_finite());
        assert_eq!(clean.average_speed, 0.0);
        assert_eq!(clean.bounds.width, 0.0);
    }

    #[test]
    fn sentinel_is_flagged() {
        assert!(FeatureVector::no_signature().is_sentinel());
        assert!(!sample().is_sentinel());
    }
}
