// Feature extraction from pen trajectories, static rasters, or both.
// Geometry is taken over the union of stroke points; curvature never crosses a pen lift.
// See DESIGN.md: Feature Extractor

use crate::error::{Result, SignatureError};
use crate::features::{FeatureSource, FeatureVector, FEATURE_SCHEMA_VERSION};
use crate::raster::{self, mean_and_std, RasterFeatures};
use crate::types::*;

/// Turns raw signature input into a canonical feature vector.
pub struct FeatureExtractor {
    settings: ExtractorSettings,
}

impl FeatureExtractor {
    pub fn new(settings: ExtractorSettings) -> Self {
        FeatureExtractor { settings }
    }

    pub fn settings(&self) -> &ExtractorSettings {
        &self.settings
    }

    /// Extract from a pen trajectory. Raster features come from rendering the
    /// strokes at a fixed size.
    pub fn extract_strokes(&self, strokes: &StrokeSet) -> Result<FeatureVector> {
        ensure_strokes(strokes)?;
        let canvas = raster::render_strokes(strokes, &self.settings);
        let raster_features = match raster::ink_bounds(&canvas, self.settings.ink_threshold) {
            Some(ink) => {
                raster::compute_density_and_texture(&canvas, &ink, self.settings.ink_threshold)
            }
            None => RasterFeatures::default(),
        };
        Ok(self.from_trajectory(strokes, FeatureSource::Strokes, &raster_features))
    }

    /// Extract from strokes together with the canvas they were drawn on.
    /// Density uses the canvas ink inside the stroke bounds.
    pub fn extract_capture(
        &self,
        strokes: &StrokeSet,
        canvas: &PixelBuffer,
    ) -> Result<FeatureVector> {
        ensure_strokes(strokes)?;
        let bounds = stroke_bounds(strokes);
        let raster_features =
            raster::compute_density_and_texture(canvas, &bounds, self.settings.ink_threshold);
        Ok(self.from_trajectory(strokes, FeatureSource::Capture, &raster_features))
    }

    /// Extract from a static image. Timing and curvature are unavailable and
    /// stay at 0; stroke count is approximated by connected ink components.
    pub fn extract_raster(&self, image: &PixelBuffer) -> Result<FeatureVector> {
        let threshold = self.settings.ink_threshold;
        let bounds = raster::ink_bounds(image, threshold).ok_or_else(|| {
            SignatureError::EmptyInput("raster contains no ink pixels".to_string())
        })?;
        let raster_features = raster::compute_density_and_texture(image, &bounds, threshold);
        let ink = raster::ink_pixels(image, threshold);
        let shape = ShapeMoments::of(&ink, &bounds);
        let components = raster::count_components(image, threshold) as f64;
        let total_length = if raster_features.stroke_width_px > 0.0 {
            raster_features.signature_pixel_count as f64 / raster_features.stroke_width_px
        } else {
            0.0
        };

        let mut vector = base_vector(FeatureSource::Raster, bounds, &shape, &raster_features);
        vector.stroke_count = components;
        vector.pen_lifts = (components - 1.0).max(0.0);
        vector.total_length = total_length;
        Ok(vector.sanitize())
    }

    fn from_trajectory(
        &self,
        strokes: &StrokeSet,
        source: FeatureSource,
        raster_features: &RasterFeatures,
    ) -> FeatureVector {
        let bounds = stroke_bounds(strokes);
        let positions: Vec<(f64, f64)> = strokes.points().map(|p| (p.x, p.y)).collect();
        let shape = ShapeMoments::of(&positions, &bounds);

        let stroke_count = strokes.len() as f64;
        let total_length: f64 = strokes.strokes().iter().map(Stroke::length).sum();
        let time_span: u64 = strokes.strokes().iter().map(Stroke::duration_ms).sum();
        let average_speed = if time_span > 0 {
            total_length / time_span as f64
        } else {
            0.0
        };
        let curvatures = curvatures(strokes);
        let (complexity, curvature_std) = mean_and_std(&curvatures);

        let mut vector = base_vector(source, bounds, &shape, raster_features);
        vector.stroke_count = stroke_count;
        vector.pen_lifts = (stroke_count - 1.0).max(0.0);
        vector.total_length = total_length;
        vector.time_span = time_span as f64;
        vector.average_speed = average_speed;
        vector.complexity = complexity;
        vector.curvature_std = curvature_std;
        vector.sanitize()
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(ExtractorSettings::default())
    }
}

fn ensure_strokes(strokes: &StrokeSet) -> Result<()> {
    if strokes.is_empty() || strokes.points().next().is_none() {
        return Err(SignatureError::EmptyInput(
            "stroke set contains no points".to_string(),
        ));
    }
    Ok(())
}

fn stroke_bounds(strokes: &StrokeSet) -> Bounds {
    Bounds::enclosing(strokes.points().map(|p| (p.x, p.y)))
}

fn base_vector(
    source: FeatureSource,
    bounds: Bounds,
    shape: &ShapeMoments,
    raster_features: &RasterFeatures,
) -> FeatureVector {
    FeatureVector {
        schema_version: FEATURE_SCHEMA_VERSION,
        source,
        bounds,
        stroke_count: 0.0,
        pen_lifts: 0.0,
        total_length: 0.0,
        average_speed: 0.0,
        time_span: 0.0,
        aspect_ratio: bounds.aspect_ratio(),
        density: raster_features.density,
        complexity: 0.0,
        curvature_std: 0.0,
        centroid_x: shape.centroid_x,
        centroid_y: shape.centroid_y,
        compactness: shape.compactness,
        eccentricity: shape.eccentricity,
        solidity: raster_features.solidity,
        convexity: raster_features.convexity,
        stroke_width_mean: raster_features.stroke_width_mean,
        stroke_width_std: raster_features.stroke_width_std,
        texture_mean: raster_features.texture_mean,
        texture_std: raster_features.texture_std,
        gradient_mean: raster_features.gradient_mean,
        gradient_std: raster_features.gradient_std,
    }
}

/// Normalized curvature `|v1 x v2| / (|v1| |v2|)` at every interior point,
/// stroke by stroke. Zero-length segments are skipped.
fn curvatures(strokes: &StrokeSet) -> Vec<f64> {
    let mut values = Vec::new();
    for stroke in strokes.strokes() {
        for w in stroke.points().windows(3) {
            let (v1x, v1y) = (w[1].x - w[0].x, w[1].y - w[0].y);
            let (v2x, v2y) = (w[2].x - w[1].x, w[2].y - w[1].y);
            let m1 = (v1x * v1x + v1y * v1y).sqrt();
            let m2 = (v2x * v2x + v2y * v2y).sqrt();
            if m1 > 0.0 && m2 > 0.0 {
                values.push((v1x * v2y - v1y * v2x).abs() / (m1 * m2));
            }
        }
    }
    values
}

/// Scale-normalized shape summary of a point cloud.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ShapeMoments {
    /// Centroid position inside the bounds, 0..1; 0.5 on a degenerate axis.
    centroid_x: f64,
    centroid_y: f64,
    /// Mean distance from the centroid over the half bounding-box diagonal.
    compactness: f64,
    /// `sqrt(1 - minor / major)` of the covariance eigenvalues.
    eccentricity: f64,
}

impl ShapeMoments {
    fn of(positions: &[(f64, f64)], bounds: &Bounds) -> Self {
        if positions.is_empty() {
            return ShapeMoments {
                centroid_x: 0.5,
                centroid_y: 0.5,
                compactness: 0.0,
                eccentricity: 0.0,
            };
        }
        let n = positions.len() as f64;
        let cx = positions.iter().map(|p| p.0).sum::<f64>() / n;
        let cy = positions.iter().map(|p| p.1).sum::<f64>() / n;

        let relative = |c: f64, origin: f64, extent: f64| {
            if extent > 0.0 {
                ((c - origin) / extent).clamp(0.0, 1.0)
            } else {
                0.5
            }
        };

        let half_diagonal = bounds.half_diagonal();
        let compactness = if half_diagonal > 0.0 {
            let mean_radius = positions
                .iter()
                .map(|p| ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt())
                .sum::<f64>()
                / n;
            mean_radius / half_diagonal
        } else {
            0.0
        };

        let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
        for (x, y) in positions {
            sxx += (x - cx).powi(2);
            syy += (y - cy).powi(2);
            sxy += (x - cx) * (y - cy);
        }
        let (sxx, syy, sxy) = (sxx / n, syy / n, sxy / n);
        let trace_half = (sxx + syy) / 2.0;
        let spread = (((sxx - syy) / 2.0).powi(2) + sxy * sxy).sqrt();
        let major = trace_half + spread;
        let minor = (trace_half - spread).max(0.0);
        let eccentricity = if major > 0.0 {
            (1.0 - minor / major).clamp(0.0, 1.0).sqrt()
        } else {
            0.0
        };

        ShapeMoments {
            centroid_x: relative(cx, bounds.x, bounds.width),
            centroid_y: relative(cy, bounds.y, bounds.height),
            compactness,
            eccentricity,
        }
    }
}
