// Strong typing over raw tuples. Newtypes for timestamps, validated strokes and pixel buffers.
// See DESIGN.md: Data model

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SignatureError};
use crate::features::Feature;

/// Timestamp in milliseconds. Newtype for type safety.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn from_millis(ms: u64) -> Self {
        Timestamp(ms)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

/// A single recorded pen position. Immutable once recorded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    /// Absent in traces reconstructed without timing; defaults to 0.
    #[serde(default)]
    pub t: Timestamp,
}

impl Point {
    pub fn new(x: f64, y: f64, t_ms: u64) -> Self {
        Point {
            x,
            y,
            t: Timestamp::from_millis(t_ms),
        }
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// One pen-down to pen-up trajectory.
///
/// Always holds at least one point, and timestamps never decrease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Point>", into = "Vec<Point>")]
pub struct Stroke {
    points: Vec<Point>,
}

impl Stroke {
    /// Build a stroke, clamping any backwards timestamp to its predecessor.
    pub fn new(mut points: Vec<Point>) -> Result<Self> {
        if points.is_empty() {
            return Err(SignatureError::EmptyInput(
                "stroke must contain at least one point".to_string(),
            ));
        }
        for i in 1..points.len() {
            if points[i].t < points[i - 1].t {
                points[i].t = points[i - 1].t;
            }
        }
        Ok(Stroke { points })
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Never true for a constructed stroke; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// A single-point stroke contributes no length and no velocity.
    pub fn is_tap(&self) -> bool {
        self.points.len() == 1
    }

    /// Sum of Euclidean segment lengths.
    pub fn length(&self) -> f64 {
        self.points
            .windows(2)
            .map(|pair| pair[0].distance_to(&pair[1]))
            .sum()
    }

    /// Elapsed time between the first and last point.
    pub fn duration_ms(&self) -> u64 {
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => last.t.as_millis().saturating_sub(first.t.as_millis()),
            _ => 0,
        }
    }
}

impl TryFrom<Vec<Point>> for Stroke {
    type Error = SignatureError;

    fn try_from(points: Vec<Point>) -> Result<Self> {
        Stroke::new(points)
    }
}

impl From<Stroke> for Vec<Point> {
    fn from(stroke: Stroke) -> Self {
        stroke.points
    }
}

/// All strokes of one capture session, in drawing order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrokeSet {
    strokes: Vec<Stroke>,
}

impl StrokeSet {
    pub fn new() -> Self {
        StrokeSet {
            strokes: Vec::new(),
        }
    }

    pub fn from_strokes(strokes: Vec<Stroke>) -> Self {
        StrokeSet { strokes }
    }

    /// Parse the request layer's stroke JSON: `[[{"x":..,"y":..,"t":..}, ..], ..]`.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn push(&mut self, stroke: Stroke) {
        self.strokes.push(stroke);
    }

    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub fn len(&self) -> usize {
        self.strokes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }

    pub fn clear(&mut self) {
        self.strokes.clear();
    }

    /// Union of all stroke points, the canonical geometry of the signature.
    pub fn points(&self) -> impl Iterator<Item = &Point> + '_ {
        self.strokes.iter().flat_map(|s| s.points().iter())
    }
}

/// Axis-aligned bounding box: `x,y` is the min corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Bounds {
            x,
            y,
            width,
            height,
        }
    }

    /// Bounding box of a set of positions. Empty input or a single position
    /// yields the all-zero box.
    pub fn enclosing<I>(positions: I) -> Self
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut iter = positions.into_iter();
        let Some((x0, y0)) = iter.next() else {
            return Bounds::default();
        };
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (x0, y0, x0, y0);
        let mut count = 1usize;
        for (x, y) in iter {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
            count += 1;
        }
        if count == 1 {
            return Bounds::default();
        }
        Bounds::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn longest_side(&self) -> f64 {
        self.width.max(self.height)
    }

    pub fn half_diagonal(&self) -> f64 {
        (self.width * self.width + self.height * self.height).sqrt() / 2.0
    }

    /// Width over height, 0 when the height is zero.
    pub fn aspect_ratio(&self) -> f64 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            0.0
        }
    }
}

/// Decoded pixel buffer, row-major, 8 bits per channel.
/// Supports grayscale (1), RGB (3) and RGBA (4) layouts.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    channels: u8,
    data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(SignatureError::InvalidRaster(format!(
                "raster must be non-empty, got {}x{}",
                width, height
            )));
        }
        if !matches!(channels, 1 | 3 | 4) {
            return Err(SignatureError::InvalidRaster(format!(
                "unsupported channel count {}",
                channels
            )));
        }
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(SignatureError::InvalidRaster(format!(
                "expected {} bytes for {}x{}x{}, got {}",
                expected,
                width,
                height,
                channels,
                data.len()
            )));
        }
        Ok(PixelBuffer {
            width,
            height,
            channels,
            data,
        })
    }

    /// An all-white grayscale canvas.
    pub fn blank(width: u32, height: u32) -> Self {
        PixelBuffer {
            width: width.max(1),
            height: height.max(1),
            channels: 1,
            data: vec![255; width.max(1) as usize * height.max(1) as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Colour channels composited over white, so transparent pixels read as paper.
    pub fn composited(&self, x: u32, y: u32) -> [u8; 3] {
        let offset = (y as usize * self.width as usize + x as usize) * self.channels as usize;
        let px = &self.data[offset..offset + self.channels as usize];
        match self.channels {
            1 => [px[0]; 3],
            3 => [px[0], px[1], px[2]],
            _ => {
                let alpha = px[3] as u32;
                let over_white = |c: u8| -> u8 { (255 - (alpha * (255 - c as u32)) / 255) as u8 };
                [over_white(px[0]), over_white(px[1]), over_white(px[2])]
            }
        }
    }

    /// Mean composited intensity, 0 = black ink, 255 = paper.
    pub fn intensity(&self, x: u32, y: u32) -> u8 {
        let [r, g, b] = self.composited(x, y);
        ((r as u32 + g as u32 + b as u32) / 3) as u8
    }

    /// Ink when every colour channel sits below the near-white threshold.
    pub fn is_ink(&self, x: u32, y: u32, threshold: u8) -> bool {
        self.composited(x, y).iter().all(|&c| c < threshold)
    }

    /// Only meaningful on the grayscale canvases produced by `blank`.
    pub(crate) fn set_gray(&mut self, x: u32, y: u32, value: u8) {
        if self.channels == 1 && x < self.width && y < self.height {
            self.data[y as usize * self.width as usize + x as usize] = value;
        }
    }
}

/// Pointer events emitted by the capture UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointerBatch {
    pub events: Vec<PointerEvent>,
}

/// Single pointer event from capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointerEvent {
    pub timestamp: Timestamp,
    pub event_type: PointerEventType,
}

/// Type of pointer event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PointerEventType {
    /// Pen or finger touched the surface.
    Down { x: f64, y: f64 },
    /// Movement while the pointer is held.
    Move { x: f64, y: f64 },
    /// Pen lifted.
    Up,
    /// Pointer stream interrupted; the open stroke is discarded.
    Cancel,
}

/// Engine configuration passed from the host.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub extractor: ExtractorSettings,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub verdict: VerdictThresholds,
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)
            .map_err(|e| SignatureError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.extractor.validate()?;
        self.matcher.validate()?;
        self.verdict.validate()
    }
}

/// Smallest accepted render canvas side, in pixels.
pub const MIN_RENDER_SIZE: u32 = 8;
/// Largest accepted render canvas side, in pixels.
pub const MAX_RENDER_SIZE: u32 = 4096;

/// Feature extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorSettings {
    /// Channel value below which a pixel counts as ink (255 minus tolerance).
    #[serde(default = "default_ink_threshold")]
    pub ink_threshold: u8,
    /// Longest side, in pixels, of the canvas strokes are rendered onto.
    #[serde(default = "default_render_size")]
    pub render_size: u32,
    /// Pen diameter used when rendering strokes.
    #[serde(default = "default_pen_width")]
    pub pen_width: f64,
}

impl ExtractorSettings {
    fn validate(&self) -> Result<()> {
        if self.ink_threshold == 0 {
            return Err(SignatureError::InvalidConfig(
                "ink_threshold must be positive".to_string(),
            ));
        }
        if !(MIN_RENDER_SIZE..=MAX_RENDER_SIZE).contains(&self.render_size) {
            return Err(SignatureError::InvalidConfig(format!(
                "render_size must lie in [{}, {}], got {}",
                MIN_RENDER_SIZE, MAX_RENDER_SIZE, self.render_size
            )));
        }
        let max_pen = self.render_size as f64 / 4.0;
        if !self.pen_width.is_finite() || self.pen_width <= 0.0 || self.pen_width >= max_pen {
            return Err(SignatureError::InvalidConfig(format!(
                "pen_width must lie in (0, {}), got {}",
                max_pen, self.pen_width
            )));
        }
        Ok(())
    }
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        ExtractorSettings {
            ink_threshold: default_ink_threshold(),
            render_size: default_render_size(),
            pen_width: default_pen_width(),
        }
    }
}

fn default_ink_threshold() -> u8 {
    250
}

fn default_render_size() -> u32 {
    256
}

fn default_pen_width() -> f64 {
    2.0
}

/// Similarity engine calibration: weights, key features and discrimination rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Importance per feature. Normalized by their sum when scoring.
    #[serde(default = "default_weights")]
    pub weights: BTreeMap<Feature, f64>,
    /// Features whose large divergence penalizes the composite score.
    #[serde(default = "default_key_features")]
    pub key_features: Vec<Feature>,
    /// Relative key-feature difference above which the penalty applies.
    #[serde(default = "default_discrimination_threshold")]
    pub discrimination_threshold: f64,
    /// Multiplier applied to the score on a key-feature divergence.
    #[serde(default = "default_key_penalty")]
    pub key_penalty: f64,
    /// Multiplier applied to the confidence on a key-feature divergence.
    #[serde(default = "default_confidence_penalty")]
    pub confidence_penalty: f64,
    /// Relative difference at which a bounded feature's similarity reaches 0.
    #[serde(default = "default_bounded_tolerance")]
    pub bounded_tolerance: f64,
    /// Slope of the centroid position similarity.
    #[serde(default = "default_position_scale")]
    pub position_scale: f64,
    /// Count difference still considered a perfect match.
    #[serde(default = "default_count_tolerance")]
    pub count_tolerance: f64,
}

impl MatcherConfig {
    fn validate(&self) -> Result<()> {
        let mut total = 0.0;
        for (feature, weight) in &self.weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(SignatureError::InvalidConfig(format!(
                    "weight for {} must be finite and non-negative, got {}",
                    feature, weight
                )));
            }
            total += weight;
        }
        if total <= 0.0 {
            return Err(SignatureError::InvalidConfig(
                "feature weights must not sum to zero".to_string(),
            ));
        }
        for (name, value) in [
            ("discrimination_threshold", self.discrimination_threshold),
            ("bounded_tolerance", self.bounded_tolerance),
            ("position_scale", self.position_scale),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(SignatureError::InvalidConfig(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        for (name, value) in [
            ("key_penalty", self.key_penalty),
            ("confidence_penalty", self.confidence_penalty),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SignatureError::InvalidConfig(format!(
                    "{} must lie in [0, 1], got {}",
                    name, value
                )));
            }
        }
        if !self.count_tolerance.is_finite() || self.count_tolerance < 0.0 {
            return Err(SignatureError::InvalidConfig(format!(
                "count_tolerance must be non-negative, got {}",
                self.count_tolerance
            )));
        }
        Ok(())
    }
}

impl Default for MatcherConfig {
    fn default() -> Self {
        MatcherConfig {
            weights: default_weights(),
            key_features: default_key_features(),
            discrimination_threshold: default_discrimination_threshold(),
            key_penalty: default_key_penalty(),
            confidence_penalty: default_confidence_penalty(),
            bounded_tolerance: default_bounded_tolerance(),
            position_scale: default_position_scale(),
            count_tolerance: default_count_tolerance(),
        }
    }
}

fn default_weights() -> BTreeMap<Feature, f64> {
    use Feature::*;
    [
        (AspectRatio, 0.20),
        (Density, 0.15),
        (Compactness, 0.15),
        (Solidity, 0.05),
        (Convexity, 0.05),
        (CentroidX, 0.05),
        (CentroidY, 0.05),
        (Eccentricity, 0.04),
        (StrokeWidthMean, 0.03),
        (StrokeWidthStd, 0.02),
        (Complexity, 0.03),
        (CurvatureStd, 0.02),
        (StrokeCount, 0.02),
        (PenLifts, 0.02),
        (TotalLength, 0.02),
        (AverageSpeed, 0.02),
        (TimeSpan, 0.02),
        (TextureMean, 0.02),
        (TextureStd, 0.01),
        (GradientMean, 0.02),
        (GradientStd, 0.01),
    ]
    .into_iter()
    .collect()
}

fn default_key_features() -> Vec<Feature> {
    vec![Feature::AspectRatio, Feature::Density, Feature::Compactness]
}

fn default_discrimination_threshold() -> f64 {
    0.5
}

fn default_key_penalty() -> f64 {
    0.7
}

fn default_confidence_penalty() -> f64 {
    0.8
}

fn default_bounded_tolerance() -> f64 {
    1.0
}

fn default_position_scale() -> f64 {
    2.0
}

fn default_count_tolerance() -> f64 {
    1.0
}

/// Score boundaries of the verdict bands. Tunable per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VerdictThresholds {
    #[serde(default = "default_high")]
    pub high: f64,
    #[serde(default = "default_probable")]
    pub probable: f64,
    #[serde(default = "default_questionable")]
    pub questionable: f64,
}

impl VerdictThresholds {
    fn validate(&self) -> Result<()> {
        let ordered = 0.0 < self.questionable
            && self.questionable < self.probable
            && self.probable < self.high
            && self.high <= 1.0;
        if !ordered {
            return Err(SignatureError::InvalidConfig(format!(
                "verdict thresholds must satisfy 0 < questionable < probable < high <= 1, got {}/{}/{}",
                self.questionable, self.probable, self.high
            )));
        }
        Ok(())
    }
}

impl Default for VerdictThresholds {
    fn default() -> Self {
        VerdictThresholds {
            high: default_high(),
            probable: default_probable(),
            questionable: default_questionable(),
        }
    }
}

fn default_high() -> f64 {
    0.85
}

fn default_probable() -> f64 {
    0.70
}

fn default_questionable() -> f64 {
    0.50
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_conversions() {
        let ts = Timestamp::from_millis(1_500);
        assert_eq!(ts.as_millis(), 1_500);
        assert!(Timestamp::from_millis(10) < ts);
    }

    #[test]
    fn stroke_rejects_empty_points() {
        assert!(matches!(
            Stroke::new(vec![]),
            Err(SignatureError::EmptyInput(_))
        ));
    }

    #[test]
    fn stroke_clamps_backwards_time() {
        let stroke = Stroke::new(vec![
            Point::new(0.0, 0.0, 100),
            Point::new(1.0, 0.0, 50),
            Point::new(2.0, 0.0, 150),
        ])
        .unwrap();
        let times: Vec<u64> = stroke.points().iter().map(|p| p.t.as_millis()).collect();
        assert_eq!(times, vec![100, 100, 150]);
        assert_eq!(stroke.duration_ms(), 50);
    }

    #[test]
    fn stroke_set_json_without_timestamps() {
        let set = StrokeSet::from_json(r#"[[{"x":0,"y":0},{"x":3,"y":4}]]"#).unwrap();
        assert_eq!(set.len(), 1);
        assert!((set.strokes()[0].length() - 5.0).abs() < 1e-9);
        assert_eq!(set.strokes()[0].duration_ms(), 0);
    }

    #[test]
    fn stroke_set_json_rejects_empty_stroke() {
        assert!(StrokeSet::from_json(r#"[[]]"#).is_err());
    }

    #[test]
    fn bounds_of_single_point_is_zero() {
        assert_eq!(Bounds::enclosing([(4.0, 7.0)]), Bounds::default());
        assert_eq!(Bounds::enclosing(Vec::<(f64, f64)>::new()), Bounds::default());
    }

    #[test]
    fn bounds_enclosing() {
        let b = Bounds::enclosing([(1.0, 5.0), (4.0, 2.0), (2.0, 3.0)]);
        assert_eq!(b, Bounds::new(1.0, 2.0, 3.0, 3.0));
        assert_eq!(b.aspect_ratio(), 1.0);
        assert_eq!(Bounds::new(0.0, 0.0, 10.0, 0.0).aspect_ratio(), 0.0);
    }

    #[test]
    fn pixel_buffer_validates_length() {
        assert!(PixelBuffer::new(2, 2, 1, vec![0; 4]).is_ok());
        assert!(matches!(
            PixelBuffer::new(2, 2, 3, vec![0; 4]),
            Err(SignatureError::InvalidRaster(_))
        ));
        assert!(PixelBuffer::new(0, 2, 1, vec![]).is_err());
        assert!(PixelBuffer::new(1, 1, 2, vec![0; 2]).is_err());
    }

    #[test]
    fn transparent_rgba_is_paper() {
        // Transparent black, opaque black, opaque near-white.
        let raster = PixelBuffer::new(
            3,
            1,
            4,
            vec![0, 0, 0, 0, 0, 0, 0, 255, 252, 252, 252, 255],
        )
        .unwrap();
        assert!(!raster.is_ink(0, 0, 250));
        assert!(raster.is_ink(1, 0, 250));
        assert!(!raster.is_ink(2, 0, 250));
        assert_eq!(raster.intensity(0, 0), 255);
    }

    #[test]
    fn default_weights_sum_to_one() {
        let total: f64 = MatcherConfig::default().weights.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn config_defaults_from_empty_json() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config.extractor.ink_threshold, 250);
        assert_eq!(config.verdict.high, 0.85);
        assert_eq!(config.matcher.key_features.len(), 3);
    }

    #[test]
    fn config_rejects_unordered_thresholds() {
        let json = r#"{"verdict":{"high":0.6,"probable":0.7,"questionable":0.5}}"#;
        assert!(matches!(
            EngineConfig::from_json(json),
            Err(SignatureError::InvalidConfig(_))
        ));
    }

    #[test]
    fn config_rejects_negative_weight() {
        let json = r#"{"matcher":{"weights":{"aspect_ratio":-1.0}}}"#;
        assert!(EngineConfig::from_json(json).is_err());
    }

    #[test]
    fn config_rejects_oversized_canvas() {
        for json in [
            r#"{"extractor":{"render_size":4294967295}}"#,
            r#"{"extractor":{"render_size":4097}}"#,
            r#"{"extractor":{"render_size":4}}"#,
        ] {
            assert!(matches!(
                EngineConfig::from_json(json),
                Err(SignatureError::InvalidConfig(_))
            ));
        }
        assert!(EngineConfig::from_json(r#"{"extractor":{"render_size":4096}}"#).is_ok());
    }

    #[test]
    fn config_rejects_pen_wider_than_canvas_allows() {
        for json in [
            r#"{"extractor":{"pen_width":1e12}}"#,
            r#"{"extractor":{"pen_width":64.0}}"#,
            r#"{"extractor":{"render_size":16,"pen_width":4.0}}"#,
            r#"{"extractor":{"pen_width":0.0}}"#,
        ] {
            assert!(matches!(
                EngineConfig::from_json(json),
                Err(SignatureError::InvalidConfig(_))
            ));
        }
        assert!(EngineConfig::from_json(r#"{"extractor":{"pen_width":63.0}}"#).is_ok());
    }

    #[test]
    fn partial_weights_override_table() {
        let json = r#"{"matcher":{"weights":{"aspect_ratio":1.0}}}"#;
        let config = EngineConfig::from_json(json).unwrap();
        assert_eq!(config.matcher.weights.len(), 1);
    }
}
