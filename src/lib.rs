// signature_core: signature capture and matching engine
// Pure analysis in Rust; the host supplies pointer events or pixels and stores templates.
// See DESIGN.md: Wasm facade

mod error;
mod extractor;
mod features;
mod plausibility;
mod raster;
mod recorder;
mod similarity;
mod types;
mod verdict;
mod verifier;

use wasm_bindgen::prelude::*;

pub use error::{Result as SignatureResult, SignatureError};
pub use extractor::FeatureExtractor;
pub use features::{
    Feature, FeatureKind, FeatureSource, FeatureVector, Template, FEATURE_SCHEMA_VERSION,
};
pub use plausibility::{assess, PlausibilityCheck, PlausibilityReport};
pub use raster::RasterFeatures;
pub use recorder::{StrokeRecorder, WasmStrokeRecorder};
pub use similarity::{MatchDetails, MatchResult, SimilarityEngine, SimilarityScore};
pub use types::*;
pub use verdict::{MatchBand, Verdict, VerdictPolicy};
pub use verifier::Verifier;

/// Initialize panic hook for better error messages in browser console.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// Signature engine exposed to JavaScript.
/// Every call takes and returns JSON so the host never touches Rust types.
#[wasm_bindgen]
pub struct Engine {
    verifier: Verifier,
}

#[wasm_bindgen]
impl Engine {
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: &str) -> Result<Engine, JsValue> {
        let verifier = Verifier::from_json(config_json).map_err(to_js)?;
        Ok(Engine { verifier })
    }

    /// Features of a recorded stroke set (the JSON from `WasmStrokeRecorder::to_json`).
    pub fn extract_strokes(&self, strokes_json: &str) -> Result<String, JsValue> {
        let strokes = StrokeSet::from_json(strokes_json).map_err(to_js)?;
        let features = self.verifier.extract_strokes(&strokes).map_err(to_js)?;
        features.to_json().map_err(to_js)
    }

    /// Features of an uploaded image. `pixels` is row-major, 1, 3 or 4 channels.
    pub fn extract_raster(
        &self,
        width: u32,
        height: u32,
        channels: u8,
        pixels: &[u8],
    ) -> Result<String, JsValue> {
        let image = PixelBuffer::new(width, height, channels, pixels.to_vec()).map_err(to_js)?;
        let features = self.verifier.extract_raster(&image).map_err(to_js)?;
        features.to_json().map_err(to_js)
    }

    /// Features of strokes together with the canvas they were drawn on.
    pub fn extract_capture(
        &self,
        strokes_json: &str,
        width: u32,
        height: u32,
        channels: u8,
        pixels: &[u8],
    ) -> Result<String, JsValue> {
        let strokes = StrokeSet::from_json(strokes_json).map_err(to_js)?;
        let canvas = PixelBuffer::new(width, height, channels, pixels.to_vec()).map_err(to_js)?;
        let features = self
            .verifier
            .extract_capture(&strokes, &canvas)
            .map_err(to_js)?;
        features.to_json().map_err(to_js)
    }

    /// Compare a candidate vector with a template vector.
    /// Returns JSON with score, confidence, band, verdict, per-feature breakdown and details.
    pub fn compare(&self, candidate_json: &str, template_json: &str) -> Result<String, JsValue> {
        let result = self
            .verifier
            .compare_json(candidate_json, template_json)
            .map_err(to_js)?;
        serde_json::to_string(&result)
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }

    /// Template-free plausibility of a feature vector.
    pub fn assess(&self, features_json: &str) -> Result<String, JsValue> {
        let features = FeatureVector::from_json(features_json).map_err(to_js)?;
        let report = self.verifier.assess(&features).map_err(to_js)?;
        serde_json::to_string(&report)
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }
}

fn to_js(err: SignatureError) -> JsValue {
    JsValue::from_str(&err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_creation_works() {
        let config = r#"{"extractor":{},"matcher":{},"verdict":{}}"#;
        let engine = Engine::new(config);
        assert!(engine.is_ok());
    }

    #[test]
    fn recorder_output_feeds_engine() {
        let engine = Engine::new("{}").unwrap();
        let mut recorder = WasmStrokeRecorder::new();
        recorder.begin(0.0, 20.0, 0);
        recorder.extend(30.0, 0.0, 50);
        recorder.extend(60.0, 25.0, 100);
        recorder.end();
        let strokes_json = recorder.to_json().unwrap();

        let features_json = engine.extract_strokes(&strokes_json).unwrap();
        let result_json = engine.compare(&features_json, &features_json).unwrap();
        let result: MatchResult = serde_json::from_str(&result_json).unwrap();
        assert_eq!(result.band, MatchBand::High);
        assert!(result.is_authentic);

        let report_json = engine.assess(&features_json).unwrap();
        let report: PlausibilityReport = serde_json::from_str(&report_json).unwrap();
        assert!(report.score >= 0.5);
    }

    #[test]
    fn raster_entry_point() {
        let engine = Engine::new("{}").unwrap();
        let (width, height) = (40u32, 20u32);
        let mut pixels = vec![255u8; (width * height) as usize];
        for y in 8..12 {
            for x in 5..35 {
                pixels[(y * width + x) as usize] = 0;
            }
        }
        let json = engine.extract_raster(width, height, 1, &pixels).unwrap();
        let features = FeatureVector::from_json(&json).unwrap();
        assert_eq!(features.source, FeatureSource::Raster);
        assert_eq!(features.stroke_count, 1.0);
    }
}
