// Stroke recording for one capture session.
// Single writer: the session that owns the recorder serializes begin/extend/end calls.
// See DESIGN.md: Stroke Recorder

use wasm_bindgen::prelude::*;

use crate::types::*;

/// Collects pointer movement into strokes, pen-down to pen-up.
#[derive(Debug, Default)]
pub struct StrokeRecorder {
    strokes: StrokeSet,
    open: Vec<Point>,
}

impl StrokeRecorder {
    pub fn new() -> Self {
        StrokeRecorder {
            strokes: StrokeSet::new(),
            open: Vec::new(),
        }
    }

    /// Open a new stroke. A stroke that is still open is closed first.
    /// Non-finite positions are ignored.
    pub fn begin_stroke(&mut self, point: Point) {
        if !is_finite(&point) {
            return;
        }
        self.end_stroke();
        self.open.push(point);
    }

    /// Append to the open stroke; ignored when nothing is open or the
    /// position is not finite.
    pub fn extend_stroke(&mut self, mut point: Point) {
        let Some(last) = self.open.last() else {
            return;
        };
        if !is_finite(&point) {
            return;
        }
        if point.t < last.t {
            point.t = last.t;
        }
        self.open.push(point);
    }

    /// Close the open stroke and keep it if it has any points.
    pub fn end_stroke(&mut self) {
        let points = std::mem::take(&mut self.open);
        if let Ok(stroke) = Stroke::new(points) {
            self.strokes.push(stroke);
        }
    }

    /// Drop the open stroke without keeping it.
    pub fn cancel_stroke(&mut self) {
        self.open.clear();
    }

    /// Clear every stroke and any open stroke.
    pub fn reset(&mut self) {
        self.strokes.clear();
        self.open.clear();
    }

    pub fn is_drawing(&self) -> bool {
        !self.open.is_empty()
    }

    /// Completed strokes. The open stroke is not included.
    pub fn strokes(&self) -> &StrokeSet {
        &self.strokes
    }

    /// Hand off the completed strokes, leaving the recorder empty.
    pub fn take(&mut self) -> StrokeSet {
        self.open.clear();
        std::mem::take(&mut self.strokes)
    }

    /// Replay a batch of pointer events.
    pub fn process(&mut self, batch: &PointerBatch) {
        for event in &batch.events {
            let t = event.timestamp;
            match event.event_type {
                PointerEventType::Down { x, y } => self.begin_stroke(Point { x, y, t }),
                PointerEventType::Move { x, y } => self.extend_stroke(Point { x, y, t }),
                PointerEventType::Up => self.end_stroke(),
                PointerEventType::Cancel => self.cancel_stroke(),
            }
        }
    }
}

fn is_finite(point: &Point) -> bool {
    point.x.is_finite() && point.y.is_finite()
}

/// Stroke recorder exposed to the capture UI.
///
/// Mirrors the pointer lifecycle: `begin` on pointer-down, `extend` on
/// pointer-move, `end` on pointer-up. `to_json` yields the stroke JSON accepted
/// by `Engine::extract_strokes`.
#[wasm_bindgen]
pub struct WasmStrokeRecorder {
    inner: StrokeRecorder,
}

#[wasm_bindgen]
impl WasmStrokeRecorder {
    #[wasm_bindgen(constructor)]
    pub fn new() -> WasmStrokeRecorder {
        WasmStrokeRecorder {
            inner: StrokeRecorder::new(),
        }
    }

    pub fn begin(&mut self, x: f64, y: f64, t_ms: u64) {
        self.inner.begin_stroke(Point::new(x, y, t_ms));
    }

    pub fn extend(&mut self, x: f64, y: f64, t_ms: u64) {
        self.inner.extend_stroke(Point::new(x, y, t_ms));
    }

    pub fn end(&mut self) {
        self.inner.end_stroke();
    }

    pub fn cancel(&mut self) {
        self.inner.cancel_stroke();
    }

    pub fn reset(&mut self) {
        self.inner.reset();
    }

    /// Number of completed strokes.
    pub fn stroke_count(&self) -> usize {
        self.inner.strokes().len()
    }

    pub fn is_drawing(&self) -> bool {
        self.inner.is_drawing()
    }

    pub fn to_json(&self) -> Result<String, JsValue> {
        serde_json::to_string(self.inner.strokes())
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }
}

impl Default for WasmStrokeRecorder {
    fn default() -> Self {
        Self::new()
    }
}
