// Pixel-level analysis: ink mask, density, stroke width, convex hull and texture statistics.
// Pure functions over a decoded buffer; no stroke data is read here.
// See DESIGN.md: Feature Extractor

use serde::{Deserialize, Serialize};

use crate::types::{
    Bounds, ExtractorSettings, PixelBuffer, StrokeSet, MAX_RENDER_SIZE, MIN_RENDER_SIZE,
};

/// Density and texture summary of the ink inside a bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct RasterFeatures {
    /// Ink pixels inside the bounds.
    pub signature_pixel_count: u64,
    /// Ink pixels over bounds area, 0 for a zero-area box.
    pub density: f64,
    /// Mean stroke width as a percentage of the longest bounds side.
    pub stroke_width_mean: f64,
    pub stroke_width_std: f64,
    /// Mean stroke width in raw pixels.
    pub stroke_width_px: f64,
    pub texture_mean: f64,
    pub texture_std: f64,
    pub gradient_mean: f64,
    pub gradient_std: f64,
    /// Ink area over the area of its convex hull, in (0, 1].
    pub solidity: f64,
    /// Convex hull perimeter over the ink outline length, in (0, 1].
    pub convexity: f64,
}

/// Integer pixel region `[x0, x1) x [y0, y1)`.
#[derive(Debug, Clone, Copy)]
struct Region {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

impl Region {
    /// Pixels touched by `bounds`, clipped to the raster. A zero-width axis
    /// still covers the column (or row) it lies on.
    fn covering(bounds: &Bounds, raster: &PixelBuffer) -> Option<Region> {
        let clip = |lo: f64, extent: f64, limit: u32| -> Option<(u32, u32)> {
            let start = lo.floor().max(0.0);
            let mut end = (lo + extent).ceil().max(0.0);
            if end <= start {
                end = start + 1.0;
            }
            let start = (start as u64).min(limit as u64) as u32;
            let end = (end as u64).min(limit as u64) as u32;
            (start < end).then_some((start, end))
        };
        let (x0, x1) = clip(bounds.x, bounds.width, raster.width())?;
        let (y0, y1) = clip(bounds.y, bounds.height, raster.height())?;
        Some(Region { x0, y0, x1, y1 })
    }

    fn width(&self) -> usize {
        (self.x1 - self.x0) as usize
    }

    fn height(&self) -> usize {
        (self.y1 - self.y0) as usize
    }
}

/// Compute density, stroke width and texture statistics for the ink inside `bounds`.
pub fn compute_density_and_texture(
    raster: &PixelBuffer,
    bounds: &Bounds,
    ink_threshold: u8,
) -> RasterFeatures {
    let Some(region) = Region::covering(bounds, raster) else {
        return RasterFeatures::default();
    };

    let (w, h) = (region.width(), region.height());
    let mut mask = vec![false; w * h];
    let mut ink_count = 0u64;
    for y in region.y0..region.y1 {
        for x in region.x0..region.x1 {
            if raster.is_ink(x, y, ink_threshold) {
                mask[(y - region.y0) as usize * w + (x - region.x0) as usize] = true;
                ink_count += 1;
            }
        }
    }

    let area = bounds.area();
    let density = if area > 0.0 {
        ink_count as f64 / area
    } else {
        0.0
    };

    let distances = chamfer_distance(&mask, w, h);
    let widths: Vec<f64> = mask
        .iter()
        .zip(&distances)
        .filter(|(ink, _)| **ink)
        .map(|(_, d)| 2.0 * d)
        .collect();
    let (width_px, width_std_px) = mean_and_std(&widths);
    let longest = bounds.longest_side();
    let (stroke_width_mean, stroke_width_std) = if longest > 0.0 {
        (width_px / longest * 100.0, width_std_px / longest * 100.0)
    } else {
        (0.0, 0.0)
    };

    let (solidity, convexity) = hull_ratios(&mask, w, h, ink_count);

    let mut codes = Vec::new();
    let mut gradients = Vec::new();
    for y in region.y0..region.y1 {
        for x in region.x0..region.x1 {
            if x == 0 || y == 0 || x + 1 >= raster.width() || y + 1 >= raster.height() {
                continue;
            }
            let n = neighbourhood(raster, x, y);
            codes.push(local_binary_count(&n));
            gradients.push(sobel_magnitude(&n));
        }
    }
    let (texture_mean, texture_std) = mean_and_std(&codes);
    let (gradient_mean, gradient_std) = mean_and_std(&gradients);

    RasterFeatures {
        signature_pixel_count: ink_count,
        density,
        stroke_width_mean,
        stroke_width_std,
        stroke_width_px: width_px,
        texture_mean,
        texture_std,
        gradient_mean,
        gradient_std,
        solidity,
        convexity,
    }
}

/// Solidity and convexity of the ink mask.
///
/// The hull is taken over pixel corners, so a lone pixel or a straight bar is
/// fully convex. The outline counts ink edges that face paper, including the
/// edges of enclosed holes.
fn hull_ratios(mask: &[bool], w: usize, h: usize, ink_count: u64) -> (f64, f64) {
    if ink_count == 0 {
        return (0.0, 0.0);
    }
    let is_ink = |x: i64, y: i64| -> bool {
        let inside = x >= 0 && y >= 0 && (x as usize) < w && (y as usize) < h;
        inside && mask[y as usize * w + x as usize]
    };

    let mut corners = Vec::new();
    let mut outline = 0u64;
    for y in 0..h {
        let row = &mask[y * w..(y + 1) * w];
        // Extreme cells of each row are enough to span the hull.
        let extremes = (row.iter().position(|&i| i), row.iter().rposition(|&i| i));
        if let (Some(first), Some(last)) = extremes {
            let (x0, x1) = (first as f64, (last + 1) as f64);
            let (y0, y1) = (y as f64, (y + 1) as f64);
            corners.extend([(x0, y0), (x0, y1), (x1, y0), (x1, y1)]);
        }
        for (x, _) in row.iter().enumerate().filter(|(_, ink)| **ink) {
            let (x, y) = (x as i64, y as i64);
            outline += [(x - 1, y), (x + 1, y), (x, y - 1), (x, y + 1)]
                .iter()
                .filter(|&&(nx, ny)| !is_ink(nx, ny))
                .count() as u64;
        }
    }

    let hull = convex_hull(corners);
    let (area, perimeter) = polygon_area_and_perimeter(&hull);
    let solidity = if area > 0.0 {
        (ink_count as f64 / area).min(1.0)
    } else {
        0.0
    };
    let convexity = if outline > 0 {
        (perimeter / outline as f64).min(1.0)
    } else {
        0.0
    };
    (solidity, convexity)
}

/// Monotone-chain convex hull, counter-clockwise, without repeated endpoints.
fn convex_hull(mut points: Vec<(f64, f64)>) -> Vec<(f64, f64)> {
    points.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
    points.dedup();
    if points.len() < 3 {
        return points;
    }
    let cross = |o: (f64, f64), a: (f64, f64), b: (f64, f64)| -> f64 {
        (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
    };

    let mut hull: Vec<(f64, f64)> = Vec::with_capacity(points.len() + 1);
    for &p in &points {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    let lower_len = hull.len() + 1;
    for &p in points.iter().rev().skip(1) {
        while hull.len() >= lower_len && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0
        {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();
    hull
}

/// Shoelace area and closed perimeter of a polygon.
fn polygon_area_and_perimeter(polygon: &[(f64, f64)]) -> (f64, f64) {
    let n = polygon.len();
    let (mut twice_area, mut perimeter) = (0.0, 0.0);
    for i in 0..n {
        let (a, b) = (polygon[i], polygon[(i + 1) % n]);
        twice_area += a.0 * b.1 - b.0 * a.1;
        perimeter += ((b.0 - a.0).powi(2) + (b.1 - a.1).powi(2)).sqrt();
    }
    (twice_area.abs() / 2.0, perimeter)
}

/// Centers of all ink pixels, row-major.
pub fn ink_pixels(raster: &PixelBuffer, ink_threshold: u8) -> Vec<(f64, f64)> {
    let mut pixels = Vec::new();
    for y in 0..raster.height() {
        for x in 0..raster.width() {
            if raster.is_ink(x, y, ink_threshold) {
                pixels.push((x as f64 + 0.5, y as f64 + 0.5));
            }
        }
    }
    pixels
}

/// Bounding box of the ink, measured in whole pixel cells.
pub fn ink_bounds(raster: &PixelBuffer, ink_threshold: u8) -> Option<Bounds> {
    let mut extent: Option<(u32, u32, u32, u32)> = None;
    for y in 0..raster.height() {
        for x in 0..raster.width() {
            if !raster.is_ink(x, y, ink_threshold) {
                continue;
            }
            extent = Some(match extent {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }
    }
    extent.map(|(x0, y0, x1, y1)| {
        Bounds::new(
            x0 as f64,
            y0 as f64,
            (x1 - x0 + 1) as f64,
            (y1 - y0 + 1) as f64,
        )
    })
}

/// Number of 8-connected ink components.
pub fn count_components(raster: &PixelBuffer, ink_threshold: u8) -> usize {
    let (w, h) = (raster.width() as usize, raster.height() as usize);
    let mut visited = vec![false; w * h];
    let mut stack = Vec::new();
    let mut components = 0;

    for start in 0..w * h {
        let (sx, sy) = ((start % w) as u32, (start / w) as u32);
        if visited[start] || !raster.is_ink(sx, sy, ink_threshold) {
            continue;
        }
        components += 1;
        visited[start] = true;
        stack.push((sx, sy));
        while let Some((x, y)) = stack.pop() {
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let (nx, ny) = (x as i64 + dx, y as i64 + dy);
                    if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                        continue;
                    }
                    let idx = ny as usize * w + nx as usize;
                    if !visited[idx] && raster.is_ink(nx as u32, ny as u32, ink_threshold) {
                        visited[idx] = true;
                        stack.push((nx as u32, ny as u32));
                    }
                }
            }
        }
    }

    components
}

/// Render strokes onto a white canvas whose longest side is `render_size`,
/// so raster features do not depend on the capture scale.
pub fn render_strokes(strokes: &StrokeSet, settings: &ExtractorSettings) -> PixelBuffer {
    // Own extent rather than the feature bounds, which collapse to the
    // origin for a single point.
    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for p in strokes.points() {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    let bounds = if min_x.is_finite() && min_y.is_finite() {
        Bounds::new(min_x, min_y, max_x - min_x, max_y - min_y)
    } else {
        Bounds::default()
    };

    // Unvalidated settings still yield a bounded canvas.
    let render_size = settings.render_size.clamp(MIN_RENDER_SIZE, MAX_RENDER_SIZE);
    let radius = (settings.pen_width / 2.0).clamp(0.0, render_size as f64 / 8.0);
    let margin = radius.ceil() + 1.0;
    let inner = (render_size as f64 - 2.0 * margin).max(1.0);
    let longest = bounds.longest_side();
    let scale = if longest > 0.0 { inner / longest } else { 1.0 };

    let side = |extent: f64| -> u32 {
        ((extent * scale + 2.0 * margin).ceil() as u32)
            .saturating_add(1)
            .min(render_size + 1)
    };
    let mut canvas = PixelBuffer::blank(side(bounds.width), side(bounds.height));

    let to_canvas = |x: f64, y: f64| -> (f64, f64) {
        (
            (x - bounds.x) * scale + margin,
            (y - bounds.y) * scale + margin,
        )
    };

    for stroke in strokes.strokes() {
        let points = stroke.points();
        if stroke.is_tap() {
            let (cx, cy) = to_canvas(points[0].x, points[0].y);
            stamp(&mut canvas, cx, cy, radius);
            continue;
        }
        for pair in points.windows(2) {
            let (ax, ay) = to_canvas(pair[0].x, pair[0].y);
            let (bx, by) = to_canvas(pair[1].x, pair[1].y);
            let length = ((bx - ax).powi(2) + (by - ay).powi(2)).sqrt();
            // Half-pixel steps leave no gaps between stamps.
            let steps = (length / 0.5).ceil().max(1.0) as u32;
            for i in 0..=steps {
                let t = i as f64 / steps as f64;
                stamp(&mut canvas, ax + (bx - ax) * t, ay + (by - ay) * t, radius);
            }
        }
    }

    canvas
}

fn stamp(canvas: &mut PixelBuffer, cx: f64, cy: f64, radius: f64) {
    let r2 = radius * radius + 1e-9;
    let x_lo = (cx - radius).floor().max(0.0) as u32;
    let y_lo = (cy - radius).floor().max(0.0) as u32;
    let x_hi = ((cx + radius).ceil().max(0.0) as u32).min(canvas.width() - 1);
    let y_hi = ((cy + radius).ceil().max(0.0) as u32).min(canvas.height() - 1);
    for py in y_lo..=y_hi {
        for px in x_lo..=x_hi {
            let dx = px as f64 + 0.5 - cx;
            let dy = py as f64 + 0.5 - cy;
            if dx * dx + dy * dy <= r2 {
                canvas.set_gray(px, py, 0);
            }
        }
    }
}

/// 3x3 intensities around `(x, y)`, normalized to 0..1, row-major.
/// Caller guarantees `(x, y)` is not on the raster border.
fn neighbourhood(raster: &PixelBuffer, x: u32, y: u32) -> [f64; 9] {
    let mut n = [0.0; 9];
    for (i, (dx, dy)) in [
        (-1, -1),
        (0, -1),
        (1, -1),
        (-1, 0),
        (0, 0),
        (1, 0),
        (-1, 1),
        (0, 1),
        (1, 1),
    ]
    .iter()
    .enumerate()
    {
        let px = (x as i64 + dx) as u32;
        let py = (y as i64 + dy) as u32;
        n[i] = raster.intensity(px, py) as f64 / 255.0;
    }
    n
}

/// Neighbours at least as bright as the center: 0..=8.
fn local_binary_count(n: &[f64; 9]) -> f64 {
    let center = n[4];
    n.iter()
        .enumerate()
        .filter(|(i, v)| *i != 4 && **v >= center)
        .count() as f64
}

fn sobel_magnitude(n: &[f64; 9]) -> f64 {
    let gx = (n[2] + 2.0 * n[5] + n[8]) - (n[0] + 2.0 * n[3] + n[6]);
    let gy = (n[6] + 2.0 * n[7] + n[8]) - (n[0] + 2.0 * n[1] + n[2]);
    (gx * gx + gy * gy).sqrt()
}

/// Two-pass chamfer distance from each ink cell to the nearest background
/// cell. Cells outside the grid count as background.
fn chamfer_distance(mask: &[bool], w: usize, h: usize) -> Vec<f64> {
    const DIAGONAL: f64 = std::f64::consts::SQRT_2;
    let mut d: Vec<f64> = mask
        .iter()
        .map(|&ink| if ink { f64::INFINITY } else { 0.0 })
        .collect();
    let at = |d: &[f64], x: i64, y: i64| -> f64 {
        if x < 0 || y < 0 || x >= w as i64 || y >= h as i64 {
            0.0
        } else {
            d[y as usize * w + x as usize]
        }
    };

    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let idx = y as usize * w + x as usize;
            if d[idx] == 0.0 {
                continue;
            }
            let best = d[idx]
                .min(at(&d, x - 1, y) + 1.0)
                .min(at(&d, x, y - 1) + 1.0)
                .min(at(&d, x - 1, y - 1) + DIAGONAL)
                .min(at(&d, x + 1, y - 1) + DIAGONAL);
            d[idx] = best;
        }
    }
    for y in (0..h as i64).rev() {
        for x in (0..w as i64).rev() {
            let idx = y as usize * w + x as usize;
            if d[idx] == 0.0 {
                continue;
            }
            let best = d[idx]
                .min(at(&d, x + 1, y) + 1.0)
                .min(at(&d, x, y + 1) + 1.0)
                .min(at(&d, x + 1, y + 1) + DIAGONAL)
                .min(at(&d, x - 1, y + 1) + DIAGONAL);
            d[idx] = best;
        }
    }
    d
}

/// Population mean and standard deviation; `(0, 0)` for no samples.
pub(crate) fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}
