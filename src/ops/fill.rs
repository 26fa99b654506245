use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::canvas::{BoundingBox, Color, PixelBuffer};

/// Per-channel threshold that tolerance 100 maps to. Half the channel range:
/// a white region floods completely but stops at near-black boundary ink.
pub const MAX_CHANNEL_THRESHOLD: u32 = 128;

/// Default hard cap on filled pixels (a 2048×2048 canvas).
pub const DEFAULT_MAX_POINTS: usize = 2048 * 2048;

/// Map a 0–100 tolerance onto a per-channel threshold. Values above 100 clamp.
pub fn tolerance_threshold(tolerance: u8) -> u8 {
    let t = tolerance.min(100) as u32;
    ((t * MAX_CHANNEL_THRESHOLD + 50) / 100) as u8
}

/// Product-level fill settings; the algorithm itself takes them as parameters.
///
/// At the default tolerance of 100 the threshold is 128, so a fill color
/// within 128 of the tapped color on every channel counts as "already
/// filled" and changes nothing. On white that covers pale colors such as
/// `#FFFF99`; lower the tolerance to paint pastels over white.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FillPolicy {
    pub tolerance: u8,
    pub max_points: Option<usize>,
}

impl Default for FillPolicy {
    fn default() -> Self {
        Self {
            tolerance: 100,
            max_points: Some(DEFAULT_MAX_POINTS),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelChange {
    pub x: u32,
    pub y: u32,
    pub old_color: Color,
    pub new_color: Color,
}

/// The connected area one fill reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillRegion {
    pub origin_x: u32,
    pub origin_y: u32,
    /// `None` when nothing was filled.
    pub bounding_box: Option<BoundingBox>,
    pub pixel_count: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FillStats {
    pub total_time_ms: f64,
    /// Pixels whose color was compared against the target.
    pub processed_pixels: usize,
    pub changed_pixels: usize,
    /// The fill hit `max_points` and stopped early.
    pub truncated: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FloodFillResult {
    pub changes: Vec<PixelChange>,
    pub region: FillRegion,
    pub stats: FillStats,
}

impl FloodFillResult {
    fn empty(x: u32, y: u32, started: Instant) -> Self {
        Self {
            changes: Vec::new(),
            region: FillRegion {
                origin_x: x,
                origin_y: y,
                bounding_box: None,
                pixel_count: 0,
            },
            stats: FillStats {
                total_time_ms: elapsed_ms(started),
                ..Default::default()
            },
        }
    }

    pub fn is_noop(&self) -> bool {
        self.changes.is_empty()
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// One bit per pixel.
struct VisitedSet {
    bits: Vec<u64>,
}

impl VisitedSet {
    fn new(len: usize) -> Self {
        Self {
            bits: vec![0; len.div_ceil(64)],
        }
    }

    /// Marks `idx`; returns `false` if it was already marked.
    #[inline(always)]
    fn insert(&mut self, idx: usize) -> bool {
        let word = &mut self.bits[idx / 64];
        let mask = 1u64 << (idx % 64);
        let fresh = *word & mask == 0;
        *word |= mask;
        fresh
    }
}

/// 4-connected flood fill driven by an explicit Vec stack.
///
/// The start pixel's color is the match target. Starting outside the buffer,
/// or on a pixel already within tolerance of `fill_color`, is a successful
/// no-op. Once `max_points` pixels are filled the fill stops and reports
/// `truncated`.
pub fn flood_fill(
    buffer: &PixelBuffer,
    x: u32,
    y: u32,
    fill_color: Color,
    tolerance: u8,
    max_points: Option<usize>,
) -> FloodFillResult {
    let started = Instant::now();
    let (w, h) = (buffer.width(), buffer.height());

    let Some(target) = buffer.get(x, y) else {
        return FloodFillResult::empty(x, y, started);
    };
    let threshold = tolerance_threshold(tolerance);
    if target.within_tolerance(fill_color, threshold) {
        return FloodFillResult::empty(x, y, started);
    }

    let wu = w as usize;
    let limit = max_points.unwrap_or(usize::MAX);
    let pixels = buffer.as_bytes();

    #[inline(always)]
    fn pix(flat: &[u8], idx: usize) -> Color {
        let o = idx * 4;
        Color::rgba(flat[o], flat[o + 1], flat[o + 2], flat[o + 3])
    }

    let mut visited = VisitedSet::new(buffer.pixel_count());
    let mut stack: Vec<u32> = Vec::with_capacity(4096);
    let mut changes = Vec::new();
    let mut bbox = BoundingBox::point(x, y);
    let mut filled = 0usize;
    let mut processed = 1usize;
    let mut truncated = false;

    let seed = y as usize * wu + x as usize;
    visited.insert(seed);
    stack.push(seed as u32);

    while let Some(idx) = stack.pop() {
        if filled >= limit {
            truncated = true;
            break;
        }
        let idx = idx as usize;
        let px = (idx % wu) as u32;
        let py = (idx / wu) as u32;

        let old = pix(pixels, idx);
        if old != fill_color {
            changes.push(PixelChange {
                x: px,
                y: py,
                old_color: old,
                new_color: fill_color,
            });
        }
        filled += 1;
        bbox.include(px, py);

        let mut visit = |ni: usize, stack: &mut Vec<u32>| {
            if visited.insert(ni) {
                processed += 1;
                if pix(pixels, ni).within_tolerance(target, threshold) {
                    stack.push(ni as u32);
                }
            }
        };
        if px > 0 {
            visit(idx - 1, &mut stack);
        }
        if px + 1 < w {
            visit(idx + 1, &mut stack);
        }
        if py > 0 {
            visit(idx - wu, &mut stack);
        }
        if py + 1 < h {
            visit(idx + wu, &mut stack);
        }
    }

    let changed = changes.len();
    FloodFillResult {
        changes,
        region: FillRegion {
            origin_x: x,
            origin_y: y,
            bounding_box: Some(bbox),
            pixel_count: filled,
        },
        stats: FillStats {
            total_time_ms: elapsed_ms(started),
            processed_pixels: processed,
            changed_pixels: changed,
            truncated,
        },
    }
}

/// Write a fill result into the caller's own buffer. Changes that fall
/// outside the buffer are skipped; returns how many pixels were written.
pub fn apply_changes(buffer: &mut PixelBuffer, changes: &[PixelChange]) -> usize {
    changes
        .iter()
        .filter(|c| buffer.set(c.x, c.y, c.new_color))
        .count()
}
