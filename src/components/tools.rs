use std::ops::RangeInclusive;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::canvas::{BOUNDARY_INK_THRESHOLD, BoundingBox, Color, PixelBuffer};
use crate::error::Result;

pub const PENCIL_SIZE_RANGE: RangeInclusive<u32> = 1..=20;
pub const ERASER_SIZE_RANGE: RangeInclusive<u32> = 1..=50;

/// Minimum spacing between processed pointer moves (~60 Hz).
pub const MOVE_THROTTLE_MS: u64 = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[default]
    Fill,
    Pencil,
    Eraser,
}

impl Tool {
    pub fn is_freehand(self) -> bool {
        matches!(self, Tool::Pencil | Tool::Eraser)
    }

    pub fn label(self) -> &'static str {
        match self {
            Tool::Fill => "Fill",
            Tool::Pencil => "Pencil",
            Tool::Eraser => "Eraser",
        }
    }
}

fn clamp_size(size: i64, range: &RangeInclusive<u32>) -> u32 {
    size.clamp(*range.start() as i64, *range.end() as i64) as u32
}

/// Active tool, color and brush sizes. Sizes are clamped into range, never
/// rejected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSettings {
    active_tool: Tool,
    color: Color,
    pencil_size: u32,
    eraser_size: u32,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            active_tool: Tool::Fill,
            color: Color::rgb(255, 0, 0),
            pencil_size: 4,
            eraser_size: 20,
        }
    }
}

impl ToolSettings {
    pub fn new(pencil_size: i64, eraser_size: i64) -> Self {
        let mut s = Self::default();
        s.set_pencil_size(pencil_size);
        s.set_eraser_size(eraser_size);
        s
    }

    pub fn active_tool(&self) -> Tool {
        self.active_tool
    }

    pub fn set_active_tool(&mut self, tool: Tool) {
        self.active_tool = tool;
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn color_hex(&self) -> String {
        self.color.to_hex()
    }

    pub fn set_color(&mut self, color: Color) {
        self.color = color;
    }

    pub fn set_color_hex(&mut self, hex: &str) -> Result<()> {
        self.color = Color::parse_hex(hex)?;
        Ok(())
    }

    pub fn pencil_size(&self) -> u32 {
        self.pencil_size
    }

    pub fn eraser_size(&self) -> u32 {
        self.eraser_size
    }

    pub fn set_pencil_size(&mut self, size: i64) {
        self.pencil_size = clamp_size(size, &PENCIL_SIZE_RANGE);
    }

    pub fn set_eraser_size(&mut self, size: i64) {
        self.eraser_size = clamp_size(size, &ERASER_SIZE_RANGE);
    }
}

// ============================================================================
// STROKE TYPES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FreehandKind {
    Pencil,
    Eraser,
}

impl FreehandKind {
    pub fn tool(self) -> Tool {
        match self {
            FreehandKind::Pencil => Tool::Pencil,
            FreehandKind::Eraser => Tool::Eraser,
        }
    }
}

/// How a freehand tool paints and which pixels it samples against.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StrokeStyle {
    pub color: Color,
    pub size: u32,
}

/// One drawn piece of a stroke, in canvas pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StrokeSegment {
    pub from: (f32, f32),
    pub to: (f32, f32),
    pub color: Color,
    pub size: u32,
    /// Pixels actually written; `None` when every covered pixel was ink.
    pub bounds: Option<BoundingBox>,
}

/// Handed back on pointer-up; one summary is one undoable unit.
#[derive(Clone, Debug, PartialEq)]
pub struct StrokeSummary {
    pub tool: Tool,
    pub segments: usize,
    pub path: Vec<(f32, f32)>,
    pub bounds: Option<BoundingBox>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MoveOutcome {
    /// No stroke in progress.
    Idle,
    /// Too soon after the last processed move.
    Throttled,
    /// Point is boundary ink (or off the canvas); the stroke pauses.
    Dropped,
    Drawn(StrokeSegment),
}

#[derive(Clone, Debug, PartialEq)]
enum ToolPhase {
    Idle,
    Drawing {
        last: (f32, f32),
        last_move_ms: u64,
        path: Vec<(f32, f32)>,
        segments: usize,
        bounds: Option<BoundingBox>,
    },
}

// ============================================================================
// FREEHAND TOOL - Idle → Drawing → Idle
// ============================================================================

/// Pencil or eraser that never starts or extends a stroke on boundary ink.
///
/// Ink is read from `art`, the uncolored line art, never from the live
/// canvas: dark colors the user painted stay paintable and erasable.
#[derive(Clone, Debug)]
pub struct FreehandTool {
    kind: FreehandKind,
    phase: ToolPhase,
    ink_threshold: u8,
    throttle_ms: u64,
    /// Skip ink pixels while stamping, so line art survives wide brushes.
    protect_ink: bool,
}

impl FreehandTool {
    pub fn new(kind: FreehandKind) -> Self {
        Self {
            kind,
            phase: ToolPhase::Idle,
            ink_threshold: BOUNDARY_INK_THRESHOLD,
            throttle_ms: MOVE_THROTTLE_MS,
            protect_ink: true,
        }
    }

    pub fn with_ink_threshold(mut self, threshold: u8) -> Self {
        self.ink_threshold = threshold;
        self
    }

    pub fn with_throttle_ms(mut self, ms: u64) -> Self {
        self.throttle_ms = ms;
        self
    }

    pub fn with_ink_protection(mut self, protect: bool) -> Self {
        self.protect_ink = protect;
        self
    }

    pub fn kind(&self) -> FreehandKind {
        self.kind
    }

    pub fn is_drawing(&self) -> bool {
        matches!(self.phase, ToolPhase::Drawing { .. })
    }

    /// `true` when `(x, y)` lies on the canvas and is not boundary ink.
    fn paintable_at(&self, art: &PixelBuffer, x: f32, y: f32) -> bool {
        match art.sample(x.floor() as i64, y.floor() as i64) {
            Some(c) => !c.is_boundary_ink_below(self.ink_threshold),
            None => false,
        }
    }

    /// Start a stroke unless the point is off the canvas or on boundary ink.
    pub fn pointer_down(&mut self, art: &PixelBuffer, x: f32, y: f32, time_ms: u64) -> bool {
        if !self.paintable_at(art, x, y) {
            debug!("{:?} stroke refused at ({:.1}, {:.1})", self.kind, x, y);
            return false;
        }
        self.phase = ToolPhase::Drawing {
            last: (x, y),
            last_move_ms: time_ms,
            path: vec![(x, y)],
            segments: 0,
            bounds: None,
        };
        true
    }

    pub fn pointer_move(
        &mut self,
        art: &PixelBuffer,
        buffer: &mut PixelBuffer,
        x: f32,
        y: f32,
        time_ms: u64,
        style: StrokeStyle,
    ) -> MoveOutcome {
        let throttle_ms = self.throttle_ms;
        let paintable = self.paintable_at(art, x, y);
        let protect_ink = self.protect_ink;
        let ink_threshold = self.ink_threshold;

        let ToolPhase::Drawing {
            last,
            last_move_ms,
            path,
            segments,
            bounds,
        } = &mut self.phase
        else {
            return MoveOutcome::Idle;
        };

        if time_ms.saturating_sub(*last_move_ms) < throttle_ms {
            return MoveOutcome::Throttled;
        }
        *last_move_ms = time_ms;

        if !paintable {
            return MoveOutcome::Dropped;
        }

        let from = *last;
        let ink = protect_ink.then_some((art, ink_threshold));
        let written = draw_segment(buffer, ink, from, (x, y), style);
        *last = (x, y);
        path.push((x, y));
        *segments += 1;
        if let Some(b) = written {
            *bounds = Some(bounds.map_or(b, |prev| prev.union(b)));
        }

        MoveOutcome::Drawn(StrokeSegment {
            from,
            to: (x, y),
            color: style.color,
            size: style.size,
            bounds: written,
        })
    }

    /// Close the path and return to Idle. `None` if no stroke was running.
    pub fn pointer_up(&mut self) -> Option<StrokeSummary> {
        match std::mem::replace(&mut self.phase, ToolPhase::Idle) {
            ToolPhase::Idle => None,
            ToolPhase::Drawing {
                path,
                segments,
                bounds,
                ..
            } => Some(StrokeSummary {
                tool: self.kind.tool(),
                segments,
                path,
                bounds,
            }),
        }
    }
}

// ============================================================================
// RASTERIZATION
// ============================================================================

/// Stamp a round dab of `size` pixels diameter centred on the pixel under
/// `pos`. Returns the bounds of pixels written.
fn stamp_dab(
    buffer: &mut PixelBuffer,
    ink: Option<(&PixelBuffer, u8)>,
    pos: (f32, f32),
    style: StrokeStyle,
) -> Option<BoundingBox> {
    let cx = pos.0.floor() as i64;
    let cy = pos.1.floor() as i64;
    let radius = style.size.max(1) as f32 / 2.0;
    let radius_sq = radius * radius;
    let reach = radius.floor() as i64;

    let mut written: Option<BoundingBox> = None;
    for dy in -reach..=reach {
        for dx in -reach..=reach {
            if (dx * dx + dy * dy) as f32 > radius_sq {
                continue;
            }
            let (px, py) = (cx + dx, cy + dy);
            if !buffer.in_bounds(px, py) {
                continue;
            }
            if let Some((art, threshold)) = ink
                && art.sample(px, py).is_some_and(|c| c.is_boundary_ink_below(threshold))
            {
                continue;
            }
            let (px, py) = (px as u32, py as u32);
            buffer.set(px, py, style.color);
            match written.as_mut() {
                Some(b) => b.include(px, py),
                None => written = Some(BoundingBox::point(px, py)),
            }
        }
    }
    written
}

/// Dense per-pixel stepping from `start` to `end`, one dab per step.
/// With `ink = Some((art, threshold))`, pixels that are ink in `art` are
/// left untouched.
pub fn draw_segment(
    buffer: &mut PixelBuffer,
    ink: Option<(&PixelBuffer, u8)>,
    start: (f32, f32),
    end: (f32, f32),
    style: StrokeStyle,
) -> Option<BoundingBox> {
    let dx = end.0 - start.0;
    let dy = end.1 - start.1;
    let distance = (dx * dx + dy * dy).sqrt();
    let steps = distance.ceil().max(1.0) as usize;

    let mut bounds: Option<BoundingBox> = None;
    let mut last_pixel: Option<(i64, i64)> = None;
    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        let p = (start.0 + dx * t, start.1 + dy * t);
        let pixel = (p.0.floor() as i64, p.1.floor() as i64);
        if last_pixel == Some(pixel) {
            continue;
        }
        last_pixel = Some(pixel);
        if let Some(b) = stamp_dab(buffer, ink, p, style) {
            bounds = Some(bounds.map_or(b, |prev| prev.union(b)));
        }
    }
    bounds
}
