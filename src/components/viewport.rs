// ============================================================================
// VIEWPORT TRANSFORM - scale/pan math for zoom gestures
// ============================================================================
//
// The surface is transformed around the viewport center:
//   screen = center + pan + (local - center) * scale
// Nothing here touches pixels; the pixel buffer never changes on zoom/pan.

use serde::Serialize;

pub const MIN_SCALE: f32 = 0.25;
pub const MAX_SCALE: f32 = 4.0;
/// Multiplier applied by one zoom-in step (inverse for zoom-out).
pub const ZOOM_STEP: f32 = 1.2;
/// Wheel delta (in pixels) that amounts to one zoom step.
pub const WHEEL_NOTCH: f32 = 100.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ViewportState {
    pub scale: f32,
    pub pan_x: f32,
    pub pan_y: f32,
}

impl Default for ViewportState {
    fn default() -> Self {
        Self {
            scale: 1.0,
            pan_x: 0.0,
            pan_y: 0.0,
        }
    }
}

/// A zoom gesture. The focal point is relative to the viewport center.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ZoomParams {
    pub focal_x: f32,
    pub focal_y: f32,
    pub zoom_factor: f32,
    pub current: ViewportState,
}

/// Apply a zoom gesture, keeping the focal point visually fixed.
///
/// The pan correction uses the scale *change*, because the transform origin
/// is the viewport center. Factors that are not finite and positive leave the
/// state unchanged.
pub fn zoom(params: ZoomParams) -> ViewportState {
    let current = params.current;
    if !params.zoom_factor.is_finite() || params.zoom_factor <= 0.0 || current.scale <= 0.0 {
        return current;
    }
    let new_scale = (current.scale * params.zoom_factor).clamp(MIN_SCALE, MAX_SCALE);
    let ratio = 1.0 - new_scale / current.scale;
    ViewportState {
        scale: new_scale,
        pan_x: current.pan_x + params.focal_x * ratio,
        pan_y: current.pan_y + params.focal_y * ratio,
    }
}

/// One zoom-in (`steps > 0`) or zoom-out (`steps < 0`) step around a focal point.
pub fn zoom_step(current: ViewportState, focal_x: f32, focal_y: f32, steps: i32) -> ViewportState {
    zoom(ZoomParams {
        focal_x,
        focal_y,
        zoom_factor: ZOOM_STEP.powi(steps),
        current,
    })
}

/// Zoom factor for a mouse-wheel delta; scrolling up (negative) zooms in.
pub fn wheel_factor(delta_y: f32) -> f32 {
    ZOOM_STEP.powf(-delta_y / WHEEL_NOTCH)
}

/// Back to 100% with no pan.
pub fn reset() -> ViewportState {
    ViewportState::default()
}

pub fn pan_by(current: ViewportState, dx: f32, dy: f32) -> ViewportState {
    ViewportState {
        pan_x: current.pan_x + dx,
        pan_y: current.pan_y + dy,
        ..current
    }
}

// ============================================================================
// CLIENT → CANVAS MAPPING
// ============================================================================

/// Where the canvas element sits on screen, before the viewport transform,
/// and how large its pixel buffer is.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CanvasMapping {
    pub left: f32,
    pub top: f32,
    /// On-screen (CSS) size of the element.
    pub css_width: f32,
    pub css_height: f32,
    /// Intrinsic pixel size of the buffer.
    pub canvas_width: u32,
    pub canvas_height: u32,
}

impl CanvasMapping {
    /// Element drawn at its intrinsic size at the origin.
    pub fn identity(canvas_width: u32, canvas_height: u32) -> Self {
        Self {
            left: 0.0,
            top: 0.0,
            css_width: canvas_width as f32,
            css_height: canvas_height as f32,
            canvas_width,
            canvas_height,
        }
    }

    fn center(&self) -> (f32, f32) {
        (
            self.left + self.css_width / 2.0,
            self.top + self.css_height / 2.0,
        )
    }

    fn pixel_ratio(&self) -> (f32, f32) {
        let rx = if self.css_width > 0.0 {
            self.canvas_width as f32 / self.css_width
        } else {
            1.0
        };
        let ry = if self.css_height > 0.0 {
            self.canvas_height as f32 / self.css_height
        } else {
            1.0
        };
        (rx, ry)
    }

    /// Client (viewport) coordinates → canvas pixel coordinates.
    pub fn client_to_canvas(&self, client_x: f32, client_y: f32, view: &ViewportState) -> (f32, f32) {
        let (cx, cy) = self.center();
        let scale = if view.scale > 0.0 { view.scale } else { 1.0 };
        let local_x = cx + (client_x - cx - view.pan_x) / scale;
        let local_y = cy + (client_y - cy - view.pan_y) / scale;
        let (rx, ry) = self.pixel_ratio();
        ((local_x - self.left) * rx, (local_y - self.top) * ry)
    }

    /// Canvas pixel coordinates → client coordinates.
    pub fn canvas_to_client(&self, canvas_x: f32, canvas_y: f32, view: &ViewportState) -> (f32, f32) {
        let (cx, cy) = self.center();
        let (rx, ry) = self.pixel_ratio();
        let local_x = self.left + canvas_x / rx;
        let local_y = self.top + canvas_y / ry;
        (
            cx + view.pan_x + (local_x - cx) * view.scale,
            cy + view.pan_y + (local_y - cy) * view.scale,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn zoom_clamps_scale() {
        let start = ViewportState::default();
        for factor in [0.0001, 0.5, 3.0, 1e9] {
            let out = zoom(ZoomParams {
                focal_x: 10.0,
                focal_y: -5.0,
                zoom_factor: factor,
                current: start,
            });
            assert!((MIN_SCALE..=MAX_SCALE).contains(&out.scale), "factor {factor}");
        }
    }

    #[test]
    fn zoom_corrects_pan_by_scale_change() {
        let current = ViewportState {
            scale: 2.0,
            pan_x: 4.0,
            pan_y: -2.0,
        };
        let out = zoom(ZoomParams {
            focal_x: 100.0,
            focal_y: 50.0,
            zoom_factor: 1.5,
            current,
        });
        assert!(approx(out.scale, 3.0));
        // 1 - 3/2 = -0.5
        assert!(approx(out.pan_x, 4.0 - 50.0));
        assert!(approx(out.pan_y, -2.0 - 25.0));
    }

    #[test]
    fn clamped_zoom_uses_effective_ratio() {
        let current = ViewportState {
            scale: 3.5,
            ..Default::default()
        };
        let out = zoom(ZoomParams {
            focal_x: 10.0,
            focal_y: 0.0,
            zoom_factor: 10.0,
            current,
        });
        assert!(approx(out.scale, 4.0));
        assert!(approx(out.pan_x, 10.0 * (1.0 - 4.0 / 3.5)));
    }

    #[test]
    fn bad_factor_is_ignored() {
        let current = ViewportState::default();
        for factor in [0.0, -2.0, f32::NAN, f32::INFINITY] {
            let out = zoom(ZoomParams {
                focal_x: 1.0,
                focal_y: 1.0,
                zoom_factor: factor,
                current,
            });
            assert_eq!(out, current);
        }
    }

    #[test]
    fn wheel_up_zooms_in() {
        assert!(wheel_factor(-100.0) > 1.0);
        assert!(approx(wheel_factor(100.0), 1.0 / ZOOM_STEP));
        assert!(approx(wheel_factor(0.0), 1.0));
    }

    #[test]
    fn maps_css_scaled_canvas() {
        // 800x600 buffer shown at 400x300, offset by (10, 20).
        let mapping = CanvasMapping {
            left: 10.0,
            top: 20.0,
            css_width: 400.0,
            css_height: 300.0,
            canvas_width: 800,
            canvas_height: 600,
        };
        let view = ViewportState::default();
        let (x, y) = mapping.client_to_canvas(110.0, 70.0, &view);
        assert!(approx(x, 200.0) && approx(y, 100.0));
    }

    #[test]
    fn mapping_undoes_zoom_and_pan() {
        let mapping = CanvasMapping::identity(200, 100);
        let view = ViewportState {
            scale: 2.0,
            pan_x: 15.0,
            pan_y: -10.0,
        };
        // The center pixel stays at center + pan.
        let (x, y) = mapping.client_to_canvas(115.0, 40.0, &view);
        assert!(approx(x, 100.0) && approx(y, 50.0));
        let (cx, cy) = mapping.canvas_to_client(30.0, 70.0, &view);
        let (bx, by) = mapping.client_to_canvas(cx, cy, &view);
        assert!(approx(bx, 30.0) && approx(by, 70.0));
    }
}
