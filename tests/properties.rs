//! Randomized checks of engine invariants with seeded inputs
//!
//! - Region-map history stays bounded and undo is exact
//! - Fills never report pixels outside the canvas and respect the pixel cap
//! - Zoom never leaves the scale range

use colorbook::canvas::{Color, PixelBuffer};
use colorbook::components::state::{ColoringState, HISTORY_CAPACITY};
use colorbook::components::viewport::{MAX_SCALE, MIN_SCALE, ViewportState, ZoomParams, zoom};
use colorbook::ops::fill::flood_fill;
use pretty_assertions::assert_eq;

fn random_color(rng: &mut fastrand::Rng) -> Color {
    Color::rgb(rng.u8(..), rng.u8(..), rng.u8(..))
}

#[test]
fn undo_restores_exact_prior_map() {
    let mut rng = fastrand::Rng::with_seed(7);
    let mut state = ColoringState::default();
    for _ in 0..200 {
        let id = format!("r{}", rng.u8(0..6));
        let before = state.regions().clone();
        state.set_region_color(&id, random_color(&mut rng));
        assert!(state.undo_len() <= HISTORY_CAPACITY);
        if rng.bool() {
            assert!(state.undo());
            assert_eq!(state.regions(), &before);
            assert!(state.redo());
        }
    }
}

#[test]
fn redo_is_gone_after_a_new_color() {
    let mut rng = fastrand::Rng::with_seed(11);
    let mut state = ColoringState::default();
    for _ in 0..25 {
        state.set_region_color("a", random_color(&mut rng));
    }
    for _ in 0..rng.usize(1..10) {
        state.undo();
    }
    state.set_region_color("b", Color::BLACK);
    assert!(!state.redo());
}

/// Random ink blobs on white, sized so fills hit edges often.
fn noisy_canvas(rng: &mut fastrand::Rng) -> PixelBuffer {
    let (w, h) = (rng.u32(1..40), rng.u32(1..40));
    let mut buf = PixelBuffer::filled(w, h, Color::WHITE);
    for _ in 0..(w * h / 4) {
        buf.set(rng.u32(0..w), rng.u32(0..h), Color::BLACK);
    }
    buf
}

#[test]
fn fills_stay_on_canvas() {
    let mut rng = fastrand::Rng::with_seed(42);
    for _ in 0..200 {
        let buf = noisy_canvas(&mut rng);
        let (x, y) = (rng.u32(0..buf.width() + 3), rng.u32(0..buf.height() + 3));
        let result = flood_fill(&buf, x, y, random_color(&mut rng), rng.u8(0..=100), None);
        for c in &result.changes {
            assert!(c.x < buf.width() && c.y < buf.height());
            assert_ne!(c.old_color, c.new_color);
        }
    }
}

#[test]
fn fill_on_matching_color_changes_nothing() {
    let mut rng = fastrand::Rng::with_seed(3);
    for _ in 0..100 {
        let buf = noisy_canvas(&mut rng);
        let (x, y) = (rng.u32(0..buf.width()), rng.u32(0..buf.height()));
        let here = buf.get(x, y).unwrap();
        let result = flood_fill(&buf, x, y, here, rng.u8(0..=100), None);
        assert!(result.is_noop());
    }
}

#[test]
fn capped_fills_never_exceed_the_cap() {
    let mut rng = fastrand::Rng::with_seed(99);
    let buf = PixelBuffer::filled(50, 50, Color::WHITE);
    for _ in 0..50 {
        let cap = rng.usize(1..3000);
        let result = flood_fill(&buf, rng.u32(0..50), rng.u32(0..50), Color::BLACK, 100, Some(cap));
        assert!(result.changes.len() <= cap);
        assert_eq!(result.stats.truncated, cap < 2500);
    }
}

#[test]
fn zoom_scale_stays_in_range() {
    let mut rng = fastrand::Rng::with_seed(5);
    let mut view = ViewportState::default();
    for _ in 0..1000 {
        let factor = (rng.f32() * 8.0) - 1.0;
        view = zoom(ZoomParams {
            focal_x: rng.f32() * 800.0 - 400.0,
            focal_y: rng.f32() * 600.0 - 300.0,
            zoom_factor: factor,
            current: view,
        });
        assert!((MIN_SCALE..=MAX_SCALE).contains(&view.scale));
        assert!(view.pan_x.is_finite() && view.pan_y.is_finite());
    }
}
