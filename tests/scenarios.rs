//! End-to-end coloring scenarios
//!
//! - Filling a bordered square on a large canvas through the worker
//! - Region-map undo after recoloring
//! - Expired persisted state
//! - Sanitizing hostile markup before it becomes a surface

use std::collections::HashSet;

use colorbook::canvas::{Color, PixelBuffer, RegionManifest};
use colorbook::components::state::{ColoringState, StateManager, StoragePolicy};
use colorbook::io::{self, LoadOutcome, MemoryStore, StateStore, StoredState};
use colorbook::ops::fill::flood_fill;
use colorbook::ops::sanitize::{sanitize, validate_for_coloring};
use colorbook::ops::worker::{FillWorker, FloodFillParams};
use colorbook::{ColoringSession, EngineSettings};
use pretty_assertions::assert_eq;

const RED: Color = Color::rgb(255, 0, 0);
const GREEN: Color = Color::rgb(0, 255, 0);
const DAY_MS: i64 = 24 * 60 * 60 * 1000;
const NOW_MS: i64 = 1_760_000_000_000;

fn fixed_now() -> i64 {
    NOW_MS
}

/// 800x600 white canvas with a 1px black square outline from (100,100) to (300,250).
fn bordered_square() -> (PixelBuffer, RegionManifest) {
    let (w, h) = (800u32, 600u32);
    let (x0, y0, x1, y1) = (100u32, 100u32, 300u32, 250u32);
    let mut buf = PixelBuffer::filled(w, h, Color::WHITE);
    let mut labels = vec![0u32; (w * h) as usize];
    for y in y0..=y1 {
        for x in x0..=x1 {
            if x == x0 || x == x1 || y == y0 || y == y1 {
                buf.set(x, y, Color::BLACK);
            } else {
                labels[(y * w + x) as usize] = 1;
            }
        }
    }
    let manifest = RegionManifest::with_labels(w, h, labels, vec!["r1".to_string()]).unwrap();
    (buf, manifest)
}

fn interior() -> HashSet<(u32, u32)> {
    (101..300).flat_map(|x| (101..250).map(move |y| (x, y))).collect()
}

#[test]
fn fill_inside_square_covers_exactly_the_interior() {
    let (buf, _) = bordered_square();
    let result = flood_fill(&buf, 200, 175, RED, 100, None);

    let changed: HashSet<(u32, u32)> = result.changes.iter().map(|c| (c.x, c.y)).collect();
    assert_eq!(changed.len(), result.changes.len());
    assert_eq!(changed, interior());
    assert!(result.changes.iter().all(|c| c.new_color == RED && c.old_color == Color::WHITE));
    assert!(!result.stats.truncated);
}

#[test]
fn worker_fill_matches_in_thread_fill() {
    let (buf, _) = bordered_square();
    let mut worker = FillWorker::spawn().unwrap();
    let pending = worker
        .perform_flood_fill(
            &buf,
            FloodFillParams {
                x: 200,
                y: 175,
                fill_color: RED,
                tolerance: 100,
                max_points: None,
            },
        )
        .unwrap();
    let from_worker = pending.wait().unwrap();
    worker.terminate();

    let direct = flood_fill(&buf, 200, 175, RED, 100, None);
    assert_eq!(from_worker.changes, direct.changes);
    assert_eq!(from_worker.region.bounding_box, direct.region.bounding_box);
}

#[test]
fn session_tap_leaves_border_intact() {
    let (buf, manifest) = bordered_square();
    let mut session = ColoringSession::open_raster(
        "square",
        buf.clone(),
        manifest,
        MemoryStore::new(),
        EngineSettings::default(),
    )
    .unwrap();
    session.tools_mut().set_color_hex("#FF0000").unwrap();

    let event = session.tap_fill(200.5, 175.5).unwrap().unwrap();
    assert_eq!(event.region_id.as_deref(), Some("r1"));
    assert_eq!(event.changed_pixels, interior().len());

    let out = session.buffer().unwrap();
    for x in 100..=300 {
        assert_eq!(out.get(x, 100), Some(Color::BLACK));
        assert_eq!(out.get(x, 250), Some(Color::BLACK));
    }
    assert_eq!(out.get(99, 175), Some(Color::WHITE));
    assert_eq!(out.get(301, 175), Some(Color::WHITE));
    assert_eq!(session.state().color_of("r1"), Some("#FF0000"));

    let key = io::storage_key("square");
    assert!(session.store().get(&key).unwrap().is_some());
    session.close();
}

#[test]
fn undo_after_recolor_restores_first_color() {
    let mut state = ColoringState::default();
    state.set_region_color("r1", RED);
    state.set_region_color("r1", GREEN);
    assert!(state.undo());
    assert_eq!(state.color_of("r1"), Some("#FF0000"));
}

#[test]
fn eight_day_old_state_loads_empty() {
    let mut store = MemoryStore::new();
    let key = io::storage_key("old-page");
    let mut regions = io::RegionMap::new();
    regions.insert("r1".to_string(), "#FF0000".to_string());
    let record = StoredState::new(regions, Vec::new(), Vec::new(), NOW_MS - 8 * DAY_MS);
    store.set(&key, &serde_json::to_string(&record).unwrap()).unwrap();

    let mgr = StateManager::open_with_clock("old-page", store, StoragePolicy::default(), fixed_now).unwrap();
    assert!(mgr.state().regions().is_empty());
    assert!(!mgr.state().can_undo());
    assert!(matches!(mgr.load_outcome(), LoadOutcome::Discarded(_)));
    assert!(mgr.store().get(&key).unwrap().is_none());
}

#[test]
fn six_day_old_state_is_restored() {
    let mut store = MemoryStore::new();
    let key = io::storage_key("recent");
    let mut regions = io::RegionMap::new();
    regions.insert("r1".to_string(), "#00FF00".to_string());
    let record = StoredState::new(regions, vec![io::RegionMap::new()], Vec::new(), NOW_MS - 6 * DAY_MS);
    store.set(&key, &serde_json::to_string(&record).unwrap()).unwrap();

    let mut mgr = StateManager::open_with_clock("recent", store, StoragePolicy::default(), fixed_now).unwrap();
    assert_eq!(mgr.state().color_of("r1"), Some("#00FF00"));
    assert!(mgr.undo());
    assert!(mgr.state().regions().is_empty());
}

#[test]
fn script_before_root_is_removed() {
    let markup = r#"<script>alert(1)</script><svg viewBox="0 0 10 10"><rect id="r1" width="4" height="4"/></svg>"#;
    let clean = sanitize(markup).unwrap();
    assert!(clean.starts_with("<svg"));
    assert!(!clean.to_ascii_lowercase().contains("script"));
    assert!(!clean.contains("alert"));

    let validation = validate_for_coloring(markup);
    assert!(validation.is_valid);
    assert_eq!(validation.colorable_area_count, 1);
}

#[test]
fn svg_session_persists_region_colors() {
    let markup = r#"<svg><path id="petal" d="M0 0L4 4"/><ellipse id="leaf" rx="2" ry="1"/></svg>"#;
    let mut session =
        ColoringSession::open_svg("flower", markup, MemoryStore::new(), EngineSettings::default()).unwrap();
    session.fill_region("petal", RED).unwrap();
    session.fill_region("leaf", GREEN).unwrap();
    session.close();

    let stored = session.store().get(&io::storage_key("flower")).unwrap().unwrap();
    let record: StoredState = serde_json::from_str(&stored).unwrap();
    assert_eq!(record.version, "1.0");
    assert_eq!(record.regions.get("leaf").map(String::as_str), Some("#00FF00"));
    assert_eq!(record.undo_stack.len(), 2);
}
