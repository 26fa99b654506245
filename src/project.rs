use log::{debug, info, warn};

use crate::canvas::{BoundingBox, Color, PixelBuffer, RegionManifest, analyze_raster};
use crate::components::history::{CanvasCommand, CanvasHistory, CommandKind, PixelPatch, StrokeTracker};
use crate::components::state::{ColoringState, StateManager, validate_drawing_id};
use crate::components::tools::{
    FreehandKind, FreehandTool, MoveOutcome, StrokeStyle, StrokeSummary, Tool, ToolSettings,
};
use crate::components::viewport::{self, CanvasMapping, ViewportState, ZoomParams};
use crate::error::{EngineError, Result};
use crate::io::StateStore;
use crate::ops::fill::{FloodFillResult, PixelChange, apply_changes};
use crate::ops::sanitize::{self, ColoringValidation};
use crate::ops::worker::{FillBackend, FloodFillParams, PendingFill};
use crate::settings::EngineSettings;

/// Host hooks for finished user actions. Both default to doing nothing.
pub trait SessionObserver {
    fn stroke_complete(&mut self, _summary: &StrokeSummary) {}
    fn fill_complete(&mut self, _event: &FillEvent) {}
}

struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// What one committed fill did.
#[derive(Clone, Debug, PartialEq)]
pub struct FillEvent {
    pub region_id: Option<String>,
    pub color: Color,
    pub changed_pixels: usize,
    pub bounding_box: Option<BoundingBox>,
    pub truncated: bool,
}

/// The drawing being colored.
pub enum Surface {
    /// Pixel art; fills and freehand tools write into `buffer`.
    Raster {
        buffer: PixelBuffer,
        original: PixelBuffer,
        manifest: RegionManifest,
    },
    /// Sanitized vector art; regions are colored by id and rendered by the host.
    Svg {
        markup: String,
        region_ids: Vec<String>,
        validation: ColoringValidation,
    },
}

struct QueuedFill {
    pending: PendingFill,
    color: Color,
    origin: (u32, u32),
}

/// One open drawing: surface, region colors, pixel history, tools and view.
pub struct ColoringSession<S: StateStore> {
    drawing_id: String,
    surface: Surface,
    state: StateManager<S>,
    history: CanvasHistory,
    tracker: StrokeTracker,
    backend: FillBackend,
    tools: ToolSettings,
    freehand: Option<FreehandTool>,
    viewport: ViewportState,
    mapping: CanvasMapping,
    settings: EngineSettings,
    erase_color: Color,
    observer: Box<dyn SessionObserver>,
    queued: Option<QueuedFill>,
    closed: bool,
}

impl<S: StateStore> ColoringSession<S> {
    pub fn open_raster(
        drawing_id: &str,
        buffer: PixelBuffer,
        manifest: RegionManifest,
        store: S,
        settings: EngineSettings,
    ) -> Result<Self> {
        validate_drawing_id(drawing_id)?;
        if !manifest.matches(&buffer) {
            return Err(EngineError::ManifestSize {
                width: buffer.width(),
                height: buffer.height(),
            });
        }
        let report = analyze_raster(&buffer, settings.boundary_ink_threshold);
        if !report.has_boundary_ink() {
            warn!("{}: no boundary ink, fills will cover the whole canvas", drawing_id);
        }

        let state = StateManager::open(drawing_id, store, settings.storage_policy())?;
        let original = buffer.clone();
        let mut buffer = buffer;
        let restored = restore_regions(
            &mut buffer,
            &original,
            &manifest,
            state.state(),
            settings.boundary_ink_threshold,
        );
        if restored > 0 {
            debug!("{}: repainted {} saved region(s)", drawing_id, restored);
        }
        let backend = FillBackend::start(settings.use_worker);
        let mapping = CanvasMapping::identity(buffer.width(), buffer.height());
        info!(
            "session {}: raster {}x{}, {} region(s), worker={}",
            drawing_id,
            buffer.width(),
            buffer.height(),
            manifest.region_ids().len(),
            backend.is_worker()
        );

        let surface = Surface::Raster {
            buffer,
            original,
            manifest,
        };
        Ok(Self::assemble(drawing_id, surface, state, backend, mapping, settings))
    }

    /// Open vector art. Markup that fails sanitization never starts a session.
    pub fn open_svg(drawing_id: &str, markup: &str, store: S, settings: EngineSettings) -> Result<Self> {
        validate_drawing_id(drawing_id)?;
        let clean = sanitize::sanitize(markup)?;
        let validation = sanitize::validate_for_coloring(&clean);
        for w in &validation.warnings {
            warn!("{}: {}", drawing_id, w);
        }
        let region_ids = sanitize::region_ids(&clean)?;

        let state = StateManager::open(drawing_id, store, settings.storage_policy())?;
        info!("session {}: svg, {} region(s)", drawing_id, region_ids.len());

        let surface = Surface::Svg {
            markup: clean,
            region_ids,
            validation,
        };
        Ok(Self::assemble(
            drawing_id,
            surface,
            state,
            FillBackend::InThread,
            CanvasMapping::identity(0, 0),
            settings,
        ))
    }

    fn assemble(
        drawing_id: &str,
        surface: Surface,
        state: StateManager<S>,
        backend: FillBackend,
        mapping: CanvasMapping,
        settings: EngineSettings,
    ) -> Self {
        let tools = ToolSettings::new(i64::from(settings.pencil_size), i64::from(settings.eraser_size));
        Self {
            drawing_id: drawing_id.to_string(),
            surface,
            state,
            history: CanvasHistory::new(settings.history_capacity),
            tracker: StrokeTracker::default(),
            backend,
            tools,
            freehand: None,
            viewport: ViewportState::default(),
            mapping,
            erase_color: settings.erase_color(),
            settings,
            observer: Box::new(NoopObserver),
            queued: None,
            closed: false,
        }
    }

    pub fn with_observer(mut self, observer: impl SessionObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    // --- accessors ---

    pub fn drawing_id(&self) -> &str {
        &self.drawing_id
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn buffer(&self) -> Option<&PixelBuffer> {
        match &self.surface {
            Surface::Raster { buffer, .. } => Some(buffer),
            Surface::Svg { .. } => None,
        }
    }

    pub fn markup(&self) -> Option<&str> {
        match &self.surface {
            Surface::Svg { markup, .. } => Some(markup),
            Surface::Raster { .. } => None,
        }
    }

    pub fn validation(&self) -> Option<&ColoringValidation> {
        match &self.surface {
            Surface::Svg { validation, .. } => Some(validation),
            Surface::Raster { .. } => None,
        }
    }

    pub fn region_ids(&self) -> &[String] {
        match &self.surface {
            Surface::Raster { manifest, .. } => manifest.region_ids(),
            Surface::Svg { region_ids, .. } => region_ids,
        }
    }

    pub fn state(&self) -> &ColoringState {
        self.state.state()
    }

    pub fn store(&self) -> &S {
        self.state.store()
    }

    pub fn history(&self) -> &CanvasHistory {
        &self.history
    }

    pub fn tools(&self) -> &ToolSettings {
        &self.tools
    }

    pub fn tools_mut(&mut self) -> &mut ToolSettings {
        &mut self.tools
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn viewport(&self) -> ViewportState {
        self.viewport
    }

    pub fn is_worker_backed(&self) -> bool {
        self.backend.is_worker()
    }

    pub fn has_pending_fill(&self) -> bool {
        self.queued.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(EngineError::SessionClosed)
        } else {
            Ok(())
        }
    }

    // --- viewport ---

    /// Where the canvas element sits on screen; used for pointer mapping.
    pub fn set_canvas_mapping(&mut self, mapping: CanvasMapping) {
        self.mapping = mapping;
    }

    pub fn zoom(&mut self, focal_x: f32, focal_y: f32, zoom_factor: f32) -> ViewportState {
        self.viewport = viewport::zoom(ZoomParams {
            focal_x,
            focal_y,
            zoom_factor,
            current: self.viewport,
        });
        self.viewport
    }

    pub fn zoom_wheel(&mut self, focal_x: f32, focal_y: f32, delta_y: f32) -> ViewportState {
        self.zoom(focal_x, focal_y, viewport::wheel_factor(delta_y))
    }

    pub fn pan_by(&mut self, dx: f32, dy: f32) -> ViewportState {
        self.viewport = viewport::pan_by(self.viewport, dx, dy);
        self.viewport
    }

    pub fn reset_view(&mut self) {
        self.viewport = viewport::reset();
    }

    // --- fill ---

    /// Fill at a client point and wait for the result. `Ok(None)` when the
    /// point misses the canvas or the fill changed nothing.
    pub fn tap_fill(&mut self, client_x: f32, client_y: f32) -> Result<Option<FillEvent>> {
        if self.submit_fill(client_x, client_y)?.is_none() {
            return Ok(None);
        }
        self.wait_fill()
    }

    /// Queue a fill without waiting; returns the request id. A fill still
    /// queued from an earlier tap is abandoned. Taps off the canvas or on
    /// boundary ink are ignored.
    pub fn submit_fill(&mut self, client_x: f32, client_y: f32) -> Result<Option<u64>> {
        self.ensure_open()?;
        let Surface::Raster { buffer, original, .. } = &self.surface else {
            return Ok(None);
        };
        let (cx, cy) = self.mapping.client_to_canvas(client_x, client_y, &self.viewport);
        let (x, y) = (cx.floor() as i64, cy.floor() as i64);
        let Some(under) = original.sample(x, y) else {
            debug!("fill tap ({:.1}, {:.1}) is off the canvas", cx, cy);
            return Ok(None);
        };
        if under.is_boundary_ink_below(self.settings.boundary_ink_threshold) {
            debug!("fill tap ({:.1}, {:.1}) is on boundary ink", cx, cy);
            return Ok(None);
        }

        let color = self.tools.color();
        let params = FloodFillParams {
            x: x as u32,
            y: y as u32,
            fill_color: color,
            tolerance: self.settings.fill.tolerance,
            max_points: self.settings.fill.max_points,
        };
        let pending = self.backend.submit(buffer, params)?;
        let id = pending.id();
        let queued = QueuedFill {
            pending,
            color,
            origin: (params.x, params.y),
        };
        if let Some(prev) = self.queued.replace(queued) {
            debug!("fill {} superseded by {}", prev.pending.id(), id);
        }
        Ok(Some(id))
    }

    /// Commit the queued fill if its result has arrived.
    pub fn poll_fill(&mut self) -> Result<Option<FillEvent>> {
        let result = match &self.queued {
            Some(q) => match q.pending.try_take() {
                Some(result) => result,
                None => return Ok(None),
            },
            None => return Ok(None),
        };
        let Some(queued) = self.queued.take() else {
            return Ok(None);
        };
        self.commit_fill(result?, queued.color, queued.origin)
    }

    /// Block on the queued fill and commit it.
    pub fn wait_fill(&mut self) -> Result<Option<FillEvent>> {
        let Some(queued) = self.queued.take() else {
            return Ok(None);
        };
        let result = queued.pending.wait()?;
        self.commit_fill(result, queued.color, queued.origin)
    }

    fn commit_fill(
        &mut self,
        result: FloodFillResult,
        color: Color,
        origin: (u32, u32),
    ) -> Result<Option<FillEvent>> {
        self.ensure_open()?;
        if result.is_noop() {
            debug!("fill at {:?} changed nothing", origin);
            return Ok(None);
        }
        let ink = self.settings.boundary_ink_threshold;
        let Surface::Raster { buffer, original, manifest } = &mut self.surface else {
            return Ok(None);
        };
        let Some(bounds) = result.region.bounding_box else {
            return Ok(None);
        };
        // A fill that started on the user's own dark paint can reach the
        // outline; the line art itself is never recolored.
        let changes: Vec<PixelChange> = result
            .changes
            .iter()
            .filter(|c| !original.get(c.x, c.y).is_some_and(|o| o.is_boundary_ink_below(ink)))
            .copied()
            .collect();
        if changes.is_empty() {
            debug!("fill at {:?} only reached boundary ink", origin);
            return Ok(None);
        }

        let before = PixelPatch::capture(buffer, bounds);
        let changed = apply_changes(buffer, &changes);
        let after = PixelPatch::capture(buffer, bounds);
        let region_id = manifest.region_at(origin.0, origin.1).map(str::to_string);

        if let Some(id) = &region_id {
            self.state.set_region_color(id, color);
        }
        self.history.push(CanvasCommand::new(
            CommandKind::Fill {
                region_id: region_id.clone(),
            },
            before,
            after,
        ));

        let event = FillEvent {
            region_id,
            color,
            changed_pixels: changed,
            bounding_box: Some(bounds),
            truncated: result.stats.truncated,
        };
        if event.truncated {
            warn!("fill at {:?} hit the pixel cap and was truncated", origin);
        }
        debug!("fill committed: {:?}", event);
        self.observer.fill_complete(&event);
        Ok(Some(event))
    }

    /// Color a named region directly. On raster surfaces with a label plane
    /// the region's pixels are painted too (boundary ink is left alone).
    pub fn fill_region(&mut self, region_id: &str, color: Color) -> Result<FillEvent> {
        self.ensure_open()?;
        let ink = self.settings.boundary_ink_threshold;
        let event = match &mut self.surface {
            Surface::Svg { region_ids, .. } => {
                if !region_ids.iter().any(|r| r == region_id) {
                    return Err(EngineError::UnknownRegion(region_id.to_string()));
                }
                self.state.set_region_color(region_id, color);
                FillEvent {
                    region_id: Some(region_id.to_string()),
                    color,
                    changed_pixels: 0,
                    bounding_box: None,
                    truncated: false,
                }
            }
            Surface::Raster { buffer, original, manifest } => {
                if !manifest.contains(region_id) {
                    return Err(EngineError::UnknownRegion(region_id.to_string()));
                }
                let pixels = manifest.region_pixels(region_id);
                let bounds = pixels.iter().fold(None, |acc: Option<BoundingBox>, &(x, y)| {
                    Some(match acc {
                        Some(mut b) => {
                            b.include(x, y);
                            b
                        }
                        None => BoundingBox::point(x, y),
                    })
                });
                let before = bounds.map_or_else(PixelPatch::empty, |b| PixelPatch::capture(buffer, b));
                let changed = paint_pixels(buffer, original, &pixels, color, ink);
                let after = bounds.map_or_else(PixelPatch::empty, |b| PixelPatch::capture(buffer, b));

                self.state.set_region_color(region_id, color);
                self.history.push(CanvasCommand::new(
                    CommandKind::Fill {
                        region_id: Some(region_id.to_string()),
                    },
                    before,
                    after,
                ));
                FillEvent {
                    region_id: Some(region_id.to_string()),
                    color,
                    changed_pixels: changed,
                    bounding_box: bounds,
                    truncated: false,
                }
            }
        };
        self.observer.fill_complete(&event);
        Ok(event)
    }

    // --- freehand ---

    /// Begin a pencil/eraser stroke. `false` when the active tool is not a
    /// freehand tool or the point is off the canvas or on boundary ink.
    pub fn pointer_down(&mut self, client_x: f32, client_y: f32, time_ms: u64) -> bool {
        if self.closed {
            return false;
        }
        let kind = match self.tools.active_tool() {
            Tool::Pencil => FreehandKind::Pencil,
            Tool::Eraser => FreehandKind::Eraser,
            Tool::Fill => return false,
        };
        let Surface::Raster { buffer, original, .. } = &self.surface else {
            return false;
        };
        let (x, y) = self.mapping.client_to_canvas(client_x, client_y, &self.viewport);
        let mut tool = FreehandTool::new(kind)
            .with_ink_threshold(self.settings.boundary_ink_threshold)
            .with_throttle_ms(self.settings.move_throttle_ms);
        if !tool.pointer_down(original, x, y, time_ms) {
            return false;
        }
        self.tracker.start(buffer);
        self.freehand = Some(tool);
        true
    }

    pub fn pointer_move(&mut self, client_x: f32, client_y: f32, time_ms: u64) -> MoveOutcome {
        let (x, y) = self.mapping.client_to_canvas(client_x, client_y, &self.viewport);
        let Some(tool) = self.freehand.as_mut() else {
            return MoveOutcome::Idle;
        };
        let Surface::Raster { buffer, original, .. } = &mut self.surface else {
            return MoveOutcome::Idle;
        };
        let style = match tool.kind() {
            FreehandKind::Pencil => StrokeStyle {
                color: self.tools.color(),
                size: self.tools.pencil_size(),
            },
            FreehandKind::Eraser => StrokeStyle {
                color: self.erase_color,
                size: self.tools.eraser_size(),
            },
        };
        tool.pointer_move(original, buffer, x, y, time_ms, style)
    }

    /// Finish the stroke and commit it as one history step.
    pub fn pointer_up(&mut self) -> Option<StrokeSummary> {
        let mut tool = self.freehand.take()?;
        let Some(summary) = tool.pointer_up() else {
            self.tracker.cancel();
            return None;
        };
        let Surface::Raster { buffer, .. } = &self.surface else {
            self.tracker.cancel();
            return Some(summary);
        };
        if let Some(command) = self.tracker.finish(buffer, summary.tool, summary.bounds) {
            self.history.push(command);
        }
        self.observer.stroke_complete(&summary);
        Some(summary)
    }

    // --- history ---

    /// Undo the latest fill or stroke; fills that named a region also roll
    /// back the region map.
    pub fn undo(&mut self) -> bool {
        if self.closed || self.freehand.is_some() {
            return false;
        }
        match &mut self.surface {
            Surface::Raster { buffer, .. } => match self.history.undo(buffer) {
                Some(CommandKind::Fill { region_id: Some(_) }) => {
                    self.state.undo();
                    true
                }
                Some(_) => true,
                None => false,
            },
            Surface::Svg { .. } => self.state.undo(),
        }
    }

    pub fn redo(&mut self) -> bool {
        if self.closed || self.freehand.is_some() {
            return false;
        }
        match &mut self.surface {
            Surface::Raster { buffer, .. } => match self.history.redo(buffer) {
                Some(CommandKind::Fill { region_id: Some(_) }) => {
                    self.state.redo();
                    true
                }
                Some(_) => true,
                None => false,
            },
            Surface::Svg { .. } => self.state.redo(),
        }
    }

    pub fn can_undo(&self) -> bool {
        match &self.surface {
            Surface::Raster { .. } => self.history.can_undo(),
            Surface::Svg { .. } => self.state().can_undo(),
        }
    }

    pub fn can_redo(&self) -> bool {
        match &self.surface {
            Surface::Raster { .. } => self.history.can_redo(),
            Surface::Svg { .. } => self.state().can_redo(),
        }
    }

    /// Drop every color: region map, both histories, and painted pixels.
    pub fn clear(&mut self) {
        if self.closed {
            return;
        }
        self.freehand = None;
        self.tracker.cancel();
        self.queued = None;
        self.history.clear();
        self.state.clear();
        if let Surface::Raster { buffer, original, .. } = &mut self.surface {
            *buffer = original.clone();
        }
        info!("session {}: cleared", self.drawing_id);
    }

    /// Stop the worker and refuse further edits. Safe to call twice.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.queued = None;
        self.freehand = None;
        self.tracker.cancel();
        self.backend.shutdown();
        info!("session {}: closed", self.drawing_id);
    }
}

/// Paint `pixels` with `color`, skipping line-art ink. Returns how many changed.
fn paint_pixels(
    buffer: &mut PixelBuffer,
    original: &PixelBuffer,
    pixels: &[(u32, u32)],
    color: Color,
    ink_threshold: u8,
) -> usize {
    let mut changed = 0;
    for &(x, y) in pixels {
        if original.get(x, y).is_none_or(|o| o.is_boundary_ink_below(ink_threshold)) {
            continue;
        }
        if buffer.get(x, y).is_some_and(|c| c != color) {
            buffer.set(x, y, color);
            changed += 1;
        }
    }
    changed
}

/// Repaint labelled regions from a restored region map. Entries naming an
/// unknown region or holding an unparsable color are skipped.
fn restore_regions(
    buffer: &mut PixelBuffer,
    original: &PixelBuffer,
    manifest: &RegionManifest,
    state: &ColoringState,
    ink_threshold: u8,
) -> usize {
    if !manifest.has_labels() {
        return 0;
    }
    let mut painted = 0;
    for (region_id, hex) in state.regions() {
        if !manifest.contains(region_id) {
            debug!("saved color for unknown region {:?} ignored", region_id);
            continue;
        }
        let Ok(color) = Color::parse_hex(hex) else {
            warn!("saved color {:?} for region {:?} is not a color", hex, region_id);
            continue;
        };
        paint_pixels(buffer, original, &manifest.region_pixels(region_id), color, ink_threshold);
        painted += 1;
    }
    painted
}

impl<S: StateStore> Drop for ColoringSession<S> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryStore;
    use std::cell::RefCell;
    use std::rc::Rc;

    const RED: Color = Color::rgb(255, 0, 0);

    fn sync_settings() -> EngineSettings {
        EngineSettings {
            use_worker: false,
            ..Default::default()
        }
    }

    /// Two 4×4 boxes side by side, labelled "left" and "right".
    fn two_boxes() -> (PixelBuffer, RegionManifest) {
        let (w, h) = (11u32, 6u32);
        let mut buf = PixelBuffer::filled(w, h, Color::WHITE);
        let mut labels = vec![0u32; (w * h) as usize];
        for y in 0..h {
            for x in 0..w {
                let border = y == 0 || y == h - 1 || x == 0 || x == 5 || x == w - 1;
                if border {
                    buf.set(x, y, Color::BLACK);
                } else {
                    labels[(y * w + x) as usize] = if x < 5 { 1 } else { 2 };
                }
            }
        }
        let manifest =
            RegionManifest::with_labels(w, h, labels, vec!["left".into(), "right".into()]).unwrap();
        (buf, manifest)
    }

    #[derive(Default, Clone)]
    struct Recorder {
        fills: Rc<RefCell<Vec<FillEvent>>>,
        strokes: Rc<RefCell<usize>>,
    }

    impl SessionObserver for Recorder {
        fn stroke_complete(&mut self, _summary: &StrokeSummary) {
            *self.strokes.borrow_mut() += 1;
        }
        fn fill_complete(&mut self, event: &FillEvent) {
            self.fills.borrow_mut().push(event.clone());
        }
    }

    #[test]
    fn tap_fill_colors_region_and_notifies() {
        let (buf, manifest) = two_boxes();
        let recorder = Recorder::default();
        let mut session = ColoringSession::open_raster("boxes", buf, manifest, MemoryStore::new(), sync_settings())
            .unwrap()
            .with_observer(recorder.clone());
        session.tools_mut().set_color(RED);

        let event = session.tap_fill(2.5, 2.5).unwrap().unwrap();
        assert_eq!(event.region_id.as_deref(), Some("left"));
        assert_eq!(event.changed_pixels, 16);
        assert_eq!(session.state().color_of("left"), Some("#FF0000"));
        assert_eq!(session.buffer().unwrap().get(7, 2), Some(Color::WHITE));
        assert_eq!(recorder.fills.borrow().len(), 1);

        // Same spot again is a no-op
        assert!(session.tap_fill(2.5, 2.5).unwrap().is_none());
        assert_eq!(session.history().undo_count(), 1);
    }

    #[test]
    fn undo_reverts_pixels_and_region_map() {
        let (buf, manifest) = two_boxes();
        let mut session =
            ColoringSession::open_raster("boxes", buf.clone(), manifest, MemoryStore::new(), sync_settings()).unwrap();
        session.tools_mut().set_color(RED);
        session.tap_fill(7.0, 3.0).unwrap();
        assert!(session.undo());
        assert_eq!(session.buffer(), Some(&buf));
        assert_eq!(session.state().color_of("right"), None);
        assert!(session.redo());
        assert_eq!(session.state().color_of("right"), Some("#FF0000"));
        assert!(!session.redo());
    }

    #[test]
    fn pencil_stroke_is_one_history_step() {
        let (buf, manifest) = two_boxes();
        let recorder = Recorder::default();
        let mut session = ColoringSession::open_raster("boxes", buf.clone(), manifest, MemoryStore::new(), sync_settings())
            .unwrap()
            .with_observer(recorder.clone());
        session.tools_mut().set_active_tool(Tool::Pencil);
        session.tools_mut().set_pencil_size(1);

        assert!(!session.pointer_down(0.5, 0.5, 0), "border is ink");
        assert!(session.pointer_down(1.5, 1.5, 0));
        assert!(matches!(session.pointer_move(3.5, 1.5, 20), MoveOutcome::Drawn(_)));
        assert!(matches!(session.pointer_move(3.5, 3.5, 40), MoveOutcome::Drawn(_)));
        let summary = session.pointer_up().unwrap();
        assert_eq!(summary.segments, 2);
        assert_eq!(*recorder.strokes.borrow(), 1);
        assert_eq!(session.history().undo_count(), 1);
        assert!(session.state().regions().is_empty());

        assert!(session.undo());
        assert_eq!(session.buffer(), Some(&buf));
    }

    #[test]
    fn fill_region_paints_labelled_pixels() {
        let (buf, manifest) = two_boxes();
        let mut session =
            ColoringSession::open_raster("boxes", buf, manifest, MemoryStore::new(), sync_settings()).unwrap();
        let event = session.fill_region("right", RED).unwrap();
        assert_eq!(event.changed_pixels, 16);
        assert_eq!(session.buffer().unwrap().get(5, 2), Some(Color::BLACK));
        assert!(matches!(
            session.fill_region("middle", RED),
            Err(EngineError::UnknownRegion(_))
        ));
    }

    #[test]
    fn svg_session_colors_by_id() {
        let markup = r#"<svg><rect id="sky" width="4" height="4"/><circle id="sun" r="2"/></svg>"#;
        let mut session = ColoringSession::open_svg("scene", markup, MemoryStore::new(), sync_settings()).unwrap();
        assert_eq!(session.region_ids(), ["sky".to_string(), "sun".to_string()]);
        session.fill_region("sun", Color::rgb(255, 200, 0)).unwrap();
        session.fill_region("sky", Color::rgb(0, 0, 255)).unwrap();
        assert!(session.undo());
        assert_eq!(session.state().color_of("sky"), None);
        assert_eq!(session.state().color_of("sun"), Some("#FFC800"));
        assert!(session.tap_fill(1.0, 1.0).unwrap().is_none());
    }

    #[test]
    fn bad_inputs_stop_the_session() {
        let (buf, manifest) = two_boxes();
        assert!(matches!(
            ColoringSession::open_raster("", buf, manifest, MemoryStore::new(), sync_settings()),
            Err(EngineError::InvalidDrawingId(_))
        ));
        assert!(matches!(
            ColoringSession::open_svg("x", "<div>nope</div>", MemoryStore::new(), sync_settings()),
            Err(EngineError::InvalidMarkup(_))
        ));
    }

    #[test]
    fn clear_restores_original_art() {
        let (buf, manifest) = two_boxes();
        let mut session =
            ColoringSession::open_raster("boxes", buf.clone(), manifest, MemoryStore::new(), sync_settings()).unwrap();
        session.fill_region("left", RED).unwrap();
        session.clear();
        assert_eq!(session.buffer(), Some(&buf));
        assert!(session.state().regions().is_empty());
        assert!(!session.can_undo());
    }

    #[test]
    fn closed_session_refuses_fills() {
        let (buf, manifest) = two_boxes();
        let mut session =
            ColoringSession::open_raster("boxes", buf, manifest, MemoryStore::new(), sync_settings()).unwrap();
        session.close();
        session.close();
        assert!(matches!(session.tap_fill(2.0, 2.0), Err(EngineError::SessionClosed)));
        assert!(!session.pointer_down(2.0, 2.0, 0));
    }

    #[test]
    fn taps_on_the_outline_are_ignored() {
        let (buf, manifest) = two_boxes();
        let mut session =
            ColoringSession::open_raster("boxes", buf.clone(), manifest, MemoryStore::new(), sync_settings()).unwrap();
        session.tools_mut().set_color(RED);
        assert!(session.tap_fill(5.5, 2.5).unwrap().is_none());
        assert!(session.tap_fill(0.5, 0.5).unwrap().is_none());
        assert_eq!(session.buffer(), Some(&buf));
        assert!(!session.can_undo());
    }

    #[test]
    fn fill_on_dark_paint_never_reaches_the_outline() {
        let (buf, manifest) = two_boxes();
        let mut session =
            ColoringSession::open_raster("boxes", buf.clone(), manifest, MemoryStore::new(), sync_settings()).unwrap();
        session.fill_region("left", Color::BLACK).unwrap();

        // The black left box touches the outline; refilling it stays inside.
        session.tools_mut().set_color(RED);
        let event = session.tap_fill(2.5, 2.5).unwrap().unwrap();
        assert_eq!(event.changed_pixels, 16);
        let out = session.buffer().unwrap();
        for y in 0..6 {
            for x in 0..11 {
                if buf.get(x, y) == Some(Color::BLACK) {
                    assert_eq!(out.get(x, y), Some(Color::BLACK), "outline pixel ({}, {})", x, y);
                }
            }
        }
        assert_eq!(out.get(7, 2), Some(Color::WHITE));
    }

    #[test]
    fn dark_pencil_stroke_can_be_erased() {
        let (buf, manifest) = two_boxes();
        let mut session =
            ColoringSession::open_raster("boxes", buf.clone(), manifest, MemoryStore::new(), sync_settings()).unwrap();
        session.tools_mut().set_color(Color::BLACK);
        session.tools_mut().set_active_tool(Tool::Pencil);
        session.tools_mut().set_pencil_size(1);
        assert!(session.pointer_down(2.5, 2.5, 0));
        session.pointer_move(3.5, 2.5, 20);
        session.pointer_up();
        assert_eq!(session.buffer().unwrap().get(2, 2), Some(Color::BLACK));

        session.tools_mut().set_active_tool(Tool::Eraser);
        session.tools_mut().set_eraser_size(1);
        assert!(session.pointer_down(2.5, 2.5, 100));
        assert!(matches!(session.pointer_move(3.5, 2.5, 120), MoveOutcome::Drawn(_)));
        session.pointer_up();
        assert_eq!(session.buffer(), Some(&buf));
    }

    #[test]
    fn reopening_repaints_saved_regions() {
        let (buf, manifest) = two_boxes();
        let mut session = ColoringSession::open_raster(
            "boxes",
            buf.clone(),
            manifest.clone(),
            MemoryStore::new(),
            sync_settings(),
        )
        .unwrap();
        session.tools_mut().set_color(RED);
        session.tap_fill(2.5, 2.5).unwrap();
        let painted = session.buffer().unwrap().clone();
        session.close();
        let store = session.store().clone();

        let reopened = ColoringSession::open_raster("boxes", buf, manifest, store, sync_settings()).unwrap();
        assert_eq!(reopened.state().color_of("left"), Some("#FF0000"));
        assert_eq!(reopened.buffer(), Some(&painted));
        assert_eq!(reopened.buffer().unwrap().get(0, 0), Some(Color::BLACK));
        assert!(!reopened.can_undo());
    }
}
