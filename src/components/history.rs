use std::collections::VecDeque;

use log::debug;

use crate::canvas::{BoundingBox, PixelBuffer};
use crate::components::tools::Tool;

/// Undo steps kept for the raster, matching the region-map history.
pub const DEFAULT_HISTORY_SIZE: usize = 20;

// ============================================================================
// PIXEL PATCH - rectangular copy of pixels for undo/redo
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelPatch {
    rect: Option<BoundingBox>,
    pixels: Vec<u8>,
}

impl PixelPatch {
    /// Copy `rect` (clamped to the buffer) out of `buffer`.
    pub fn capture(buffer: &PixelBuffer, rect: BoundingBox) -> Self {
        if buffer.width() == 0 || buffer.height() == 0 {
            return Self::empty();
        }
        let min_x = rect.min_x.min(buffer.width() - 1);
        let min_y = rect.min_y.min(buffer.height() - 1);
        let max_x = rect.max_x.min(buffer.width() - 1);
        let max_y = rect.max_y.min(buffer.height() - 1);
        if min_x > max_x || min_y > max_y {
            return Self::empty();
        }
        let rect = BoundingBox { min_x, min_y, max_x, max_y };

        let bytes = buffer.as_bytes();
        let stride = buffer.width() as usize * 4;
        let mut pixels = Vec::with_capacity(rect.width() as usize * rect.height() as usize * 4);
        for y in min_y..=max_y {
            let row = y as usize * stride;
            pixels.extend_from_slice(&bytes[row + min_x as usize * 4..row + (max_x as usize + 1) * 4]);
        }
        Self { rect: Some(rect), pixels }
    }

    /// A patch covering no pixels, for commands that only touch the region map.
    pub fn empty() -> Self {
        Self { rect: None, pixels: Vec::new() }
    }

    pub fn rect(&self) -> Option<BoundingBox> {
        self.rect
    }

    pub fn apply(&self, buffer: &mut PixelBuffer) {
        let Some(rect) = self.rect else { return };
        let mut chunks = self.pixels.chunks_exact(4);
        for y in rect.min_y..=rect.max_y {
            for x in rect.min_x..=rect.max_x {
                let Some(px) = chunks.next() else { return };
                buffer.set(x, y, crate::canvas::Color::rgba(px[0], px[1], px[2], px[3]));
            }
        }
    }

    pub fn memory_size(&self) -> usize {
        self.pixels.len()
    }
}

// ============================================================================
// CANVAS COMMAND
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandKind {
    Stroke(Tool),
    /// A fill; `region_id` is set when the fill also recolored a named region.
    Fill { region_id: Option<String> },
}

/// One undoable raster change: the pixels before and after, over the same rect.
#[derive(Clone, Debug)]
pub struct CanvasCommand {
    description: String,
    kind: CommandKind,
    before: PixelPatch,
    after: PixelPatch,
}

impl CanvasCommand {
    pub fn new(kind: CommandKind, before: PixelPatch, after: PixelPatch) -> Self {
        let description = match &kind {
            CommandKind::Stroke(tool) => format!("{} Stroke", tool.label()),
            CommandKind::Fill { region_id: Some(id) } => format!("Fill {}", id),
            CommandKind::Fill { region_id: None } => "Fill".to_string(),
        };
        Self {
            description,
            kind,
            before,
            after,
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    pub fn undo(&self, buffer: &mut PixelBuffer) {
        self.before.apply(buffer);
    }

    pub fn redo(&self, buffer: &mut PixelBuffer) {
        self.after.apply(buffer);
    }

    pub fn memory_size(&self) -> usize {
        self.before.memory_size() + self.after.memory_size()
    }
}

// ============================================================================
// STROKE TRACKER - snapshot at stroke start, patch pair at stroke end
// ============================================================================

/// Freehand tools draw straight into the buffer, so the untouched pixels are
/// kept from pointer-down until the stroke is committed.
#[derive(Default)]
pub struct StrokeTracker {
    snapshot: Option<PixelBuffer>,
}

impl StrokeTracker {
    pub fn start(&mut self, buffer: &PixelBuffer) {
        self.snapshot = Some(buffer.clone());
    }

    pub fn is_active(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Build the undo unit for a finished stroke. `None` when nothing was written.
    pub fn finish(
        &mut self,
        buffer: &PixelBuffer,
        tool: Tool,
        bounds: Option<BoundingBox>,
    ) -> Option<CanvasCommand> {
        let snapshot = self.snapshot.take()?;
        let bounds = bounds?;
        Some(CanvasCommand::new(
            CommandKind::Stroke(tool),
            PixelPatch::capture(&snapshot, bounds),
            PixelPatch::capture(buffer, bounds),
        ))
    }

    pub fn cancel(&mut self) {
        self.snapshot = None;
    }
}

// ============================================================================
// CANVAS HISTORY
// ============================================================================

pub struct CanvasHistory {
    undo_stack: VecDeque<CanvasCommand>,
    redo_stack: VecDeque<CanvasCommand>,
    max_history_size: usize,
    /// Optional memory cap in bytes.
    max_memory_bytes: Option<usize>,
    /// Running memory total across both stacks.
    total_memory: usize,
}

impl Default for CanvasHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}

impl CanvasHistory {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_history_size: max_history_size.max(1),
            max_memory_bytes: Some(100 * 1024 * 1024), // 100 MB default limit
            total_memory: 0,
        }
    }

    pub fn push(&mut self, command: CanvasCommand) {
        // A new action invalidates redo
        for cmd in self.redo_stack.drain(..) {
            self.total_memory = self.total_memory.saturating_sub(cmd.memory_size());
        }
        debug!("history: {}", command.description());
        self.total_memory += command.memory_size();
        self.undo_stack.push_back(command);
        self.prune();
    }

    /// Restore the pixels before the latest command; returns its kind.
    pub fn undo(&mut self, buffer: &mut PixelBuffer) -> Option<CommandKind> {
        let command = self.undo_stack.pop_back()?;
        command.undo(buffer);
        let kind = command.kind().clone();
        self.redo_stack.push_back(command);
        Some(kind)
    }

    pub fn redo(&mut self, buffer: &mut PixelBuffer) -> Option<CommandKind> {
        let command = self.redo_stack.pop_back()?;
        command.redo(buffer);
        let kind = command.kind().clone();
        self.undo_stack.push_back(command);
        Some(kind)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    /// Descriptions, most recent first.
    pub fn undo_history(&self) -> Vec<&str> {
        self.undo_stack.iter().rev().map(|c| c.description()).collect()
    }

    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    fn prune(&mut self) {
        while self.undo_stack.len() > self.max_history_size {
            if let Some(removed) = self.undo_stack.pop_front() {
                self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
            }
        }
        if let Some(max_bytes) = self.max_memory_bytes {
            while self.total_memory > max_bytes && self.undo_stack.len() > 1 {
                if let Some(removed) = self.undo_stack.pop_front() {
                    self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.total_memory = 0;
    }
}
