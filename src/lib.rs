//! Interactive region-coloring engine: boundary-aware flood fill on a worker
//! thread, pencil/eraser tools that respect line art, per-drawing region
//! colors with undo/redo and expiring persistence, viewport zoom math and an
//! SVG sanitizing gate.

#![allow(clippy::too_many_arguments)]

pub mod canvas;
pub mod cli;
pub mod components;
pub mod error;
pub mod io;
pub mod logger;
pub mod ops;
pub mod project;
pub mod settings;

pub use canvas::{Color, PixelBuffer, RegionManifest};
pub use error::{EngineError, Result};
pub use project::{ColoringSession, FillEvent, SessionObserver};
pub use settings::EngineSettings;
