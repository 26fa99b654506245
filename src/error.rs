use thiserror::Error;

/// Errors surfaced by the coloring engine.
///
/// Truncated fills are not errors (see `FillStats::truncated`) and storage
/// problems never reach this type; the state manager fails open instead.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid drawing id ({0:?})")]
    InvalidDrawingId(String),

    #[error("Invalid markup: {0}")]
    InvalidMarkup(String),

    #[error("Pixel buffer size mismatch: {width}x{height} needs {expected} bytes, got {actual}")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid color ({0:?})")]
    InvalidColor(String),

    #[error("Unknown region ({0:?})")]
    UnknownRegion(String),

    #[error("Region manifest does not match a {width}x{height} canvas")]
    ManifestSize { width: u32, height: u32 },

    #[error("Coloring session is closed")]
    SessionClosed,

    #[error("Fill worker unavailable")]
    WorkerUnavailable,

    #[error("Fill worker failed: {0}")]
    WorkerFailed(String),

    #[error("Fill request {0} was cancelled")]
    Cancelled(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Settings parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Settings error: {0}")]
    Settings(String),
}

impl EngineError {
    /// Resource errors are the ones a host should offer a retry for.
    pub fn is_resource_error(&self) -> bool {
        matches!(self, EngineError::WorkerUnavailable | EngineError::WorkerFailed(_) | EngineError::Cancelled(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
