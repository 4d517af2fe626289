use thiserror::Error;

/// Everything the engine can fail with. None of these are fatal: callers
/// drop the event, keep stale data, or report a transient save failure.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("non-finite coordinate ({x}, {y})")]
    InvalidCoordinate { x: f32, y: f32 },

    #[error("coordinate ({x}, {y}) outside {width}x{height} buffer")]
    OutOfBounds {
        x: i64,
        y: i64,
        width: u32,
        height: u32,
    },

    #[error("no annotation available: {0}")]
    Decode(String),

    #[error("save failed: {0}")]
    Write(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("settings parse error: {0}")]
    Settings(#[from] serde_json::Error),

    #[error("invalid image id '{0}'")]
    InvalidImageId(String),

    #[error("class {0} cannot be drawn with")]
    InvalidClass(u8),

    #[error("no image is loaded")]
    NotLoaded,
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Errors that only cost the current pointer event.
    pub fn is_dropped_input(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidCoordinate { .. } | EngineError::OutOfBounds { .. }
        )
    }
}

/// Validate a pointer position against a buffer and convert it to pixel
/// coordinates.
pub fn pixel_coord(x: f32, y: f32, width: u32, height: u32) -> Result<(u32, u32)> {
    if !x.is_finite() || !y.is_finite() {
        return Err(EngineError::InvalidCoordinate { x, y });
    }
    let px = x.floor() as i64;
    let py = y.floor() as i64;
    if px < 0 || py < 0 || px >= width as i64 || py >= height as i64 {
        return Err(EngineError::OutOfBounds {
            x: px,
            y: py,
            width,
            height,
        });
    }
    Ok((px as u32, py as u32))
}
