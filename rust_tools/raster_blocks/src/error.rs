use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlockError {
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("GDAL call {method} failed: {msg}")]
    GdalCall { method: &'static str, msg: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Array shape error: {0}")]
    ShapeError(#[from] ndarray::ShapeError),

    // Geometry errors
    #[error("Input {slot} needs resampling onto the working grid ({reason}), but no reference grid is configured")]
    ResampleNeeded { slot: String, reason: String },

    #[error("Reference grid could not be resolved: {0}")]
    ReferenceNotFound(String),

    #[error("Input extents do not intersect")]
    NonIntersectingGrids,

    #[error("No raster inputs and no reference grid to derive a working grid from")]
    NoRasterInputs,

    // Bounds errors
    #[error("Requested region rows {top}..{bottom}, cols {left}..{right} lies entirely outside {path}")]
    OutsideBounds {
        path: String,
        top: i64,
        left: i64,
        bottom: i64,
        right: i64,
    },

    // Worker errors
    #[error("Worker {worker} failed: {source}")]
    Worker {
        worker: String,
        #[source]
        source: Box<BlockError>,
    },

    #[error("Worker {0} panicked")]
    WorkerPanicked(String),

    #[error("Timed out after {timeout:?} on {operation} for buffer {buffer}")]
    BufferTimeout {
        buffer: String,
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Run was cancelled")]
    Cancelled,

    #[error("Worker protocol error: {0}")]
    Protocol(String),

    #[error("Illegal dispatch transition {from} -> {to}")]
    IllegalTransition { from: &'static str, to: &'static str },

    // Single-pass configuration errors
    #[error("Single-pass {feature} requested for output {slot} but not supported: {reason}")]
    SinglePassUnsupported {
        slot: String,
        feature: &'static str,
        reason: String,
    },

    // Resource errors
    #[error("Cannot create output {path}: {reason}")]
    OutputCreation { path: PathBuf, reason: String },

    #[error("GTiff layout for output {slot} would bloat the file: {reason}")]
    GtiffLayout { slot: String, reason: String },

    #[error("Invalid compression type: {0}")]
    InvalidCompression(String),

    #[error("Invalid tile size: {0} (must be multiple of 16)")]
    InvalidTileSize(usize),

    #[error("Raster has invalid dimensions: {0}x{1}")]
    InvalidDimensions(usize, usize),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Block for {slot} has shape {actual:?}, expected {expected:?}")]
    BlockShape {
        slot: String,
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },

    #[error("Transform did not produce output {0}")]
    MissingOutput(String),

    #[error("Unsupported pixel data type: {0}")]
    UnsupportedDataType(String),

    #[error("Vector input error: {0}")]
    Vector(String),

    #[error("Transform failed: {0}")]
    Transform(String),
}

impl BlockError {
    /// Convenience for user transforms reporting their own failures.
    pub fn transform(msg: impl Into<String>) -> Self {
        BlockError::Transform(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, BlockError>;
