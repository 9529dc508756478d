//! Error types for reconstruction.

use thiserror::Error;

/// Pipeline stage that ran out of usable data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Tracking,
    Assembly,
    Integration,
    AberrationFit,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Tracking => write!(f, "tracking"),
            Stage::Assembly => write!(f, "gradient assembly"),
            Stage::Integration => write!(f, "wavefront integration"),
            Stage::AberrationFit => write!(f, "aberration fit"),
        }
    }
}

/// Rejected parameter combinations. Raised before any computation starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("window_size must be at least {min}, got {actual}")]
    WindowTooSmall { min: usize, actual: usize },

    #[error("window_stride must be positive")]
    ZeroStride,

    #[error("search_margin must be positive")]
    ZeroSearchMargin,

    #[error("min_search_margin ({min}) exceeds search_margin ({max})")]
    MarginRange { min: usize, max: usize },

    #[error("window {window}x{window} does not fit in {width}x{height} {what}")]
    WindowLargerThanImage {
        window: usize,
        width: usize,
        height: usize,
        what: &'static str,
    },

    #[error("{name} must be in {range}, got {value}")]
    OutOfRange {
        name: &'static str,
        range: &'static str,
        value: f64,
    },

    #[error("{name} must be at least 1")]
    ZeroCount { name: &'static str },

    #[error("no frames supplied")]
    NoFrames,

    #[error("frame {index} is {actual:?}, expected {expected:?}")]
    FrameDimensionMismatch {
        index: usize,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("mask is {actual:?}, image is {expected:?}")]
    MaskDimensionMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("calibration {name} must be positive and finite, got {value}")]
    Calibration { name: &'static str, value: f64 },

    #[error("wavelength is required for phase units")]
    MissingWavelength,

    #[error("region of interest {start}..{end} is not inside 0..{len}")]
    InvalidRoi { start: usize, end: usize, len: usize },

    #[error("profile lengths differ: {pixel} pixel samples, {phase} phase samples")]
    ProfileLengthMismatch { pixel: usize, phase: usize },
}

/// Errors surfaced by the reconstruction pipeline.
///
/// Per-window correlation failures are never errors; they are recorded on
/// the estimate and excluded downstream.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("insufficient data for {stage}: found {found}, need {required}")]
    InsufficientData {
        stage: Stage,
        found: usize,
        required: usize,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to build worker pool: {0}")]
    WorkerPool(String),
}

pub type Result<T> = std::result::Result<T, Error>;
