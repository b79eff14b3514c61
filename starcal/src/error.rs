//! Error types for the calibration pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading inputs or computing calibration constants
#[derive(Error, Debug)]
pub enum CalibrationError {
    /// A required file could not be read or written.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Duplicate catalog identifier {0}")]
    DuplicateStar(u32),

    #[error("Catalog contains no usable stars")]
    EmptyCatalog,

    #[error("At least {required} sample images are needed, got {found}")]
    InsufficientImages { required: usize, found: usize },

    #[error("Frame shape {found:?} does not match expected {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    /// Background residuals contain no negative pixels to estimate noise from.
    #[error("Background variance is degenerate: {0}")]
    DegenerateVariance(String),

    #[error("No sample image produced any matched source")]
    NoMatchedSources,

    #[error("Plate solution for reference image {0} carries no frame geometry")]
    MissingFrameGeometry(String),

    #[error("Invalid flux {flux} for catalog star {star_id}")]
    InvalidFlux { star_id: u32, flux: f64 },

    /// A computed constant came out as NaN or infinite.
    #[error("Computed {name} is not finite ({value})")]
    NonFiniteResult { name: &'static str, value: f64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Image error on {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("CSV error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("FITS error on {path}: {source}")]
    Fits {
        path: PathBuf,
        #[source]
        source: fitsio::errors::Error,
    },

    #[error("Malformed calibration file: {0}")]
    ParseConstants(String),
}

impl CalibrationError {
    /// Wrap an I/O error with the path it occurred on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CalibrationError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, CalibrationError>;
