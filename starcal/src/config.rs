//! Calibration parameters passed through to the identification pipeline.
//!
//! None of these values are computed here; they describe the camera and the
//! tuning the downstream star identifier should use, and are written into
//! `calibration.txt` next to the measured constants.

use serde::{Deserialize, Serialize};

use crate::catalog::DuplicatePolicy;
use crate::error::{CalibrationError, Result};

/// Default exposure time in seconds
pub const DEFAULT_EXPOSURE_TIME: f64 = 0.05;
/// Default aperture diameter in millimetres
pub const DEFAULT_APERTURE: f64 = 60.7;
/// Default pixel separation needed to resolve two stars
pub const DEFAULT_DOUBLE_STAR_PX: f64 = 3.5;
/// Default search window in standard deviations of position error
pub const DEFAULT_POS_ERR_SIGMA: f64 = 2.0;
/// Default number of objects allowed to be brighter than the two brightest stars
pub const DEFAULT_MAX_FALSE_STARS: u32 = 2;
/// Default catalog redundancy: of the brightest `DB_REDUNDANCY + 2` stars, two must match
pub const DEFAULT_DB_REDUNDANCY: u32 = 1;
/// Default number of stars the identifier tries to match
pub const DEFAULT_REQUIRED_STARS: u32 = 5;

/// Configuration for one calibration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Exposure time in seconds
    pub exposure_time: f64,
    /// Aperture diameter in millimetres
    pub aperture: f64,
    /// Pixels of separation needed to distinguish two stars
    pub double_star_px: f64,
    /// Position error bound in standard deviations
    pub pos_err_sigma: f64,
    /// Maximum number of objects brighter than the two brightest stars
    pub max_false_stars: u32,
    /// Catalog redundancy depth
    pub db_redundancy: u32,
    /// Number of stars the identifier tries to match
    pub required_stars: u32,
    /// Reject catalog matches farther than this (arcsec); `None` accepts any nearest star
    pub max_match_distance_arcsec: Option<f64>,
    /// Handling of repeated catalog identifiers
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            exposure_time: DEFAULT_EXPOSURE_TIME,
            aperture: DEFAULT_APERTURE,
            double_star_px: DEFAULT_DOUBLE_STAR_PX,
            pos_err_sigma: DEFAULT_POS_ERR_SIGMA,
            max_false_stars: DEFAULT_MAX_FALSE_STARS,
            db_redundancy: DEFAULT_DB_REDUNDANCY,
            required_stars: DEFAULT_REQUIRED_STARS,
            max_match_distance_arcsec: None,
            duplicate_policy: DuplicatePolicy::default(),
        }
    }
}

impl CalibrationConfig {
    /// Read a JSON configuration file; missing fields take their defaults
    pub fn from_json_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| CalibrationError::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| {
            CalibrationError::InvalidConfig(format!("{}: {e}", path.display()))
        })
    }

    /// Check every parameter once, before any work is done
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("exposure_time", self.exposure_time),
            ("aperture", self.aperture),
            ("double_star_px", self.double_star_px),
            ("pos_err_sigma", self.pos_err_sigma),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(CalibrationError::InvalidConfig(format!(
                    "{name} must be a positive number, got {value}"
                )));
            }
        }

        if self.required_stars == 0 {
            return Err(CalibrationError::InvalidConfig(
                "required_stars must be at least 1".to_string(),
            ));
        }

        if let Some(limit) = self.max_match_distance_arcsec {
            if !(limit.is_finite() && limit > 0.0) {
                return Err(CalibrationError::InvalidConfig(format!(
                    "max_match_distance_arcsec must be a positive number, got {limit}"
                )));
            }
        }
        Ok(())
    }
}
