//! The calibration file shared with the real-time star identifier.
//!
//! `calibration.txt` is a flat list of `KEY=value` lines. Key names, order
//! and units are a fixed contract with the downstream consumer.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CalibrationError, Result};

/// Keys of the calibration file, in the order they are written
pub const KEYS: [&str; 14] = [
    "IMG_X",
    "IMG_Y",
    "PIXSCALE",
    "DB_REDUNDANCY",
    "DOUBLE_STAR_PX",
    "REQUIRED_STARS",
    "MAX_FALSE_STARS",
    "BASE_FLUX",
    "THRESH_FACTOR",
    "IMAGE_VARIANCE",
    "POS_ERR_SIGMA",
    "POS_VARIANCE",
    "APERTURE",
    "EXPOSURE_TIME",
];

/// Calibration constants for one camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConstants {
    /// Image width in pixels
    pub img_x: u32,
    /// Image height in pixels
    pub img_y: u32,
    /// Plate scale in arcseconds per pixel
    pub pixscale: f64,
    pub db_redundancy: u32,
    pub double_star_px: f64,
    pub required_stars: u32,
    pub max_false_stars: u32,
    /// Flux of a magnitude 0 star; `flux = base_flux · 10^(-mag / 2.5)`
    pub base_flux: f64,
    pub thresh_factor: f64,
    /// Background noise variance in squared counts
    pub image_variance: f64,
    pub pos_err_sigma: f64,
    /// Mean centroiding error in pixels after the flux-dependent correction
    pub pos_variance: f64,
    pub aperture: f64,
    pub exposure_time: f64,
}

impl CalibrationConstants {
    /// Values rendered in file order
    fn values(&self) -> [String; 14] {
        [
            self.img_x.to_string(),
            self.img_y.to_string(),
            self.pixscale.to_string(),
            self.db_redundancy.to_string(),
            self.double_star_px.to_string(),
            self.required_stars.to_string(),
            self.max_false_stars.to_string(),
            self.base_flux.to_string(),
            self.thresh_factor.to_string(),
            self.image_variance.to_string(),
            self.pos_err_sigma.to_string(),
            self.pos_variance.to_string(),
            self.aperture.to_string(),
            self.exposure_time.to_string(),
        ]
    }

    /// Fail if any real-valued constant is NaN or infinite
    pub fn check_finite(&self) -> Result<()> {
        let reals = [
            ("PIXSCALE", self.pixscale),
            ("DOUBLE_STAR_PX", self.double_star_px),
            ("BASE_FLUX", self.base_flux),
            ("THRESH_FACTOR", self.thresh_factor),
            ("IMAGE_VARIANCE", self.image_variance),
            ("POS_ERR_SIGMA", self.pos_err_sigma),
            ("POS_VARIANCE", self.pos_variance),
            ("APERTURE", self.aperture),
            ("EXPOSURE_TIME", self.exposure_time),
        ];
        match reals.into_iter().find(|(_, v)| !v.is_finite()) {
            Some((name, value)) => Err(CalibrationError::NonFiniteResult { name, value }),
            None => Ok(()),
        }
    }

    /// Write the calibration file
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.check_finite()?;
        std::fs::write(path, self.to_string()).map_err(|e| CalibrationError::io(path, e))
    }

    /// Read a calibration file
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| CalibrationError::io(path, e))?;
        Self::parse(&text)
    }

    /// Parse `KEY=value` text. Every key in [`KEYS`] must be present.
    pub fn parse(text: &str) -> Result<Self> {
        let entries: HashMap<&str, &str> = text
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.trim(), v.trim()))
            .collect();

        fn field<T: std::str::FromStr>(entries: &HashMap<&str, &str>, key: &str) -> Result<T> {
            let raw = entries
                .get(key)
                .ok_or_else(|| CalibrationError::ParseConstants(format!("missing {key}")))?;
            raw.parse()
                .map_err(|_| CalibrationError::ParseConstants(format!("bad value for {key}: {raw}")))
        }

        Ok(Self {
            img_x: field(&entries, "IMG_X")?,
            img_y: field(&entries, "IMG_Y")?,
            pixscale: field(&entries, "PIXSCALE")?,
            db_redundancy: field(&entries, "DB_REDUNDANCY")?,
            double_star_px: field(&entries, "DOUBLE_STAR_PX")?,
            required_stars: field(&entries, "REQUIRED_STARS")?,
            max_false_stars: field(&entries, "MAX_FALSE_STARS")?,
            base_flux: field(&entries, "BASE_FLUX")?,
            thresh_factor: field(&entries, "THRESH_FACTOR")?,
            image_variance: field(&entries, "IMAGE_VARIANCE")?,
            pos_err_sigma: field(&entries, "POS_ERR_SIGMA")?,
            pos_variance: field(&entries, "POS_VARIANCE")?,
            aperture: field(&entries, "APERTURE")?,
            exposure_time: field(&entries, "EXPOSURE_TIME")?,
        })
    }
}

impl fmt::Display for CalibrationConstants {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in KEYS.iter().zip(self.values()) {
            writeln!(f, "{key}={value}")?;
        }
        Ok(())
    }
}
