//! Turn matched sources from all samples into calibration constants.
//!
//! Matches from every image are pooled. The pool fixes the photometric zero
//! point (`BASE_FLUX`) and the centroiding error (`POS_VARIANCE`); the image
//! with the most matches supplies the frame geometry.

use std::collections::BTreeMap;

use log::info;

use crate::background::ImageVariance;
use crate::config::CalibrationConfig;
use crate::constants::CalibrationConstants;
use crate::error::{CalibrationError, Result};
use crate::matcher::{MatchedSource, THRESH_FACTOR};
use crate::plate_solution::FrameGeometry;

/// Expected flux of a star of `magnitude` given the zero-point flux
pub fn magnitude_to_flux(base_flux: f64, magnitude: f64) -> f64 {
    base_flux * 10f64.powf(-magnitude / 2.5)
}

/// Estimated magnitude of a measured flux given the zero-point flux
pub fn flux_to_magnitude(base_flux: f64, flux: f64) -> f64 {
    -2.5 * (flux / base_flux).log10()
}

fn checked_flux(m: &MatchedSource) -> Result<f64> {
    let flux = m.source.flux;
    if flux.is_finite() && flux > 0.0 {
        Ok(flux)
    } else {
        Err(CalibrationError::InvalidFlux {
            star_id: m.star.id,
            flux,
        })
    }
}

fn finite(name: &'static str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(CalibrationError::NonFiniteResult { name, value })
    }
}

/// Name of the image with the most matches; ties go to the first name
pub fn select_reference_image(per_image: &BTreeMap<String, Vec<MatchedSource>>) -> Option<&str> {
    let mut best: Option<(&str, usize)> = None;
    for (name, matches) in per_image {
        if matches.len() > best.map_or(0, |(_, n)| n) {
            best = Some((name.as_str(), matches.len()));
        }
    }
    best.map(|(name, _)| name)
}

/// Zero-point flux from the dimmest matched star.
///
/// The dimmest star is the one with the largest magnitude; the first one
/// wins on ties.
pub fn base_flux(pooled: &[&MatchedSource]) -> Result<f64> {
    let dimmest = pooled
        .iter()
        .copied()
        .reduce(|dimmest, m| {
            if m.star.magnitude > dimmest.star.magnitude {
                m
            } else {
                dimmest
            }
        })
        .ok_or(CalibrationError::NoMatchedSources)?;

    let flux = checked_flux(dimmest)?;
    finite(
        "BASE_FLUX",
        flux / 10f64.powf(-dimmest.star.magnitude / 2.5),
    )
}

/// Mean pixel offset between predicted and detected positions.
///
/// Each offset is reduced by `image_variance / flux`, the centroiding noise
/// expected for a star of that brightness. Values are summed in sorted
/// order so the mean does not depend on the order of the pool.
pub fn position_variance(pooled: &[&MatchedSource], image_variance: f64) -> Result<f64> {
    if pooled.is_empty() {
        return Err(CalibrationError::NoMatchedSources);
    }

    let mut corrected = pooled
        .iter()
        .map(|m| Ok(m.pixel_offset() - image_variance / checked_flux(m)?))
        .collect::<Result<Vec<f64>>>()?;
    corrected.sort_unstable_by(f64::total_cmp);

    finite(
        "POS_VARIANCE",
        corrected.iter().sum::<f64>() / corrected.len() as f64,
    )
}

/// Combines per-image matches with the run configuration
#[derive(Debug, Clone)]
pub struct CalibrationAggregator {
    config: CalibrationConfig,
}

impl CalibrationAggregator {
    pub fn new(config: CalibrationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Compute the calibration constants.
    ///
    /// `per_image` holds the matches that survived the flux threshold,
    /// `geometries` the frame geometry the solver reported per image.
    ///
    /// # Errors
    /// * `NoMatchedSources` - no image contributed a single match
    /// * `MissingFrameGeometry` - the reference image has no geometry
    /// * `InvalidFlux` / `NonFiniteResult` - a constant would not be finite
    pub fn aggregate(
        &self,
        per_image: &BTreeMap<String, Vec<MatchedSource>>,
        geometries: &BTreeMap<String, FrameGeometry>,
        image_variance: ImageVariance,
    ) -> Result<CalibrationConstants> {
        let reference =
            select_reference_image(per_image).ok_or(CalibrationError::NoMatchedSources)?;
        let geometry = geometries
            .get(reference)
            .ok_or_else(|| CalibrationError::MissingFrameGeometry(reference.to_string()))?;

        let pooled: Vec<&MatchedSource> = per_image.values().flatten().collect();
        let image_variance = finite("IMAGE_VARIANCE", image_variance.value())?;
        let base_flux = base_flux(&pooled)?;
        let pos_variance = position_variance(&pooled, image_variance)?;

        info!(
            "Reference image {reference} ({} matches of {} pooled), base flux {base_flux:.3}, position variance {pos_variance:.4}",
            per_image[reference].len(),
            pooled.len()
        );

        let constants = CalibrationConstants {
            img_x: geometry.width,
            img_y: geometry.height,
            pixscale: geometry.pixel_scale,
            db_redundancy: self.config.db_redundancy,
            double_star_px: self.config.double_star_px,
            required_stars: self.config.required_stars,
            max_false_stars: self.config.max_false_stars,
            base_flux,
            thresh_factor: THRESH_FACTOR,
            image_variance,
            pos_err_sigma: self.config.pos_err_sigma,
            pos_variance,
            aperture: self.config.aperture,
            exposure_time: self.config.exposure_time,
        };
        constants.check_finite()?;
        Ok(constants)
    }
}
