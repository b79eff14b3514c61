//! A calibration run over a camera's sample directory.
//!
//! Directory layout under the session root:
//!
//! ```text
//! <root>/
//! ├── samples/              raw sample images
//! ├── median_image.png      per-pixel median background
//! ├── calibration_data/     solver frames, solver output, checksum.txt
//! └── calibration.txt       calibration constants
//! ```
//!
//! A run has two halves. [`CalibrationSession::prepare`] writes
//! background-subtracted frames for the external plate solver;
//! [`CalibrationSession::calibrate`] reads the solver output back and
//! produces the constants.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use ndarray::Array2;

use crate::aggregate::CalibrationAggregator;
use crate::background::{
    load_frame, median_background, save_frame, subtract_background, ImageVariance,
};
use crate::catalog::StarCatalog;
use crate::checksum::SampleManifest;
use crate::config::CalibrationConfig;
use crate::constants::CalibrationConstants;
use crate::error::{CalibrationError, Result};
use crate::matcher::{flux_threshold, MatchedSource, SourceMatcher};
use crate::plate_solution::{
    FrameGeometry, PlateSolution, PlateSolutionSource, SolvedDirectory,
};
use crate::spatial::SpatialIndex;

pub const SAMPLES_DIR: &str = "samples";
pub const CALIBRATION_DATA_DIR: &str = "calibration_data";
pub const MEDIAN_IMAGE_FILE: &str = "median_image.png";
pub const CHECKSUM_FILE: &str = "checksum.txt";
pub const CALIBRATION_FILE: &str = "calibration.txt";

/// Loaded samples and their background, ready for variance estimation
#[derive(Debug, Clone)]
pub struct PreparedSamples {
    /// File stems of the samples, in the same order as `frames`
    pub names: Vec<String>,
    pub frames: Vec<Array2<f64>>,
    pub background: Array2<f64>,
}

/// Calibration of one camera from the samples under a root directory
#[derive(Debug, Clone)]
pub struct CalibrationSession {
    root: PathBuf,
    catalog_path: PathBuf,
    epoch: f64,
    config: CalibrationConfig,
}

fn clear_dir(dir: &Path) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| CalibrationError::io(dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| CalibrationError::io(dir, e))?.path();
        debug!("Removing {}", path.display());
        let removed = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        removed.map_err(|e| CalibrationError::io(&path, e))?;
    }
    Ok(())
}

impl CalibrationSession {
    /// Create a session; the configuration is validated here, once.
    pub fn new(
        root: impl Into<PathBuf>,
        catalog_path: impl Into<PathBuf>,
        epoch: f64,
        config: CalibrationConfig,
    ) -> Result<Self> {
        config.validate()?;
        if !epoch.is_finite() {
            return Err(CalibrationError::InvalidConfig(format!(
                "epoch must be finite, got {epoch}"
            )));
        }
        Ok(Self {
            root: root.into(),
            catalog_path: catalog_path.into(),
            epoch,
            config,
        })
    }

    pub fn samples_dir(&self) -> PathBuf {
        self.root.join(SAMPLES_DIR)
    }

    pub fn calibration_data_dir(&self) -> PathBuf {
        self.root.join(CALIBRATION_DATA_DIR)
    }

    pub fn calibration_file(&self) -> PathBuf {
        self.root.join(CALIBRATION_FILE)
    }

    fn sample_paths(&self) -> Result<Vec<PathBuf>> {
        let dir = self.samples_dir();
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(|e| CalibrationError::io(&dir, e))? {
            let path = entry.map_err(|e| CalibrationError::io(&dir, e))?.path();
            if path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Load the samples and write everything the plate solver needs.
    ///
    /// Files that are not readable images are skipped with a warning, as is
    /// a sample whose file stem repeats an earlier one. Old calibration data
    /// is cleared when any file in the samples directory has changed.
    pub fn prepare(&self) -> Result<PreparedSamples> {
        let sample_paths = self.sample_paths()?;
        let mut names: Vec<String> = Vec::new();
        let mut frames = Vec::new();
        for path in &sample_paths {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            if names.contains(&stem) {
                warn!(
                    "Skipping {}: another sample already uses the name {stem}",
                    path.display()
                );
                continue;
            }
            match load_frame(path) {
                Ok(frame) => {
                    names.push(stem);
                    frames.push(frame);
                }
                Err(e) => warn!("Skipping sample: {e}"),
            }
        }
        info!("Calibrating from {} sample images", frames.len());
        if frames.len() < ImageVariance::MIN_FRAMES {
            return Err(CalibrationError::InsufficientImages {
                required: ImageVariance::MIN_FRAMES,
                found: frames.len(),
            });
        }

        let background = median_background(&frames)?;
        save_frame(&background, self.root.join(MEDIAN_IMAGE_FILE))?;

        let data_dir = self.calibration_data_dir();
        std::fs::create_dir_all(&data_dir).map_err(|e| CalibrationError::io(&data_dir, e))?;
        let checksum_path = data_dir.join(CHECKSUM_FILE);
        let manifest = SampleManifest::compute(&sample_paths)?;
        if SampleManifest::load(&checksum_path)?.as_ref() != Some(&manifest) {
            info!("Sample set changed, clearing {}", data_dir.display());
            clear_dir(&data_dir)?;
        }
        manifest.store(&checksum_path)?;

        let residuals = subtract_background(&frames, &background)?;
        for (name, residual) in names.iter().zip(&residuals) {
            save_frame(residual, data_dir.join(format!("{name}.png")))?;
        }

        Ok(PreparedSamples {
            names,
            frames,
            background,
        })
    }

    /// Match the solved samples against the catalog and write `calibration.txt`
    pub fn calibrate(
        &self,
        prepared: &PreparedSamples,
        solutions: &impl PlateSolutionSource,
    ) -> Result<CalibrationConstants> {
        let variance = ImageVariance::estimate(&prepared.frames, &prepared.background)?;
        let threshold = flux_threshold(variance.value());
        info!(
            "Image variance {:.4}, flux threshold {:.4}",
            variance.value(),
            threshold
        );

        let (catalog, _) =
            StarCatalog::load(&self.catalog_path, self.epoch, self.config.duplicate_policy)?;
        let index = SpatialIndex::build(&catalog.positions())?;

        let solved: BTreeMap<String, PlateSolution> = prepared
            .names
            .iter()
            .filter_map(|name| solutions.solution(name).map(|s| (name.clone(), s)))
            .collect();
        info!(
            "{} of {} samples have a plate solution",
            solved.len(),
            prepared.names.len()
        );

        let matcher = SourceMatcher::new(&catalog, &index)
            .with_max_distance_arcsec(self.config.max_match_distance_arcsec);
        let per_image: BTreeMap<String, Vec<MatchedSource>> = matcher
            .match_images(&solved, threshold)
            .into_iter()
            .map(|(name, outcome)| (name, outcome.matched))
            .collect();
        let geometries: BTreeMap<String, FrameGeometry> = solved
            .iter()
            .filter_map(|(name, s)| s.geometry.map(|g| (name.clone(), g)))
            .collect();

        let constants = CalibrationAggregator::new(self.config.clone()).aggregate(
            &per_image,
            &geometries,
            variance,
        )?;
        constants.write(self.calibration_file())?;
        info!("Wrote {}", self.calibration_file().display());
        Ok(constants)
    }

    /// Prepare, then calibrate from solver output in the calibration data directory
    pub fn run(&self) -> Result<CalibrationConstants> {
        let prepared = self.prepare()?;
        self.calibrate(&prepared, &SolvedDirectory::new(self.calibration_data_dir()))
    }
}
