//! Plate solutions produced by the external astrometric solver.
//!
//! The solver (astrometry.net `solve-field`) is run outside this crate on the
//! frames the session writes. It leaves its output next to each frame in the
//! calibration data directory:
//!
//! - `<stem>.corr`: FITS table of correspondences, one row per detected
//!   source with columns `flux, field_x, field_y, index_x, index_y,
//!   index_ra, index_dec`
//! - `<stem>.wcs`: FITS header with `IMAGEW`, `IMAGEH` and the `CD` matrix
//!
//! The same data is also accepted as text, for solvers run elsewhere:
//!
//! - `<stem>.sources.csv`: the `.corr` table exported as CSV with the same
//!   column names
//! - `<stem>.solved`: `wcsinfo <stem>.wcs` output
//!
//! A frame with neither table was not solved and contributes nothing. Rows
//! without a resolved, finite sky position are dropped and counted.

pub mod fits;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::catalog::radec_to_unit_vector;
use crate::error::{CalibrationError, Result};

/// One detection reported by the plate solver
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedSource {
    /// Measured flux in background-subtracted counts
    pub flux: f64,
    /// Detected centroid in image pixels
    pub image_xy: Vector2<f64>,
    /// Pixel position the solution predicts for the catalog counterpart
    pub catalog_xy: Vector2<f64>,
    /// Right ascension reported by the solver, degrees
    pub ra: f64,
    /// Declination reported by the solver, degrees
    pub dec: f64,
    /// Unit vector of (`ra`, `dec`)
    pub position: Vector3<f64>,
}

impl DetectedSource {
    pub fn new(
        flux: f64,
        image_xy: Vector2<f64>,
        catalog_xy: Vector2<f64>,
        ra: f64,
        dec: f64,
    ) -> Self {
        Self {
            flux,
            image_xy,
            catalog_xy,
            ra,
            dec,
            position: radec_to_unit_vector(ra, dec),
        }
    }

    /// True when flux and sky position are all finite
    pub fn is_usable(&self) -> bool {
        self.flux.is_finite() && self.position.iter().all(|v| v.is_finite())
    }
}

/// Frame dimensions and plate scale of a solved image
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameGeometry {
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Plate scale in arcseconds per pixel
    pub pixel_scale: f64,
}

impl FrameGeometry {
    /// Geometry from raw header values; `None` unless all are positive and finite
    pub fn from_values(width: f64, height: f64, pixel_scale: f64) -> Option<Self> {
        let dimension = |v: f64| (v.is_finite() && v >= 1.0).then(|| v.round() as u32);
        if !(pixel_scale.is_finite() && pixel_scale > 0.0) {
            return None;
        }
        Some(Self {
            width: dimension(width)?,
            height: dimension(height)?,
            pixel_scale,
        })
    }

    /// Parse a `wcsinfo` summary.
    ///
    /// Accepts both the raw `key value` output and the upper-cased
    /// `KEY=value` form. Keys are case-insensitive; lines with non-numeric
    /// values are ignored. Returns `None` unless `IMAGEW`, `IMAGEH` and
    /// `PIXSCALE` are all present and positive.
    pub fn from_wcsinfo(text: &str) -> Option<Self> {
        let mut values: BTreeMap<String, f64> = BTreeMap::new();
        for line in text.lines() {
            let line = line.trim();
            let (key, value) = match line.split_once('=') {
                Some(pair) => pair,
                None => match line.split_once(char::is_whitespace) {
                    Some(pair) => pair,
                    None => continue,
                },
            };
            if let Ok(value) = value.trim().parse::<f64>() {
                values.insert(key.trim().to_ascii_uppercase(), value);
            }
        }

        Self::from_values(
            *values.get("IMAGEW")?,
            *values.get("IMAGEH")?,
            *values.get("PIXSCALE")?,
        )
    }
}

/// Detections of one image together with its geometry, if the solver reported it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlateSolution {
    pub sources: Vec<DetectedSource>,
    pub geometry: Option<FrameGeometry>,
}

/// Sources read from one correspondence table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceTable {
    pub sources: Vec<DetectedSource>,
    /// Rows dropped for lacking a finite sky position
    pub unresolved: usize,
}

impl SourceTable {
    /// Keep a row only if its sky position is known and finite
    fn push(
        &mut self,
        flux: f64,
        field: (f64, f64),
        index: (f64, f64),
        ra: Option<f64>,
        dec: Option<f64>,
    ) {
        match (ra, dec) {
            (Some(ra), Some(dec)) if ra.is_finite() && dec.is_finite() => {
                self.sources.push(DetectedSource::new(
                    flux,
                    Vector2::new(field.0, field.1),
                    Vector2::new(index.0, index.1),
                    ra,
                    dec,
                ))
            }
            _ => self.unresolved += 1,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SourceRow {
    flux: f64,
    field_x: f64,
    field_y: f64,
    index_x: f64,
    index_y: f64,
    index_ra: Option<f64>,
    index_dec: Option<f64>,
}

/// Read a solver correspondence table exported as CSV
pub fn read_sources<P: AsRef<Path>>(path: P) -> Result<SourceTable> {
    let path = path.as_ref();
    let csv_err = |source| CalibrationError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_err)?;

    let mut table = SourceTable::default();
    for row in reader.deserialize::<SourceRow>() {
        let row = row.map_err(csv_err)?;
        table.push(
            row.flux,
            (row.field_x, row.field_y),
            (row.index_x, row.index_y),
            row.index_ra,
            row.index_dec,
        );
    }
    Ok(table)
}

/// Anything that can hand out plate solutions by image stem
pub trait PlateSolutionSource {
    /// Plate solution for `stem`, or `None` when the image was not solved
    fn solution(&self, stem: &str) -> Option<PlateSolution>;
}

impl PlateSolutionSource for BTreeMap<String, PlateSolution> {
    fn solution(&self, stem: &str) -> Option<PlateSolution> {
        self.get(stem).cloned()
    }
}

/// Plate solutions stored as files in the calibration data directory
#[derive(Debug, Clone)]
pub struct SolvedDirectory {
    dir: PathBuf,
}

impl SolvedDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the FITS correspondence table for `stem`
    pub fn corr_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{stem}.corr"))
    }

    /// Path of the FITS WCS header for `stem`
    pub fn wcs_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{stem}.wcs"))
    }

    /// Path of the CSV correspondence table for `stem`
    pub fn sources_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{stem}.sources.csv"))
    }

    /// Path of the `wcsinfo` summary for `stem`
    pub fn wcsinfo_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{stem}.solved"))
    }

    fn sources(&self, stem: &str) -> Option<Result<SourceTable>> {
        let corr = self.corr_path(stem);
        if corr.exists() {
            return Some(fits::read_corr(&corr));
        }
        let csv = self.sources_path(stem);
        if csv.exists() {
            return Some(read_sources(&csv));
        }
        None
    }

    fn geometry(&self, stem: &str) -> Option<FrameGeometry> {
        let wcs = self.wcs_path(stem);
        if wcs.exists() {
            return match fits::read_wcs_geometry(&wcs) {
                Ok(geometry) => geometry,
                Err(e) => {
                    warn!("Unreadable WCS header for {stem}: {e}");
                    None
                }
            };
        }
        match std::fs::read_to_string(self.wcsinfo_path(stem)) {
            Ok(text) => FrameGeometry::from_wcsinfo(&text),
            Err(e) => {
                debug!("No WCS summary for {stem}: {e}");
                None
            }
        }
    }
}

impl PlateSolutionSource for SolvedDirectory {
    fn solution(&self, stem: &str) -> Option<PlateSolution> {
        let table = match self.sources(stem) {
            None => {
                debug!("No plate solution for {stem}");
                return None;
            }
            Some(Ok(table)) => table,
            Some(Err(e)) => {
                warn!("Ignoring plate solution for {stem}: {e}");
                return None;
            }
        };
        if table.unresolved > 0 {
            debug!("{stem}: dropped {} sources without a sky position", table.unresolved);
        }

        let geometry = self.geometry(stem);
        debug!(
            "Plate solution for {stem}: {} sources, geometry {:?}",
            table.sources.len(),
            geometry
        );
        Some(PlateSolution {
            sources: table.sources,
            geometry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use test_helpers::{write_sources_csv, SourceRow as FixtureRow};

    #[test]
    fn test_wcsinfo_uppercase_form() {
        let text = "CRPIX0=512.5\nIMAGEW=1280\nIMAGEH=960\nPIXSCALE=36.74\nRA_CENTER=83.1\n";
        let geometry = FrameGeometry::from_wcsinfo(text).unwrap();
        assert_eq!(geometry.width, 1280);
        assert_eq!(geometry.height, 960);
        assert_relative_eq!(geometry.pixel_scale, 36.74);
    }

    #[test]
    fn test_wcsinfo_raw_form() {
        let text = "ctype0 RA---TAN-SIP\nimagew 640\nimageh 480\npixscale 12.5\n";
        let geometry = FrameGeometry::from_wcsinfo(text).unwrap();
        assert_eq!((geometry.width, geometry.height), (640, 480));
        assert_relative_eq!(geometry.pixel_scale, 12.5);
    }

    #[test]
    fn test_wcsinfo_missing_keys() {
        assert!(FrameGeometry::from_wcsinfo("IMAGEW=640\nPIXSCALE=3.0\n").is_none());
        assert!(FrameGeometry::from_wcsinfo("IMAGEW=640\nIMAGEH=480\nPIXSCALE=0\n").is_none());
    }

    #[test]
    fn test_detected_source_position_is_unit() {
        let source = DetectedSource::new(
            100.0,
            Vector2::new(1.0, 2.0),
            Vector2::new(1.5, 2.5),
            271.3,
            -12.7,
        );
        assert_relative_eq!(source.position.norm(), 1.0, epsilon = 1e-12);
        assert!(source.is_usable());

        let lost = DetectedSource::new(100.0, Vector2::zeros(), Vector2::zeros(), f64::NAN, 1.0);
        assert!(!lost.is_usable());
        let saturated =
            DetectedSource::new(f64::INFINITY, Vector2::zeros(), Vector2::zeros(), 1.0, 1.0);
        assert!(!saturated.is_usable());
    }

    #[test]
    fn test_solved_directory() {
        let dir = tempfile::tempdir().unwrap();
        let solved = SolvedDirectory::new(dir.path());

        write_sources_csv(
            &solved.sources_path("frame_a"),
            &[
                FixtureRow::new(250.0, (10.0, 20.0), (10.5, 20.5), (30.0, 40.0)),
                FixtureRow::new(80.0, (100.0, 5.0), (99.0, 5.0), (31.0, 41.0)),
            ],
        )
        .unwrap();
        std::fs::write(
            solved.wcsinfo_path("frame_a"),
            "IMAGEW=320\nIMAGEH=240\nPIXSCALE=20.0\n",
        )
        .unwrap();
        std::fs::write(solved.sources_path("frame_b"), "flux,field_x\nnot,a number\n").unwrap();

        let solution = solved.solution("frame_a").unwrap();
        assert_eq!(solution.sources.len(), 2);
        assert_eq!(solution.sources[0].flux, 250.0);
        assert_eq!(solution.sources[1].catalog_xy, Vector2::new(99.0, 5.0));
        assert_eq!(solution.geometry.unwrap().width, 320);

        assert!(solved.solution("frame_b").is_none());
        assert!(solved.solution("frame_c").is_none());
    }

    #[test]
    fn test_unresolved_rows_are_dropped_not_the_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.sources.csv");
        std::fs::write(
            &path,
            "flux,field_x,field_y,index_x,index_y,index_ra,index_dec\n\
             500,1,1,1.2,1.1,10.0,20.0\n\
             400,5,5,5.2,5.1,,\n\
             300,7,7,7.2,7.1,nan,20.5\n\
             200,9,9,9.2,9.1,11.0,inf\n",
        )
        .unwrap();

        let table = read_sources(&path).unwrap();
        assert_eq!(table.unresolved, 3);
        assert_eq!(table.sources.len(), 1);
        assert_eq!(table.sources[0].flux, 500.0);

        let solution = SolvedDirectory::new(dir.path()).solution("frame").unwrap();
        assert_eq!(solution.sources.len(), 1);
        assert!(solution.sources.iter().all(DetectedSource::is_usable));
    }

    #[test]
    fn test_unresolved_fixture_rows() {
        let dir = tempfile::tempdir().unwrap();
        let solved = SolvedDirectory::new(dir.path());
        write_sources_csv(
            &solved.sources_path("frame"),
            &[
                FixtureRow::unresolved(90.0, (3.0, 3.0), (3.5, 3.0)),
                FixtureRow::new(60.0, (4.0, 4.0), (4.0, 4.5), (12.0, -3.0)),
            ],
        )
        .unwrap();

        let solution = solved.solution("frame").unwrap();
        assert_eq!(solution.sources.len(), 1);
        assert_eq!(solution.sources[0].dec, -3.0);
    }
}
