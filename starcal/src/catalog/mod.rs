//! Star catalog loading and epoch propagation.
//!
//! Reads the Hipparcos main catalog, moves every star along its proper motion
//! to the requested epoch and embeds it on the unit sphere so that angular
//! nearest-neighbour search becomes plain 3D Euclidean search.
//!
//! # Usage
//!
//! ```no_run
//! use starcal::catalog::{DuplicatePolicy, StarCatalog};
//!
//! let (catalog, report) =
//!     StarCatalog::load("hip_main.dat", 2024.0, DuplicatePolicy::LastWins).unwrap();
//! println!("{} stars, {} lines skipped", catalog.len(), report.skipped);
//! ```

pub mod hipparcos;

use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, info, warn};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::{CalibrationError, Result};

/// Reference epoch of the Hipparcos astrometry (J1991.25)
pub const HIPPARCOS_EPOCH: f64 = 1991.25;

/// Milliarcseconds per degree, the proper-motion unit conversion
pub const MAS_PER_DEGREE: f64 = 3_600_000.0;

/// Coarse variability flag value marking a known variable star
pub const KNOWN_VARIABLE_FLAG: i64 = 3;

/// Embed a right ascension / declination pair (degrees) on the unit sphere.
///
/// Returns `(cos ra · cos dec, sin ra · cos dec, sin dec)` in the
/// Earth-centred inertial frame.
pub fn radec_to_unit_vector(ra_deg: f64, dec_deg: f64) -> Vector3<f64> {
    let (sin_ra, cos_ra) = ra_deg.to_radians().sin_cos();
    let (sin_dec, cos_dec) = dec_deg.to_radians().sin_cos();
    Vector3::new(cos_ra * cos_dec, sin_ra * cos_dec, sin_dec)
}

/// A catalog star propagated to the target epoch
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogStar {
    /// Catalog identifier (HIP number)
    pub id: u32,
    /// Johnson V magnitude, larger is fainter
    pub magnitude: f64,
    /// Right ascension in degrees at the target epoch
    pub ra: f64,
    /// Declination in degrees at the target epoch
    pub dec: f64,
    /// Unit vector of (`ra`, `dec`)
    pub position: Vector3<f64>,
    /// Set when catalog quality fields advise against relying on this star
    pub unreliable: bool,
}

/// What to do when the same identifier appears twice in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Keep the record that appears last in the file
    #[default]
    LastWins,
    /// Fail the load
    Reject,
}

/// Counters collected while loading a catalog
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Stars kept in the catalog
    pub loaded: usize,
    /// Lines that could not be parsed
    pub skipped: usize,
    /// Records that replaced an earlier record with the same identifier
    pub duplicates: usize,
}

/// Identifier-keyed star table, iterated in ascending identifier order
#[derive(Debug, Clone, Default)]
pub struct StarCatalog {
    stars: Vec<CatalogStar>,
}

impl StarCatalog {
    /// Load a Hipparcos catalog file and propagate it to `target_epoch`.
    ///
    /// Malformed lines are skipped and counted. Only a missing or unreadable
    /// file (or a duplicate under [`DuplicatePolicy::Reject`]) is an error.
    pub fn load<P: AsRef<Path>>(
        path: P,
        target_epoch: f64,
        duplicates: DuplicatePolicy,
    ) -> Result<(Self, LoadReport)> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|e| CalibrationError::io(path, e))?;
        let (catalog, report) = Self::parse(&text, target_epoch, duplicates)?;
        info!(
            "Loaded {} stars from {} at epoch {:.2} ({} skipped, {} duplicates)",
            report.loaded,
            path.display(),
            target_epoch,
            report.skipped,
            report.duplicates
        );
        Ok((catalog, report))
    }

    /// Parse catalog text already held in memory
    pub fn parse(
        text: &str,
        target_epoch: f64,
        duplicates: DuplicatePolicy,
    ) -> Result<(Self, LoadReport)> {
        let year_diff = target_epoch - HIPPARCOS_EPOCH;
        let mut by_id: BTreeMap<u32, CatalogStar> = BTreeMap::new();
        let mut report = LoadReport::default();

        for (line_no, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let star = match hipparcos::parse_record(line, year_diff) {
                Ok(star) => star,
                Err(e) => {
                    debug!("Skipping catalog line {}: {}", line_no + 1, e);
                    report.skipped += 1;
                    continue;
                }
            };

            let id = star.id;
            if by_id.insert(id, star).is_some() {
                match duplicates {
                    DuplicatePolicy::LastWins => {
                        debug!("Catalog id {id} repeated on line {}, keeping the later record", line_no + 1);
                        report.duplicates += 1;
                    }
                    DuplicatePolicy::Reject => return Err(CalibrationError::DuplicateStar(id)),
                }
            }
        }

        if report.skipped > 0 {
            warn!("Skipped {} malformed catalog lines", report.skipped);
        }

        report.loaded = by_id.len();
        Ok((
            Self {
                stars: by_id.into_values().collect(),
            },
            report,
        ))
    }

    /// Build a catalog from stars directly, keyed by identifier (last wins)
    pub fn from_stars(stars: impl IntoIterator<Item = CatalogStar>) -> Self {
        let by_id: BTreeMap<u32, CatalogStar> = stars.into_iter().map(|s| (s.id, s)).collect();
        Self {
            stars: by_id.into_values().collect(),
        }
    }

    /// Look up a star by identifier
    pub fn get(&self, id: u32) -> Option<&CatalogStar> {
        self.stars
            .binary_search_by_key(&id, |s| s.id)
            .ok()
            .map(|idx| &self.stars[idx])
    }

    /// All stars in ascending identifier order
    pub fn stars(&self) -> &[CatalogStar] {
        &self.stars
    }

    /// Unit vectors of all stars, in the same order as [`StarCatalog::stars`]
    pub fn positions(&self) -> Vec<Vector3<f64>> {
        self.stars.iter().map(|s| s.position).collect()
    }

    /// Stars not flagged as unreliable
    pub fn reliable(&self) -> impl Iterator<Item = &CatalogStar> {
        self.stars.iter().filter(|s| !s.unreliable)
    }

    pub fn len(&self) -> usize {
        self.stars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stars.is_empty()
    }
}
