//! Resolve plate-solver detections to catalog stars.
//!
//! Faint detections are dropped first: anything at or below
//! `THRESH_FACTOR × IMAGE_VARIANCE` is dominated by background noise and
//! would produce unreliable nearest-neighbour matches. Every surviving
//! detection is paired with the catalog star nearest to its solved sky
//! position.

use std::collections::BTreeMap;

use log::debug;
use rayon::prelude::*;

use crate::catalog::{CatalogStar, StarCatalog};
use crate::plate_solution::{DetectedSource, PlateSolution};
use crate::spatial::{angle_to_chord, SpatialIndex};

/// Detection threshold in units of the background variance
pub const THRESH_FACTOR: f64 = 5.0;

const ARCSEC_PER_RADIAN: f64 = 206_264.806_247_096_36;

/// Flux a detection has to exceed to be matched
pub fn flux_threshold(image_variance: f64) -> f64 {
    THRESH_FACTOR * image_variance
}

/// A detection paired with its catalog counterpart
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedSource {
    pub source: DetectedSource,
    pub star: CatalogStar,
    /// Chord distance between detection and star on the unit sphere
    pub distance: f64,
}

impl MatchedSource {
    /// Pixel distance between the predicted catalog position and the detection
    pub fn pixel_offset(&self) -> f64 {
        (self.source.catalog_xy - self.source.image_xy).norm()
    }
}

/// Matching result for one image
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub matched: Vec<MatchedSource>,
    /// Detections whose nearest star lies beyond the match distance limit
    pub unmatched: Vec<DetectedSource>,
    /// Detections dropped by the flux threshold
    pub rejected_faint: usize,
    /// Detections dropped for a non-finite flux or sky position
    pub rejected_invalid: usize,
}

/// Nearest-star matcher over a loaded catalog
pub struct SourceMatcher<'a> {
    catalog: &'a StarCatalog,
    index: &'a SpatialIndex,
    max_chord: Option<f64>,
}

impl<'a> SourceMatcher<'a> {
    /// Create a matcher that accepts the nearest star unconditionally.
    ///
    /// `index` must have been built from `catalog.positions()`.
    pub fn new(catalog: &'a StarCatalog, index: &'a SpatialIndex) -> Self {
        Self {
            catalog,
            index,
            max_chord: None,
        }
    }

    /// Reject matches farther than `arcsec` from the detection
    pub fn with_max_distance_arcsec(mut self, arcsec: Option<f64>) -> Self {
        self.max_chord = arcsec.map(|a| angle_to_chord(a / ARCSEC_PER_RADIAN));
        self
    }

    /// Match the detections of one image.
    ///
    /// Detections with a non-finite flux or sky position, and those with
    /// `flux <= flux_threshold`, are discarded before the index is queried.
    pub fn match_sources(&self, detected: &[DetectedSource], flux_threshold: f64) -> MatchOutcome {
        let usable: Vec<&DetectedSource> =
            detected.iter().filter(|s| s.is_usable()).collect();
        let bright: Vec<&DetectedSource> = usable
            .iter()
            .copied()
            .filter(|s| s.flux > flux_threshold)
            .collect();
        let mut outcome = MatchOutcome {
            rejected_invalid: detected.len() - usable.len(),
            rejected_faint: usable.len() - bright.len(),
            ..Default::default()
        };

        let positions: Vec<_> = bright.iter().map(|s| s.position).collect();
        for (source, nn) in bright.into_iter().zip(self.index.query(&positions)) {
            if self.max_chord.is_some_and(|max| nn.distance > max) {
                outcome.unmatched.push(source.clone());
                continue;
            }
            outcome.matched.push(MatchedSource {
                source: source.clone(),
                star: self.catalog.stars()[nn.index].clone(),
                distance: nn.distance,
            });
        }
        outcome
    }

    /// Match every solved image independently, in parallel.
    ///
    /// The result is keyed by image name like the input.
    pub fn match_images(
        &self,
        solutions: &BTreeMap<String, PlateSolution>,
        flux_threshold: f64,
    ) -> BTreeMap<String, MatchOutcome> {
        solutions
            .par_iter()
            .map(|(name, solution)| {
                let outcome = self.match_sources(&solution.sources, flux_threshold);
                debug!(
                    "{name}: {} matched, {} unmatched, {} below threshold, {} invalid",
                    outcome.matched.len(),
                    outcome.unmatched.len(),
                    outcome.rejected_faint,
                    outcome.rejected_invalid
                );
                (name.clone(), outcome)
            })
            .collect()
    }
}
