//! Star-tracker camera calibration.
//!
//! Derives the photometric and geometric constants a real-time star
//! identifier needs (zero-point flux, background variance, centroiding
//! error, plate scale) by matching plate-solved sample images against the
//! Hipparcos catalog.
//!
//! # Pipeline
//!
//! 1. [`catalog`]: load the catalog and propagate proper motion to the
//!    observation epoch
//! 2. [`spatial`]: index catalog unit vectors in a k-d tree
//! 3. [`matcher`]: pair every bright detection with its nearest catalog star
//! 4. [`aggregate`]: pool matches from all images into
//!    [`CalibrationConstants`]
//!
//! [`background`] supplies the noise variance that gates step 3, and
//! [`session`] wires the steps together over a sample directory.

pub mod aggregate;
pub mod background;
pub mod catalog;
pub mod checksum;
pub mod config;
pub mod constants;
pub mod error;
pub mod matcher;
pub mod plate_solution;
pub mod session;
pub mod spatial;

pub use aggregate::CalibrationAggregator;
pub use background::ImageVariance;
pub use catalog::{CatalogStar, DuplicatePolicy, StarCatalog};
pub use config::CalibrationConfig;
pub use constants::CalibrationConstants;
pub use error::{CalibrationError, Result};
pub use matcher::{MatchedSource, SourceMatcher, THRESH_FACTOR};
pub use plate_solution::{DetectedSource, FrameGeometry, PlateSolution, PlateSolutionSource};
pub use session::CalibrationSession;
pub use spatial::SpatialIndex;
