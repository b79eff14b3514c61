//! Calibration runs over synthetic catalogs, frames and solver output.

use std::collections::BTreeMap;
use std::path::Path;

use approx::assert_relative_eq;
use nalgebra::Vector2;
use starcal::catalog::{radec_to_unit_vector, HIPPARCOS_EPOCH};
use starcal::plate_solution::SolvedDirectory;
use starcal::session::{CALIBRATION_DATA_DIR, CHECKSUM_FILE, SAMPLES_DIR};
use starcal::{
    CalibrationAggregator, CalibrationConfig, CalibrationConstants, CalibrationError,
    CalibrationSession, CatalogStar, DetectedSource, FrameGeometry, ImageVariance, MatchedSource,
    PlateSolution, SourceMatcher, SpatialIndex, StarCatalog,
};
use test_helpers::{
    noise_frame, write_catalog, write_corr_fits, write_frame, write_sources_csv, write_wcs_fits,
    write_wcsinfo, HipparcosRecord, SourceRow,
};

/// (id, magnitude, ra, dec)
const STARS: [(u32, f64, f64, f64); 3] = [
    (11, 3.0, 10.0, 20.0),
    (12, 5.0, 10.5, 20.2),
    (13, 4.0, 11.0, 19.5),
];

fn star(index: usize) -> CatalogStar {
    let (id, magnitude, ra, dec) = STARS[index];
    CatalogStar {
        id,
        magnitude,
        ra,
        dec,
        position: radec_to_unit_vector(ra, dec),
        unreliable: false,
    }
}

fn detection(flux: f64, field: (f64, f64), index: (f64, f64), star: usize) -> DetectedSource {
    let (_, _, ra, dec) = STARS[star];
    DetectedSource::new(
        flux,
        Vector2::new(field.0, field.1),
        Vector2::new(index.0, index.1),
        ra,
        dec,
    )
}

#[test]
fn test_match_and_aggregate_two_images() {
    let catalog = StarCatalog::from_stars((0..3).map(star));
    let index = SpatialIndex::build(&catalog.positions()).unwrap();
    let matcher = SourceMatcher::new(&catalog, &index);

    let mut solved = BTreeMap::new();
    solved.insert(
        "first".to_string(),
        PlateSolution {
            sources: vec![
                detection(1000.0, (10.0, 10.0), (10.3, 10.4), 0),
                detection(2.0, (30.0, 30.0), (30.0, 31.0), 1),
            ],
            geometry: Some(FrameGeometry {
                width: 64,
                height: 48,
                pixel_scale: 20.0,
            }),
        },
    );
    solved.insert(
        "second".to_string(),
        PlateSolution {
            sources: vec![
                detection(200.0, (5.0, 5.0), (5.0, 6.0), 1),
                detection(400.0, (8.0, 8.0), (8.6, 8.8), 2),
            ],
            geometry: Some(FrameGeometry {
                width: 640,
                height: 480,
                pixel_scale: 25.0,
            }),
        },
    );

    let variance = ImageVariance(2.0);
    let threshold = starcal::matcher::flux_threshold(variance.value());
    assert_eq!(threshold, 10.0);

    let outcomes = matcher.match_images(&solved, threshold);
    assert_eq!(outcomes["first"].matched.len(), 1);
    assert_eq!(outcomes["first"].rejected_faint, 1);
    assert_eq!(outcomes["first"].matched[0].star.id, 11);
    let ids: Vec<u32> = outcomes["second"].matched.iter().map(|m| m.star.id).collect();
    assert_eq!(ids, vec![12, 13]);
    assert!(outcomes["second"].matched.iter().all(|m| m.distance < 1e-9));

    let per_image: BTreeMap<String, Vec<MatchedSource>> = outcomes
        .into_iter()
        .map(|(name, outcome)| (name, outcome.matched))
        .collect();
    let geometries: BTreeMap<String, FrameGeometry> = solved
        .iter()
        .filter_map(|(name, s)| s.geometry.map(|g| (name.clone(), g)))
        .collect();

    let constants = CalibrationAggregator::new(CalibrationConfig::default())
        .aggregate(&per_image, &geometries, variance)
        .unwrap();

    // Geometry comes from the image with the most matches
    assert_eq!((constants.img_x, constants.img_y), (640, 480));
    assert_eq!(constants.pixscale, 25.0);

    // Dimmest matched star is HIP 12 at magnitude 5 with flux 200
    assert_relative_eq!(constants.base_flux, 200.0 * 100.0, max_relative = 1e-12);

    let expected = ((0.5 - 2.0 / 1000.0) + (1.0 - 2.0 / 200.0) + (1.0 - 2.0 / 400.0)) / 3.0;
    assert_relative_eq!(constants.pos_variance, expected, epsilon = 1e-12);
    assert_eq!(constants.image_variance, 2.0);
    assert_eq!(constants.thresh_factor, 5.0);
}

#[test]
fn test_distance_limit_leaves_far_detections_unmatched() {
    let catalog = StarCatalog::from_stars((0..3).map(star));
    let index = SpatialIndex::build(&catalog.positions()).unwrap();

    // Half a degree away from HIP 11
    let far = DetectedSource::new(
        500.0,
        Vector2::new(1.0, 1.0),
        Vector2::new(1.0, 1.0),
        10.0,
        19.5,
    );
    let near = detection(500.0, (2.0, 2.0), (2.0, 2.0), 2);

    let loose = SourceMatcher::new(&catalog, &index).match_sources(&[far.clone(), near.clone()], 1.0);
    assert_eq!(loose.matched.len(), 2);

    let strict = SourceMatcher::new(&catalog, &index)
        .with_max_distance_arcsec(Some(60.0))
        .match_sources(&[far.clone(), near], 1.0);
    assert_eq!(strict.matched.len(), 1);
    assert_eq!(strict.matched[0].star.id, 13);
    assert_eq!(strict.unmatched, vec![far]);
}

const WIDTH: usize = 16;
const HEIGHT: usize = 12;

fn write_samples(root: &Path, seeds: &[u64]) {
    let samples = root.join(SAMPLES_DIR);
    std::fs::create_dir_all(&samples).unwrap();
    for (i, seed) in seeds.iter().enumerate() {
        let frame = noise_frame(HEIGHT, WIDTH, 100.0, 3, *seed);
        write_frame(&samples.join(format!("frame_{i:03}.png")), &frame).unwrap();
    }
}

fn write_hipparcos(path: &Path) {
    let records: Vec<HipparcosRecord> = STARS
        .iter()
        .map(|&(id, mag, ra, dec)| HipparcosRecord::new(id, mag, ra, dec))
        .collect();
    write_catalog(path, &records).unwrap();
}

fn write_solutions(data_dir: &Path) {
    let solved = SolvedDirectory::new(data_dir);
    write_sources_csv(
        &solved.sources_path("frame_000"),
        &[
            SourceRow::new(1000.0, (10.0, 10.0), (10.3, 10.4), (10.0, 20.0)),
            SourceRow::new(0.5, (3.0, 3.0), (3.0, 4.0), (10.5, 20.2)),
        ],
    )
    .unwrap();
    write_wcsinfo(&solved.wcsinfo_path("frame_000"), 16, 12, 30.0).unwrap();

    write_sources_csv(
        &solved.sources_path("frame_001"),
        &[
            SourceRow::new(200.0, (5.0, 5.0), (5.0, 6.0), (10.5, 20.2)),
            SourceRow::new(400.0, (8.0, 8.0), (8.6, 8.8), (11.0, 19.5)),
        ],
    )
    .unwrap();
    write_wcsinfo(&solved.wcsinfo_path("frame_001"), 16, 12, 25.0).unwrap();
}

/// The same solutions as `write_solutions`, in the FITS files `solve-field` writes,
/// plus an unresolved row in each table
fn write_fits_solutions(data_dir: &Path) {
    let solved = SolvedDirectory::new(data_dir);
    write_corr_fits(
        &solved.corr_path("frame_000"),
        &[
            SourceRow::new(1000.0, (10.0, 10.0), (10.3, 10.4), (10.0, 20.0)),
            SourceRow::new(0.5, (3.0, 3.0), (3.0, 4.0), (10.5, 20.2)),
            SourceRow::unresolved(800.0, (2.0, 9.0), (2.5, 9.0)),
        ],
    )
    .unwrap();
    write_wcs_fits(&solved.wcs_path("frame_000"), 16, 12, 30.0).unwrap();

    write_corr_fits(
        &solved.corr_path("frame_001"),
        &[
            SourceRow::new(200.0, (5.0, 5.0), (5.0, 6.0), (10.5, 20.2)),
            SourceRow::unresolved(900.0, (1.0, 1.0), (1.0, 2.0)),
            SourceRow::new(400.0, (8.0, 8.0), (8.6, 8.8), (11.0, 19.5)),
        ],
    )
    .unwrap();
    write_wcs_fits(&solved.wcs_path("frame_001"), 16, 12, 25.0).unwrap();
    // solve-field's own marker file is not a wcsinfo summary
    std::fs::write(solved.wcsinfo_path("frame_001"), [0u8]).unwrap();
}

fn session(root: &Path) -> CalibrationSession {
    CalibrationSession::new(
        root,
        root.join("hip_main.dat"),
        HIPPARCOS_EPOCH,
        CalibrationConfig::default(),
    )
    .unwrap()
}

#[test]
fn test_session_writes_calibration_file() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_samples(root, &[1, 2, 3]);
    write_hipparcos(&root.join("hip_main.dat"));

    let session = session(root);
    let prepared = session.prepare().unwrap();
    assert_eq!(prepared.names, vec!["frame_000", "frame_001", "frame_002"]);
    assert_eq!(prepared.background.dim(), (HEIGHT, WIDTH));

    let data_dir = root.join(CALIBRATION_DATA_DIR);
    assert!(root.join("median_image.png").exists());
    assert!(data_dir.join(CHECKSUM_FILE).exists());
    for name in &prepared.names {
        assert!(data_dir.join(format!("{name}.png")).exists());
    }

    write_solutions(&data_dir);

    // Preparing again with unchanged samples keeps the solver output
    let constants = session.run().unwrap();
    assert!(data_dir.join("frame_001.sources.csv").exists());

    let variance = ImageVariance::estimate(&prepared.frames, &prepared.background)
        .unwrap()
        .value();
    assert!(variance >= 1.0);
    assert_eq!(constants.image_variance, variance);
    assert_eq!((constants.img_x, constants.img_y), (16, 12));
    assert_eq!(constants.pixscale, 25.0);
    assert_relative_eq!(constants.base_flux, 200.0 * 100.0, max_relative = 1e-12);

    let expected =
        ((0.5 - variance / 1000.0) + (1.0 - variance / 200.0) + (1.0 - variance / 400.0)) / 3.0;
    assert_relative_eq!(constants.pos_variance, expected, epsilon = 1e-12);

    let written = CalibrationConstants::read(session.calibration_file()).unwrap();
    assert_eq!(written.img_x, 16);
    assert_eq!(written.required_stars, 5);
    assert_relative_eq!(written.base_flux, constants.base_flux, max_relative = 1e-9);
    assert_relative_eq!(written.pos_variance, constants.pos_variance, epsilon = 1e-9);

    let text = std::fs::read_to_string(session.calibration_file()).unwrap();
    let keys: Vec<&str> = text
        .lines()
        .filter_map(|line| line.split_once('=').map(|(k, _)| k))
        .collect();
    assert_eq!(keys, starcal::constants::KEYS);
}

#[test]
fn test_session_reads_solve_field_output() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_samples(root, &[1, 2, 3]);
    write_hipparcos(&root.join("hip_main.dat"));

    let session = session(root);
    let prepared = session.prepare().unwrap();
    write_fits_solutions(&root.join(CALIBRATION_DATA_DIR));

    let constants = session.run().unwrap();
    let variance = ImageVariance::estimate(&prepared.frames, &prepared.background)
        .unwrap()
        .value();
    assert_eq!((constants.img_x, constants.img_y), (16, 12));
    assert_relative_eq!(constants.pixscale, 25.0, max_relative = 1e-9);
    assert_relative_eq!(constants.base_flux, 200.0 * 100.0, max_relative = 1e-12);

    let expected =
        ((0.5 - variance / 1000.0) + (1.0 - variance / 200.0) + (1.0 - variance / 400.0)) / 3.0;
    assert_relative_eq!(constants.pos_variance, expected, epsilon = 1e-12);
}

#[test]
fn test_repeated_sample_stem_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_samples(root, &[1, 2]);
    let twin = noise_frame(HEIGHT, WIDTH, 100.0, 3, 3);
    write_frame(&root.join(SAMPLES_DIR).join("frame_001.bmp"), &twin).unwrap();
    write_hipparcos(&root.join("hip_main.dat"));

    let prepared = session(root).prepare().unwrap();
    assert_eq!(prepared.names, vec!["frame_000", "frame_001"]);
    assert_eq!(prepared.frames.len(), 2);
}

#[test]
fn test_any_changed_sample_file_clears_solver_output() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_samples(root, &[4, 5]);
    let notes = root.join(SAMPLES_DIR).join("notes.txt");
    std::fs::write(&notes, "exposure 50 ms").unwrap();
    write_hipparcos(&root.join("hip_main.dat"));

    let session = session(root);
    session.prepare().unwrap();
    let data_dir = root.join(CALIBRATION_DATA_DIR);
    write_solutions(&data_dir);

    session.prepare().unwrap();
    assert!(data_dir.join("frame_000.sources.csv").exists());

    std::fs::write(&notes, "exposure 100 ms").unwrap();
    session.prepare().unwrap();
    assert!(!data_dir.join("frame_000.sources.csv").exists());
}

#[test]
fn test_changed_samples_clear_solver_output() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_samples(root, &[4, 5]);
    write_hipparcos(&root.join("hip_main.dat"));

    let session = session(root);
    session.prepare().unwrap();
    let data_dir = root.join(CALIBRATION_DATA_DIR);
    write_solutions(&data_dir);

    write_samples(root, &[4, 6]);
    session.prepare().unwrap();
    assert!(!data_dir.join("frame_000.sources.csv").exists());
    assert!(data_dir.join("frame_000.png").exists());
}

#[test]
fn test_session_without_solutions_fails() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_samples(root, &[7, 8]);
    write_hipparcos(&root.join("hip_main.dat"));

    let result = session(root).run();
    assert!(matches!(result, Err(CalibrationError::NoMatchedSources)));
    assert!(!root.join("calibration.txt").exists());
}

#[test]
fn test_session_needs_two_samples() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_samples(root, &[9]);
    std::fs::write(root.join(SAMPLES_DIR).join("notes.txt"), "not an image").unwrap();

    let result = session(root).prepare();
    assert!(matches!(
        result,
        Err(CalibrationError::InsufficientImages {
            required: 2,
            found: 1
        })
    ));
}
