//! Synthetic inputs for calibration tests.
//!
//! Builds the files a calibration run consumes without needing the real
//! Hipparcos catalog or an astrometry.net installation:
//!
//! - [`HipparcosRecord`]: one `hip_main.dat` line with chosen fields
//! - [`SourceRow`] / [`write_sources_csv`]: a solver correspondence table
//! - [`write_corr_fits`] / [`write_wcs_fits`]: the same data as `solve-field`
//!   FITS output
//! - [`write_wcsinfo`]: a solver WCS summary
//! - [`noise_frame`] / [`write_frame`]: reproducible sample images
//!
//! # Example
//! ```
//! use test_helpers::HipparcosRecord;
//!
//! let line = HipparcosRecord::new(32349, -1.44, 101.28715533, -16.71611586)
//!     .with_proper_motion(-546.01, -1223.08)
//!     .to_line();
//! assert!(line.starts_with("H|"));
//! ```

use std::io;
use std::path::Path;

use fitsio::tables::{ColumnDataType, ColumnDescription};
use fitsio::FitsFile;
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Number of fields in a `hip_main.dat` record
pub const HIPPARCOS_FIELDS: usize = 78;

/// A Hipparcos main catalog record with the fields calibration reads.
///
/// Fields are kept as text so tests can plant malformed values.
#[derive(Debug, Clone, PartialEq)]
pub struct HipparcosRecord {
    pub hip: String,
    pub vmag: String,
    pub var_flag: String,
    pub ra: String,
    pub dec: String,
    pub pm_ra: String,
    pub pm_dec: String,
    pub rejected_pct: String,
}

impl HipparcosRecord {
    /// A constant, well-measured star without proper motion
    pub fn new(hip: u32, vmag: f64, ra: f64, dec: f64) -> Self {
        Self {
            hip: format!("{hip:>6}"),
            vmag: format!("{vmag}"),
            var_flag: " ".to_string(),
            ra: format!("{ra}"),
            dec: format!("{dec}"),
            pm_ra: "0".to_string(),
            pm_dec: "0".to_string(),
            rejected_pct: "0".to_string(),
        }
    }

    /// Proper motion in mas/yr
    pub fn with_proper_motion(mut self, pm_ra: f64, pm_dec: f64) -> Self {
        self.pm_ra = format!("{pm_ra}");
        self.pm_dec = format!("{pm_dec}");
        self
    }

    pub fn with_var_flag(mut self, flag: &str) -> Self {
        self.var_flag = flag.to_string();
        self
    }

    pub fn with_rejected_pct(mut self, pct: &str) -> Self {
        self.rejected_pct = pct.to_string();
        self
    }

    /// Render as a pipe-delimited catalog line
    pub fn to_line(&self) -> String {
        let mut fields = vec![String::new(); HIPPARCOS_FIELDS];
        fields[0] = "H".to_string();
        fields[1] = self.hip.clone();
        fields[5] = self.vmag.clone();
        fields[6] = self.var_flag.clone();
        fields[8] = self.ra.clone();
        fields[9] = self.dec.clone();
        fields[12] = self.pm_ra.clone();
        fields[13] = self.pm_dec.clone();
        fields[29] = self.rejected_pct.clone();
        fields.join("|")
    }
}

/// Write a catalog file, one record per line
pub fn write_catalog(path: &Path, records: &[HipparcosRecord]) -> io::Result<()> {
    let text: String = records.iter().map(|r| r.to_line() + "\n").collect();
    std::fs::write(path, text)
}

/// One row of a solver correspondence table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceRow {
    pub flux: f64,
    /// Detected position (x, y) in pixels
    pub field: (f64, f64),
    /// Predicted catalog position (x, y) in pixels
    pub index: (f64, f64),
    /// Catalog (ra, dec) in degrees; `None` when the solver resolved no position
    pub radec: Option<(f64, f64)>,
}

impl SourceRow {
    pub fn new(flux: f64, field: (f64, f64), index: (f64, f64), radec: (f64, f64)) -> Self {
        Self {
            flux,
            field,
            index,
            radec: Some(radec),
        }
    }

    /// A row without a sky position
    pub fn unresolved(flux: f64, field: (f64, f64), index: (f64, f64)) -> Self {
        Self {
            flux,
            field,
            index,
            radec: None,
        }
    }
}

const SOURCE_COLUMNS: [&str; 7] = [
    "flux",
    "field_x",
    "field_y",
    "index_x",
    "index_y",
    "index_ra",
    "index_dec",
];

/// Write a correspondence table in the CSV layout the calibration reads.
///
/// Unresolved rows leave the sky position columns blank.
pub fn write_sources_csv(path: &Path, rows: &[SourceRow]) -> io::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(SOURCE_COLUMNS)?;
    for row in rows {
        let (ra, dec) = match row.radec {
            Some((ra, dec)) => (ra.to_string(), dec.to_string()),
            None => (String::new(), String::new()),
        };
        writer.write_record([
            row.flux.to_string(),
            row.field.0.to_string(),
            row.field.1.to_string(),
            row.index.0.to_string(),
            row.index.1.to_string(),
            ra,
            dec,
        ])?;
    }
    writer.flush()
}

/// Write a `.corr` binary table. Unresolved rows carry NaN sky positions.
pub fn write_corr_fits(path: &Path, rows: &[SourceRow]) -> fitsio::errors::Result<()> {
    let mut fptr = FitsFile::create(path).open()?;
    let columns = SOURCE_COLUMNS
        .iter()
        .map(|name| {
            ColumnDescription::new(*name)
                .with_type(ColumnDataType::Double)
                .create()
        })
        .collect::<fitsio::errors::Result<Vec<_>>>()?;
    let hdu = fptr.create_table("CORR".to_string(), &columns)?;

    let radec = |pick: fn((f64, f64)) -> f64| -> Vec<f64> {
        rows.iter()
            .map(|r| r.radec.map_or(f64::NAN, pick))
            .collect()
    };
    let values: [Vec<f64>; 7] = [
        rows.iter().map(|r| r.flux).collect(),
        rows.iter().map(|r| r.field.0).collect(),
        rows.iter().map(|r| r.field.1).collect(),
        rows.iter().map(|r| r.index.0).collect(),
        rows.iter().map(|r| r.index.1).collect(),
        radec(|(ra, _)| ra),
        radec(|(_, dec)| dec),
    ];
    for (name, column) in SOURCE_COLUMNS.iter().zip(&values) {
        hdu.write_col(&mut fptr, *name, column)?;
    }
    Ok(())
}

/// Write a `.wcs` header with a north-up TAN solution of the given scale (arcsec/px)
pub fn write_wcs_fits(
    path: &Path,
    width: u32,
    height: u32,
    pixel_scale: f64,
) -> fitsio::errors::Result<()> {
    let mut fptr = FitsFile::create(path).open()?;
    let hdu = fptr.primary_hdu()?;
    let cd = pixel_scale / 3600.0;
    hdu.write_key(&mut fptr, "CTYPE1", "RA---TAN")?;
    hdu.write_key(&mut fptr, "CTYPE2", "DEC--TAN")?;
    hdu.write_key(&mut fptr, "IMAGEW", i64::from(width))?;
    hdu.write_key(&mut fptr, "IMAGEH", i64::from(height))?;
    hdu.write_key(&mut fptr, "CD1_1", -cd)?;
    hdu.write_key(&mut fptr, "CD1_2", 0.0)?;
    hdu.write_key(&mut fptr, "CD2_1", 0.0)?;
    hdu.write_key(&mut fptr, "CD2_2", cd)?;
    Ok(())
}

/// Write a `wcsinfo` summary in the upper-cased `KEY=value` form
pub fn write_wcsinfo(path: &Path, width: u32, height: u32, pixel_scale: f64) -> io::Result<()> {
    std::fs::write(
        path,
        format!("IMAGEW={width}\nIMAGEH={height}\nPIXSCALE={pixel_scale}\nRA_CENTER=0\n"),
    )
}

/// Integer-valued frame of uniform noise in `[level - spread, level + spread]`
pub fn noise_frame(height: usize, width: usize, level: f64, spread: i32, seed: u64) -> Array2<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Array2::from_shape_fn((height, width), |_| {
        level + f64::from(rng.gen_range(-spread..=spread))
    })
}

/// Save a frame as an 8-bit grayscale PNG, clipping to `[0, 255]`
pub fn write_frame(path: &Path, frame: &Array2<f64>) -> image::ImageResult<()> {
    let (height, width) = frame.dim();
    image::GrayImage::from_fn(width as u32, height as u32, |x, y| {
        image::Luma([frame[[y as usize, x as usize]].round().clamp(0.0, 255.0) as u8])
    })
    .save(path)
}
