//! Readers for the FITS files `solve-field` writes.

use std::path::Path;

use fitsio::FitsFile;

use super::{FrameGeometry, SourceTable};
use crate::error::{CalibrationError, Result};

/// Arcseconds per degree
const ARCSEC_PER_DEGREE: f64 = 3600.0;

fn fits_error(path: &Path) -> impl Fn(fitsio::errors::Error) -> CalibrationError + '_ {
    move |source| CalibrationError::Fits {
        path: path.to_path_buf(),
        source,
    }
}

/// Read a `.corr` correspondence table (binary table in the first extension).
///
/// Positions are kept in the solver's 1-based pixel convention; only their
/// differences are used.
pub fn read_corr<P: AsRef<Path>>(path: P) -> Result<SourceTable> {
    let path = path.as_ref();
    let err = fits_error(path);

    let mut fptr = FitsFile::open(path).map_err(&err)?;
    let hdu = fptr.hdu(1).map_err(&err)?;
    let mut column = |name: &str| -> Result<Vec<f64>> {
        hdu.read_col::<f64>(&mut fptr, name).map_err(&err)
    };

    let flux = column("flux")?;
    let field_x = column("field_x")?;
    let field_y = column("field_y")?;
    let index_x = column("index_x")?;
    let index_y = column("index_y")?;
    let index_ra = column("index_ra")?;
    let index_dec = column("index_dec")?;

    let mut table = SourceTable::default();
    for i in 0..flux.len() {
        table.push(
            flux[i],
            (field_x[i], field_y[i]),
            (index_x[i], index_y[i]),
            index_ra.get(i).copied(),
            index_dec.get(i).copied(),
        );
    }
    Ok(table)
}

/// Frame geometry from a `.wcs` header.
///
/// Uses `IMAGEW`/`IMAGEH` and derives the plate scale from the `CD` matrix
/// as `3600·sqrt(|det CD|)`, the same figure `wcsinfo` reports as `pixscale`.
/// Returns `Ok(None)` when a required key is absent.
pub fn read_wcs_geometry<P: AsRef<Path>>(path: P) -> Result<Option<FrameGeometry>> {
    let path = path.as_ref();
    let err = fits_error(path);

    let mut fptr = FitsFile::open(path).map_err(&err)?;
    let hdu = fptr.primary_hdu().map_err(&err)?;
    let mut key = |name: &str| hdu.read_key::<f64>(&mut fptr, name).ok();

    let (Some(width), Some(height), Some(cd11), Some(cd22)) =
        (key("IMAGEW"), key("IMAGEH"), key("CD1_1"), key("CD2_2"))
    else {
        return Ok(None);
    };
    let cd12 = key("CD1_2").unwrap_or(0.0);
    let cd21 = key("CD2_1").unwrap_or(0.0);

    let pixel_scale = ARCSEC_PER_DEGREE * (cd11 * cd22 - cd12 * cd21).abs().sqrt();
    Ok(FrameGeometry::from_values(width, height, pixel_scale))
}
