//! Record parser for the Hipparcos main catalog (`hip_main.dat`).
//!
//! The file is pipe-delimited with one star per line. Only a handful of the
//! 78 fields matter for calibration; their positions are listed below as
//! 0-based indices after splitting on `|`.

use thiserror::Error;

use super::{radec_to_unit_vector, CatalogStar, KNOWN_VARIABLE_FLAG, MAS_PER_DEGREE};

/// HIP identifier
pub const FIELD_HIP: usize = 1;
/// Johnson V magnitude
pub const FIELD_VMAG: usize = 5;
/// Coarse variability flag (1..3, blank when constant)
pub const FIELD_VAR_FLAG: usize = 6;
/// Right ascension in degrees at the catalog epoch
pub const FIELD_RA: usize = 8;
/// Declination in degrees at the catalog epoch
pub const FIELD_DEC: usize = 9;
/// Proper motion in RA·cos(dec), mas/yr
pub const FIELD_PM_RA: usize = 12;
/// Proper motion in declination, mas/yr
pub const FIELD_PM_DEC: usize = 13;
/// Percentage of rejected data
pub const FIELD_REJECTED_PCT: usize = 29;

/// Minimum number of fields a record needs to be parsed
pub const MIN_FIELDS: usize = FIELD_REJECTED_PCT + 1;

/// Reasons a single catalog line cannot be turned into a star
#[derive(Error, Debug, PartialEq)]
pub enum RecordError {
    #[error("expected at least {MIN_FIELDS} fields, found {0}")]
    TooFewFields(usize),

    #[error("field {index} ({name}) is not a number: {value:?}")]
    InvalidField {
        index: usize,
        name: &'static str,
        value: String,
    },
}

fn parse_field<T: std::str::FromStr>(
    fields: &[&str],
    index: usize,
    name: &'static str,
) -> Result<T, RecordError> {
    let raw = fields[index].trim();
    raw.parse().map_err(|_| RecordError::InvalidField {
        index,
        name,
        value: raw.to_string(),
    })
}

/// Parse one catalog line, moving the star by `year_diff` years of proper motion.
///
/// Declination is moved first; the right ascension correction divides by the
/// cosine of the already adjusted declination.
pub fn parse_record(line: &str, year_diff: f64) -> Result<CatalogStar, RecordError> {
    let fields: Vec<&str> = line.split('|').collect();
    if fields.len() < MIN_FIELDS {
        return Err(RecordError::TooFewFields(fields.len()));
    }

    let id: u32 = parse_field(&fields, FIELD_HIP, "HIP")?;
    let magnitude: f64 = parse_field(&fields, FIELD_VMAG, "Vmag")?;
    let ra0: f64 = parse_field(&fields, FIELD_RA, "RAdeg")?;
    let dec0: f64 = parse_field(&fields, FIELD_DEC, "DEdeg")?;
    let pm_ra: f64 = parse_field(&fields, FIELD_PM_RA, "pmRA")?;
    let pm_dec: f64 = parse_field(&fields, FIELD_PM_DEC, "pmDE")?;

    let dec = dec0 + year_diff * pm_dec / MAS_PER_DEGREE;
    let cos_dec = dec.to_radians().cos();
    let ra = ra0 + year_diff * pm_ra / (cos_dec * MAS_PER_DEGREE);

    // Blank or garbled variability flags count as "not variable"
    let var_flag: i64 = fields[FIELD_VAR_FLAG].trim().parse().unwrap_or(0);
    let rejected_pct: Option<i64> = fields[FIELD_REJECTED_PCT].trim().parse().ok();
    let unreliable =
        !(matches!(rejected_pct, Some(0) | Some(1)) && var_flag != KNOWN_VARIABLE_FLAG);

    Ok(CatalogStar {
        id,
        magnitude,
        ra,
        dec,
        position: radec_to_unit_vector(ra, dec),
        unreliable,
    })
}
