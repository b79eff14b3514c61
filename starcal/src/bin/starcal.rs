//! Star-tracker calibration tool.
//!
//! - `prepare`: median-subtract the samples and write frames for the plate solver
//! - `calibrate`: match solved frames against the catalog and write `calibration.txt`
//!
//! Typical use:
//!
//! ```text
//! starcal prepare ./camera
//! for f in ./camera/calibration_data/*.png; do solve-field --overwrite "$f"; done
//! starcal calibrate ./camera --catalog hip_main.dat
//! ```
//!
//! `solve-field` leaves `<stem>.corr` and `<stem>.wcs` next to each frame and
//! both are read as they are. Output from a solver run elsewhere can be
//! supplied as text instead: the `.corr` table as `<stem>.sources.csv` (same
//! column names, blank `index_ra`/`index_dec` for unresolved rows) and
//! `wcsinfo <stem>.wcs > <stem>.solved`.
//!
//! Pass-through camera parameters can also be supplied through the
//! environment variables named in `--help`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Datelike;
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use log::info;
use starcal::{CalibrationConfig, CalibrationSession, DuplicatePolicy};

#[derive(Parser, Debug)]
#[command(name = "starcal")]
#[command(about = "Calibrate a star-tracker camera against the Hipparcos catalog")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write background-subtracted frames for the external plate solver
    Prepare {
        #[command(flatten)]
        session: SessionArgs,
    },

    /// Compute calibration constants from solved frames
    Calibrate {
        #[command(flatten)]
        session: SessionArgs,

        /// Also print the constants as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(ClapArgs, Debug)]
struct SessionArgs {
    /// Camera directory containing `samples/`
    root: PathBuf,

    /// Hipparcos main catalog
    #[arg(long, default_value = "hip_main.dat")]
    catalog: PathBuf,

    /// Observation epoch as a decimal year (defaults to the current year)
    #[arg(long)]
    epoch: Option<f64>,

    /// JSON file with calibration parameters; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Exposure time in seconds [default: 0.05]
    #[arg(long, env = "EXPOSURE_TIME")]
    exposure_time: Option<f64>,

    /// Aperture diameter in millimetres [default: 60.7]
    #[arg(long, env = "APERTURE")]
    aperture: Option<f64>,

    /// Pixels of separation needed to distinguish two stars [default: 3.5]
    #[arg(long, env = "DOUBLE_STAR_PX")]
    double_star_px: Option<f64>,

    /// Position error bound in standard deviations [default: 2]
    #[arg(long, env = "POS_ERR_SIGMA")]
    pos_err_sigma: Option<f64>,

    /// Objects allowed to be brighter than the two brightest stars [default: 2]
    #[arg(long, env = "MAX_FALSE_STARS")]
    max_false_stars: Option<u32>,

    /// Catalog redundancy depth [default: 1]
    #[arg(long, env = "DB_REDUNDANCY")]
    db_redundancy: Option<u32>,

    /// Number of stars the identifier tries to match [default: 5]
    #[arg(long, env = "REQUIRED_STARS")]
    required_stars: Option<u32>,

    /// Reject catalog matches farther than this many arcseconds
    #[arg(long, env = "MAX_MATCH_DISTANCE_ARCSEC")]
    max_match_distance_arcsec: Option<f64>,

    /// Handling of repeated catalog identifiers
    #[arg(long, value_enum)]
    duplicates: Option<DuplicateArg>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum DuplicateArg {
    LastWins,
    Reject,
}

impl From<DuplicateArg> for DuplicatePolicy {
    fn from(arg: DuplicateArg) -> Self {
        match arg {
            DuplicateArg::LastWins => DuplicatePolicy::LastWins,
            DuplicateArg::Reject => DuplicatePolicy::Reject,
        }
    }
}

impl SessionArgs {
    fn to_config(&self) -> Result<CalibrationConfig> {
        let mut config = match &self.config {
            Some(path) => CalibrationConfig::from_json_file(path)?,
            None => CalibrationConfig::default(),
        };
        if let Some(v) = self.exposure_time {
            config.exposure_time = v;
        }
        if let Some(v) = self.aperture {
            config.aperture = v;
        }
        if let Some(v) = self.double_star_px {
            config.double_star_px = v;
        }
        if let Some(v) = self.pos_err_sigma {
            config.pos_err_sigma = v;
        }
        if let Some(v) = self.max_false_stars {
            config.max_false_stars = v;
        }
        if let Some(v) = self.db_redundancy {
            config.db_redundancy = v;
        }
        if let Some(v) = self.required_stars {
            config.required_stars = v;
        }
        if self.max_match_distance_arcsec.is_some() {
            config.max_match_distance_arcsec = self.max_match_distance_arcsec;
        }
        if let Some(v) = self.duplicates {
            config.duplicate_policy = v.into();
        }
        Ok(config)
    }

    fn session(&self) -> Result<CalibrationSession> {
        let config = self.to_config()?;
        let epoch = self
            .epoch
            .unwrap_or_else(|| f64::from(chrono::Utc::now().year()));
        info!("Configuration: {config:?}, epoch {epoch}");
        Ok(CalibrationSession::new(
            &self.root,
            &self.catalog,
            epoch,
            config,
        )?)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Command::Prepare { session } => {
            let session = session.session()?;
            let prepared = session.prepare().context("preparing samples")?;
            println!(
                "Wrote {} solver frames to {}",
                prepared.names.len(),
                session.calibration_data_dir().display()
            );
        }
        Command::Calibrate { session, json } => {
            let session = session.session()?;
            let constants = session.run().context("calibration failed")?;
            println!("Calibration finished");
            print!("{constants}");
            if json {
                println!("{}", serde_json::to_string_pretty(&constants)?);
            }
        }
    }
    Ok(())
}
