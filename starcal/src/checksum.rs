//! md5 manifest of the sample images.
//!
//! Solver output left over from a different sample set would silently
//! poison the calibration, so the session stores a manifest next to the
//! calibration data and clears that data whenever the samples change.

use std::fmt;
use std::path::Path;

use crate::error::{CalibrationError, Result};

/// Sorted list of (file name, md5 hex digest) pairs
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SampleManifest {
    entries: Vec<(String, String)>,
}

impl SampleManifest {
    /// Hash every file in `paths`
    pub fn compute<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut entries = paths
            .iter()
            .map(|p| {
                let path = p.as_ref();
                let bytes = std::fs::read(path).map_err(|e| CalibrationError::io(path, e))?;
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                Ok((name, format!("{:x}", md5::compute(&bytes))))
            })
            .collect::<Result<Vec<_>>>()?;
        entries.sort();
        Ok(Self { entries })
    }

    /// Parse `md5sum`-style text (`<digest>  <name>` per line)
    pub fn parse(text: &str) -> Self {
        let mut entries: Vec<(String, String)> = text
            .lines()
            .filter_map(|line| line.split_once(char::is_whitespace))
            .map(|(digest, name)| (name.trim().to_string(), digest.to_string()))
            .collect();
        entries.sort();
        Self { entries }
    }

    /// Read a stored manifest; `None` if there is none yet
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Some(Self::parse(&text))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CalibrationError::io(path, e)),
        }
    }

    pub fn store<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_string()).map_err(|e| CalibrationError::io(path, e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for SampleManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, digest) in &self.entries {
            writeln!(f, "{digest}  {name}")?;
        }
        Ok(())
    }
}
