//! Background stacking and noise estimation for sample frames.
//!
//! The camera looks at a different patch of sky in each sample, so the
//! per-pixel median across samples is a good model of everything that stays
//! fixed: bias, dark current, vignetting, hot pixels. Subtracting it leaves
//! stars plus zero-mean noise.
//!
//! # Noise estimate
//!
//! Star light and hot-pixel residue are strictly positive after subtraction,
//! so only the negative residuals are used to estimate the background
//! variance. Their mean square approximates the noise variance of the
//! background alone.

use std::path::Path;

use image::GrayImage;
use log::debug;
use ndarray::{Array2, Zip};

use crate::error::{CalibrationError, Result};

/// Load an image file as an 8-bit luma frame of shape (height, width)
pub fn load_frame<P: AsRef<Path>>(path: P) -> Result<Array2<f64>> {
    let path = path.as_ref();
    let img = image::open(path)
        .map_err(|source| CalibrationError::Image {
            path: path.to_path_buf(),
            source,
        })?
        .into_luma8();
    let (width, height) = img.dimensions();
    Ok(Array2::from_shape_fn(
        (height as usize, width as usize),
        |(y, x)| f64::from(img.get_pixel(x as u32, y as u32)[0]),
    ))
}

/// Write a frame as an 8-bit grayscale image.
///
/// Values are clipped to `[0, 255]` and truncated toward zero.
pub fn save_frame<P: AsRef<Path>>(frame: &Array2<f64>, path: P) -> Result<()> {
    let path = path.as_ref();
    let (height, width) = frame.dim();
    let img = GrayImage::from_fn(width as u32, height as u32, |x, y| {
        let v = frame[[y as usize, x as usize]];
        image::Luma([v.clamp(0.0, 255.0) as u8])
    });
    img.save(path).map_err(|source| CalibrationError::Image {
        path: path.to_path_buf(),
        source,
    })
}

fn check_shapes(frames: &[Array2<f64>], expected: (usize, usize)) -> Result<()> {
    match frames.iter().find(|f| f.dim() != expected) {
        Some(frame) => Err(CalibrationError::ShapeMismatch {
            expected,
            found: frame.dim(),
        }),
        None => Ok(()),
    }
}

/// Median of a non-empty slice; averages the two middle values for even counts
fn median(values: &mut [f64]) -> f64 {
    values.sort_unstable_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Per-pixel median across a stack of equally sized frames
pub fn median_background(frames: &[Array2<f64>]) -> Result<Array2<f64>> {
    let first = frames.first().ok_or(CalibrationError::InsufficientImages {
        required: 1,
        found: 0,
    })?;
    check_shapes(frames, first.dim())?;

    let mut column = vec![0.0; frames.len()];
    Ok(Array2::from_shape_fn(first.dim(), |idx| {
        for (slot, frame) in column.iter_mut().zip(frames) {
            *slot = frame[idx];
        }
        median(&mut column)
    }))
}

/// Subtract `background` from every frame
pub fn subtract_background(
    frames: &[Array2<f64>],
    background: &Array2<f64>,
) -> Result<Vec<Array2<f64>>> {
    check_shapes(frames, background.dim())?;
    Ok(frames.iter().map(|f| f - background).collect())
}

/// Background noise variance of a set of background-subtracted frames
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageVariance(pub f64);

impl ImageVariance {
    /// Minimum number of samples for a meaningful median background
    pub const MIN_FRAMES: usize = 2;

    /// Estimate the variance from raw frames and their median background.
    ///
    /// Weighted average of squared residuals where only negative residual
    /// pixels carry weight.
    pub fn estimate(frames: &[Array2<f64>], background: &Array2<f64>) -> Result<Self> {
        if frames.len() < Self::MIN_FRAMES {
            return Err(CalibrationError::InsufficientImages {
                required: Self::MIN_FRAMES,
                found: frames.len(),
            });
        }
        check_shapes(frames, background.dim())?;

        let mut sum_sq = 0.0;
        let mut count = 0usize;
        for frame in frames {
            Zip::from(frame).and(background).for_each(|&raw, &bg| {
                let residual = raw - bg;
                if residual < 0.0 {
                    sum_sq += residual * residual;
                    count += 1;
                }
            });
        }

        if count == 0 {
            return Err(CalibrationError::DegenerateVariance(
                "no pixel falls below the median background".to_string(),
            ));
        }
        let variance = sum_sq / count as f64;
        if !variance.is_finite() {
            return Err(CalibrationError::NonFiniteResult {
                name: "IMAGE_VARIANCE",
                value: variance,
            });
        }
        debug!("Image variance {variance:.4} from {count} background pixels");
        Ok(Self(variance))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}
