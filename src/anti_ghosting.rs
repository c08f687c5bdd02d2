//! Ghost masks: per-exposure maps of pixels where something moved
//! between shots, so that fusion can leave them out.

use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;

use job_queue::Progress;
use pfs::{colorspace::rgb_luminance, Array2Df, Frame};
use sensor_analysis::known_luma_curves::srgb;

use crate::error::{Error, Result};

/// Largest deviation, in stops, that the sensitivity scale covers.
pub const MAX_DEVIATION: f32 = 4.0;

// Encoded values outside this range are too dark or too close to
// clipping to compare reliably.
const LOW_CUTOFF: f32 = 0.02;
const HIGH_CUTOFF: f32 = 0.98;

/// Deviation threshold, in stops, for a sensitivity in [0.0, 1.0].
///
/// Returns `None` for a sensitivity of zero or less, which flags
/// nothing.
pub fn threshold(sensitivity: f32) -> Option<f32> {
    if !(sensitivity > 0.0) {
        return None;
    }
    Some((1.0 - sensitivity.min(1.0)) * MAX_DEVIATION)
}

/// One exposure as input to automatic ghost detection.
#[derive(Debug, Copy, Clone)]
pub struct GhostInput<'a> {
    /// Channels `R`, `G`, `B` holding encoded values in [0.0, 1.0].
    pub frame: &'a Frame,
    /// Exposure factor (2^EV).
    pub average_luminance: f32,
}

/// Computes binary (0.0 / 1.0) ghost masks for every input.
///
/// `ldr` selects the path for 8-bit sources, which are linearized
/// through the sRGB curve and compared against the per-pixel median of
/// all exposures.  Otherwise values are taken as linear and compared
/// against the exposure with the most well-exposed pixels.
pub fn automatic_masks(
    inputs: &[GhostInput],
    ldr: bool,
    sensitivity: f32,
    progress: &dyn Progress,
) -> Result<Vec<Array2Df>> {
    let first = inputs.first().ok_or(Error::NoFrames)?;
    let (width, height) = first.frame.dimensions();
    for input in inputs.iter() {
        if input.frame.dimensions() != (width, height) {
            return Err(Error::SizeMismatch {
                expected: (width, height),
                got: input.frame.dimensions(),
            });
        }
    }

    let threshold = match threshold(sensitivity) {
        Some(t) => t,
        None => return Ok(vec![Array2Df::new(width, height); inputs.len()]),
    };

    // Exposure-normalized log2 luminance, NaN where unreliable.
    let log_lums: Vec<Vec<f32>> = inputs
        .iter()
        .map(|input| normalized_log_luminance(input, ldr))
        .collect::<Result<_>>()?;

    let reference = if ldr {
        None
    } else {
        Some(reference_index(&log_lums))
    };

    tracing::info!(
        frames = inputs.len(),
        ldr = ldr,
        sensitivity = sensitivity,
        threshold = threshold,
        reference = ?reference,
        "computing ghost masks"
    );

    let rows_done = AtomicUsize::new(0);
    let rows: Vec<Vec<Vec<f32>>> = (0..height)
        .into_par_iter()
        .map(|y| {
            if progress.is_canceled() {
                return Err(Error::Cancelled);
            }
            let mut row = vec![vec![0.0f32; width]; inputs.len()];
            let mut values = Vec::with_capacity(inputs.len());
            for x in 0..width {
                let i = y * width + x;
                let center = match reference {
                    Some(r) => log_lums[r][i],
                    None => {
                        values.clear();
                        values.extend(log_lums.iter().map(|l| l[i]).filter(|v| !v.is_nan()));
                        if values.len() < 2 {
                            continue;
                        }
                        median(&mut values)
                    }
                };
                if center.is_nan() {
                    continue;
                }
                for (k, l) in log_lums.iter().enumerate() {
                    if Some(k) == reference || l[i].is_nan() {
                        continue;
                    }
                    if (l[i] - center).abs() > threshold {
                        row[k][x] = 1.0;
                    }
                }
            }
            let done = rows_done.fetch_add(1, Ordering::Relaxed) + 1;
            progress.set_progress("Detecting ghosts", done as f32 / height as f32);
            Ok(row)
        })
        .collect::<Result<_>>()?;

    let mut masks = vec![Vec::with_capacity(width * height); inputs.len()];
    for row in rows {
        for (mask, mask_row) in masks.iter_mut().zip(row) {
            mask.extend_from_slice(&mask_row);
        }
    }
    Ok(masks
        .into_iter()
        .map(|m| Array2Df::from_vec(width, height, m))
        .collect())
}

/// Masks for fusing manually marked regions from a single "good"
/// exposure: every other exposure gets the union of the manual masks,
/// and the good exposure gets an empty mask.
pub fn good_image_masks(
    manual: &[Option<&Array2Df>],
    good_index: usize,
    dimensions: (usize, usize),
) -> Result<Vec<Array2Df>> {
    if good_index >= manual.len() {
        return Err(Error::NoSuchItem(good_index));
    }

    let mut union = Array2Df::new(dimensions.0, dimensions.1);
    for mask in manual.iter().flatten() {
        if mask.dimensions() != dimensions {
            return Err(Error::MaskSizeMismatch {
                expected: dimensions,
                got: mask.dimensions(),
            });
        }
        for (u, &m) in union.iter_mut().zip(mask.iter()) {
            *u = u.max(m);
        }
    }

    Ok((0..manual.len())
        .map(|i| {
            if i == good_index {
                Array2Df::new(dimensions.0, dimensions.1)
            } else {
                union.clone()
            }
        })
        .collect())
}

fn normalized_log_luminance(input: &GhostInput, ldr: bool) -> Result<Vec<f32>> {
    let (r, g, b) = input
        .frame
        .rgb_channels()
        .ok_or_else(|| Error::MissingChannel("R/G/B".into()))?;
    let inv_t = 1.0 / input.average_luminance;

    Ok((0..r.len())
        .map(|i| {
            let enc = [r[i], g[i], b[i]];
            let peak = enc[0].max(enc[1]).max(enc[2]);
            if !(LOW_CUTOFF..=HIGH_CUTOFF).contains(&peak) {
                return std::f32::NAN;
            }
            let lin = if ldr {
                [
                    srgb::to_linear(enc[0]),
                    srgb::to_linear(enc[1]),
                    srgb::to_linear(enc[2]),
                ]
            } else {
                enc
            };
            let lum = rgb_luminance(lin) * inv_t;
            if lum > 0.0 {
                lum.log2()
            } else {
                std::f32::NAN
            }
        })
        .collect())
}

/// Index of the exposure with the most usable pixels.
fn reference_index(log_lums: &[Vec<f32>]) -> usize {
    let mut best = (0, 0);
    for (k, l) in log_lums.iter().enumerate() {
        let usable = l.iter().filter(|v| !v.is_nan()).count();
        if usable > best.1 {
            best = (k, usable);
        }
    }
    best.0
}

fn median(values: &mut [f32]) -> f32 {
    values.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}
