//! Median threshold bitmap alignment, after Ward, "Fast, Robust Image
//! Registration for Compositing High Dynamic Range Photographs from
//! Hand-Held Exposures" (2003).
//!
//! Only translations are recovered.

use rayon::prelude::*;

use job_queue::Progress;
use pfs::Frame;
use sensor_analysis::Histogram;

use crate::error::{Error, Result};

/// Number of pyramid levels above full resolution at most.  Offsets up
/// to `±(2^(MAX_SHIFT_BITS + 1) - 1)` pixels can be found.
pub const MAX_SHIFT_BITS: usize = 6;

// The smallest pyramid level is kept at least this many pixels across.
const MIN_LEVEL_SIZE: usize = 16;

// Pixels this close to the median are left out of the comparison.
const NOISE: u8 = 4;

/// Finds the translation of each frame relative to the first one.
///
/// The returned offset `(dx, dy)` of a frame is the shift that lines it
/// up with the first frame, i.e. `frame.shift(dx, dy)` registers it.
/// The first offset is always `(0, 0)`.
pub fn mtb_offsets(frames: &[&Frame], progress: &dyn Progress) -> Result<Vec<(i32, i32)>> {
    let first = frames.first().ok_or(Error::NoFrames)?;
    let dimensions = first.dimensions();
    for f in frames.iter() {
        if f.dimensions() != dimensions {
            return Err(Error::SizeMismatch {
                expected: dimensions,
                got: f.dimensions(),
            });
        }
    }

    let shift_bits = shift_bits(dimensions);
    let reference = pyramid(&grey(first)?, shift_bits);

    let mut offsets = vec![(0, 0)];
    for (i, frame) in frames.iter().enumerate().skip(1) {
        progress.set_progress("Aligning images", (i - 1) as f32 / (frames.len() - 1) as f32);
        let levels = pyramid(&grey(frame)?, shift_bits);

        let mut shift = (0i32, 0i32);
        for level in (0..=shift_bits).rev() {
            if progress.is_canceled() {
                return Err(Error::Cancelled);
            }
            shift = (shift.0 * 2, shift.1 * 2);
            let a = Bitmaps::new(&reference[level]);
            let b = Bitmaps::new(&levels[level]);

            // Center first, and only move on a strict improvement.
            let mut best = (shift, a.difference(&b, shift));
            for dy in -1..=1 {
                for dx in -1..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let candidate = (shift.0 + dx, shift.1 + dy);
                    let err = a.difference(&b, candidate);
                    if err < best.1 {
                        best = (candidate, err);
                    }
                }
            }
            shift = best.0;
        }

        tracing::debug!(frame = i, dx = shift.0, dy = shift.1, "mtb offset");
        offsets.push(shift);
    }

    progress.set_progress("Aligning images", 1.0);
    Ok(offsets)
}

fn shift_bits(dimensions: (usize, usize)) -> usize {
    let size = dimensions.0.min(dimensions.1);
    let mut bits = 0;
    while bits < MAX_SHIFT_BITS && (size >> (bits + 1)) >= MIN_LEVEL_SIZE {
        bits += 1;
    }
    bits
}

#[derive(Debug, Clone)]
struct GreyImage {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

fn grey(frame: &Frame) -> Result<GreyImage> {
    let (r, g, b) = frame
        .rgb_channels()
        .ok_or_else(|| Error::MissingChannel("R/G/B".into()))?;
    let to_u32 = |v: f32| (v.max(0.0).min(1.0) * 255.0).round() as u32;
    let data = r
        .iter()
        .zip(g.iter())
        .zip(b.iter())
        .map(|((&r, &g), &b)| ((54 * to_u32(r) + 183 * to_u32(g) + 19 * to_u32(b)) / 256) as u8)
        .collect();
    Ok(GreyImage {
        width: frame.width(),
        height: frame.height(),
        data: data,
    })
}

/// Level 0 is the full image, each further level halves it.
fn pyramid(image: &GreyImage, shift_bits: usize) -> Vec<GreyImage> {
    let mut levels = vec![image.clone()];
    for _ in 0..shift_bits {
        let prev = &levels[levels.len() - 1];
        let (w, h) = (prev.width / 2, prev.height / 2);
        let mut data = Vec::with_capacity(w * h);
        for y in 0..h {
            let row0 = &prev.data[(y * 2 * prev.width)..];
            let row1 = &prev.data[((y * 2 + 1) * prev.width)..];
            for x in 0..w {
                let sum = row0[x * 2] as u32
                    + row0[x * 2 + 1] as u32
                    + row1[x * 2] as u32
                    + row1[x * 2 + 1] as u32;
                data.push(((sum + 2) / 4) as u8);
            }
        }
        levels.push(GreyImage {
            width: w,
            height: h,
            data: data,
        });
    }
    levels
}

struct Bitmaps {
    width: usize,
    height: usize,
    threshold: Vec<bool>,
    exclusion: Vec<bool>,
}

impl Bitmaps {
    fn new(image: &GreyImage) -> Bitmaps {
        let median = Histogram::from_iter(image.data.iter().copied(), 256).median() as i32;
        Bitmaps {
            width: image.width,
            height: image.height,
            threshold: image.data.iter().map(|&v| v as i32 > median).collect(),
            exclusion: image
                .data
                .iter()
                .map(|&v| (v as i32 - median).abs() > NOISE as i32)
                .collect(),
        }
    }

    /// Number of significant pixels that disagree when `other` is
    /// moved by `shift`.
    fn difference(&self, other: &Bitmaps, shift: (i32, i32)) -> usize {
        let (w, h) = (self.width as i64, self.height as i64);
        let (dx, dy) = (shift.0 as i64, shift.1 as i64);
        (0..h)
            .into_par_iter()
            .map(|y| {
                let sy = y - dy;
                if sy < 0 || sy >= h {
                    return 0;
                }
                let mut count = 0;
                for x in 0..w {
                    let sx = x - dx;
                    if sx < 0 || sx >= w {
                        continue;
                    }
                    let i = (y * w + x) as usize;
                    let j = (sy * w + sx) as usize;
                    if self.exclusion[i] && other.exclusion[j] && self.threshold[i] != other.threshold[j] {
                        count += 1;
                    }
                }
                count
            })
            .sum()
    }
}
