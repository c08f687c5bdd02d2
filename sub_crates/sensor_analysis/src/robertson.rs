//! Camera response self-calibration after Robertson, Borman and
//! Stevenson, "Estimation-theoretic approach to dynamic range
//! enhancement using multiple exposures" (2003).

use nanorand::{Pcg64, Rng};

use crate::utils::make_monotonic;
use crate::WeightFunction;

/// Number of entries in a calibrated response table.
pub const RESPONSE_RESOLUTION: usize = 256;

/// Maximum number of pixel positions used for calibration.
pub const MAX_SAMPLES: usize = 1 << 16;

const CONVERGENCE_DELTA: f32 = 1.0e-6;
const MIN_SLOPE: f32 = 0.0001;

/// One channel of one exposure: normalized encoded values plus the
/// exposure factor of the image they came from.
#[derive(Debug, Copy, Clone)]
pub struct ExposureSamples<'a> {
    pub values: &'a [f32],
    pub exposure: f32,
}

/// Iteratively estimates one channel's inverse camera response.
///
/// Usage mirrors a simple optimizer: call `do_rounds()` until
/// `is_converged()` (or until the caller gives up), then fetch the
/// curve with `current_estimate()`.
pub struct RobertsonCalibrator<'a> {
    exposures: &'a [ExposureSamples<'a>],
    samples: Vec<usize>,
    weights: Vec<f32>,
    response: Vec<f32>,
    radiance: Vec<f32>,
    current_round: usize,
    last_delta: f32,
}

impl<'a> RobertsonCalibrator<'a> {
    /// All exposures must hold the same number of values.
    pub fn new(exposures: &'a [ExposureSamples<'a>], weight: WeightFunction) -> RobertsonCalibrator<'a> {
        assert!(!exposures.is_empty());
        let pixel_count = exposures[0].values.len();
        debug_assert!(exposures.iter().all(|e| e.values.len() == pixel_count));

        // Pick the sample positions.  Uses a fixed seed so that
        // calibration is reproducible.
        let samples: Vec<usize> = if pixel_count <= MAX_SAMPLES {
            (0..pixel_count).collect()
        } else {
            let mut rand = Pcg64::new_seed(0x5a1c_93f0_66d2_4e1b_8f07_c3a9_d4e2_b176);
            let mut samples: Vec<usize> = (0..MAX_SAMPLES)
                .map(|_| rand.generate::<u64>() as usize % pixel_count)
                .collect();
            samples.sort_unstable();
            samples
        };

        let response: Vec<f32> = (0..RESPONSE_RESOLUTION)
            .map(|i| i as f32 / (RESPONSE_RESOLUTION / 2) as f32)
            .collect();

        RobertsonCalibrator {
            exposures: exposures,
            radiance: vec![0.0; samples.len()],
            samples: samples,
            weights: weight.table(RESPONSE_RESOLUTION),
            response: response,
            current_round: 0,
            last_delta: std::f32::INFINITY,
        }
    }

    #[inline(always)]
    fn bin(v: f32) -> usize {
        (v.max(0.0).min(1.0) * (RESPONSE_RESOLUTION - 1) as f32).round() as usize
    }

    pub fn do_rounds(&mut self, rounds: usize) {
        for _ in 0..rounds {
            if self.is_converged() {
                break;
            }
            self.current_round += 1;

            // Radiance estimate for every sample from the current response.
            for (s, &p) in self.samples.iter().enumerate() {
                let mut num = 0.0f32;
                let mut den = 0.0f32;
                for e in self.exposures.iter() {
                    let m = Self::bin(e.values[p]);
                    let w = self.weights[m];
                    num += w * e.exposure * self.response[m];
                    den += w * e.exposure * e.exposure;
                }
                self.radiance[s] = if den > 0.0 {
                    num / den
                } else {
                    // Every sample is at a zero-weight level, so fall
                    // back to an unweighted estimate.
                    let mut num = 0.0f32;
                    let mut den = 0.0f32;
                    for e in self.exposures.iter() {
                        let m = Self::bin(e.values[p]);
                        num += e.exposure * self.response[m];
                        den += e.exposure * e.exposure;
                    }
                    num / den
                };
            }

            // Response estimate from the radiances.
            let mut sums = vec![0.0f64; RESPONSE_RESOLUTION];
            let mut counts = vec![0usize; RESPONSE_RESOLUTION];
            for (s, &p) in self.samples.iter().enumerate() {
                for e in self.exposures.iter() {
                    let m = Self::bin(e.values[p]);
                    sums[m] += (e.exposure * self.radiance[s]) as f64;
                    counts[m] += 1;
                }
            }
            let mut new_response = self.response.clone();
            for m in 0..RESPONSE_RESOLUTION {
                if counts[m] > 0 {
                    new_response[m] = (sums[m] / counts[m] as f64) as f32;
                }
            }

            // Normalize so the middle of the curve is 1.0.
            let mid = new_response[RESPONSE_RESOLUTION / 2];
            if mid > 0.0 {
                for v in new_response.iter_mut() {
                    *v /= mid;
                }
            }

            self.last_delta = new_response
                .iter()
                .zip(self.response.iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f32>()
                / RESPONSE_RESOLUTION as f32;
            self.response = new_response;
        }
    }

    pub fn is_converged(&self) -> bool {
        self.last_delta < CONVERGENCE_DELTA
    }

    pub fn rounds(&self) -> usize {
        self.current_round
    }

    /// Returns the current estimate, rescaled to [0.0, 1.0] and made
    /// strictly increasing.
    pub fn current_estimate(&self) -> Vec<f32> {
        let mut curve = self.response.clone();
        let floor = curve[0].max(0.0);
        for v in curve.iter_mut() {
            *v = (*v - floor).max(0.0);
        }
        make_monotonic(&mut curve, MIN_SLOPE / RESPONSE_RESOLUTION as f32);
        let max = curve[RESPONSE_RESOLUTION - 1];
        if max > 0.0 {
            for v in curve.iter_mut() {
                *v /= max;
            }
        }
        curve
    }
}

/// Runs the calibration to convergence, or for at most `max_rounds`.
pub fn calibrate_robertson(
    exposures: &[ExposureSamples],
    weight: WeightFunction,
    max_rounds: usize,
) -> Vec<f32> {
    let mut calibrator = RobertsonCalibrator::new(exposures, weight);
    calibrator.do_rounds(max_rounds);
    calibrator.current_estimate()
}

#[cfg(test)]
mod tests {
    use super::*;

    // A synthetic scene seen through a known response at three
    // exposures.
    fn synthetic(response: impl Fn(f32) -> f32) -> (Vec<Vec<f32>>, Vec<f32>) {
        let exposures = vec![0.25f32, 1.0, 4.0];
        let radiance: Vec<f32> = (0..4096).map(|i| (i as f32 / 4095.0).powf(2.0) * 0.9 + 0.002).collect();
        let images = exposures
            .iter()
            .map(|t| {
                radiance
                    .iter()
                    .map(|r| {
                        let v = response((r * t).min(1.0));
                        (v * 255.0).round() / 255.0
                    })
                    .collect()
            })
            .collect();
        (images, exposures)
    }

    #[test]
    fn output_is_normalized_and_monotonic() {
        let (images, exposures) = synthetic(|x| x.powf(1.0 / 2.2));
        let samples: Vec<_> = images
            .iter()
            .zip(exposures.iter())
            .map(|(v, &t)| ExposureSamples {
                values: v,
                exposure: t,
            })
            .collect();
        let curve = calibrate_robertson(&samples, WeightFunction::Gaussian, 25);

        assert_eq!(curve.len(), RESPONSE_RESOLUTION);
        assert_eq!(curve[0], 0.0);
        assert!((curve[RESPONSE_RESOLUTION - 1] - 1.0).abs() < 1e-6);
        for pair in curve.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[test]
    fn recovers_gamma_shape() {
        let (images, exposures) = synthetic(|x| x.powf(1.0 / 2.2));
        let samples: Vec<_> = images
            .iter()
            .zip(exposures.iter())
            .map(|(v, &t)| ExposureSamples {
                values: v,
                exposure: t,
            })
            .collect();
        let curve = calibrate_robertson(&samples, WeightFunction::Triangular, 50);

        // A gamma-encoded input needs an expanding (convex) inverse
        // response: the middle of the curve lies well below the diagonal.
        assert!(curve[RESPONSE_RESOLUTION / 2] < 0.45);
    }

    #[test]
    fn deterministic() {
        let (images, exposures) = synthetic(|x| x);
        let samples: Vec<_> = images
            .iter()
            .zip(exposures.iter())
            .map(|(v, &t)| ExposureSamples {
                values: v,
                exposure: t,
            })
            .collect();
        let a = calibrate_robertson(&samples, WeightFunction::Plateau, 10);
        let b = calibrate_robertson(&samples, WeightFunction::Plateau, 10);
        assert_eq!(a, b);
    }
}
