//! Merging of differently exposed frames into one radiance map.

use std::{
    path::PathBuf,
    sync::atomic::{AtomicUsize, Ordering},
};

use rayon::prelude::*;

use job_queue::Progress;
use pfs::{Array2Df, Frame};
use sensor_analysis::{
    CurveError, ExposureSamples, ResponseCurve, ResponseTable, RobertsonCalibrator, WeightFunction,
};

use crate::{
    error::{Error, Result},
    job_helpers,
};

/// Maximum number of self-calibration iterations.
pub const CALIBRATION_ROUNDS: usize = 25;

/// Where the camera response comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseSource {
    Curve(ResponseCurve),
    /// A `.spi1d` curve file.
    File(PathBuf),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FusionAlgorithm {
    Debevec,
    Robertson,
}

/// The valid combinations of weighting, response and merge algorithm.
#[derive(Debug, Clone, PartialEq)]
pub enum FusionConfig {
    Debevec {
        weight: WeightFunction,
        response: ResponseSource,
    },
    Robertson {
        weight: WeightFunction,
        response: ResponseSource,
    },
    /// Robertson merging with a response calibrated from the frames
    /// themselves, optionally saved to `output_curve`.
    RobertsonAuto {
        weight: WeightFunction,
        output_curve: Option<PathBuf>,
    },
}

impl Default for FusionConfig {
    fn default() -> FusionConfig {
        FusionConfig::Debevec {
            weight: WeightFunction::Triangular,
            response: ResponseSource::Curve(ResponseCurve::Linear),
        }
    }
}

impl FusionConfig {
    pub fn weight(&self) -> WeightFunction {
        match *self {
            FusionConfig::Debevec { weight, .. } => weight,
            FusionConfig::Robertson { weight, .. } => weight,
            FusionConfig::RobertsonAuto { weight, .. } => weight,
        }
    }

    pub fn algorithm(&self) -> FusionAlgorithm {
        match *self {
            FusionConfig::Debevec { .. } => FusionAlgorithm::Debevec,
            FusionConfig::Robertson { .. } | FusionConfig::RobertsonAuto { .. } => {
                FusionAlgorithm::Robertson
            }
        }
    }
}

/// The stock configurations offered to users.
pub fn predefined_configs() -> Vec<FusionConfig> {
    let mut configs = Vec::with_capacity(6);
    for &weight in [
        WeightFunction::Triangular,
        WeightFunction::Plateau,
        WeightFunction::Gaussian,
    ]
    .iter()
    {
        for curve in [ResponseCurve::Linear, ResponseCurve::Gamma].iter() {
            configs.push(FusionConfig::Debevec {
                weight: weight,
                response: ResponseSource::Curve(curve.clone()),
            });
        }
    }
    configs
}

/// One exposure as seen by the fusion engine.
#[derive(Debug, Copy, Clone)]
pub struct FusionInput<'a> {
    pub name: &'a str,
    /// Channels `R`, `G`, `B` holding encoded values in [0.0, 1.0].
    pub frame: &'a Frame,
    /// The exposure factor (2^EV), if known.
    pub average_luminance: Option<f32>,
    /// Ghost mask, 1.0 = ghost.
    pub mask: Option<&'a Array2Df>,
}

struct Exposure<'a> {
    channels: [&'a [f32]; 3],
    t: f32,
    mask: Option<&'a [f32]>,
}

/// Merges `inputs` into one RGB radiance frame.
///
/// All preconditions are checked before any work is done.
pub fn fuse(inputs: &[FusionInput], config: &FusionConfig, progress: &dyn Progress) -> Result<Frame> {
    let exposures = validate(inputs)?;
    let (width, height) = inputs[0].frame.dimensions();

    tracing::info!(
        frames = inputs.len(),
        width = width,
        height = height,
        config = ?config,
        "merging exposures"
    );

    let response = resolve_response(config, &exposures, progress)?;
    let weight = config.weight();
    let algorithm = config.algorithm();

    let rows_done = AtomicUsize::new(0);
    let rows: Vec<[Vec<f32>; 3]> = (0..height)
        .into_par_iter()
        .map(|y| {
            if progress.is_canceled() {
                return Err(Error::Cancelled);
            }
            let row = fuse_row(&exposures, y * width, width, weight, &response, algorithm);
            let done = rows_done.fetch_add(1, Ordering::Relaxed) + 1;
            progress.set_progress("Merging exposures", done as f32 / height as f32);
            Ok(row)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut planes = [
        Vec::with_capacity(width * height),
        Vec::with_capacity(width * height),
        Vec::with_capacity(width * height),
    ];
    for row in rows {
        for (plane, row_plane) in planes.iter_mut().zip(row.iter()) {
            plane.extend_from_slice(row_plane);
        }
    }
    let [r, g, b] = planes;
    let frame = Frame::from_rgb(
        Array2Df::from_vec(width, height, r),
        Array2Df::from_vec(width, height, g),
        Array2Df::from_vec(width, height, b),
    )?;

    progress.set_progress("Merging exposures", 1.0);
    tracing::info!("merge finished");
    Ok(frame)
}

fn validate<'a>(inputs: &[FusionInput<'a>]) -> Result<Vec<Exposure<'a>>> {
    let first = inputs.first().ok_or(Error::NoFrames)?;
    let dimensions = first.frame.dimensions();

    for input in inputs.iter() {
        if input.frame.dimensions() != dimensions {
            return Err(Error::SizeMismatch {
                expected: dimensions,
                got: input.frame.dimensions(),
            });
        }
        if let Some(mask) = input.mask {
            if mask.dimensions() != dimensions {
                return Err(Error::MaskSizeMismatch {
                    expected: dimensions,
                    got: mask.dimensions(),
                });
            }
        }
    }

    let missing: Vec<String> = inputs
        .iter()
        .filter(|i| !matches!(i.average_luminance, Some(t) if t > 0.0 && t.is_finite()))
        .map(|i| i.name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(Error::MissingExposure(missing));
    }

    inputs
        .iter()
        .map(|input| {
            let (r, g, b) = input
                .frame
                .rgb_channels()
                .ok_or_else(|| Error::MissingChannel("R/G/B".into()))?;
            Ok(Exposure {
                channels: [r.as_slice(), g.as_slice(), b.as_slice()],
                t: input.average_luminance.unwrap_or(1.0),
                mask: input.mask.map(|m| m.as_slice()),
            })
        })
        .collect()
}

fn resolve_response(config: &FusionConfig, exposures: &[Exposure], progress: &dyn Progress) -> Result<ResponseCurve> {
    match config {
        FusionConfig::Debevec { response, .. } | FusionConfig::Robertson { response, .. } => {
            match response {
                ResponseSource::Curve(curve) => Ok(curve.clone()),
                ResponseSource::File(path) => {
                    tracing::info!(path = %path.display(), "loading response curve");
                    Ok(ResponseCurve::Table(job_helpers::read_response_curve(path)?))
                }
            }
        }
        FusionConfig::RobertsonAuto {
            weight,
            output_curve,
        } => {
            let table = calibrate(exposures, *weight, progress)?;
            if let Some(path) = output_curve {
                tracing::info!(path = %path.display(), "writing calibrated response curve");
                job_helpers::write_response_curve(path, &table)?;
            }
            Ok(ResponseCurve::Table(table))
        }
    }
}

fn calibrate(exposures: &[Exposure], weight: WeightFunction, progress: &dyn Progress) -> Result<ResponseTable> {
    let mut curves: Vec<Vec<f32>> = Vec::with_capacity(3);
    for chan in 0..3 {
        let samples: Vec<ExposureSamples> = exposures
            .iter()
            .map(|e| ExposureSamples {
                values: e.channels[chan],
                exposure: e.t,
            })
            .collect();

        let mut calibrator = RobertsonCalibrator::new(&samples, weight);
        for round in 0..CALIBRATION_ROUNDS {
            if progress.is_canceled() {
                return Err(Error::Cancelled);
            }
            progress.set_progress(
                "Calibrating camera response",
                (chan * CALIBRATION_ROUNDS + round) as f32 / (3 * CALIBRATION_ROUNDS) as f32,
            );
            calibrator.do_rounds(1);
            if calibrator.is_converged() {
                break;
            }
        }
        tracing::debug!(
            channel = chan,
            rounds = calibrator.rounds(),
            converged = calibrator.is_converged(),
            "response calibration"
        );
        curves.push(calibrator.current_estimate());
    }

    let b = curves.pop().unwrap_or_default();
    let g = curves.pop().unwrap_or_default();
    let r = curves.pop().unwrap_or_default();
    ResponseTable::new([r, g, b]).ok_or(Error::Curve(CurveError::BadLength))
}

fn fuse_row(
    exposures: &[Exposure],
    row_start: usize,
    width: usize,
    weight: WeightFunction,
    response: &ResponseCurve,
    algorithm: FusionAlgorithm,
) -> [Vec<f32>; 3] {
    let mut out = [vec![0.0f32; width], vec![0.0f32; width], vec![0.0f32; width]];

    for x in 0..width {
        let i = row_start + x;
        for chan in 0..3 {
            let mut num = 0.0f32;
            let mut den = 0.0f32;
            for e in exposures.iter() {
                let m = e.mask.map(|m| m[i]).unwrap_or(0.0);
                if m >= 0.5 {
                    continue;
                }
                let v = e.channels[chan][i];
                let w = weight.eval(v) * (1.0 - m);
                let f = response.eval(chan, v);
                match algorithm {
                    FusionAlgorithm::Debevec => {
                        num += w * f / e.t;
                        den += w;
                    }
                    FusionAlgorithm::Robertson => {
                        num += w * e.t * f;
                        den += w * e.t * e.t;
                    }
                }
            }

            out[chan][x] = if den > 0.0 {
                num / den
            } else {
                // Nothing usable: fall back to an unweighted average
                // of every exposure's estimate.
                let sum: f32 = exposures
                    .iter()
                    .map(|e| response.eval(chan, e.channels[chan][i]) / e.t)
                    .sum();
                sum / exposures.len() as f32
            };
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use job_queue::{CallbackProgress, CancelFlag, NullProgress};

    fn frame_from_fn(w: usize, h: usize, f: impl Fn(usize, usize, usize) -> f32) -> Frame {
        let plane = |c: usize| {
            let mut a = Array2Df::new(w, h);
            for y in 0..h {
                for x in 0..w {
                    a[(x, y)] = f(x, y, c);
                }
            }
            a
        };
        Frame::from_rgb(plane(0), plane(1), plane(2)).unwrap()
    }

    fn gradient(w: usize, h: usize) -> Frame {
        frame_from_fn(w, h, |x, y, c| ((x + 2 * y + 3 * c) % 17) as f32 / 16.0)
    }

    fn inputs<'a>(frames: &'a [Frame], lums: &[f32]) -> Vec<FusionInput<'a>> {
        frames
            .iter()
            .zip(lums.iter())
            .map(|(f, &l)| FusionInput {
                name: "frame",
                frame: f,
                average_luminance: Some(l),
                mask: None,
            })
            .collect()
    }

    fn flat_linear() -> FusionConfig {
        FusionConfig::Debevec {
            weight: WeightFunction::Flat,
            response: ResponseSource::Curve(ResponseCurve::Linear),
        }
    }

    #[test]
    fn output_has_input_dimensions() {
        let frames = vec![gradient(13, 7), gradient(13, 7)];
        let out = fuse(&inputs(&frames, &[0.5, 2.0]), &FusionConfig::default(), &NullProgress).unwrap();
        assert_eq!(out.dimensions(), (13, 7));
        assert!(out.rgb_channels().is_some());
        assert_eq!(out.tag(pfs::LUMINANCE_TAG), None);
    }

    #[test]
    fn identical_copies_reproduce_radiance() {
        let frames = vec![gradient(9, 5), gradient(9, 5), gradient(9, 5)];
        let lum = 2.0f32.powf(1.5);
        for &weight in WeightFunction::ALL.iter() {
            for curve in [ResponseCurve::Linear, ResponseCurve::Gamma, ResponseCurve::Srgb].iter() {
                let configs = [
                    FusionConfig::Debevec {
                        weight: weight,
                        response: ResponseSource::Curve(curve.clone()),
                    },
                    FusionConfig::Robertson {
                        weight: weight,
                        response: ResponseSource::Curve(curve.clone()),
                    },
                ];
                for config in configs.iter() {
                    let out = fuse(&inputs(&frames, &[lum; 3]), config, &NullProgress).unwrap();
                    for (name, c) in [("R", 0), ("G", 1), ("B", 2)].iter() {
                        let got = out.channel(name).unwrap();
                        let src = frames[0].channel(name).unwrap();
                        for i in 0..got.len() {
                            let expected = curve.eval(*c, src[i]) / lum;
                            assert!(
                                (got[i] - expected).abs() <= 1e-5 * (1.0 + expected),
                                "{:?}: {} vs {}",
                                config,
                                got[i],
                                expected
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn three_exposures_flat_linear() {
        let evs = [-2.0f32, 0.0, 2.0];
        let frames: Vec<Frame> = (0..3)
            .map(|k| frame_from_fn(100, 100, move |x, y, c| ((x * 7 + y * 3 + c + k * 11) % 97) as f32 / 96.0))
            .collect();
        let lums: Vec<f32> = evs.iter().map(|ev| 2.0f32.powf(*ev)).collect();

        let out = fuse(&inputs(&frames, &lums), &flat_linear(), &NullProgress).unwrap();
        assert_eq!(out.dimensions(), (100, 100));
        let got = out.channel("G").unwrap();
        for i in 0..got.len() {
            let expected: f32 = (0..3)
                .map(|k| frames[k].channel("G").unwrap()[i] / lums[k])
                .sum::<f32>()
                / 3.0;
            assert!((got[i] - expected).abs() < 1e-5 * (1.0 + expected));
        }
    }

    #[test]
    fn size_mismatch_fails_fast() {
        let frames = vec![gradient(8, 8), gradient(8, 7)];
        let cancel = CancelFlag::new();
        let r = fuse(&inputs(&frames, &[1.0, 2.0]), &flat_linear(), &cancel);
        assert!(matches!(
            r,
            Err(Error::SizeMismatch {
                expected: (8, 8),
                got: (8, 7)
            })
        ));
    }

    #[test]
    fn no_frames() {
        assert!(matches!(
            fuse(&[], &flat_linear(), &NullProgress),
            Err(Error::NoFrames)
        ));
    }

    #[test]
    fn missing_exposure_lists_names() {
        let frames = vec![gradient(4, 4), gradient(4, 4), gradient(4, 4)];
        let mut ins = inputs(&frames, &[1.0, 1.0, 1.0]);
        ins[0].name = "a.jpg";
        ins[1].name = "b.jpg";
        ins[1].average_luminance = None;
        ins[2].name = "c.jpg";
        ins[2].average_luminance = Some(0.0);
        match fuse(&ins, &flat_linear(), &NullProgress) {
            Err(Error::MissingExposure(names)) => assert_eq!(names, vec!["b.jpg", "c.jpg"]),
            r => panic!("unexpected result: {:?}", r.map(|_| ())),
        }
    }

    #[test]
    fn masks_exclude_ghosts() {
        let frames = vec![
            frame_from_fn(2, 1, |_, _, _| 0.5),
            frame_from_fn(2, 1, |_, _, _| 0.25),
        ];
        // Pixel 0: second exposure is a ghost.  Pixel 1: both are.
        let ghost_all = Array2Df::from_vec(2, 1, vec![0.0, 1.0]);
        let ghost_second = Array2Df::from_vec(2, 1, vec![0.9, 0.5]);
        let mut ins = inputs(&frames, &[1.0, 1.0]);
        ins[0].mask = Some(&ghost_all);
        ins[1].mask = Some(&ghost_second);

        let out = fuse(&ins, &flat_linear(), &NullProgress).unwrap();
        let r = out.channel("R").unwrap();
        assert_eq!(r[0], 0.5);
        assert!((r[1] - 0.375).abs() < 1e-6);
    }

    #[test]
    fn graded_masks_scale_weights() {
        let frames = vec![
            frame_from_fn(1, 1, |_, _, _| 0.8),
            frame_from_fn(1, 1, |_, _, _| 0.2),
        ];
        let mask = Array2Df::from_vec(1, 1, vec![0.25]);
        let mut ins = inputs(&frames, &[1.0, 1.0]);
        ins[0].mask = Some(&mask);

        let out = fuse(&ins, &flat_linear(), &NullProgress).unwrap();
        let expected = (0.75 * 0.8 + 0.2) / 1.75;
        assert!((out.channel("R").unwrap()[0] - expected).abs() < 1e-6);
    }

    #[test]
    fn mask_size_is_checked() {
        let frames = vec![gradient(4, 4)];
        let mask = Array2Df::new(3, 4);
        let mut ins = inputs(&frames, &[1.0]);
        ins[0].mask = Some(&mask);
        assert!(matches!(
            fuse(&ins, &flat_linear(), &NullProgress),
            Err(Error::MaskSizeMismatch { .. })
        ));
    }

    #[test]
    fn cancellation() {
        let frames = vec![gradient(16, 16), gradient(16, 16)];
        let cancel = CancelFlag::new();
        cancel.cancel();
        assert!(matches!(
            fuse(&inputs(&frames, &[1.0, 4.0]), &flat_linear(), &cancel),
            Err(Error::Cancelled)
        ));
    }

    #[test]
    fn cancel_part_way() {
        let (w, h) = (8, 4096);
        let frames = vec![gradient(w, h), gradient(w, h)];
        let cancel = CancelFlag::new();
        let rows = AtomicUsize::new(0);
        let flag = cancel.clone();
        let progress = CallbackProgress::new(
            |_: &str, _| {
                if rows.fetch_add(1, Ordering::Relaxed) + 1 == 3 {
                    flag.cancel();
                }
            },
            cancel.clone(),
        );

        assert!(matches!(
            fuse(&inputs(&frames, &[1.0, 4.0]), &flat_linear(), &progress),
            Err(Error::Cancelled)
        ));
        assert!(rows.load(Ordering::Relaxed) < h);
        assert_eq!(frames[0], gradient(w, h));
    }

    #[test]
    fn self_calibration_writes_curve() {
        let dir = tempfile::tempdir().unwrap();
        let curve_path = dir.path().join("calibrated.spi1d");

        let scene = |x: usize, y: usize| 0.02 + 0.9 * ((x * 31 + y * 17) % 64) as f32 / 63.0;
        let lums = [0.25f32, 1.0, 4.0];
        let frames: Vec<Frame> = lums
            .iter()
            .map(|&t| frame_from_fn(32, 32, move |x, y, _| (scene(x, y) * t).min(1.0).powf(1.0 / 2.2)))
            .collect();
        let config = FusionConfig::RobertsonAuto {
            weight: WeightFunction::Gaussian,
            output_curve: Some(curve_path.clone()),
        };

        let out = fuse(&inputs(&frames, &lums), &config, &NullProgress).unwrap();
        assert!(out.channel("R").unwrap().iter().all(|v| v.is_finite() && *v >= 0.0));

        let table = job_helpers::read_response_curve(&curve_path).unwrap();
        assert_eq!(table.resolution(), sensor_analysis::RESPONSE_RESOLUTION);
        assert_eq!(table.channel(0)[0], 0.0);
    }

    #[test]
    fn response_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("double.spi1d");
        std::fs::write(
            &path,
            "Version 1\nFrom 0.0 1.0\nLength 2\nComponents 1\n{\n  0.0\n  2.0\n}\n",
        )
        .unwrap();

        let frames = vec![frame_from_fn(1, 1, |_, _, _| 0.25)];
        let config = FusionConfig::Debevec {
            weight: WeightFunction::Flat,
            response: ResponseSource::File(path),
        };
        let out = fuse(&inputs(&frames, &[1.0]), &config, &NullProgress).unwrap();
        assert_eq!(out.channel("B").unwrap()[0], 0.5);
    }

    #[test]
    fn predefined() {
        let configs = predefined_configs();
        assert_eq!(configs.len(), 6);
        for (i, a) in configs.iter().enumerate() {
            assert_eq!(a.algorithm(), FusionAlgorithm::Debevec);
            for b in configs[(i + 1)..].iter() {
                assert_ne!(a, b);
            }
        }
        assert_eq!(configs[0], FusionConfig::default());
    }
}
