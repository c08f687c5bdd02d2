//! Pattanaik, Tumblin, Yee and Greenberg, "Time-Dependent Visual
//! Adaptation for Realistic Image Display" (SIGGRAPH 2000).

use job_queue::Progress;
use pfs::{
    colorspace::{rgb_to_xyz, xyz_to_rgb},
    Array2Df, Frame, LUMINANCE_TAG,
};

use crate::{
    adaptation::{clamp_level, cone_bleaching, rod_bleaching, VisualAdaptationModel},
    TmoError, ToneMapper,
};

/// Response compression exponent.
const N: f32 = 0.73;

/// Adaptation luminance of the display, in cd/m^2.
const DISPLAY_ADAPTATION: f32 = 50.0;

/// Time step of the time-dependent mode, in seconds.
const TIME_STEP: f32 = 1.0 / 16.0;

/// Simulated viewing time of the time-dependent mode, in seconds.
const VIEWING_TIME: f32 = 2.0;

/// Radius of the neighbourhood used for local adaptation, in pixels.
const LOCAL_RADIUS: usize = 4;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Pattanaik00Params {
    /// Adapt every pixel to its own neighbourhood instead of the whole
    /// frame.
    pub local: bool,

    /// Scales the input luminance before anything else.
    pub multiplier: f32,

    /// Explicit cone and rod adaptation levels, used when `autolum` is
    /// off.
    pub acone: f32,
    pub arod: f32,

    /// Derive the adaptation levels from the frame's log-average
    /// luminance.
    pub autolum: bool,

    /// Simulate the eye adapting over time rather than assuming it is
    /// fully adapted.
    pub time_dependent: bool,
}

impl Default for Pattanaik00Params {
    fn default() -> Pattanaik00Params {
        Pattanaik00Params {
            local: false,
            multiplier: 1.0,
            acone: 0.00001,
            arod: 0.00001,
            autolum: true,
            time_dependent: false,
        }
    }
}

/// The Pattanaik00 operator with a fixed set of parameters.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Pattanaik00 {
    pub params: Pattanaik00Params,
}

impl ToneMapper for Pattanaik00 {
    fn name(&self) -> &'static str {
        "pattanaik00"
    }

    fn tone_map(&self, frame: &mut Frame, progress: &dyn Progress) -> Result<(), TmoError> {
        pattanaik00(frame, &self.params, progress)
    }
}

/// Tone maps the X, Y and Z channels of `frame` in place.
///
/// The frame is tagged `LUMINANCE=RELATIVE` even when this fails.  On
/// failure (including cancellation) the channel data is left untouched.
pub fn pattanaik00(
    frame: &mut Frame,
    params: &Pattanaik00Params,
    progress: &dyn Progress,
) -> Result<(), TmoError> {
    tracing::info!(
        local = params.local,
        multiplier = params.multiplier,
        acone = params.acone,
        arod = params.arod,
        autolum = params.autolum,
        time_dependent = params.time_dependent,
        "pattanaik00"
    );

    frame.set_tag(LUMINANCE_TAG, "RELATIVE");

    let (x, y, z) = frame.xyz_channels().ok_or(TmoError::MissingChannels)?;
    let (mut x, mut y, mut z) = (x.clone(), y.clone(), z.clone());

    if params.multiplier != 1.0 {
        for a in [&mut x, &mut y, &mut z] {
            for v in a.iter_mut() {
                *v *= params.multiplier;
            }
        }
    }

    let mut model = VisualAdaptationModel::new();
    if !params.local {
        if params.time_dependent {
            let steps = (VIEWING_TIME / TIME_STEP).round() as usize;
            for _ in 0..steps {
                model.calculate_adaptation(&y, TIME_STEP);
            }
        } else if params.autolum {
            model.set_adaptation_from_luminance(&y);
        } else {
            model.set_adaptation(params.acone, params.arod);
        }
        tracing::debug!(
            cone = model.cone_adaptation(),
            rod = model.rod_adaptation(),
            "adaptation levels"
        );
    }

    let local_adaptation = if params.local {
        Some(box_filter(&y, LOCAL_RADIUS))
    } else {
        None
    };

    tone_map_xyz(
        [&mut x, &mut y, &mut z],
        &model,
        local_adaptation.as_ref(),
        progress,
    )?;

    // Commit.
    if let Some((fx, fy, fz)) = frame.xyz_channels_mut() {
        *fx = x;
        *fy = y;
        *fz = z;
    }
    progress.set_progress("Tone mapping", 1.0);

    Ok(())
}

/// Runs the photoreceptor and display models over every pixel of the
/// given XYZ arrays, in place.
fn tone_map_xyz(
    xyz: [&mut Array2Df; 3],
    model: &VisualAdaptationModel,
    local_adaptation: Option<&Array2Df>,
    progress: &dyn Progress,
) -> Result<(), TmoError> {
    let [x, y, z] = xyz;
    let (width, height) = y.dimensions();

    let global = Photoreceptors::new(
        model.cone_adaptation(),
        model.rod_adaptation(),
        model.cone_bleaching(),
        model.rod_bleaching(),
    );
    let display = Display::new();

    for row in 0..height {
        if progress.is_canceled() {
            return Err(TmoError::Cancelled);
        }
        progress.set_progress("Tone mapping", row as f32 / height as f32);

        for col in 0..width {
            let i = row * width + col;
            let receptors = match local_adaptation {
                Some(adaptation) => {
                    let a = clamp_level(adaptation[i]);
                    Photoreceptors::new(a, a, cone_bleaching(a), rod_bleaching(a))
                }
                None => global,
            };

            let pixel = [x[i], y[i], z[i]];
            let rod_response = receptors.rod(scotopic_luminance(pixel));
            let rgb = xyz_to_rgb(pixel);
            let mut out = [0.0f32; 3];
            for c in 0..3 {
                let response = receptors.cone(rgb[c]) + rod_response;
                out[c] = display.inverse(response);
            }
            let [ox, oy, oz] = rgb_to_xyz(out);
            x[i] = ox;
            y[i] = oy;
            z[i] = oz;
        }
    }

    Ok(())
}

/// Half-saturation constant of the cone response at adaptation `a`.
fn cone_sigma(a: f32) -> f32 {
    let k = 1.0 / (5.0 * a + 1.0);
    let k4 = k * k * k * k;
    let j = 1.0 - k4;
    12.9223 * a / (k4 * a + 0.171 * j * j * a.cbrt())
}

/// Half-saturation constant of the rod response at adaptation `a`.
fn rod_sigma(a: f32) -> f32 {
    let j = 1.0 / (5.0e5 * a + 1.0);
    let j2 = j * j;
    let k = 1.0 - j2;
    2.5874 * a / (19000.0 * j2 * a + 0.2615 * k * k * k * k * a.powf(1.0 / 6.0))
}

#[inline]
fn response(i: f32, sigma_n: f32, bleach: f32) -> f32 {
    let i_n = i.max(0.0).powf(N);
    bleach * i_n / (i_n + sigma_n)
}

/// Scotopic luminance from XYZ, after Larson et al.
#[inline]
fn scotopic_luminance(xyz: [f32; 3]) -> f32 {
    let [x, y, z] = xyz;
    if x <= 0.0 {
        return 0.0;
    }
    (y * (1.33 * (1.0 + (y + z) / x) - 1.68)).max(0.0)
}

#[derive(Debug, Copy, Clone)]
struct Photoreceptors {
    cone_sigma_n: f32,
    rod_sigma_n: f32,
    cone_bleach: f32,
    rod_bleach: f32,
}

impl Photoreceptors {
    fn new(cone_adaptation: f32, rod_adaptation: f32, cone_bleach: f32, rod_bleach: f32) -> Photoreceptors {
        Photoreceptors {
            cone_sigma_n: cone_sigma(cone_adaptation).powf(N),
            rod_sigma_n: rod_sigma(rod_adaptation).powf(N),
            cone_bleach: cone_bleach,
            rod_bleach: rod_bleach,
        }
    }

    #[inline]
    fn cone(&self, i: f32) -> f32 {
        response(i, self.cone_sigma_n, self.cone_bleach)
    }

    #[inline]
    fn rod(&self, i: f32) -> f32 {
        response(i, self.rod_sigma_n, self.rod_bleach)
    }
}

/// Inverse of the cone response of an observer adapted to the display.
#[derive(Debug, Copy, Clone)]
struct Display {
    sigma: f32,
    bleach: f32,
}

impl Display {
    fn new() -> Display {
        Display {
            sigma: cone_sigma(DISPLAY_ADAPTATION),
            bleach: cone_bleaching(DISPLAY_ADAPTATION),
        }
    }

    /// Display value for a response, normalized so that a response at
    /// the display's half-saturation point maps to 0.5.
    #[inline]
    fn inverse(&self, response: f32) -> f32 {
        let r = response.max(0.0).min(self.bleach * 0.999);
        let intensity = self.sigma * (r / (self.bleach - r)).powf(1.0 / N);
        intensity / (2.0 * self.sigma)
    }
}

/// Mean over a `(2 * radius + 1)` square neighbourhood, clipped at the
/// edges, via a summed-area table.
fn box_filter(src: &Array2Df, radius: usize) -> Array2Df {
    let (w, h) = src.dimensions();
    let stride = w + 1;
    let mut sat = vec![0.0f64; stride * (h + 1)];
    for y in 0..h {
        let mut row_sum = 0.0f64;
        for x in 0..w {
            row_sum += src[(x, y)] as f64;
            sat[(y + 1) * stride + x + 1] = sat[y * stride + x + 1] + row_sum;
        }
    }

    let mut out = Array2Df::new(w, h);
    for y in 0..h {
        let y0 = y.saturating_sub(radius);
        let y1 = (y + radius + 1).min(h);
        for x in 0..w {
            let x0 = x.saturating_sub(radius);
            let x1 = (x + radius + 1).min(w);
            let sum = sat[y1 * stride + x1] - sat[y0 * stride + x1] - sat[y1 * stride + x0]
                + sat[y0 * stride + x0];
            let count = ((y1 - y0) * (x1 - x0)) as f64;
            out.as_mut_slice()[y * w + x] = (sum / count) as f32;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use job_queue::{CallbackProgress, CancelFlag, NullProgress};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_frame() -> Frame {
        let (w, h) = (16, 12);
        let mut r = Array2Df::new(w, h);
        let mut g = Array2Df::new(w, h);
        let mut b = Array2Df::new(w, h);
        for i in 0..(w * h) {
            let v = 0.01 * (1.0 + i as f32).powf(1.5);
            r.as_mut_slice()[i] = v;
            g.as_mut_slice()[i] = v * 0.8;
            b.as_mut_slice()[i] = v * 0.5 + 0.1;
        }
        let mut frame = Frame::from_rgb(r, g, b).unwrap();
        pfs::convert_frame(&mut frame, pfs::ColorSpace::Xyz).unwrap();
        frame
    }

    fn explicit_params() -> Pattanaik00Params {
        Pattanaik00Params {
            local: false,
            multiplier: 1.0,
            acone: 20.0,
            arod: 10.0,
            autolum: false,
            time_dependent: false,
        }
    }

    #[test]
    fn repeatable() {
        let mut a = test_frame();
        let mut b = test_frame();
        pattanaik00(&mut a, &explicit_params(), &NullProgress).unwrap();
        pattanaik00(&mut b, &explicit_params(), &NullProgress).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, test_frame());
    }

    #[test]
    fn output_is_finite_and_same_size() {
        let modes = [
            explicit_params(),
            Pattanaik00Params::default(),
            Pattanaik00Params {
                time_dependent: true,
                ..Pattanaik00Params::default()
            },
            Pattanaik00Params {
                local: true,
                multiplier: 4.0,
                ..Pattanaik00Params::default()
            },
        ];
        for params in modes.iter() {
            let mut frame = test_frame();
            pattanaik00(&mut frame, params, &NullProgress).unwrap();
            assert_eq!(frame.dimensions(), (16, 12));
            let (x, y, z) = frame.xyz_channels().unwrap();
            for a in [x, y, z] {
                assert!(a.iter().all(|v| v.is_finite()), "{:?}", params);
            }
        }
    }

    #[test]
    fn brighter_input_gives_brighter_output() {
        let mut frame = test_frame();
        pattanaik00(&mut frame, &explicit_params(), &NullProgress).unwrap();
        let y = frame.channel("Y").unwrap();
        assert!(y[y.len() - 1] > y[0]);
    }

    #[test]
    fn cancel_leaves_data_untouched() {
        let mut frame = test_frame();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let r = pattanaik00(&mut frame, &explicit_params(), &cancel);
        assert_eq!(r, Err(TmoError::Cancelled));

        let untouched = test_frame();
        assert_eq!(frame.xyz_channels(), untouched.xyz_channels());
        assert_eq!(frame.tag(LUMINANCE_TAG), Some("RELATIVE"));
    }

    #[test]
    fn cancel_part_way_leaves_data_untouched() {
        let cancel = CancelFlag::new();
        let rows = AtomicUsize::new(0);
        let flag = cancel.clone();
        let progress = CallbackProgress::new(
            move |_: &str, _| {
                if rows.fetch_add(1, Ordering::Relaxed) + 1 == 5 {
                    flag.cancel();
                }
            },
            cancel.clone(),
        );

        let mut frame = test_frame();
        let r = pattanaik00(&mut frame, &explicit_params(), &progress);
        assert_eq!(r, Err(TmoError::Cancelled));
        assert_eq!(frame.xyz_channels(), test_frame().xyz_channels());
    }

    #[test]
    fn missing_channels() {
        let mut frame = Frame::new(4, 4);
        frame.create_channel("Y");
        let r = pattanaik00(&mut frame, &Pattanaik00Params::default(), &NullProgress);
        assert_eq!(r, Err(TmoError::MissingChannels));
        // Tagged regardless.
        assert_eq!(frame.tag(LUMINANCE_TAG), Some("RELATIVE"));
    }

    #[test]
    fn tone_mapper_trait() {
        let op = Pattanaik00 {
            params: explicit_params(),
        };
        let mut a = test_frame();
        let mut b = test_frame();
        op.tone_map(&mut a, &NullProgress).unwrap();
        pattanaik00(&mut b, &explicit_params(), &NullProgress).unwrap();
        assert_eq!(op.name(), "pattanaik00");
        assert_eq!(a, b);
    }

    #[test]
    fn box_filter_means() {
        let src = Array2Df::from_vec(3, 1, vec![0.0, 3.0, 6.0]);
        let out = box_filter(&src, 1);
        assert_eq!(out.as_slice(), &[1.5, 3.0, 4.5]);

        let flat = Array2Df::filled(7, 5, 2.0);
        assert!(box_filter(&flat, 4).iter().all(|&v| (v - 2.0).abs() < 1e-6));
    }
}
