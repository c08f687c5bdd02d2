use crate::known_luma_curves::{gamma, log10, srgb};
use crate::utils::{lerp_slice, make_monotonic};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CurveError {
    #[error("response curve needs 1 or 3 components, got {0}")]
    ComponentCount(usize),

    #[error("response curve needs at least 2 entries per component, with equal lengths")]
    BadLength,

    #[error("response curve must span encoded values 0.0 to 1.0, got {0} to {1}")]
    Range(f32, f32),
}

/// Maps a camera's normalized encoded pixel values to normalized
/// linear radiance.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseCurve {
    Linear,
    Gamma,
    Log10,
    Srgb,
    /// A tabulated per-channel curve, e.g. loaded from a file or
    /// produced by self-calibration.
    Table(ResponseTable),
}

impl ResponseCurve {
    /// Evaluates the response for color channel `chan` (0, 1 or 2).
    #[inline]
    pub fn eval(&self, chan: usize, v: f32) -> f32 {
        match *self {
            ResponseCurve::Linear => v,
            ResponseCurve::Gamma => gamma::to_linear(v),
            ResponseCurve::Log10 => log10::to_linear(v),
            ResponseCurve::Srgb => srgb::to_linear(v),
            ResponseCurve::Table(ref table) => table.eval(chan, v),
        }
    }

    pub fn name(&self) -> &'static str {
        match *self {
            ResponseCurve::Linear => "linear",
            ResponseCurve::Gamma => "gamma",
            ResponseCurve::Log10 => "log10",
            ResponseCurve::Srgb => "srgb",
            ResponseCurve::Table(_) => "table",
        }
    }

    /// Parses the name of a built-in (non-tabulated) curve.
    pub fn from_name(name: &str) -> Option<ResponseCurve> {
        match name.to_ascii_lowercase().as_str() {
            "linear" => Some(ResponseCurve::Linear),
            "gamma" => Some(ResponseCurve::Gamma),
            "log10" | "log" => Some(ResponseCurve::Log10),
            "srgb" => Some(ResponseCurve::Srgb),
            _ => None,
        }
    }
}

/// Three tabulated curves (R, G, B), each spanning encoded values
/// [0.0, 1.0] evenly.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseTable {
    channels: [Vec<f32>; 3],
}

impl ResponseTable {
    /// Builds a table, making each channel monotonic.
    ///
    /// Returns `None` if a channel has fewer than two entries or the
    /// channels differ in length.
    pub fn new(channels: [Vec<f32>; 3]) -> Option<ResponseTable> {
        let len = channels[0].len();
        if len < 2 || channels.iter().any(|c| c.len() != len) {
            return None;
        }
        let mut channels = channels;
        for c in channels.iter_mut() {
            make_monotonic(c, 0.0);
        }
        Some(ResponseTable { channels: channels })
    }

    /// Builds a table from one component (shared by all channels) or
    /// three (R, G, B), as found in a curve file.
    pub fn from_components(mut components: Vec<Vec<f32>>) -> Result<ResponseTable, CurveError> {
        let table = match components.len() {
            1 => ResponseTable::uniform(components.remove(0)),
            3 => {
                let b = components.remove(2);
                let g = components.remove(1);
                let r = components.remove(0);
                ResponseTable::new([r, g, b])
            }
            n => return Err(CurveError::ComponentCount(n)),
        };
        table.ok_or(CurveError::BadLength)
    }

    /// Uses the same curve for all three channels.
    pub fn uniform(curve: Vec<f32>) -> Option<ResponseTable> {
        ResponseTable::new([curve.clone(), curve.clone(), curve])
    }

    #[inline]
    pub fn eval(&self, chan: usize, v: f32) -> f32 {
        lerp_slice(&self.channels[chan], v)
    }

    pub fn channel(&self, chan: usize) -> &[f32] {
        &self.channels[chan]
    }

    pub fn resolution(&self) -> usize {
        self.channels[0].len()
    }
}
