//! Camera response curves, sample weighting, and response
//! self-calibration for merging bracketed exposures.

mod histogram;
mod response;
mod robertson;
mod utils;
mod weights;

pub mod known_luma_curves;

pub use histogram::Histogram;
pub use response::{CurveError, ResponseCurve, ResponseTable};
pub use robertson::{
    calibrate_robertson, ExposureSamples, RobertsonCalibrator, MAX_SAMPLES, RESPONSE_RESOLUTION,
};
pub use utils::{lerp_slice, make_monotonic};
pub use weights::WeightFunction;
