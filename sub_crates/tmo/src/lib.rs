//! Tone mapping operators, which compress a high dynamic range XYZ
//! frame into displayable range in place.

mod adaptation;
mod error;
mod pattanaik00;

use job_queue::Progress;
use pfs::Frame;

pub use adaptation::VisualAdaptationModel;
pub use error::TmoError;
pub use pattanaik00::{pattanaik00, Pattanaik00, Pattanaik00Params};

/// A tone mapping operator.
///
/// Operators take an XYZ frame, tag it `LUMINANCE=RELATIVE`, and
/// replace its channel data only once the whole pass has succeeded.
pub trait ToneMapper {
    fn name(&self) -> &'static str;

    fn tone_map(&self, frame: &mut Frame, progress: &dyn Progress) -> Result<(), TmoError>;
}
