//! Floating point frames made of named 2D channels.

mod array2d;
pub mod colorspace;
mod frame;

use thiserror::Error;

pub use array2d::{Array2D, Array2Df, Rect};
pub use colorspace::{convert_frame, transform_color_space, ColorSpace};
pub use frame::{Channel, Frame, Tags, LUMINANCE_TAG};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("channel size {got:?} doesn't match frame size {expected:?}")]
    SizeMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },

    #[error("missing channel \"{0}\"")]
    MissingChannel(String),

    #[error("crop rectangle {rect:?} lies outside of a {dimensions:?} frame")]
    CropOutOfBounds {
        rect: Rect,
        dimensions: (usize, usize),
    },
}
