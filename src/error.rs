use crate::align::AlignError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("frame size mismatch: expected {}x{}, got {}x{}", .expected.0, .expected.1, .got.0, .got.1)]
    SizeMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },

    #[error("no frames to work on")]
    NoFrames,

    #[error("missing exposure information for: {}", .0.join(", "))]
    MissingExposure(Vec<String>),

    #[error("frame is missing channel '{0}'")]
    MissingChannel(String),

    #[error("mask size mismatch: frame is {}x{}, mask is {}x{}", .expected.0, .expected.1, .got.0, .got.1)]
    MaskSizeMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },

    #[error("no item with index {0}")]
    NoSuchItem(usize),

    #[error("cannot modify the image set while aligning")]
    Busy,

    #[error("images are already aligned")]
    AlreadyAligned,

    #[error("expected {expected} offsets, got {got}")]
    OffsetCount { expected: usize, got: usize },

    #[error("operation was cancelled")]
    Cancelled,

    #[error("alignment failed: {0}")]
    Align(#[from] AlignError),

    #[error("not a directory: {}", .0.display())]
    NotADirectory(std::path::PathBuf),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to read image: {0}")]
    ImageRead(#[from] image_fmt::ReadError),

    #[error("failed to write image: {0}")]
    ImageWrite(#[from] image_fmt::WriteError),

    #[error("failed to read hdr file: {0}")]
    Hdr(#[from] hdr::HdrError),

    #[error("bad response curve: {0}")]
    Curve(#[from] sensor_analysis::CurveError),

    #[error("failed to read response curve file: {0}")]
    CurveFile(#[from] lut::ReadError),

    #[error("frame error: {0}")]
    Frame(#[from] pfs::FrameError),

    #[error("tone mapping failed: {0}")]
    ToneMap(#[from] tmo::TmoError),
}

pub type Result<T> = std::result::Result<T, Error>;
