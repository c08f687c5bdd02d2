#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ReadError {
    #[error("image i/o error: {0}")]
    IO(#[from] std::io::Error),

    #[error("UnknownFormat: could not determine the image file format.")]
    UnknownFormat,

    #[error("UnsupportedFeature: the image file uses a feature that is currently unsupported such that image loading isn't possible.")]
    UnsupportedFeature,

    #[error("malformed image file: {0}")]
    Malformed(String),
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum WriteError {
    #[error("image i/o error: {0}")]
    IO(#[from] std::io::Error),

    #[error("buffer holds {got} values, but {expected} are needed")]
    BufferSize { expected: usize, got: usize },

    #[error("encoding failed: {0}")]
    Encode(String),
}

//-------------------------------------------------------------
// From impls.

impl From<tiff::TiffError> for ReadError {
    fn from(other: tiff::TiffError) -> Self {
        use tiff::TiffError::*;
        match other {
            IoError(e) => Self::IO(e),
            FormatError(e) => Self::Malformed(e.to_string()),
            IntSizeError | UnsupportedError(_) => Self::UnsupportedFeature,
            e @ (LimitsExceeded | UsageError(_)) => Self::Malformed(e.to_string()),
        }
    }
}

impl From<png::DecodingError> for ReadError {
    fn from(other: png::DecodingError) -> Self {
        match other {
            png::DecodingError::IoError(e) => Self::IO(e),
            e => Self::Malformed(e.to_string()),
        }
    }
}

impl From<jpeg_decoder::Error> for ReadError {
    fn from(other: jpeg_decoder::Error) -> Self {
        match other {
            jpeg_decoder::Error::Io(e) => Self::IO(e),
            jpeg_decoder::Error::Unsupported(_) => Self::UnsupportedFeature,
            e => Self::Malformed(e.to_string()),
        }
    }
}

impl From<tiff::TiffError> for WriteError {
    fn from(other: tiff::TiffError) -> Self {
        match other {
            tiff::TiffError::IoError(e) => Self::IO(e),
            e => Self::Encode(e.to_string()),
        }
    }
}

impl From<png::EncodingError> for WriteError {
    fn from(other: png::EncodingError) -> Self {
        match other {
            png::EncodingError::IoError(e) => Self::IO(e),
            e => Self::Encode(e.to_string()),
        }
    }
}
