//! Loading and saving of 8- and 16-bit RGB images in the usual
//! low-dynamic-range formats (JPEG, PNG, TIFF).

mod error;
mod jpeg_fmt;
mod png_fmt;
mod tiff_fmt;

use std::io::{Read, Seek, SeekFrom, Write};

pub use error::{ReadError, WriteError};

/// Interleaved RGB pixel data, in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageBuf {
    /// 8-bit unsigned RGB channels.
    Rgb8(Vec<u8>),

    /// 16-bit unsigned RGB channels.
    Rgb16(Vec<u16>),
}

impl ImageBuf {
    /// Number of channel values (three per pixel).
    pub fn len(&self) -> usize {
        match self {
            ImageBuf::Rgb8(d) => d.len(),
            ImageBuf::Rgb16(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub dimensions: (usize, usize),
    pub data: ImageBuf,
}

impl Image {
    pub fn bit_depth(&self) -> u32 {
        match self.data {
            ImageBuf::Rgb8(_) => 8,
            ImageBuf::Rgb16(_) => 16,
        }
    }

    /// Splits the image into three planes of normalized [0.0, 1.0]
    /// values.
    pub fn to_rgb_f32(&self) -> [Vec<f32>; 3] {
        let pixel_count = self.dimensions.0 * self.dimensions.1;
        let mut planes = [
            Vec::with_capacity(pixel_count),
            Vec::with_capacity(pixel_count),
            Vec::with_capacity(pixel_count),
        ];
        match self.data {
            ImageBuf::Rgb8(ref d) => {
                for px in d.chunks_exact(3) {
                    for c in 0..3 {
                        planes[c].push(px[c] as f32 / 255.0);
                    }
                }
            }
            ImageBuf::Rgb16(ref d) => {
                for px in d.chunks_exact(3) {
                    for c in 0..3 {
                        planes[c].push(px[c] as f32 / 65535.0);
                    }
                }
            }
        }
        planes
    }

    /// Builds a 16-bit image from three planes of normalized values,
    /// clamping to [0.0, 1.0].
    pub fn from_rgb_f32_16(dimensions: (usize, usize), planes: [&[f32]; 3]) -> Image {
        let pixel_count = dimensions.0 * dimensions.1;
        let mut data = Vec::with_capacity(pixel_count * 3);
        for i in 0..pixel_count {
            for plane in planes.iter() {
                data.push((plane[i].max(0.0).min(1.0) * 65535.0).round() as u16);
            }
        }
        Image {
            dimensions: dimensions,
            data: ImageBuf::Rgb16(data),
        }
    }

    /// Builds an 8-bit image from three planes of normalized values,
    /// clamping to [0.0, 1.0].
    pub fn from_rgb_f32_8(dimensions: (usize, usize), planes: [&[f32]; 3]) -> Image {
        let pixel_count = dimensions.0 * dimensions.1;
        let mut data = Vec::with_capacity(pixel_count * 3);
        for i in 0..pixel_count {
            for plane in planes.iter() {
                data.push((plane[i].max(0.0).min(1.0) * 255.0).round() as u8);
            }
        }
        Image {
            dimensions: dimensions,
            data: ImageBuf::Rgb8(data),
        }
    }

    fn check_size(&self) -> Result<(), WriteError> {
        let expected = self.dimensions.0 * self.dimensions.1 * 3;
        if self.data.len() != expected {
            return Err(WriteError::BufferSize {
                expected: expected,
                got: self.data.len(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Format {
    Jpeg,
    Png,
    Tiff,
}

fn sniff_format(magic: &[u8]) -> Option<Format> {
    if magic.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(Format::Jpeg)
    } else if magic.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some(Format::Png)
    } else if magic.starts_with(b"II*\0") || magic.starts_with(b"MM\0*") {
        Some(Format::Tiff)
    } else {
        None
    }
}

/// Loads a JPEG, PNG, or TIFF image, detecting the format from the
/// file's leading bytes.
pub fn load<R: Read + Seek>(mut reader: R) -> Result<Image, ReadError> {
    let mut magic = [0u8; 8];
    let mut filled = 0;
    while filled < magic.len() {
        let n = reader.read(&mut magic[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    reader.seek(SeekFrom::Start(0))?;

    match sniff_format(&magic[..filled]) {
        Some(Format::Jpeg) => jpeg_fmt::load(reader),
        Some(Format::Png) => png_fmt::load(reader),
        Some(Format::Tiff) => tiff_fmt::load(reader),
        None => Err(ReadError::UnknownFormat),
    }
}

pub fn save_png<W: Write>(writer: W, image: &Image) -> Result<(), WriteError> {
    image.check_size()?;
    png_fmt::save(writer, image)
}

pub fn save_tiff<W: Write + Seek>(writer: W, image: &Image) -> Result<(), WriteError> {
    image.check_size()?;
    tiff_fmt::save(writer, image)
}
