use std::io::Read;

use crate::{error::ReadError, Image, ImageBuf};

pub fn load<R: Read>(reader: R) -> Result<Image, ReadError> {
    let mut decoder = jpeg_decoder::Decoder::new(reader);
    decoder.read_info()?;

    let info = decoder.info().ok_or(ReadError::UnknownFormat)?;
    let dimensions = (info.width as usize, info.height as usize);
    let pixel_count = dimensions.0 * dimensions.1;
    let pixel_format = info.pixel_format;

    let pixel_data = decoder.decode()?;

    use jpeg_decoder::PixelFormat::*;
    return match pixel_format {
        //------
        // RGB.
        RGB24 => {
            check_len(pixel_data.len(), pixel_count * 3)?;
            Ok(Image {
                dimensions: dimensions,
                data: ImageBuf::Rgb8(pixel_data),
            })
        }

        //------------
        // Grayscale.
        L8 => {
            check_len(pixel_data.len(), pixel_count)?;
            Ok(Image {
                dimensions: dimensions,
                data: ImageBuf::Rgb8(pixel_data.iter().flat_map(|&c| [c, c, c]).collect()),
            })
        }
        L16 => {
            check_len(pixel_data.len(), pixel_count * 2)?;
            Ok(Image {
                dimensions: dimensions,
                // NOTE: jpeg-decode doesn't document the endianness of
                // their 16-bit buffers, but examining the code in that
                // crate indicates that it's native endian.
                data: ImageBuf::Rgb16(
                    pixel_data
                        .chunks(2)
                        .flat_map(|c| {
                            let v = u16::from_ne_bytes([c[0], c[1]]);
                            [v, v, v]
                        })
                        .collect(),
                ),
            })
        }

        _ => Err(ReadError::UnsupportedFeature),
    };
}

fn check_len(got: usize, expected: usize) -> Result<(), ReadError> {
    if got != expected {
        return Err(ReadError::Malformed(format!(
            "decoded {} bytes, expected {}",
            got, expected
        )));
    }
    Ok(())
}
