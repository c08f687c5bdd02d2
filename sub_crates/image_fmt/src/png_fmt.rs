use std::io::{Read, Write};

use crate::{
    error::{ReadError, WriteError},
    Image, ImageBuf,
};

pub fn load<R: Read>(reader: R) -> Result<Image, ReadError> {
    let mut decoder = png::Decoder::new_with_limits(
        reader,
        png::Limits {
            bytes: std::usize::MAX,
        },
    );
    // Palettes and sub-byte depths are expanded to plain 8-bit
    // channels.
    decoder.set_transformations(png::Transformations::EXPAND);
    let mut reader = decoder.read_info()?;

    let dimensions = {
        let info = reader.info();
        (info.width as usize, info.height as usize)
    };
    let (color_type, bit_depth) = reader.output_color_type();

    let mut pixel_data = vec![0u8; reader.output_buffer_size()];
    let frame = reader.next_frame(&mut pixel_data)?;
    pixel_data.truncate(frame.buffer_size());

    use png::{BitDepth::*, ColorType::*};
    let data = match (color_type, bit_depth) {
        (Rgb, Eight) => ImageBuf::Rgb8(pixel_data),
        (Rgb, Sixteen) => ImageBuf::Rgb16(be_u16(&pixel_data).collect()),

        // Alpha is dropped.
        (Rgba, Eight) => ImageBuf::Rgb8(
            pixel_data
                .chunks(4)
                .flat_map(|c| [c[0], c[1], c[2]])
                .collect(),
        ),
        (Rgba, Sixteen) => {
            let values: Vec<u16> = be_u16(&pixel_data).collect();
            ImageBuf::Rgb16(
                values
                    .chunks(4)
                    .flat_map(|c| [c[0], c[1], c[2]])
                    .collect(),
            )
        }

        (Grayscale, Eight) => ImageBuf::Rgb8(pixel_data.iter().flat_map(|&c| [c, c, c]).collect()),
        (Grayscale, Sixteen) => ImageBuf::Rgb16(be_u16(&pixel_data).flat_map(|v| [v, v, v]).collect()),

        (GrayscaleAlpha, Eight) => ImageBuf::Rgb8(
            pixel_data
                .chunks(2)
                .flat_map(|c| [c[0], c[0], c[0]])
                .collect(),
        ),
        (GrayscaleAlpha, Sixteen) => {
            let values: Vec<u16> = be_u16(&pixel_data).collect();
            ImageBuf::Rgb16(values.chunks(2).flat_map(|c| [c[0], c[0], c[0]]).collect())
        }

        _ => return Err(ReadError::UnsupportedFeature),
    };

    Ok(Image {
        dimensions: dimensions,
        data: data,
    })
}

pub fn save<W: Write>(writer: W, image: &Image) -> Result<(), WriteError> {
    let mut encoder = png::Encoder::new(
        writer,
        image.dimensions.0 as u32,
        image.dimensions.1 as u32,
    );
    encoder.set_color(png::ColorType::Rgb);

    match image.data {
        ImageBuf::Rgb8(ref data) => {
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header()?;
            writer.write_image_data(data)?;
        }
        ImageBuf::Rgb16(ref data) => {
            encoder.set_depth(png::BitDepth::Sixteen);
            let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_be_bytes()).collect();
            let mut writer = encoder.write_header()?;
            writer.write_image_data(&bytes)?;
        }
    }

    Ok(())
}

fn be_u16(bytes: &[u8]) -> impl Iterator<Item = u16> + '_ {
    bytes.chunks(2).map(|c| u16::from_be_bytes([c[0], c[1]]))
}
