use std::io::{Read, Seek, Write};

use tiff::{decoder::DecodingResult, ColorType};

use crate::{
    error::{ReadError, WriteError},
    Image, ImageBuf,
};

pub fn load<R: Read + Seek>(reader: R) -> Result<Image, ReadError> {
    let mut decoder =
        tiff::decoder::Decoder::new(reader)?.with_limits(tiff::decoder::Limits::unlimited());

    let (width, height) = decoder.dimensions()?;
    let dimensions = (width as usize, height as usize);
    let colortype = decoder.colortype()?;
    let data = decoder.read_image()?;

    let data = match (colortype, data) {
        //------
        // RGB.
        (ColorType::RGB(_), DecodingResult::U8(pixel_data)) => ImageBuf::Rgb8(pixel_data),
        (ColorType::RGB(_), DecodingResult::U16(pixel_data)) => ImageBuf::Rgb16(pixel_data),

        //-------
        // RGBA, with alpha dropped.
        (ColorType::RGBA(_), DecodingResult::U8(pixel_data)) => ImageBuf::Rgb8(
            pixel_data
                .chunks(4)
                .flat_map(|c| [c[0], c[1], c[2]])
                .collect(),
        ),
        (ColorType::RGBA(_), DecodingResult::U16(pixel_data)) => ImageBuf::Rgb16(
            pixel_data
                .chunks(4)
                .flat_map(|c| [c[0], c[1], c[2]])
                .collect(),
        ),

        //------------
        // Grayscale.
        (ColorType::Gray(_), DecodingResult::U8(pixel_data)) => {
            ImageBuf::Rgb8(pixel_data.iter().flat_map(|&c| [c, c, c]).collect())
        }
        (ColorType::Gray(_), DecodingResult::U16(pixel_data)) => {
            ImageBuf::Rgb16(pixel_data.iter().flat_map(|&c| [c, c, c]).collect())
        }

        //--------------------
        // Grayscale + alpha.
        (ColorType::GrayA(_), DecodingResult::U8(pixel_data)) => ImageBuf::Rgb8(
            pixel_data
                .chunks(2)
                .flat_map(|c| [c[0], c[0], c[0]])
                .collect(),
        ),
        (ColorType::GrayA(_), DecodingResult::U16(pixel_data)) => ImageBuf::Rgb16(
            pixel_data
                .chunks(2)
                .flat_map(|c| [c[0], c[0], c[0]])
                .collect(),
        ),

        _ => return Err(ReadError::UnsupportedFeature),
    };

    let expected = dimensions.0 * dimensions.1 * 3;
    if data.len() != expected {
        return Err(ReadError::Malformed(format!(
            "decoded {} values, expected {}",
            data.len(),
            expected
        )));
    }

    Ok(Image {
        dimensions: dimensions,
        data: data,
    })
}

pub fn save<W: Write + Seek>(writer: W, image: &Image) -> Result<(), WriteError> {
    use tiff::encoder::{colortype, TiffEncoder};

    let mut encoder = TiffEncoder::new(writer)?;
    let (w, h) = (image.dimensions.0 as u32, image.dimensions.1 as u32);
    match image.data {
        ImageBuf::Rgb8(ref data) => encoder.write_image::<colortype::RGB8>(w, h, data)?,
        ImageBuf::Rgb16(ref data) => encoder.write_image::<colortype::RGB16>(w, h, data)?,
    }

    Ok(())
}
