use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

use image_fmt::Image;
use pfs::{colorspace::rgb_to_xyz, convert_frame, Array2Df, ColorSpace, Frame};
use sensor_analysis::{known_luma_curves::srgb, CurveError, ResponseTable};

use crate::{
    error::{Error, Result},
    item::ImageInfo,
};

/// Loads an image file into an RGB frame of encoded [0.0, 1.0] values,
/// along with its exposure metadata.
pub fn load_image(path: &Path) -> Result<(Frame, ImageInfo)> {
    let img = image_fmt::load(BufReader::new(File::open(path)?))?;
    let frame = image_to_frame(&img)?;

    // Get exposure metadata from EXIF data.
    let (exposure_time, fstop, sensitivity) = {
        let mut exposure_time = None;
        let mut fstop = None;
        let mut sensitivity = None;

        let mut file = BufReader::new(File::open(path)?);
        if let Ok(img_exif) = exif::Reader::new().read_from_container(&mut file) {
            if let Some(&exif::Value::Rational(ref n)) = img_exif
                .get_field(exif::Tag::ExposureTime, exif::In::PRIMARY)
                .map(|n| &n.value)
            {
                if !n.is_empty() && n[0].num != 0 && n[0].denom != 0 {
                    exposure_time = Some((n[0].num, n[0].denom));
                }
            }
            if let Some(&exif::Value::Rational(ref n)) = img_exif
                .get_field(exif::Tag::FNumber, exif::In::PRIMARY)
                .map(|n| &n.value)
            {
                if !n.is_empty() && n[0].num != 0 && n[0].denom != 0 {
                    fstop = Some((n[0].num, n[0].denom));
                }
            }
            if let Some(Some(n)) = img_exif
                .get_field(exif::Tag::PhotographicSensitivity, exif::In::PRIMARY)
                .map(|n| n.value.get_uint(0))
            {
                if n != 0 {
                    sensitivity = Some(n);
                }
            }
        }

        (exposure_time, fstop, sensitivity)
    };

    let info = ImageInfo {
        exposure_time: exposure_time,
        fstop: fstop,
        iso: sensitivity,
        bit_depth: img.bit_depth(),
    };

    Ok((frame, info))
}

pub fn image_to_frame(img: &Image) -> Result<Frame> {
    let (w, h) = img.dimensions;
    let [r, g, b] = img.to_rgb_f32();
    if r.len() != w * h {
        return Err(Error::SizeMismatch {
            expected: (w, h),
            got: (r.len(), 1),
        });
    }
    Ok(Frame::from_rgb(
        Array2Df::from_vec(w, h, r),
        Array2Df::from_vec(w, h, g),
        Array2Df::from_vec(w, h, b),
    )?)
}

/// Converts the `R`, `G`, `B` channels of a frame to a 16-bit image,
/// clamping to [0.0, 1.0].
pub fn frame_to_image16(frame: &Frame) -> Result<Image> {
    let (r, g, b) = frame
        .rgb_channels()
        .ok_or_else(|| Error::MissingChannel("R/G/B".into()))?;
    Ok(Image::from_rgb_f32_16(
        frame.dimensions(),
        [r.as_slice(), g.as_slice(), b.as_slice()],
    ))
}

/// Writes an RGB or XYZ frame as a Radiance .hdr file.
pub fn write_hdr_file(path: &Path, frame: &Frame) -> Result<()> {
    let mut frame = frame.clone();
    if frame.rgb_channels().is_none() {
        convert_frame(&mut frame, ColorSpace::Rgb)?;
    }
    let (r, g, b) = frame
        .rgb_channels()
        .ok_or_else(|| Error::MissingChannel("R/G/B".into()))?;
    let pixels: Vec<[f32; 3]> = (0..r.len()).map(|i| [r[i], g[i], b[i]]).collect();

    let mut out = BufWriter::new(File::create(path)?);
    hdr::write_hdr(&mut out, &pixels, frame.width(), frame.height(), 1.0)?;
    Ok(())
}

/// Reads a Radiance .hdr file into an XYZ frame.
pub fn read_hdr_file(path: &Path) -> Result<Frame> {
    let img = hdr::read_hdr(BufReader::new(File::open(path)?))?;

    let mut x = Array2Df::new(img.width, img.height);
    let mut y = Array2Df::new(img.width, img.height);
    let mut z = Array2Df::new(img.width, img.height);
    for (i, &rgb) in img.pixels.iter().enumerate() {
        let xyz = rgb_to_xyz(rgb);
        x[i] = xyz[0];
        y[i] = xyz[1];
        z[i] = xyz[2];
    }
    Ok(Frame::from_xyz(x, y, z)?)
}

/// Writes a tone mapped frame (XYZ or linear RGB, display-referred) as
/// an 8-bit sRGB PNG.
pub fn write_display_png(path: &Path, frame: &Frame) -> Result<()> {
    let mut frame = frame.clone();
    if frame.rgb_channels().is_none() {
        convert_frame(&mut frame, ColorSpace::Rgb)?;
    }
    let (r, g, b) = frame
        .rgb_channels()
        .ok_or_else(|| Error::MissingChannel("R/G/B".into()))?;
    let encode = |a: &Array2Df| -> Vec<f32> {
        a.iter()
            .map(|&v| srgb::from_linear(v.max(0.0).min(1.0)))
            .collect()
    };
    let (r, g, b) = (encode(r), encode(g), encode(b));
    let img = Image::from_rgb_f32_8(frame.dimensions(), [&r, &g, &b]);

    let out = BufWriter::new(File::create(path)?);
    image_fmt::save_png(out, &img)?;
    Ok(())
}

/// Reads a response curve file (`.spi1d`, one or three components).
///
/// The curve must be defined over encoded values [0.0, 1.0].
pub fn read_response_curve(path: &Path) -> Result<ResponseTable> {
    let lut = lut::read_spi1d(BufReader::new(File::open(path)?))?;
    if lut.range != (0.0, 1.0) {
        return Err(CurveError::Range(lut.range.0, lut.range.1).into());
    }
    Ok(ResponseTable::from_components(lut.components)?)
}

pub fn write_response_curve(path: &Path, table: &ResponseTable) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    lut::write_spi1d(
        &mut out,
        (0.0, 1.0),
        &[table.channel(0), table.channel(1), table.channel(2)],
    )?;
    Ok(())
}

/// Creates `dir` if needed, and fails if it exists but isn't a writable
/// directory.
pub fn ensure_dir_exists(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        tracing::debug!(dir = %dir.display(), "created directory");
        return Ok(());
    }
    let metadata = std::fs::metadata(dir)?;
    if !metadata.is_dir() {
        return Err(Error::NotADirectory(dir.to_path_buf()));
    }
    if metadata.permissions().readonly() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            format!("{} is read only", dir.display()),
        )
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb_frame(w: usize, h: usize) -> Frame {
        let ramp = |scale: f32| {
            Array2Df::from_vec(
                w,
                h,
                (0..w * h).map(|i| scale * i as f32 / (w * h) as f32).collect(),
            )
        };
        Frame::from_rgb(ramp(1.0), ramp(0.5), ramp(0.25)).unwrap()
    }

    #[test]
    fn png_and_frame_conversion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");

        let frame = rgb_frame(6, 4);
        write_display_png(&path, &frame).unwrap();

        let (loaded, info) = load_image(&path).unwrap();
        assert_eq!(loaded.dimensions(), (6, 4));
        assert_eq!(info.bit_depth, 8);
        assert_eq!(info.average_luminance(), None);
        // The brightest pixel survives sRGB encoding.
        let r = loaded.channel("R").unwrap();
        let expected = srgb::from_linear(23.0 / 24.0);
        assert!((r[23] - expected).abs() < 1.0 / 255.0);
    }

    #[test]
    fn hdr_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.hdr");

        let frame = rgb_frame(5, 3);
        write_hdr_file(&path, &frame).unwrap();
        let read = read_hdr_file(&path).unwrap();
        assert_eq!(read.dimensions(), (5, 3));

        let mut read_rgb = read.clone();
        convert_frame(&mut read_rgb, ColorSpace::Rgb).unwrap();
        let (r, _, _) = read_rgb.rgb_channels().unwrap();
        let (r0, _, _) = frame.rgb_channels().unwrap();
        for i in 0..r.len() {
            assert!((r[i] - r0[i]).abs() < 0.02, "{} vs {}", r[i], r0[i]);
        }
    }

    #[test]
    fn response_curve_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("curve.spi1d");
        let table = ResponseTable::new([
            vec![0.0, 0.2, 1.0],
            vec![0.0, 0.3, 1.0],
            vec![0.0, 0.4, 1.0],
        ])
        .unwrap();
        write_response_curve(&path, &table).unwrap();
        assert_eq!(read_response_curve(&path).unwrap(), table);
    }

    #[test]
    fn tiff_16_bit_frames() {
        let frame = rgb_frame(4, 4);
        let img = frame_to_image16(&frame).unwrap();
        assert_eq!(img.bit_depth(), 16);
        let back = image_to_frame(&img).unwrap();
        let (r, _, _) = back.rgb_channels().unwrap();
        let (r0, _, _) = frame.rgb_channels().unwrap();
        for i in 0..r.len() {
            assert!((r[i] - r0[i]).abs() < 1.0 / 65535.0);
        }
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_image(&dir.path().join("nope.jpg")),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn response_curve_range_must_be_unit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.spi1d");
        let mut out = File::create(&path).unwrap();
        lut::write_spi1d(&mut out, (0.0, 2.0), &[&[0.0, 0.5, 1.0]]).unwrap();
        drop(out);
        assert!(matches!(
            read_response_curve(&path),
            Err(Error::Curve(CurveError::Range(_, _)))
        ));
    }

    #[test]
    fn ensure_dir() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("a/b");
        ensure_dir_exists(&sub).unwrap();
        assert!(sub.is_dir());
        ensure_dir_exists(&sub).unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();
        assert!(matches!(ensure_dir_exists(&file), Err(Error::NotADirectory(_))));
    }
}
