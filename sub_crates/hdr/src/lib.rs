//! Reading and writing of Radiance .hdr (RGBE) images.

mod rgbe;

use std::io::{BufRead, Write};

pub use rgbe::{decode as decode_rgbe, encode as encode_rgbe};

/// Largest width or height accepted when reading.
pub const MAX_DIMENSION: usize = 1 << 20;

// Pixels reserved up front; the rest grows as scanlines are read.
const MAX_PREALLOC: usize = 1 << 22;

#[derive(Debug, thiserror::Error)]
pub enum HdrError {
    #[error("hdr i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a Radiance hdr file")]
    NotHdr,

    #[error("unsupported hdr feature: {0}")]
    Unsupported(String),

    #[error("malformed hdr file: {0}")]
    Malformed(String),
}

/// A decoded .hdr image, with pixels in row-major order from the top.
#[derive(Debug, Clone, PartialEq)]
pub struct HdrImage {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<[f32; 3]>,
}

/// Writes a flat (non-run-length-encoded) .hdr file.  Every pixel is
/// multiplied by `exposure` first.
pub fn write_hdr<W: Write>(
    out: &mut W,
    image: &[[f32; 3]],
    width: usize,
    height: usize,
    exposure: f32,
) -> std::io::Result<()> {
    assert_eq!(image.len(), width * height);

    out.write_all(b"#?RADIANCE\n")?;
    out.write_all(b"FORMAT=32-bit_rle_rgbe\n\n")?;
    out.write_all(format!("-Y {} +X {}\n", height, width).as_bytes())?;
    for row in image.chunks(width.max(1)) {
        let mut buf = Vec::with_capacity(row.len() * 4);
        for pixel in row.iter() {
            buf.extend_from_slice(&rgbe::encode([
                pixel[0] * exposure,
                pixel[1] * exposure,
                pixel[2] * exposure,
            ]));
        }
        out.write_all(&buf)?;
    }
    out.flush()?;

    Ok(())
}

/// Reads an .hdr file in either flat or new-style run-length encoding.
///
/// Only the standard `-Y <height> +X <width>` orientation is supported.
pub fn read_hdr<R: BufRead>(mut input: R) -> Result<HdrImage, HdrError> {
    let mut line = String::new();

    // Magic.
    read_header_line(&mut input, &mut line)?;
    if !(line.starts_with("#?RADIANCE") || line.starts_with("#?RGBE")) {
        return Err(HdrError::NotHdr);
    }

    // Header variables, up to the blank line.
    loop {
        if read_header_line(&mut input, &mut line)? == 0 {
            return Err(HdrError::Malformed("missing resolution line".into()));
        }
        let l = line.trim();
        if l.is_empty() {
            break;
        }
        if let Some(format) = l.strip_prefix("FORMAT=") {
            if format != "32-bit_rle_rgbe" {
                return Err(HdrError::Unsupported(format!("pixel format '{}'", format)));
            }
        }
    }

    // Resolution.
    read_header_line(&mut input, &mut line)?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    let (height, width) = match fields.as_slice() {
        ["-Y", h, "+X", w] => (parse_dim(h)?, parse_dim(w)?),
        _ => {
            return Err(HdrError::Unsupported(format!(
                "image orientation '{}'",
                line.trim()
            )))
        }
    };

    let pixel_count = width
        .checked_mul(height)
        .ok_or_else(|| HdrError::Malformed(format!("image size {}x{} is too large", width, height)))?;
    let mut pixels = Vec::with_capacity(pixel_count.min(MAX_PREALLOC));
    let mut scanline = vec![[0u8; 4]; width];
    for _ in 0..height {
        read_scanline(&mut input, &mut scanline)?;
        pixels.extend(scanline.iter().map(|&p| rgbe::decode(p)));
    }

    Ok(HdrImage {
        width: width,
        height: height,
        pixels: pixels,
    })
}

fn read_header_line<R: BufRead>(input: &mut R, line: &mut String) -> Result<usize, HdrError> {
    line.clear();
    let n = input.read_line(line)?;
    Ok(n)
}

fn parse_dim(s: &str) -> Result<usize, HdrError> {
    match s.parse::<usize>() {
        Ok(n) if n <= MAX_DIMENSION => Ok(n),
        _ => Err(HdrError::Malformed(format!("bad image dimension '{}'", s))),
    }
}

fn read_scanline<R: BufRead>(input: &mut R, scanline: &mut [[u8; 4]]) -> Result<(), HdrError> {
    let width = scanline.len();
    if width == 0 {
        return Ok(());
    }

    let mut first = [0u8; 4];
    input.read_exact(&mut first)?;

    let is_rle = (8..0x8000).contains(&width)
        && first[0] == 2
        && first[1] == 2
        && first[2] & 0x80 == 0;
    if !is_rle {
        scanline[0] = first;
        for pixel in scanline[1..].iter_mut() {
            input.read_exact(pixel)?;
        }
        return Ok(());
    }

    let encoded_width = ((first[2] as usize) << 8) | first[3] as usize;
    if encoded_width != width {
        return Err(HdrError::Malformed("scanline width mismatch".into()));
    }

    // Each of the four components is run-length encoded separately.
    for c in 0..4 {
        let mut x = 0;
        while x < width {
            let mut count = [0u8; 1];
            input.read_exact(&mut count)?;
            let count = count[0] as usize;
            if count > 128 {
                let run = count - 128;
                if x + run > width {
                    return Err(HdrError::Malformed("run overflows scanline".into()));
                }
                let mut value = [0u8; 1];
                input.read_exact(&mut value)?;
                for pixel in scanline[x..(x + run)].iter_mut() {
                    pixel[c] = value[0];
                }
                x += run;
            } else {
                if count == 0 || x + count > width {
                    return Err(HdrError::Malformed("bad literal run".into()));
                }
                let mut values = vec![0u8; count];
                input.read_exact(&mut values)?;
                for (pixel, v) in scanline[x..(x + count)].iter_mut().zip(values) {
                    pixel[c] = v;
                }
                x += count;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_dimensions_are_malformed() {
        for header in [
            &b"#?RADIANCE\nFORMAT=32-bit_rle_rgbe\n\n-Y 9999999999 +X 9999999999\n"[..],
            &b"#?RADIANCE\nFORMAT=32-bit_rle_rgbe\n\n-Y 2000000 +X 4\n"[..],
            &b"#?RADIANCE\n\n-Y -3 +X 4\n"[..],
        ]
        .iter()
        {
            assert!(matches!(read_hdr(*header), Err(HdrError::Malformed(_))));
        }
    }

    #[test]
    fn truncated_pixels_are_an_error() {
        // Large but legal dimensions with almost no data.
        let data = b"#?RADIANCE\nFORMAT=32-bit_rle_rgbe\n\n-Y 1000000 +X 1000000\n\x01\x02";
        assert!(matches!(read_hdr(&data[..]), Err(HdrError::Io(_))));
    }

    #[test]
    fn write_then_read() {
        let image: Vec<[f32; 3]> = (0..12)
            .map(|i| [i as f32, 0.5 * i as f32, 1.0 / (i + 1) as f32])
            .collect();
        let mut buf = Vec::new();
        write_hdr(&mut buf, &image, 4, 3, 1.0).unwrap();

        let read = read_hdr(&buf[..]).unwrap();
        assert_eq!((read.width, read.height), (4, 3));
        for (a, b) in image.iter().zip(read.pixels.iter()) {
            let largest = a[0].max(a[1]).max(a[2]);
            for c in 0..3 {
                assert!((a[c] - b[c]).abs() <= largest / 128.0, "{:?} vs {:?}", a, b);
            }
        }
    }

    #[test]
    fn exposure_is_applied() {
        let mut buf = Vec::new();
        write_hdr(&mut buf, &[[1.0, 2.0, 4.0]], 1, 1, 2.0).unwrap();
        let read = read_hdr(&buf[..]).unwrap();
        assert_eq!(read.pixels, vec![[2.0, 4.0, 8.0]]);
    }

    #[test]
    fn run_length_encoded() {
        let mut buf = b"#?RADIANCE\nFORMAT=32-bit_rle_rgbe\n\n-Y 1 +X 8\n".to_vec();
        buf.extend_from_slice(&[2, 2, 0, 8]);
        // R: a run of eight 128s.
        buf.extend_from_slice(&[128 + 8, 128]);
        // G: eight literals.
        buf.extend_from_slice(&[8, 0, 16, 32, 48, 64, 80, 96, 112]);
        // B: a run of four zeros, then a run of four 64s.
        buf.extend_from_slice(&[128 + 4, 0, 128 + 4, 64]);
        // E: all 129.
        buf.extend_from_slice(&[128 + 8, 129]);

        let read = read_hdr(&buf[..]).unwrap();
        assert_eq!(read.pixels.len(), 8);
        assert_eq!(read.pixels[0], [1.0, 0.0, 0.0]);
        assert_eq!(read.pixels[7], [1.0, 112.0 / 128.0, 0.5]);
    }

    #[test]
    fn rejects_bad_headers() {
        assert!(matches!(read_hdr(&b"P6\n1 1\n255\n"[..]), Err(HdrError::NotHdr)));
        assert!(matches!(
            read_hdr(&b"#?RADIANCE\nFORMAT=32-bit_rle_xyze\n\n-Y 1 +X 1\n\0\0\0\0"[..]),
            Err(HdrError::Unsupported(_))
        ));
        assert!(matches!(
            read_hdr(&b"#?RADIANCE\n\n+Y 1 +X 1\n\0\0\0\0"[..]),
            Err(HdrError::Unsupported(_))
        ));
        assert!(read_hdr(&b"#?RADIANCE\n\n-Y 2 +X 2\n\0\0\0\0"[..]).is_err());
    }
}
