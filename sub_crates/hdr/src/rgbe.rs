//! The shared-exponent RGBE pixel encoding of Radiance .hdr files.
//!
//! Each pixel is four bytes: three 8-bit mantissas and one exponent
//! byte with a bias of 128.  The exponent is chosen from the largest
//! channel, so smaller channels lose precision.

/// Largest encodable value.  Anything above is clamped.
const MAX_VALUE: f32 = 1.0e38;

/// Smallest value that doesn't encode to black.
const MIN_VALUE: f32 = 1.0e-32;

#[inline(always)]
fn sanitize(n: f32) -> f32 {
    // NaN and negatives both become zero.
    if n > 0.0 {
        n.min(MAX_VALUE)
    } else {
        0.0
    }
}

/// `floor(log2(n)) + 1` for normal, positive `n`.
#[inline(always)]
fn frexp_exponent(n: f32) -> i32 {
    ((n.to_bits() >> 23) & 0xff) as i32 - 126
}

#[inline]
pub fn encode(rgb: [f32; 3]) -> [u8; 4] {
    let rgb = [sanitize(rgb[0]), sanitize(rgb[1]), sanitize(rgb[2])];
    let largest = rgb[0].max(rgb[1]).max(rgb[2]);
    if largest < MIN_VALUE {
        return [0, 0, 0, 0];
    }

    let e = frexp_exponent(largest);
    let scale = 2.0f32.powi(8 - e);
    [
        (rgb[0] * scale).min(255.0) as u8,
        (rgb[1] * scale).min(255.0) as u8,
        (rgb[2] * scale).min(255.0) as u8,
        (e + 128) as u8,
    ]
}

#[inline]
pub fn decode(rgbe: [u8; 4]) -> [f32; 3] {
    if rgbe[3] == 0 {
        return [0.0; 3];
    }
    let scale = 2.0f32.powi(rgbe[3] as i32 - (128 + 8));
    [
        rgbe[0] as f32 * scale,
        rgbe[1] as f32 * scale,
        rgbe[2] as f32 * scale,
    ]
}
