//! Conversions between CIE XYZ and linear RGB (Rec.709 primaries, D65
//! white point).

use crate::array2d::Array2Df;
use crate::frame::Frame;
use crate::FrameError;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ColorSpace {
    Xyz,
    Rgb,
}

pub const RGB_TO_XYZ: [[f32; 3]; 3] = [
    [0.412424, 0.357579, 0.180464],
    [0.212656, 0.715158, 0.0721856],
    [0.0193324, 0.119193, 0.950444],
];

pub const XYZ_TO_RGB: [[f32; 3]; 3] = [
    [3.240708, -1.537259, -0.498570],
    [-0.969257, 1.875995, 0.041555],
    [0.055636, -0.203996, 1.057069],
];

#[inline(always)]
pub fn mul_matrix(m: &[[f32; 3]; 3], v: [f32; 3]) -> [f32; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

#[inline(always)]
pub fn rgb_to_xyz(rgb: [f32; 3]) -> [f32; 3] {
    mul_matrix(&RGB_TO_XYZ, rgb)
}

#[inline(always)]
pub fn xyz_to_rgb(xyz: [f32; 3]) -> [f32; 3] {
    mul_matrix(&XYZ_TO_RGB, xyz)
}

/// Luminance (the `Y` of XYZ) of a linear RGB triple.
#[inline(always)]
pub fn rgb_luminance(rgb: [f32; 3]) -> f32 {
    RGB_TO_XYZ[1][0] * rgb[0] + RGB_TO_XYZ[1][1] * rgb[1] + RGB_TO_XYZ[1][2] * rgb[2]
}

fn matrix_between(from: ColorSpace, to: ColorSpace) -> Option<&'static [[f32; 3]; 3]> {
    match (from, to) {
        (ColorSpace::Rgb, ColorSpace::Xyz) => Some(&RGB_TO_XYZ),
        (ColorSpace::Xyz, ColorSpace::Rgb) => Some(&XYZ_TO_RGB),
        _ => None,
    }
}

/// Converts three source channels into three destination channels.
///
/// All six arrays must have the same dimensions.  Converting a space
/// into itself is a plain copy.
pub fn transform_color_space(
    from: ColorSpace,
    src: [&Array2Df; 3],
    to: ColorSpace,
    dst: [&mut Array2Df; 3],
) -> Result<(), FrameError> {
    let dims = src[0].dimensions();
    for d in src.iter().map(|a| a.dimensions()).chain(dst.iter().map(|a| a.dimensions())) {
        if d != dims {
            return Err(FrameError::SizeMismatch {
                expected: dims,
                got: d,
            });
        }
    }

    let [d0, d1, d2] = dst;
    match matrix_between(from, to) {
        None => {
            d0.as_mut_slice().copy_from_slice(src[0].as_slice());
            d1.as_mut_slice().copy_from_slice(src[1].as_slice());
            d2.as_mut_slice().copy_from_slice(src[2].as_slice());
        }
        Some(m) => {
            for i in 0..src[0].len() {
                let out = mul_matrix(m, [src[0][i], src[1][i], src[2][i]]);
                d0[i] = out[0];
                d1[i] = out[1];
                d2[i] = out[2];
            }
        }
    }

    Ok(())
}

/// Converts the frame's color channels in place, renaming them to
/// match the target space.
pub fn convert_frame(frame: &mut Frame, to: ColorSpace) -> Result<(), FrameError> {
    let (names_from, names_to, from) = match to {
        ColorSpace::Xyz => (["R", "G", "B"], ["X", "Y", "Z"], ColorSpace::Rgb),
        ColorSpace::Rgb => (["X", "Y", "Z"], ["R", "G", "B"], ColorSpace::Xyz),
    };

    if frame.channel(names_to[0]).is_some() && frame.channel(names_from[0]).is_none() {
        // Already in the requested space.
        return Ok(());
    }

    let m = matrix_between(from, to).ok_or(FrameError::MissingChannel(names_from[0].into()))?;
    for name in names_from.iter() {
        if frame.channel(name).is_none() {
            return Err(FrameError::MissingChannel((*name).into()));
        }
    }

    {
        let (a, b, c) = match to {
            ColorSpace::Xyz => frame.rgb_channels_mut(),
            ColorSpace::Rgb => frame.xyz_channels_mut(),
        }
        .ok_or(FrameError::MissingChannel(names_from[0].into()))?;
        for i in 0..a.len() {
            let out = mul_matrix(m, [a[i], b[i], c[i]]);
            a[i] = out[0];
            b[i] = out[1];
            c[i] = out[2];
        }
    }
    frame.rename_channels(names_from, names_to);

    Ok(())
}
