//! Parametric transfer curves used as built-in camera responses.
//!
//! Every module maps between normalized encoded values in [0.0, 1.0]
//! and normalized linear values in [0.0, 1.0].

/// The sRGB gamma curve.
pub mod srgb {
    /// Linear -> sRGB
    pub fn from_linear(n: f32) -> f32 {
        if n < 0.003_130_8 {
            n * 12.92
        } else {
            (1.055 * n.powf(1.0 / 2.4)) - 0.055
        }
    }

    /// sRGB -> Linear
    pub fn to_linear(n: f32) -> f32 {
        if n < 0.04045 {
            n / 12.92
        } else {
            ((n + 0.055) / 1.055).powf(2.4)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn from_linear_test() {
            assert_eq!(from_linear(0.0), 0.0);
            assert!((from_linear(1.0) - 1.0).abs() < 0.0000001);
        }

        #[test]
        fn to_linear_test() {
            assert_eq!(to_linear(0.0), 0.0);
            assert!((to_linear(1.0) - 1.0).abs() < 0.0000001);
        }
    }
}

/// A pure power-law curve with the classic 2.2 display exponent.
pub mod gamma {
    pub const GAMMA: f32 = 2.2;

    pub fn from_linear(n: f32) -> f32 {
        n.max(0.0).powf(1.0 / GAMMA)
    }

    pub fn to_linear(n: f32) -> f32 {
        n.max(0.0).powf(GAMMA)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn end_points() {
            assert_eq!(to_linear(0.0), 0.0);
            assert_eq!(to_linear(1.0), 1.0);
            assert_eq!(from_linear(1.0), 1.0);
        }

        #[test]
        fn mid_gray() {
            assert!((from_linear(to_linear(0.5)) - 0.5).abs() < 0.00001);
        }
    }
}

/// A logarithmic encoding, `encoded = log10(1 + 9 * linear)`.
pub mod log10 {
    pub fn from_linear(n: f32) -> f32 {
        (1.0 + 9.0 * n.max(0.0)).log10()
    }

    pub fn to_linear(n: f32) -> f32 {
        (10.0f32.powf(n) - 1.0) / 9.0
    }

}
