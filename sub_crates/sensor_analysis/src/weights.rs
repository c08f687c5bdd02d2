/// Confidence of a single encoded sample in [0.0, 1.0] when it is used
/// as a radiance estimate.
///
/// All functions except `Flat` fall off towards the black and white
/// ends of the range, where samples are likely to be clipped or noisy.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum WeightFunction {
    Triangular,
    Gaussian,
    Plateau,
    Flat,
}

impl WeightFunction {
    pub const ALL: [WeightFunction; 4] = [
        WeightFunction::Triangular,
        WeightFunction::Gaussian,
        WeightFunction::Plateau,
        WeightFunction::Flat,
    ];

    #[inline]
    pub fn eval(&self, v: f32) -> f32 {
        let v = v.max(0.0).min(1.0);
        match *self {
            WeightFunction::Triangular => 1.0 - (2.0 * v - 1.0).abs(),
            WeightFunction::Gaussian => {
                let d = v - 0.5;
                (-16.0 * d * d).exp()
            }
            WeightFunction::Plateau => {
                let d = 2.0 * v - 1.0;
                1.0 - d.powi(12)
            }
            WeightFunction::Flat => 1.0,
        }
    }

    /// Tabulates the function at `resolution` evenly spaced points.
    pub fn table(&self, resolution: usize) -> Vec<f32> {
        (0..resolution)
            .map(|i| self.eval(i as f32 / (resolution - 1) as f32))
            .collect()
    }

    pub fn name(&self) -> &'static str {
        match *self {
            WeightFunction::Triangular => "triangular",
            WeightFunction::Gaussian => "gaussian",
            WeightFunction::Plateau => "plateau",
            WeightFunction::Flat => "flat",
        }
    }

    pub fn from_name(name: &str) -> Option<WeightFunction> {
        WeightFunction::ALL
            .iter()
            .copied()
            .find(|w| w.name().eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_at_mid_gray() {
        for w in WeightFunction::ALL.iter() {
            assert_eq!(w.eval(0.5), 1.0, "{:?}", w);
        }
    }

    #[test]
    fn falls_off_at_ends() {
        assert_eq!(WeightFunction::Triangular.eval(0.0), 0.0);
        assert_eq!(WeightFunction::Triangular.eval(1.0), 0.0);
        assert_eq!(WeightFunction::Plateau.eval(0.0), 0.0);
        assert!(WeightFunction::Gaussian.eval(0.0) < 0.02);
        assert_eq!(WeightFunction::Flat.eval(0.0), 1.0);
    }

    #[test]
    fn symmetric() {
        for w in WeightFunction::ALL.iter() {
            for i in 0..=10 {
                let v = i as f32 / 20.0;
                assert!((w.eval(v) - w.eval(1.0 - v)).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn names() {
        for w in WeightFunction::ALL.iter() {
            assert_eq!(WeightFunction::from_name(w.name()), Some(*w));
        }
        assert_eq!(WeightFunction::from_name("bogus"), None);
    }
}
