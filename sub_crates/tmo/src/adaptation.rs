use pfs::Array2Df;

/// Adaptation levels are never allowed below this, in cd/m^2.
pub const MIN_ADAPTATION: f32 = 1.0e-4;

// Time constants in seconds.
const CONE_NEURAL_TAU: f32 = 0.08;
const ROD_NEURAL_TAU: f32 = 0.15;
const CONE_BLEACH_TAU: f32 = 110.0;
const ROD_BLEACH_TAU: f32 = 400.0;

/// State of the eye's adaptation: a fast neural level and a slow
/// photopigment bleaching level, separately for cones and rods.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualAdaptationModel {
    cone: f32,
    rod: f32,
    cone_bleach_level: f32,
    rod_bleach_level: f32,
}

impl Default for VisualAdaptationModel {
    fn default() -> VisualAdaptationModel {
        VisualAdaptationModel {
            cone: MIN_ADAPTATION,
            rod: MIN_ADAPTATION,
            cone_bleach_level: MIN_ADAPTATION,
            rod_bleach_level: MIN_ADAPTATION,
        }
    }
}

impl VisualAdaptationModel {
    pub fn new() -> VisualAdaptationModel {
        VisualAdaptationModel::default()
    }

    /// Sets fully adapted (steady state) cone and rod levels.
    pub fn set_adaptation(&mut self, cone: f32, rod: f32) {
        let cone = clamp_level(cone);
        let rod = clamp_level(rod);
        self.cone = cone;
        self.rod = rod;
        self.cone_bleach_level = cone;
        self.rod_bleach_level = rod;
    }

    /// Fully adapts to the log-average of a luminance channel.
    pub fn set_adaptation_from_luminance(&mut self, y: &Array2Df) {
        let level = log_average(y);
        self.set_adaptation(level, level);
    }

    /// Advances the model by `dt` seconds of viewing the luminance
    /// channel `y`.
    pub fn calculate_adaptation(&mut self, y: &Array2Df, dt: f32) {
        let target = clamp_level(log_average(y));
        self.cone = approach(self.cone, target, dt, CONE_NEURAL_TAU);
        self.rod = approach(self.rod, target, dt, ROD_NEURAL_TAU);
        self.cone_bleach_level = approach(self.cone_bleach_level, target, dt, CONE_BLEACH_TAU);
        self.rod_bleach_level = approach(self.rod_bleach_level, target, dt, ROD_BLEACH_TAU);
    }

    pub fn cone_adaptation(&self) -> f32 {
        self.cone
    }

    pub fn rod_adaptation(&self) -> f32 {
        self.rod
    }

    /// Fraction of unbleached cone photopigment, in (0, 1].
    pub fn cone_bleaching(&self) -> f32 {
        cone_bleaching(self.cone_bleach_level)
    }

    /// Fraction of unbleached rod photopigment, in (0, 1].
    pub fn rod_bleaching(&self) -> f32 {
        rod_bleaching(self.rod_bleach_level)
    }
}

#[inline]
pub(crate) fn cone_bleaching(level: f32) -> f32 {
    2.0e6 / (2.0e6 + level)
}

#[inline]
pub(crate) fn rod_bleaching(level: f32) -> f32 {
    0.04 / (0.04 + level)
}

#[inline]
pub(crate) fn clamp_level(level: f32) -> f32 {
    if level > MIN_ADAPTATION {
        level
    } else {
        MIN_ADAPTATION
    }
}

/// First-order low-pass step towards `target`.
#[inline]
fn approach(current: f32, target: f32, dt: f32, tau: f32) -> f32 {
    current + (target - current) * (1.0 - (-dt / tau).exp())
}

/// Geometric mean of the (non-negative) luminance values.
pub fn log_average(y: &Array2Df) -> f32 {
    if y.is_empty() {
        return MIN_ADAPTATION;
    }
    let sum: f64 = y
        .iter()
        .map(|&v| ((v.max(0.0) + MIN_ADAPTATION) as f64).ln())
        .sum();
    (sum / y.len() as f64).exp() as f32
}
