// Fall classification rule

use crate::detect::features::PostureFeatures;

/// Classifies posture features as fall / no-fall
///
/// An upright torso keeps the shoulder-hip line mostly vertical, so the
/// vertical extent dominates; a fallen torso flips that relation. The
/// threshold factor biases against false positives from bending or leaning.
#[derive(Debug, Clone, Copy)]
pub struct FallClassifier {
    threshold_factor: f32,
}

impl FallClassifier {
    pub fn new(threshold_factor: f32) -> Self {
        Self { threshold_factor }
    }

    /// True iff the horizontal extent strictly exceeds the vertical extent
    /// times the threshold factor
    pub fn classify(&self, features: &PostureFeatures) -> bool {
        features.horizontal_extent > features.vertical_extent * self.threshold_factor
    }
}

impl Default for FallClassifier {
    fn default() -> Self {
        Self::new(1.5)
    }
}
