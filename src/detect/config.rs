use crate::detect::error::{DetectError, DetectResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What the detector does with its decision when no pose is detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseLossPolicy {
    /// Keep the last known decision until a pose reappears
    Hold,
    /// Drop back to "no fall" on the first pose-less frame
    Reset,
    /// Drop back to "no fall" after this many consecutive pose-less frames
    DecayAfter(u32),
}

/// Detector configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectorConfig {
    /// Fall is signaled when horizontal extent exceeds vertical extent
    /// times this factor. Values above 1.0 bias against false positives
    /// from normal bending or leaning.
    pub threshold_factor: f32,
    /// Tick rate of the detection loop in frames per second
    pub target_fps: u32,
    /// Joints below this visibility score count as missing (0.0 disables)
    pub min_visibility: f32,
    /// Behavior when the estimator returns no pose for a frame
    pub pose_loss: PoseLossPolicy,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold_factor: 1.5,
            target_fps: 30,
            min_visibility: 0.0,
            pose_loss: PoseLossPolicy::Hold,
        }
    }
}

impl DetectorConfig {
    /// Load configuration from file, creating it with defaults if it doesn't exist
    pub fn load(path: &Path) -> DetectResult<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: DetectorConfig = serde_json::from_str(&contents)
                .map_err(|e| DetectError::InvalidConfig(e.to_string()))?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> DetectResult<()> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| DetectError::InvalidConfig(e.to_string()))?;
        std::fs::write(path, contents)?;

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> DetectResult<()> {
        if !self.threshold_factor.is_finite() || self.threshold_factor <= 0.0 {
            return Err(DetectError::InvalidConfig(format!(
                "Invalid threshold factor: {}. Must be finite and positive",
                self.threshold_factor
            )));
        }

        if self.target_fps == 0 || self.target_fps > 120 {
            return Err(DetectError::InvalidConfig(format!(
                "Invalid target FPS: {}. Must be between 1 and 120",
                self.target_fps
            )));
        }

        if !(0.0..=1.0).contains(&self.min_visibility) {
            return Err(DetectError::InvalidConfig(format!(
                "Invalid minimum visibility: {}. Must be between 0.0 and 1.0",
                self.min_visibility
            )));
        }

        if let PoseLossPolicy::DecayAfter(frames) = self.pose_loss {
            if frames == 0 {
                return Err(DetectError::InvalidConfig(
                    "Invalid pose loss decay: frame count must be at least 1".to_string(),
                ));
            }
        }

        Ok(())
    }
}
