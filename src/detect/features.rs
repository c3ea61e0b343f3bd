// Geometric posture features derived from a landmark set

use crate::detect::error::{DetectError, DetectResult};
use crate::models::pose::{BodyLandmark, Keypoint3D, LandmarkSet};
use serde::{Deserialize, Serialize};

/// Joints the classifier needs from every landmark set
const REQUIRED_JOINTS: [BodyLandmark; 4] = [
    BodyLandmark::LeftShoulder,
    BodyLandmark::RightShoulder,
    BodyLandmark::LeftHip,
    BodyLandmark::RightHip,
];

/// Per-frame posture geometry in normalized [0, 1] frame coordinates
///
/// Computed fresh every frame and never persisted across frames.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PostureFeatures {
    /// Absolute difference between average shoulder Y and average hip Y
    pub vertical_extent: f32,
    /// Absolute difference between average shoulder X and average hip X
    pub horizontal_extent: f32,
}

/// Extract posture features from a landmark set
///
/// Fails with [`DetectError::MissingJoint`] when a shoulder or hip is absent
/// or falls below `min_visibility`. Pure and deterministic.
pub fn extract_features(
    landmarks: &LandmarkSet,
    min_visibility: f32,
) -> DetectResult<PostureFeatures> {
    let [left_shoulder, right_shoulder, left_hip, right_hip] =
        required_joints(landmarks, min_visibility)?;

    let avg_shoulder_y = (left_shoulder.y + right_shoulder.y) / 2.0;
    let avg_hip_y = (left_hip.y + right_hip.y) / 2.0;
    let avg_shoulder_x = (left_shoulder.x + right_shoulder.x) / 2.0;
    let avg_hip_x = (left_hip.x + right_hip.x) / 2.0;

    Ok(PostureFeatures {
        vertical_extent: (avg_shoulder_y - avg_hip_y).abs(),
        horizontal_extent: (avg_shoulder_x - avg_hip_x).abs(),
    })
}

fn required_joints(
    landmarks: &LandmarkSet,
    min_visibility: f32,
) -> DetectResult<[Keypoint3D; 4]> {
    let mut joints = [Keypoint3D::new(0.0, 0.0, 0.0, 0.0); 4];
    for (slot, &joint) in joints.iter_mut().zip(REQUIRED_JOINTS.iter()) {
        *slot = landmarks
            .get(joint)
            .filter(|k| k.is_visible(min_visibility))
            .ok_or(DetectError::MissingJoint(joint))?;
    }
    Ok(joints)
}
