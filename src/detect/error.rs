// Error types for the detection pipeline

use crate::models::pose::BodyLandmark;

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    /// A landmark set lacked one of the joints the classifier needs.
    /// Non-fatal: the loop skips classification for that frame.
    #[error("required joint {0:?} missing from landmark set")]
    MissingJoint(BodyLandmark),

    /// The pose estimator itself failed. Fatal to the detection loop.
    #[error("pose estimation failed: {0}")]
    EstimationFailed(String),

    #[error("detector already running")]
    AlreadyRunning,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DetectResult<T> = Result<T, DetectError>;
