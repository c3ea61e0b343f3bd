//! Frame-by-frame fall detection from human-pose keypoints.
//!
//! The crate wires an external frame source and an external pose estimator
//! into a detection loop: each tick it polls for a frame, runs pose
//! estimation, derives posture geometry from the shoulder and hip joints,
//! and publishes a fall / no-fall decision to subscribers.
//!
//! ```no_run
//! use fallwatch::{DetectorConfig, FallDetector};
//! # use fallwatch::{DetectResult, FramePoll, FrameSource, LandmarkSet, PoseEstimator, VideoFrame};
//! # struct Camera;
//! # impl FrameSource for Camera {
//! #     fn poll_frame(&mut self) -> FramePoll { FramePoll::NotReady }
//! # }
//! # struct Model;
//! # #[async_trait::async_trait]
//! # impl PoseEstimator for Model {
//! #     async fn estimate(&self, _: &VideoFrame, _: i64) -> DetectResult<Vec<LandmarkSet>> {
//! #         Ok(vec![])
//! #     }
//! # }
//!
//! # async fn run() -> DetectResult<()> {
//! let detector = FallDetector::new(DetectorConfig::default())?;
//! let mut updates = detector.subscribe();
//!
//! let loop_task = detector.start(Camera, Model).await?;
//!
//! while updates.changed().await.is_ok() {
//!     if *updates.borrow() {
//!         println!("fall detected");
//!     }
//! }
//! # loop_task.abort();
//! # Ok(())
//! # }
//! ```

pub mod detect;
pub mod models;

pub use detect::classifier::FallClassifier;
pub use detect::config::{DetectorConfig, PoseLossPolicy};
pub use detect::detector::{
    DetectionStats, DetectorStatus, FallDetector, FrameSource, PoseEstimator,
};
pub use detect::error::{DetectError, DetectResult};
pub use detect::features::{extract_features, PostureFeatures};
pub use models::frame::{FramePoll, PixelFormat, VideoFrame};
pub use models::pose::{BodyLandmark, Keypoint3D, LandmarkSet};
