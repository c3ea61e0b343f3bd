// Detection loop - drives the per-frame cycle and owns the decision state

use crate::detect::classifier::FallClassifier;
use crate::detect::config::{DetectorConfig, PoseLossPolicy};
use crate::detect::error::{DetectError, DetectResult};
use crate::detect::features::extract_features;
use crate::models::frame::{FramePoll, VideoFrame};
use crate::models::pose::LandmarkSet;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// Non-blocking provider of decodable video frames
pub trait FrameSource: Send {
    /// Poll for the next frame. `NotReady` is expected while the upstream
    /// provider is still buffering; the loop retries on its next tick.
    fn poll_frame(&mut self) -> FramePoll;
}

/// Opaque per-frame pose estimator
///
/// Returns zero or more detected skeletons; index 0 is the primary
/// detection when non-empty. An `Err` is treated as fatal by the loop.
#[async_trait]
pub trait PoseEstimator: Send + Sync {
    async fn estimate(
        &self,
        frame: &VideoFrame,
        timestamp_ms: i64,
    ) -> DetectResult<Vec<LandmarkSet>>;
}

/// Detector status for consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorStatus {
    pub is_running: bool,
    pub fall_detected: bool,
    pub started_at: Option<DateTime<Utc>>,
}

/// Counters accumulated over one detector run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionStats {
    /// Frames that went through pose estimation
    pub frames_processed: u64,
    pub frames_with_pose: u64,
    pub frames_without_pose: u64,
    /// Frames skipped because a required joint was missing
    pub frames_missing_joints: u64,
    /// Ticks on which the frame source had nothing to hand out
    pub frames_not_ready: u64,
    /// Transitions from no-fall to fall
    pub falls_signaled: u64,
    pub total_estimation_ms: u64,
}

impl DetectionStats {
    pub fn average_estimation_ms(&self) -> f32 {
        if self.frames_processed == 0 {
            0.0
        } else {
            self.total_estimation_ms as f32 / self.frames_processed as f32
        }
    }
}

/// Outcome of one classification step
#[derive(Debug)]
enum Observation {
    /// A pose was processed and produced a decision
    Pose { fall: bool },
    /// No pose detected this frame
    NoPose,
    /// Landmark set was unusable; decision untouched
    Rejected(DetectError),
}

/// Per-frame decision state
///
/// Owns the fall/no-fall value between frames and applies the configured
/// pose-loss policy. Kept separate from the async loop so the state
/// machine is testable on its own.
struct FallDecision {
    classifier: FallClassifier,
    pose_loss: PoseLossPolicy,
    min_visibility: f32,
    missed_frames: u32,
    fall_detected: bool,
}

impl FallDecision {
    fn new(config: &DetectorConfig) -> Self {
        Self {
            classifier: FallClassifier::new(config.threshold_factor),
            pose_loss: config.pose_loss,
            min_visibility: config.min_visibility,
            missed_frames: 0,
            fall_detected: false,
        }
    }

    /// Fold one frame's detections into the decision state
    fn observe(&mut self, detections: &[LandmarkSet]) -> Observation {
        // Single-subject assumption: only the first detection is considered
        let landmarks = match detections.first() {
            Some(set) if !set.is_empty() => set,
            _ => return self.pose_lost(),
        };

        match extract_features(landmarks, self.min_visibility) {
            Ok(features) => {
                self.missed_frames = 0;
                self.fall_detected = self.classifier.classify(&features);
                Observation::Pose {
                    fall: self.fall_detected,
                }
            }
            Err(err) => Observation::Rejected(err),
        }
    }

    fn pose_lost(&mut self) -> Observation {
        self.missed_frames = self.missed_frames.saturating_add(1);

        match self.pose_loss {
            PoseLossPolicy::Hold => {}
            PoseLossPolicy::Reset => self.fall_detected = false,
            PoseLossPolicy::DecayAfter(frames) => {
                if self.missed_frames >= frames {
                    self.fall_detected = false;
                }
            }
        }

        Observation::NoPose
    }
}

/// Frame-by-frame fall detector
///
/// Pulls frames from a [`FrameSource`] on a fixed tick, runs them through a
/// [`PoseEstimator`], and publishes a fall/no-fall decision that consumers
/// read through [`FallDetector::subscribe`] or [`FallDetector::fall_detected`].
pub struct FallDetector {
    config: DetectorConfig,
    is_running: Arc<RwLock<bool>>,
    estimation_gate: Arc<Mutex<()>>,
    state_tx: watch::Sender<bool>,
    stats: Arc<RwLock<DetectionStats>>,
    started_at: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl FallDetector {
    pub fn new(config: DetectorConfig) -> DetectResult<Self> {
        config.validate()?;
        let (state_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            is_running: Arc::new(RwLock::new(false)),
            estimation_gate: Arc::new(Mutex::new(())),
            state_tx,
            stats: Arc::new(RwLock::new(DetectionStats::default())),
            started_at: Arc::new(RwLock::new(None)),
        })
    }

    /// Start the detection loop
    ///
    /// The loop runs until [`FallDetector::stop`] is called or the estimator
    /// fails. A fatal estimator error is returned through the join handle so
    /// the owner can decide between teardown and restart.
    pub async fn start<S, E>(
        &self,
        source: S,
        estimator: E,
    ) -> DetectResult<JoinHandle<DetectResult<()>>>
    where
        S: FrameSource + 'static,
        E: PoseEstimator + 'static,
    {
        {
            let mut is_running = self.is_running.write().await;
            if *is_running {
                return Err(DetectError::AlreadyRunning);
            }
            *is_running = true;
        }

        *self.stats.write().await = DetectionStats::default();
        *self.started_at.write().await = Some(Utc::now());

        tracing::info!(target_fps = self.config.target_fps, "fall detector started");

        Ok(tokio::spawn(Self::run_loop(
            source,
            estimator,
            self.config.clone(),
            self.is_running.clone(),
            self.estimation_gate.clone(),
            self.state_tx.clone(),
            self.stats.clone(),
        )))
    }

    /// Request a cooperative shutdown; the loop exits at its next cycle
    /// boundary. An in-flight estimation resolves first and its result is
    /// discarded. No-op when not running.
    pub async fn stop(&self) {
        let mut is_running = self.is_running.write().await;
        if !*is_running {
            return;
        }
        *is_running = false;

        tracing::info!("fall detector stop requested");
    }

    /// Subscribe to decision updates; the receiver also serves as a
    /// readable state cell
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state_tx.subscribe()
    }

    /// Current decision snapshot
    pub fn fall_detected(&self) -> bool {
        *self.state_tx.borrow()
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub async fn status(&self) -> DetectorStatus {
        DetectorStatus {
            is_running: *self.is_running.read().await,
            fall_detected: self.fall_detected(),
            started_at: *self.started_at.read().await,
        }
    }

    pub async fn stats(&self) -> DetectionStats {
        self.stats.read().await.clone()
    }

    async fn run_loop<S, E>(
        mut source: S,
        estimator: E,
        config: DetectorConfig,
        is_running: Arc<RwLock<bool>>,
        estimation_gate: Arc<Mutex<()>>,
        state_tx: watch::Sender<bool>,
        stats: Arc<RwLock<DetectionStats>>,
    ) -> DetectResult<()>
    where
        S: FrameSource + 'static,
        E: PoseEstimator + 'static,
    {
        let mut decision = FallDecision::new(&config);
        let mut ticker =
            time::interval(Duration::from_secs_f64(1.0 / config.target_fps as f64));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        state_tx.send_replace(false);

        loop {
            ticker.tick().await;

            if !*is_running.read().await {
                break;
            }

            let frame = match source.poll_frame() {
                FramePoll::Ready(frame) => frame,
                FramePoll::NotReady => {
                    stats.write().await.frames_not_ready += 1;
                    continue;
                }
            };

            let started = Instant::now();
            let detections = {
                // Exactly one estimation call in flight at a time; this
                // await and the tick above are the loop's only suspension
                // points.
                let _in_flight = estimation_gate.lock().await;
                estimator.estimate(&frame, frame.timestamp_ms).await
            };
            let estimation_ms = started.elapsed().as_millis() as u64;

            let detections = match detections {
                Ok(detections) => detections,
                Err(err) => {
                    *is_running.write().await = false;
                    tracing::error!(error = %err, "estimator failed, stopping detection loop");
                    return Err(err);
                }
            };

            // Teardown may have been requested while the estimation was in
            // flight; discard the result in that case.
            if !*is_running.read().await {
                break;
            }

            let was_fall = *state_tx.borrow();
            let observation = decision.observe(&detections);

            match &observation {
                Observation::Pose { fall } => {
                    if *fall != was_fall {
                        tracing::info!(
                            timestamp_ms = frame.timestamp_ms,
                            fall = *fall,
                            "detection state changed"
                        );
                    }
                    // Published every cycle that yielded a pose, changed or not
                    state_tx.send_replace(*fall);
                }
                Observation::NoPose => {
                    if decision.fall_detected != was_fall {
                        tracing::info!("detection state reset after pose loss");
                        state_tx.send_replace(decision.fall_detected);
                    }
                }
                Observation::Rejected(err) => {
                    tracing::warn!(
                        error = %err,
                        timestamp_ms = frame.timestamp_ms,
                        "unusable landmark set, skipping frame"
                    );
                }
            }

            let mut stats = stats.write().await;
            stats.frames_processed += 1;
            stats.total_estimation_ms += estimation_ms;
            match &observation {
                Observation::Pose { .. } => stats.frames_with_pose += 1,
                Observation::NoPose => stats.frames_without_pose += 1,
                Observation::Rejected(_) => stats.frames_missing_joints += 1,
            }
            if decision.fall_detected && !was_fall {
                stats.falls_signaled += 1;
            }
        }

        tracing::info!("detection loop stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::frame::PixelFormat;
    use crate::models::pose::{BodyLandmark, Keypoint3D};
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    fn landmark_set(shoulders: [(f32, f32); 2], hips: [(f32, f32); 2]) -> LandmarkSet {
        let mut keypoints = vec![Keypoint3D::new(0.0, 0.0, 0.0, 1.0); 33];
        keypoints[BodyLandmark::LeftShoulder.index()] =
            Keypoint3D::new(shoulders[0].0, shoulders[0].1, 0.0, 1.0);
        keypoints[BodyLandmark::RightShoulder.index()] =
            Keypoint3D::new(shoulders[1].0, shoulders[1].1, 0.0, 1.0);
        keypoints[BodyLandmark::LeftHip.index()] =
            Keypoint3D::new(hips[0].0, hips[0].1, 0.0, 1.0);
        keypoints[BodyLandmark::RightHip.index()] =
            Keypoint3D::new(hips[1].0, hips[1].1, 0.0, 1.0);
        LandmarkSet::new(keypoints)
    }

    fn upright_set() -> LandmarkSet {
        landmark_set([(0.5, 0.2), (0.6, 0.2)], [(0.5, 0.8), (0.6, 0.8)])
    }

    fn fallen_set() -> LandmarkSet {
        landmark_set([(0.2, 0.5), (0.8, 0.52)], [(0.25, 0.51), (0.85, 0.53)])
    }

    fn truncated_set() -> LandmarkSet {
        LandmarkSet::new(upright_set().keypoints[..20].to_vec())
    }

    fn test_config() -> DetectorConfig {
        DetectorConfig {
            target_fps: 120,
            ..DetectorConfig::default()
        }
    }

    // ----- FallDecision state machine -----

    #[test]
    fn test_upright_and_fallen_decisions() {
        let mut decision = FallDecision::new(&DetectorConfig::default());

        assert!(matches!(
            decision.observe(&[upright_set()]),
            Observation::Pose { fall: false }
        ));
        assert!(matches!(
            decision.observe(&[fallen_set()]),
            Observation::Pose { fall: true }
        ));
        assert!(decision.fall_detected);
    }

    #[test]
    fn test_identical_input_is_idempotent() {
        let mut decision = FallDecision::new(&DetectorConfig::default());

        for _ in 0..2 {
            assert!(matches!(
                decision.observe(&[fallen_set()]),
                Observation::Pose { fall: true }
            ));
            assert!(decision.fall_detected);
        }
    }

    #[test]
    fn test_empty_frames_then_fall() {
        // DetectionState transitions false -> false -> true
        let mut decision = FallDecision::new(&DetectorConfig::default());

        assert!(matches!(decision.observe(&[]), Observation::NoPose));
        assert!(!decision.fall_detected);
        assert!(matches!(decision.observe(&[]), Observation::NoPose));
        assert!(!decision.fall_detected);
        assert!(matches!(
            decision.observe(&[fallen_set()]),
            Observation::Pose { fall: true }
        ));
    }

    #[test]
    fn test_hold_policy_keeps_last_value() {
        let mut decision = FallDecision::new(&DetectorConfig::default());

        decision.observe(&[fallen_set()]);
        decision.observe(&[]);
        decision.observe(&[]);
        assert!(decision.fall_detected);
    }

    #[test]
    fn test_reset_policy_clears_on_first_loss() {
        let config = DetectorConfig {
            pose_loss: PoseLossPolicy::Reset,
            ..DetectorConfig::default()
        };
        let mut decision = FallDecision::new(&config);

        decision.observe(&[fallen_set()]);
        assert!(decision.fall_detected);
        decision.observe(&[]);
        assert!(!decision.fall_detected);
    }

    #[test]
    fn test_decay_policy_clears_after_n_losses() {
        let config = DetectorConfig {
            pose_loss: PoseLossPolicy::DecayAfter(3),
            ..DetectorConfig::default()
        };
        let mut decision = FallDecision::new(&config);

        decision.observe(&[fallen_set()]);
        decision.observe(&[]);
        decision.observe(&[]);
        assert!(decision.fall_detected);
        decision.observe(&[]);
        assert!(!decision.fall_detected);

        // A reappearing pose restarts the countdown
        decision.observe(&[fallen_set()]);
        decision.observe(&[]);
        assert!(decision.fall_detected);
    }

    #[test]
    fn test_missing_joint_leaves_decision_untouched() {
        let mut decision = FallDecision::new(&DetectorConfig::default());

        decision.observe(&[fallen_set()]);
        assert!(matches!(
            decision.observe(&[truncated_set()]),
            Observation::Rejected(DetectError::MissingJoint(_))
        ));
        assert!(decision.fall_detected);
    }

    #[test]
    fn test_only_first_detection_is_used() {
        let mut decision = FallDecision::new(&DetectorConfig::default());

        assert!(matches!(
            decision.observe(&[fallen_set(), upright_set()]),
            Observation::Pose { fall: true }
        ));
    }

    #[test]
    fn test_empty_landmark_set_counts_as_pose_loss() {
        let mut decision = FallDecision::new(&DetectorConfig::default());

        decision.observe(&[fallen_set()]);
        assert!(matches!(
            decision.observe(&[LandmarkSet::default()]),
            Observation::NoPose
        ));
        assert!(decision.fall_detected);
    }

    // ----- Detection loop plumbing -----

    struct ScriptedSource {
        polls: VecDeque<FramePoll>,
    }

    impl ScriptedSource {
        fn frames(count: usize) -> Self {
            let polls = (0..count)
                .map(|i| {
                    FramePoll::Ready(VideoFrame {
                        timestamp_ms: i as i64 * 33,
                        width: 4,
                        height: 4,
                        data: vec![0; 64],
                        format: PixelFormat::Rgba8,
                    })
                })
                .collect();
            Self { polls }
        }

        fn never_ready() -> Self {
            Self {
                polls: VecDeque::new(),
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn poll_frame(&mut self) -> FramePoll {
            self.polls.pop_front().unwrap_or(FramePoll::NotReady)
        }
    }

    struct ScriptedEstimator {
        results: StdMutex<VecDeque<DetectResult<Vec<LandmarkSet>>>>,
    }

    impl ScriptedEstimator {
        fn new(results: Vec<DetectResult<Vec<LandmarkSet>>>) -> Self {
            Self {
                results: StdMutex::new(results.into()),
            }
        }
    }

    #[async_trait]
    impl PoseEstimator for ScriptedEstimator {
        async fn estimate(
            &self,
            _frame: &VideoFrame,
            _timestamp_ms: i64,
        ) -> DetectResult<Vec<LandmarkSet>> {
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![]))
        }
    }

    async fn wait_until(detector: &FallDetector, what: &str, cond: impl Fn(&DetectionStats) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if cond(&detector.stats().await) {
                return;
            }
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_loop_signals_fall_and_stops_cleanly() {
        let detector = FallDetector::new(test_config()).unwrap();
        let rx = detector.subscribe();

        let estimator = ScriptedEstimator::new(vec![
            Ok(vec![upright_set()]),
            Ok(vec![fallen_set()]),
        ]);
        let handle = detector
            .start(ScriptedSource::frames(2), estimator)
            .await
            .unwrap();

        wait_until(&detector, "both frames", |s| s.frames_processed >= 2).await;

        assert!(detector.fall_detected());
        assert!(*rx.borrow());

        let stats = detector.stats().await;
        assert_eq!(stats.frames_with_pose, 2);
        assert_eq!(stats.falls_signaled, 1);

        let status = detector.status().await;
        assert!(status.is_running);
        assert!(status.fall_detected);
        assert!(status.started_at.is_some());

        detector.stop().await;
        assert!(handle.await.unwrap().is_ok());
        assert!(!detector.is_running().await);
        // Last value is held after shutdown
        assert!(detector.fall_detected());
    }

    #[tokio::test]
    async fn test_not_ready_source_keeps_loop_alive() {
        let detector = FallDetector::new(test_config()).unwrap();

        let handle = detector
            .start(ScriptedSource::never_ready(), ScriptedEstimator::new(vec![]))
            .await
            .unwrap();

        wait_until(&detector, "five empty polls", |s| s.frames_not_ready >= 5).await;

        assert!(detector.is_running().await);
        assert!(!detector.fall_detected());
        assert_eq!(detector.stats().await.frames_processed, 0);

        detector.stop().await;
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_missing_joints_are_nonfatal() {
        let detector = FallDetector::new(test_config()).unwrap();

        let estimator = ScriptedEstimator::new(vec![
            Ok(vec![fallen_set()]),
            Ok(vec![truncated_set()]),
        ]);
        let handle = detector
            .start(ScriptedSource::frames(2), estimator)
            .await
            .unwrap();

        wait_until(&detector, "both frames", |s| s.frames_processed >= 2).await;

        let stats = detector.stats().await;
        assert_eq!(stats.frames_missing_joints, 1);
        // The malformed frame did not overwrite the previous decision
        assert!(detector.fall_detected());
        assert!(detector.is_running().await);

        detector.stop().await;
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_estimator_failure_stops_loop() {
        let detector = FallDetector::new(test_config()).unwrap();

        let estimator = ScriptedEstimator::new(vec![
            Ok(vec![fallen_set()]),
            Err(DetectError::EstimationFailed("backend crash".to_string())),
        ]);
        let handle = detector
            .start(ScriptedSource::frames(2), estimator)
            .await
            .unwrap();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(DetectError::EstimationFailed(_))));
        assert!(!detector.is_running().await);
        // State stops updating but is not corrupted
        assert!(detector.fall_detected());
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let detector = FallDetector::new(test_config()).unwrap();

        let handle = detector
            .start(ScriptedSource::never_ready(), ScriptedEstimator::new(vec![]))
            .await
            .unwrap();

        let second = detector
            .start(ScriptedSource::never_ready(), ScriptedEstimator::new(vec![]))
            .await;
        assert!(matches!(second, Err(DetectError::AlreadyRunning)));

        detector.stop().await;
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = DetectorConfig {
            threshold_factor: -1.0,
            ..DetectorConfig::default()
        };
        assert!(matches!(
            FallDetector::new(config),
            Err(DetectError::InvalidConfig(_))
        ));
    }
}
