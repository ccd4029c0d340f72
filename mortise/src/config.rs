use serde::{Deserialize, Serialize};

use crate::error::CalError;

/// Planned step durations and retry budgets, in engine-clock seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StepTiming {
    /// Warm-up duration while devices prove liveness
    pub warm_up_secs: f64,
    /// Neutral standing hold for the static anchor
    pub static_pose_secs: f64,
    /// Closing standing hold
    pub final_pose_secs: f64,
    /// Gentle-movement verification window
    pub verification_secs: f64,
    /// Guided neutral-pose check
    pub pose_check_secs: f64,
    /// Guided squat check
    pub squat_check_secs: f64,
    /// Seconds added per self-extension of a functional step
    pub extension_secs: f64,
    /// Maximum self-extensions per functional step
    pub max_extensions: u32,
    /// Maximum restarts of a single step (pose rejection, bad timeline)
    pub max_step_retries: u32,
    /// Maximum targeted-retry rounds after gate failures
    pub max_retry_rounds: u32,
}

impl Default for StepTiming {
    fn default() -> Self {
        Self {
            warm_up_secs: 5.0,
            static_pose_secs: 4.0,
            final_pose_secs: 4.0,
            verification_secs: 5.0,
            pose_check_secs: 5.0,
            squat_check_secs: 6.0,
            extension_secs: 5.0,
            max_extensions: 2,
            max_step_retries: 2,
            max_retry_rounds: 2,
        }
    }
}

/// Stationarity thresholds for pose holds. Shaped like a zero-velocity
/// detector: bounded rotation rate, bounded orientation spread, bounded
/// accelerometer noise, accel magnitude near 1 g.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    /// Trailing window evaluated for stationarity, seconds
    pub window_secs: f64,
    /// Minimum samples inside the window
    pub min_frames: usize,
    /// Mean per-sample gyro magnitude bound, rad/s
    pub max_gyro_mean: f64,
    /// Maximum angle of any sample from the window-mean orientation, degrees
    pub max_quat_spread_deg: f64,
    /// Accel deviation (RMS about the window mean) bound, m/s^2
    pub max_accel_std: f64,
    /// Accepted accel magnitude band around gravity, m/s^2
    pub gravity_min: f64,
    pub gravity_max: f64,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            window_secs: 1.0,
            min_frames: 25,
            max_gyro_mean: 0.05,
            max_quat_spread_deg: 2.0,
            max_accel_std: 0.25,
            gravity_min: 9.31,
            gravity_max: 10.31,
        }
    }
}

/// Acceptance thresholds for the post-capture quality gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Axis confidence required for hinge-driven segments
    pub default_axis_confidence: f64,
    /// Stricter bound for segments driven through ball-and-socket joints
    pub ball_joint_axis_confidence: f64,
    /// Live confidence below which a functional step self-extends
    pub live_axis_confidence: f64,
    /// Minimum hinge-axis confidence before it may replace the PCA axis
    pub sara_min_confidence: f64,
    /// Total movement required per segment during verification, degrees
    pub verification_min_rom_deg: f64,
    /// Maximum per-frame orientation step during verification, degrees
    pub verification_max_jitter_deg: f64,
    /// Knee flexion range required by the squat check, degrees
    pub squat_min_flexion_deg: f64,
    /// Trunk range accepted by the squat check when no knees are assigned
    pub trunk_min_range_deg: f64,
    /// Maximum deviation from neutral during the pose check, degrees
    pub pose_check_max_dev_deg: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            default_axis_confidence: 0.6,
            ball_joint_axis_confidence: 0.7,
            live_axis_confidence: 0.5,
            sara_min_confidence: 0.65,
            verification_min_rom_deg: 5.0,
            verification_max_jitter_deg: 5.0,
            squat_min_flexion_deg: 45.0,
            trunk_min_range_deg: 20.0,
            pose_check_max_dev_deg: 10.0,
        }
    }
}

/// Timeline-health classification for capture windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// Maximum device head lag accepted when assembling aligned pairs, ms
    pub max_skew_ms: f64,
    /// Interpolated-pair ratio above which a window grades yellow
    pub yellow_interp_ratio: f64,
    /// Dropped-pair ratio above which a window grades yellow
    pub yellow_drop_ratio: f64,
    /// Dropped-pair ratio above which a window grades red
    pub red_drop_ratio: f64,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            max_skew_ms: 20.0,
            yellow_interp_ratio: 0.5,
            yellow_drop_ratio: 0.05,
            red_drop_ratio: 0.2,
        }
    }
}

/// Estimator inputs: sample minimums, degeneracy bounds, residual scales.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Minimum angular-velocity samples for a functional-axis estimate
    pub min_axis_samples: usize,
    /// Split-half axis divergence that flags non-stationary motion, degrees
    pub split_half_max_divergence_deg: f64,
    /// Confidence multiplier applied to flagged estimates
    pub split_half_penalty: f64,
    /// Minimum relative angular speed for a hinge-axis frame, rad/s
    pub sara_min_rel_omega: f64,
    /// Minimum aligned frames for joint-center estimation from IMU dynamics
    pub score_min_frames_imu: usize,
    /// Minimum aligned frames for joint-center estimation from positions
    pub score_min_frames_position: usize,
    /// Angular speed below which a joint-center frame is singular, rad/s
    pub score_min_omega: f64,
    /// RMS residual mapping to zero confidence, IMU mode, m/s^2
    pub score_residual_scale_imu: f64,
    /// RMS residual mapping to zero confidence, position mode, m
    pub score_residual_scale_pos: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            min_axis_samples: 30,
            split_half_max_divergence_deg: 20.0,
            split_half_penalty: 0.7,
            sara_min_rel_omega: 0.5,
            score_min_frames_imu: 50,
            score_min_frames_position: 30,
            score_min_omega: 0.3,
            score_residual_scale_imu: 2.0,
            score_residual_scale_pos: 0.05,
        }
    }
}

/// Fallback behavior for segments without usable functional data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Quality ceiling for gravity-only results
    pub gravity_only_quality_cap: u8,
    /// Tilt below which gravity-only yaw ambiguity is assumed small, degrees
    pub small_tilt_deg: f64,
    /// Trust the device AHRS heading and allow the pose method
    pub trust_orientation_heading: bool,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            gravity_only_quality_cap: 60,
            small_tilt_deg: 15.0,
            trust_orientation_heading: false,
        }
    }
}

/// Post-calibration validation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Neutral deviation graded info, degrees
    pub info_deviation_deg: f64,
    /// Neutral deviation graded warning, degrees
    pub warning_deviation_deg: f64,
    /// Neutral deviation graded error, degrees
    pub error_deviation_deg: f64,
    /// Left/right deviation difference graded a warning, degrees
    pub max_asymmetry_deg: f64,
    /// Gyro-bias drift between static and final holds graded a warning, rad/s
    pub max_bias_drift: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            info_deviation_deg: 5.0,
            warning_deviation_deg: 10.0,
            error_deviation_deg: 20.0,
            max_asymmetry_deg: 8.0,
            max_bias_drift: 0.02,
        }
    }
}

/// Configuration for the calibration engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub timing: StepTiming,
    pub stability: StabilityConfig,
    pub gates: GateConfig,
    pub timeline: TimelineConfig,
    pub estimators: EstimatorConfig,
    pub fallback: FallbackConfig,
    pub validator: ValidatorConfig,
    /// Per-channel ring capacity of the stream buffers
    pub buffer_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timing: StepTiming::default(),
            stability: StabilityConfig::default(),
            gates: GateConfig::default(),
            timeline: TimelineConfig::default(),
            estimators: EstimatorConfig::default(),
            fallback: FallbackConfig::default(),
            validator: ValidatorConfig::default(),
            buffer_capacity: 600,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), CalError> {
        if self.buffer_capacity == 0 {
            return Err(CalError::InvalidConfig(
                "buffer_capacity must be positive".into(),
            ));
        }
        let durations = [
            ("warm_up_secs", self.timing.warm_up_secs),
            ("static_pose_secs", self.timing.static_pose_secs),
            ("final_pose_secs", self.timing.final_pose_secs),
            ("verification_secs", self.timing.verification_secs),
            ("pose_check_secs", self.timing.pose_check_secs),
            ("squat_check_secs", self.timing.squat_check_secs),
            ("stability window_secs", self.stability.window_secs),
        ];
        for (name, value) in durations {
            if value <= 0.0 {
                return Err(CalError::InvalidConfig(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        if self.stability.gravity_min >= self.stability.gravity_max {
            return Err(CalError::InvalidConfig(format!(
                "gravity band is empty: [{}, {}]",
                self.stability.gravity_min, self.stability.gravity_max
            )));
        }
        if self.estimators.min_axis_samples < 2 {
            return Err(CalError::InvalidConfig(
                "min_axis_samples must be at least 2".into(),
            ));
        }
        for (name, value) in [
            ("default_axis_confidence", self.gates.default_axis_confidence),
            (
                "ball_joint_axis_confidence",
                self.gates.ball_joint_axis_confidence,
            ),
            ("live_axis_confidence", self.gates.live_axis_confidence),
            ("sara_min_confidence", self.gates.sara_min_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(CalError::InvalidConfig(format!(
                    "{name} must lie in [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }
}
