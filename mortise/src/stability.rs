//! Stationarity evaluation for pose holds.
//!
//! A pose window is accepted only when the gyro is quiet, the orientation
//! holds, the accelerometer is calm and its magnitude sits in the gravity
//! band. The thresholds follow zero-velocity detection practice; the same
//! window doubles as the gyro-bias capture.

use capture::SensorSample;
use nalgebra::Vector3;
use tare_math::{stats, Quaternion};

use crate::config::StabilityConfig;

/// Metrics of one evaluated window plus the verdict.
#[derive(Debug, Clone)]
pub struct StabilityReport {
    pub frames: usize,
    /// Mean per-sample gyro magnitude, rad/s
    pub gyro_mean_mag: f64,
    /// Largest angle of any sample from the window-mean orientation, degrees
    pub quat_spread_deg: f64,
    /// RMS accel deviation about the window mean, m/s^2
    pub accel_std: f64,
    /// Mean accel magnitude, m/s^2
    pub accel_mean_mag: f64,
    pub stationary: bool,
    /// Failing metrics, empty when stationary
    pub reasons: Vec<String>,
}

/// Window-mean orientation (sign-aligned average, normalized).
pub fn mean_orientation(samples: &[SensorSample]) -> Quaternion {
    let quats: Vec<Quaternion> = samples.iter().map(|s| s.orientation).collect();
    Quaternion::average(&quats)
}

/// Mean gyro over the window; the bias estimate for a stationary hold.
pub fn mean_gyro(samples: &[SensorSample]) -> Vector3<f64> {
    let gyros: Vec<Vector3<f64>> = samples.iter().map(|s| s.gyro).collect();
    stats::vector_mean(&gyros)
}

/// Mean accel over the window; the sensor-frame gravity estimate.
pub fn mean_accel(samples: &[SensorSample]) -> Vector3<f64> {
    let accels: Vec<Vector3<f64>> = samples.iter().map(|s| s.accel).collect();
    stats::vector_mean(&accels)
}

/// Evaluate one window of samples against the stationarity thresholds.
pub fn evaluate_window(samples: &[SensorSample], config: &StabilityConfig) -> StabilityReport {
    let frames = samples.len();
    let mut reasons = Vec::new();

    if frames < config.min_frames {
        reasons.push(format!(
            "too few samples in window: {frames} < {}",
            config.min_frames
        ));
        return StabilityReport {
            frames,
            gyro_mean_mag: 0.0,
            quat_spread_deg: 0.0,
            accel_std: 0.0,
            accel_mean_mag: 0.0,
            stationary: false,
            reasons,
        };
    }

    let gyro_mags: Vec<f64> = samples.iter().map(|s| s.gyro.norm()).collect();
    let gyro_mean_mag = stats::mean(&gyro_mags);

    let mean_quat = mean_orientation(samples);
    let quat_spread_deg = samples
        .iter()
        .map(|s| s.orientation.angle_to(&mean_quat).to_degrees())
        .fold(0.0_f64, f64::max);

    let accel_mean = mean_accel(samples);
    let accel_var = samples
        .iter()
        .map(|s| (s.accel - accel_mean).norm_squared())
        .sum::<f64>()
        / frames as f64;
    let accel_std = accel_var.sqrt();

    let accel_mean_mag = stats::mean(&samples.iter().map(|s| s.accel.norm()).collect::<Vec<_>>());

    if gyro_mean_mag > config.max_gyro_mean {
        reasons.push(format!(
            "rotation rate {gyro_mean_mag:.3} rad/s above {:.3}",
            config.max_gyro_mean
        ));
    }
    if quat_spread_deg > config.max_quat_spread_deg {
        reasons.push(format!(
            "orientation spread {quat_spread_deg:.1} deg above {:.1}",
            config.max_quat_spread_deg
        ));
    }
    if accel_std > config.max_accel_std {
        reasons.push(format!(
            "accel deviation {accel_std:.2} m/s^2 above {:.2}",
            config.max_accel_std
        ));
    }
    if accel_mean_mag < config.gravity_min || accel_mean_mag > config.gravity_max {
        reasons.push(format!(
            "accel magnitude {accel_mean_mag:.2} m/s^2 outside gravity band [{:.2}, {:.2}]",
            config.gravity_min, config.gravity_max
        ));
    }

    StabilityReport {
        frames,
        gyro_mean_mag,
        quat_spread_deg,
        accel_std,
        accel_mean_mag,
        stationary: reasons.is_empty(),
        reasons,
    }
}

/// Subscore in [0, 1] describing how comfortably a passing window cleared
/// the thresholds. Feeds the stability component of the quality score.
pub fn stability_confidence(report: &StabilityReport, config: &StabilityConfig) -> f64 {
    if !report.stationary {
        return 0.0;
    }
    let gyro_score = 1.0 - (report.gyro_mean_mag / config.max_gyro_mean).min(1.0);
    let spread_score = 1.0 - (report.quat_spread_deg / config.max_quat_spread_deg).min(1.0);
    let accel_score = 1.0 - (report.accel_std / config.max_accel_std).min(1.0);
    (gyro_score + spread_score + accel_score) / 3.0
}
