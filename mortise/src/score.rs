//! Joint-center estimation from paired sensor streams.
//!
//! Both segments of a joint see the same physical pivot. Each aligned
//! frame therefore constrains the two unknown sensor-frame center offsets
//! `c_p, c_d`:
//!
//! - *position mode* (external positions available):
//!   `R_p c_p + p_p = R_d c_d + p_d`, three equations per frame;
//! - *IMU mode*: equating the world acceleration of the pivot as seen from
//!   each sensor's rigid-body dynamics,
//!   `R_p W_p c_p - R_d W_d c_d = R_d f_d - R_p f_p` with
//!   `W = [dw]x + [w]x[w]x`; gravity cancels in the accelerometer
//!   difference. Angular acceleration comes from central differences over
//!   the captured frame sequence, and frames where either segment barely
//!   rotates are skipped (`W` them is numerically empty).
//!
//! Either way the normal equations of the stacked 6-unknown least-squares
//! problem are accumulated in closed form and solved by Gaussian
//! elimination; the RMS residual maps monotonically onto a confidence.

use capture::{AlignedJointFrame, JointId};
use nalgebra::{Matrix3, SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};
use tare_math::linsolve;
use tare_math::Quaternion;

use crate::config::EstimatorConfig;
use crate::error::CalError;

/// Which data source produced a joint-center estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoreMode {
    Position,
    Imu,
}

/// Estimated pivot location in both sensor frames, meters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JointCenterResult {
    pub joint: JointId,
    pub center_proximal: Vector3<f64>,
    pub center_distal: Vector3<f64>,
    /// 1 at zero residual, 0 at the configured residual scale
    pub confidence: f64,
    pub mode: ScoreMode,
    pub frames: usize,
    pub frames_skipped: usize,
    pub rms_residual: f64,
}

fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Normal equations of a stacked 3-row-per-frame least-squares problem,
/// kept in closed form so the residual never needs the original rows.
#[derive(Debug, Clone)]
struct NormalEquations {
    ata: SMatrix<f64, 6, 6>,
    atb: SVector<f64, 6>,
    btb: f64,
    rows: usize,
}

impl NormalEquations {
    fn new() -> Self {
        Self {
            ata: SMatrix::zeros(),
            atb: SVector::zeros(),
            btb: 0.0,
            rows: 0,
        }
    }

    fn add_block(&mut self, a: &SMatrix<f64, 3, 6>, b: &Vector3<f64>) {
        self.ata += a.transpose() * a;
        self.atb += a.transpose() * b;
        self.btb += b.dot(b);
        self.rows += 3;
    }

    /// Solve and return the solution with its RMS residual.
    fn solve(&self) -> Result<(SVector<f64, 6>, f64), linsolve::SolveError> {
        let x = linsolve::solve(&self.ata, &self.atb)?;
        // |Ax - b|^2 expanded through the accumulated products
        let ss = (x.dot(&(self.ata * x)) - 2.0 * x.dot(&self.atb) + self.btb).max(0.0);
        Ok((x, (ss / self.rows as f64).sqrt()))
    }
}

struct ImuFrame {
    t: f64,
    orientation_proximal: Quaternion,
    orientation_distal: Quaternion,
    gyro_proximal: Vector3<f64>,
    gyro_distal: Vector3<f64>,
    accel_proximal: Vector3<f64>,
    accel_distal: Vector3<f64>,
}

/// Streaming accumulator over a capture window. Position rows accumulate
/// immediately; IMU frames are retained until `finalize` because the
/// angular-acceleration differences need their neighbors.
pub struct ScoreAccumulator {
    joint: JointId,
    position: NormalEquations,
    position_frames: usize,
    imu_frames: Vec<ImuFrame>,
}

impl ScoreAccumulator {
    pub fn new(joint: JointId) -> Self {
        Self {
            joint,
            position: NormalEquations::new(),
            position_frames: 0,
            imu_frames: Vec::new(),
        }
    }

    pub fn add_frame(
        &mut self,
        frame: &AlignedJointFrame,
        bias_proximal: &Vector3<f64>,
        bias_distal: &Vector3<f64>,
    ) {
        if let (Some(p_p), Some(p_d)) = (frame.proximal.position, frame.distal.position) {
            let r_p = frame.proximal.orientation.to_rotation_matrix();
            let r_d = frame.distal.orientation.to_rotation_matrix();
            let mut a = SMatrix::<f64, 3, 6>::zeros();
            a.fixed_view_mut::<3, 3>(0, 0).copy_from(&r_p);
            a.fixed_view_mut::<3, 3>(0, 3).copy_from(&(-r_d));
            self.position.add_block(&a, &(p_d - p_p));
            self.position_frames += 1;
        }

        self.imu_frames.push(ImuFrame {
            t: frame.t,
            orientation_proximal: frame.proximal.orientation,
            orientation_distal: frame.distal.orientation,
            gyro_proximal: frame.proximal.gyro - bias_proximal,
            gyro_distal: frame.distal.gyro - bias_distal,
            accel_proximal: frame.proximal.accel,
            accel_distal: frame.distal.accel,
        });
    }

    pub fn frames(&self) -> usize {
        self.imu_frames.len().max(self.position_frames)
    }

    pub fn finalize(&self, config: &EstimatorConfig) -> Result<JointCenterResult, CalError> {
        if self.position_frames >= config.score_min_frames_position {
            return self.finalize_position(config);
        }
        self.finalize_imu(config)
    }

    fn finalize_position(&self, config: &EstimatorConfig) -> Result<JointCenterResult, CalError> {
        let (x, rms) = self.position.solve().map_err(|e| {
            log::debug!("joint center {}: position solve failed: {e}", self.joint);
            CalError::DataInsufficiency {
                context: format!("joint center for {} (degenerate positions)", self.joint),
                have: self.position_frames,
                need: config.score_min_frames_position,
            }
        })?;

        Ok(self.result(
            &x,
            rms,
            ScoreMode::Position,
            self.position_frames,
            0,
            config.score_residual_scale_pos,
        ))
    }

    fn finalize_imu(&self, config: &EstimatorConfig) -> Result<JointCenterResult, CalError> {
        let mut normal = NormalEquations::new();
        let mut used = 0usize;
        let mut skipped = 0usize;

        // Interior frames only: angular acceleration is the central
        // difference over each frame's neighbors.
        for i in 1..self.imu_frames.len().saturating_sub(1) {
            let (prev, cur, next) = (
                &self.imu_frames[i - 1],
                &self.imu_frames[i],
                &self.imu_frames[i + 1],
            );
            let dt = next.t - prev.t;
            if dt <= 0.0 {
                skipped += 1;
                continue;
            }
            if cur.gyro_proximal.norm() < config.score_min_omega
                || cur.gyro_distal.norm() < config.score_min_omega
            {
                skipped += 1;
                continue;
            }

            let alpha_p = (next.gyro_proximal - prev.gyro_proximal) / dt;
            let alpha_d = (next.gyro_distal - prev.gyro_distal) / dt;

            let w_p = skew(&alpha_p) + skew(&cur.gyro_proximal) * skew(&cur.gyro_proximal);
            let w_d = skew(&alpha_d) + skew(&cur.gyro_distal) * skew(&cur.gyro_distal);

            let r_p = cur.orientation_proximal.to_rotation_matrix();
            let r_d = cur.orientation_distal.to_rotation_matrix();

            let mut a = SMatrix::<f64, 3, 6>::zeros();
            a.fixed_view_mut::<3, 3>(0, 0).copy_from(&(r_p * w_p));
            a.fixed_view_mut::<3, 3>(0, 3).copy_from(&(-(r_d * w_d)));
            let b = r_d * cur.accel_distal - r_p * cur.accel_proximal;

            normal.add_block(&a, &b);
            used += 1;
        }

        if used < config.score_min_frames_imu {
            return Err(CalError::DataInsufficiency {
                context: format!("joint center for {}", self.joint),
                have: used,
                need: config.score_min_frames_imu,
            });
        }

        let (x, rms) = normal.solve().map_err(|e| {
            log::debug!("joint center {}: dynamics solve failed: {e}", self.joint);
            CalError::DataInsufficiency {
                context: format!("joint center for {} (degenerate motion)", self.joint),
                have: used,
                need: config.score_min_frames_imu,
            }
        })?;

        Ok(self.result(
            &x,
            rms,
            ScoreMode::Imu,
            used,
            skipped,
            config.score_residual_scale_imu,
        ))
    }

    fn result(
        &self,
        x: &SVector<f64, 6>,
        rms: f64,
        mode: ScoreMode,
        frames: usize,
        frames_skipped: usize,
        residual_scale: f64,
    ) -> JointCenterResult {
        JointCenterResult {
            joint: self.joint,
            center_proximal: Vector3::new(x[0], x[1], x[2]),
            center_distal: Vector3::new(x[3], x[4], x[5]),
            confidence: (1.0 - (rms / residual_scale).min(1.0)).clamp(0.0, 1.0),
            mode,
            frames,
            frames_skipped,
            rms_residual: rms,
        }
    }
}
