//! Shared hinge-axis estimation from paired angular velocity.
//!
//! For a hinge joint the relative angular velocity between the two
//! segments stays parallel to the hinge axis whatever the subject does
//! with the rest of the body. Accumulating the speed-weighted outer
//! product of the relative-rate direction concentrates that axis in the
//! dominant eigenvector; a ball joint spreads its relative rate over all
//! directions instead, which is why this estimator is restricted to
//! hinges at construction time.

use capture::{AlignedJointFrame, JointId, JointPairDefinition, JointType};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use tare_math::eigen::power_iteration;
use tare_math::Quaternion;

use crate::config::EstimatorConfig;
use crate::error::CalError;

/// Hinge-axis estimate for one joint, expressed in world frame and in both
/// sensor frames. Read-only output for an external kinematics solver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JointConstraintResult {
    pub joint: JointId,
    /// Unit hinge axis, world frame (sign arbitrary)
    pub axis_world: Vector3<f64>,
    /// Hinge axis in the proximal sensor frame
    pub axis_proximal: Vector3<f64>,
    /// Hinge axis in the distal sensor frame
    pub axis_distal: Vector3<f64>,
    /// Explained-variance ratio scaled by axis agreement, in [0, 1]
    pub confidence: f64,
    pub frames_used: usize,
    pub frames_skipped: usize,
}

#[derive(Debug)]
struct HingeObservation {
    direction: Vector3<f64>,
    orientation_proximal: Quaternion,
    orientation_distal: Quaternion,
}

/// Streaming accumulator over a capture window.
#[derive(Debug)]
pub struct SaraAccumulator {
    joint: JointId,
    moment: Matrix3<f64>,
    observations: Vec<HingeObservation>,
    skipped: usize,
}

impl SaraAccumulator {
    /// Fails for ball joints: their relative rate carries no single axis.
    pub fn new(joint: &'static JointPairDefinition) -> Result<Self, CalError> {
        if joint.joint_type != JointType::Hinge {
            return Err(CalError::GeometryViolation {
                segment: joint.distal,
                detail: format!("hinge-axis estimation requested for ball joint {}", joint.joint),
            });
        }
        Ok(Self {
            joint: joint.joint,
            moment: Matrix3::zeros(),
            observations: Vec::new(),
            skipped: 0,
        })
    }

    /// Fold one aligned frame in. Frames whose relative rate is below
    /// `min_rel_omega` carry direction noise, not signal, and are skipped.
    pub fn add_frame(
        &mut self,
        frame: &AlignedJointFrame,
        bias_proximal: &Vector3<f64>,
        bias_distal: &Vector3<f64>,
        min_rel_omega: f64,
    ) {
        let omega_world_p = frame
            .proximal
            .orientation
            .rotate_vector(&(frame.proximal.gyro - bias_proximal));
        let omega_world_d = frame
            .distal
            .orientation
            .rotate_vector(&(frame.distal.gyro - bias_distal));
        let rel = omega_world_d - omega_world_p;

        let speed = rel.norm();
        if speed < min_rel_omega {
            self.skipped += 1;
            return;
        }

        let direction = rel / speed;
        self.moment += speed * direction * direction.transpose();
        self.observations.push(HingeObservation {
            direction,
            orientation_proximal: frame.proximal.orientation,
            orientation_distal: frame.distal.orientation,
        });
    }

    pub fn frames_used(&self) -> usize {
        self.observations.len()
    }

    /// Extract the axis and its confidence from the accumulated moment.
    pub fn finalize(&self, config: &EstimatorConfig) -> Result<JointConstraintResult, CalError> {
        let used = self.observations.len();
        if used < config.min_axis_samples {
            return Err(CalError::DataInsufficiency {
                context: format!("hinge axis for {}", self.joint),
                have: used,
                need: config.min_axis_samples,
            });
        }

        let dominant =
            power_iteration(&self.moment, 200, 1e-12).ok_or(CalError::DataInsufficiency {
                context: format!("hinge axis for {}", self.joint),
                have: used,
                need: config.min_axis_samples,
            })?;
        let axis_world = dominant.vector;
        let explained = dominant.value / self.moment.trace();

        // Mean angular disagreement between each frame's direction and the
        // pooled axis, sign-insensitive.
        let mean_residual = self
            .observations
            .iter()
            .map(|o| 1.0 - o.direction.dot(&axis_world).abs())
            .sum::<f64>()
            / used as f64;

        let confidence = (explained * (1.0 - mean_residual)).clamp(0.0, 1.0);

        // The world axis re-expressed in each sensor frame, averaged over
        // the window so orientation noise washes out.
        let mut axis_proximal = Vector3::zeros();
        let mut axis_distal = Vector3::zeros();
        for o in &self.observations {
            axis_proximal += o.orientation_proximal.conjugate().rotate_vector(&axis_world);
            axis_distal += o.orientation_distal.conjugate().rotate_vector(&axis_world);
        }

        Ok(JointConstraintResult {
            joint: self.joint,
            axis_world,
            axis_proximal: axis_proximal.normalize(),
            axis_distal: axis_distal.normalize(),
            confidence,
            frames_used: used,
            frames_skipped: self.skipped,
        })
    }
}
