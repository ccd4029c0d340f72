//! Mounting and heading tare construction.
//!
//! The mounting tare rotates sensor-frame vectors into the bone frame
//! (X mediolateral, Y longitudinal up, Z anterior); applying it as
//! `q_raw * mounting.conjugate()` turns a raw device orientation into a
//! bone-in-world orientation. The heading tare then pins that bone
//! orientation to the declared neutral pose at the static-anchor instant:
//! `calibrated(q_raw) = heading * q_raw * mounting.conjugate()`.

use capture::{DeviceId, SegmentId};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt;
use tare_math::{change_of_basis, FrameError, Quaternion};

use crate::axis::AxisEstimate;
use crate::config::{FallbackConfig, GateConfig};
use crate::error::CalError;
use crate::sara::JointConstraintResult;

/// Direction gravity takes in a correctly expressed bone frame.
pub const BONE_DOWN: Vector3<f64> = Vector3::new(0.0, -1.0, 0.0);

/// World-frame down direction.
pub const WORLD_DOWN: Vector3<f64> = Vector3::new(0.0, -1.0, 0.0);

/// How a segment's mounting tare was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TareMethod {
    /// Device AHRS heading trusted; tare read off the static orientation
    Pose,
    /// Functional axis from the motion's principal component
    PcaRefined,
    /// Functional axis replaced by the paired hinge-axis estimate
    SaraRefined,
    /// Gravity alignment only; yaw unresolved
    GravityOnly,
}

impl fmt::Display for TareMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TareMethod::Pose => "pose",
            TareMethod::PcaRefined => "pca-refined",
            TareMethod::SaraRefined => "sara-refined",
            TareMethod::GravityOnly => "gravity-only",
        };
        f.write_str(name)
    }
}

/// Finished calibration for one segment. Replaced wholesale on
/// recalibration, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub segment: SegmentId,
    pub device: DeviceId,
    /// Sensor frame -> bone frame
    pub mounting_tare: Quaternion,
    /// World yaw/attitude correction anchoring the neutral pose
    pub heading_tare: Quaternion,
    /// Overall score in [0, 100]
    pub quality: u8,
    pub method: TareMethod,
    pub axis_confidence: f64,
    pub stability_confidence: f64,
    pub gravity_confidence: f64,
    /// Engine clock at the static anchor
    pub timestamp_sec: f64,
}

impl CalibrationResult {
    /// Bone orientation in world frame for a raw device orientation.
    pub fn bone_in_world(&self, q_raw: &Quaternion) -> Quaternion {
        (*q_raw * self.mounting_tare.conjugate()).normalize()
    }

    /// Fully calibrated orientation: heading-anchored bone in world.
    pub fn calibrated(&self, q_raw: &Quaternion) -> Quaternion {
        (self.heading_tare * *q_raw * self.mounting_tare.conjugate()).normalize()
    }
}

/// Agreement between the orientation estimate and the accelerometer:
/// cosine between the world gravity reconstructed through the quaternion
/// and true world down. 1 when consistent, negative when inverted.
pub fn gravity_agreement(q_static: &Quaternion, accel_static: &Vector3<f64>) -> f64 {
    let norm = accel_static.norm();
    if norm < 1e-9 {
        return 0.0;
    }
    let gravity_world = q_static.rotate_vector(&(accel_static / norm));
    gravity_world.dot(&WORLD_DOWN)
}

/// Static-anchor sanity check, run once per device when the static pose is
/// accepted. Failures here are terminal: every downstream tare trusts this
/// anchor.
pub fn check_static_geometry(
    segment: SegmentId,
    q_static: &Quaternion,
    accel_static: &Vector3<f64>,
) -> Result<f64, CalError> {
    let cos = gravity_agreement(q_static, accel_static);
    if cos < 0.0 {
        return Err(CalError::GeometryViolation {
            segment,
            detail: format!(
                "gravity direction inverted (cosine {cos:.2}); orientation filter \
                 diverged or accelerometer sign convention wrong"
            ),
        });
    }
    if cos < 0.5 {
        return Err(CalError::GeometryViolation {
            segment,
            detail: format!(
                "reconstructed gravity {:.0} deg off vertical at the static anchor",
                cos.clamp(-1.0, 1.0).acos().to_degrees()
            ),
        });
    }
    Ok(cos)
}

/// Selected method plus the sensor-frame axis feeding it.
#[derive(Debug, Clone)]
pub struct MethodChoice {
    pub method: TareMethod,
    /// Sensor-frame functional axis, functional methods only
    pub axis_sensor: Option<Vector3<f64>>,
    pub axis_confidence: f64,
    /// Split-half flag carried through from the estimate
    pub flagged_nonstationary: bool,
}

/// Pick the best available method for a segment.
///
/// Functional estimates win when they clear the segment's confidence
/// threshold, with the paired hinge axis replacing the single-sensor PCA
/// axis when it scores higher. Segments without usable functional data
/// fall back to the pose method when the host trusts the device heading,
/// and to gravity-only alignment otherwise.
pub fn select_method(
    segment: SegmentId,
    axis_estimate: Option<&AxisEstimate>,
    hinge_axis: Option<&JointConstraintResult>,
    gates: &GateConfig,
    fallback: &FallbackConfig,
) -> MethodChoice {
    let required = if segment.is_ball_driven() {
        gates.ball_joint_axis_confidence
    } else {
        gates.default_axis_confidence
    };

    let mut best: Option<(TareMethod, Vector3<f64>, f64, bool)> = axis_estimate
        .map(|est| (TareMethod::PcaRefined, est.axis, est.confidence, est.flagged_nonstationary));

    if let Some(hinge) = hinge_axis {
        let beats_pca = best.as_ref().map_or(true, |(_, _, conf, _)| hinge.confidence > *conf);
        if hinge.confidence >= gates.sara_min_confidence && beats_pca {
            best = Some((
                TareMethod::SaraRefined,
                hinge.axis_distal,
                hinge.confidence,
                false,
            ));
        }
    }

    match best {
        Some((method, axis, confidence, flagged)) if confidence >= required => MethodChoice {
            method,
            axis_sensor: Some(axis),
            axis_confidence: confidence,
            flagged_nonstationary: flagged,
        },
        _ => {
            let method = if fallback.trust_orientation_heading {
                TareMethod::Pose
            } else {
                TareMethod::GravityOnly
            };
            MethodChoice {
                method,
                axis_sensor: None,
                axis_confidence: best.map(|(_, _, c, _)| c).unwrap_or(0.0),
                flagged_nonstationary: false,
            }
        }
    }
}

/// Resolve the sign of a functional axis against the direction the
/// expected bone axis takes in the sensor frame at the static anchor.
pub fn resolve_axis_sign(
    axis_sensor: &Vector3<f64>,
    expected_axis_bone: &Vector3<f64>,
    q_static: &Quaternion,
    neutral: &Quaternion,
) -> Vector3<f64> {
    let expected_world = neutral.rotate_vector(expected_axis_bone);
    let expected_sensor = q_static.conjugate().rotate_vector(&expected_world);
    if axis_sensor.dot(&expected_sensor) < 0.0 {
        -axis_sensor
    } else {
        *axis_sensor
    }
}

/// Mounting tare from a functional axis plus sensor-local gravity. The
/// axis maps exactly onto the expected bone axis; gravity is the
/// best-effort secondary reference.
pub fn build_functional_tare(
    axis_sensor: &Vector3<f64>,
    expected_axis_bone: &Vector3<f64>,
    accel_static: &Vector3<f64>,
) -> Result<Quaternion, FrameError> {
    let rotation = change_of_basis(
        axis_sensor,
        accel_static,
        expected_axis_bone,
        &BONE_DOWN,
    )?;
    Ok(Quaternion::from_rotation_matrix(&rotation).normalize())
}

/// Gravity-only mounting tare: shortest rotation taking sensor-local
/// gravity onto the bone down direction. Yaw about gravity stays
/// unresolved.
pub fn build_gravity_tare(accel_static: &Vector3<f64>) -> Quaternion {
    Quaternion::rotation_between(accel_static, &BONE_DOWN).normalize()
}

/// Pose-method mounting tare: trusts the device AHRS fully and makes the
/// static orientation express the declared neutral.
pub fn build_pose_tare(q_static: &Quaternion, neutral: &Quaternion) -> Quaternion {
    (neutral.conjugate() * *q_static).normalize()
}

/// Heading tare anchoring the calibrated orientation to the neutral pose
/// exactly at the static anchor.
pub fn build_heading_tare(
    neutral: &Quaternion,
    mounting: &Quaternion,
    q_static: &Quaternion,
) -> Quaternion {
    (*neutral * *mounting * q_static.conjugate()).normalize()
}

/// Quality score in [0, 100].
///
/// Functional methods blend axis, stability and gravity confidence.
/// Fallback methods have no axis evidence and blend the remaining two;
/// gravity-only results are additionally capped because yaw is assumed,
/// not measured.
pub fn quality_score(
    method: TareMethod,
    axis_confidence: f64,
    stability_confidence: f64,
    gravity_confidence: f64,
    fallback: &FallbackConfig,
) -> u8 {
    let score = match method {
        TareMethod::PcaRefined | TareMethod::SaraRefined => {
            100.0 * (0.5 * axis_confidence + 0.3 * stability_confidence + 0.2 * gravity_confidence)
        }
        TareMethod::Pose | TareMethod::GravityOnly => {
            100.0 * (0.6 * stability_confidence + 0.4 * gravity_confidence)
        }
    };
    let score = score.round().clamp(0.0, 100.0) as u8;
    if method == TareMethod::GravityOnly {
        score.min(fallback.gravity_only_quality_cap)
    } else {
        score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn mounted(q_m: &Quaternion) -> (Quaternion, Vector3<f64>) {
        // Neutral bone orientation, sensor rotated by the mounting error:
        // static orientation is the mounting itself, accel is world gravity
        // seen through it.
        let q_static = *q_m;
        let accel = q_static
            .conjugate()
            .rotate_vector(&Vector3::new(0.0, -9.81, 0.0));
        (q_static, accel)
    }

    #[test]
    fn test_functional_tare_recovers_mounting_exactly() {
        let m_true = Quaternion::from_axis_angle(&Vector3::z(), 0.5)
            * Quaternion::from_axis_angle(&Vector3::y(), 0.3);
        let (q_static, accel) = mounted(&m_true);

        let bone_axis = Vector3::x();
        let axis_sensor = m_true.conjugate().rotate_vector(&bone_axis);

        let m_est = build_functional_tare(&axis_sensor, &bone_axis, &accel).unwrap();
        assert!(m_est.angle_to(&m_true).to_degrees() < 1e-6);

        // Applying the tare restores the neutral bone orientation
        let bone = q_static * m_est.conjugate();
        assert!(bone.angle_to(&Quaternion::identity()).to_degrees() < 1e-6);
    }

    #[test]
    fn test_axis_sign_resolution_flips_reversed_axis() {
        let m_true = Quaternion::from_axis_angle(&Vector3::y(), -0.8);
        let (q_static, _) = mounted(&m_true);
        let bone_axis = Vector3::x();
        let axis_sensor = -(m_true.conjugate().rotate_vector(&bone_axis));

        let resolved = resolve_axis_sign(
            &axis_sensor,
            &bone_axis,
            &q_static,
            &Quaternion::identity(),
        );
        assert!(resolved.dot(&(m_true.conjugate().rotate_vector(&bone_axis))) > 0.999);
    }

    #[test]
    fn test_heading_tare_anchors_neutral_exactly() {
        let m_true = Quaternion::from_axis_angle(&Vector3::x(), 0.4);
        let neutral = Quaternion::from_axis_angle(&Vector3::y(), 1.1);
        // Subject stands in the neutral pose; bone-in-world is the neutral
        let q_static = (neutral * m_true).normalize();

        let heading = build_heading_tare(&neutral, &m_true, &q_static);
        let calibrated = (heading * q_static * m_true.conjugate()).normalize();
        assert!(calibrated.angle_to(&neutral).to_degrees() < 1e-9);
    }

    #[test]
    fn test_pose_tare_is_exact_when_heading_trusted() {
        let m_true = Quaternion::from_axis_angle(&Vector3::z(), -0.9);
        let neutral = Quaternion::from_axis_angle(&Vector3::y(), 0.25);
        let q_static = (neutral * m_true).normalize();

        let m_est = build_pose_tare(&q_static, &neutral);
        assert!(m_est.angle_to(&m_true).to_degrees() < 1e-9);
        // Heading tare degenerates to identity
        let heading = build_heading_tare(&neutral, &m_est, &q_static);
        assert!(heading.angle_to(&Quaternion::identity()).to_degrees() < 1e-9);
    }

    #[test]
    fn test_gravity_tare_levels_the_longitudinal_axis() {
        let m_true = Quaternion::from_axis_angle(&Vector3::z(), 0.6)
            * Quaternion::from_axis_angle(&Vector3::x(), -0.3);
        let (q_static, accel) = mounted(&m_true);

        let tare = build_gravity_tare(&accel);
        let bone = (q_static * tare.conjugate()).normalize();
        // The bone's up axis is restored even though yaw stays free
        let up_world = bone.rotate_vector(&Vector3::y());
        assert_relative_eq!(up_world.dot(&Vector3::y()), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_geometry_check_accepts_consistent_anchor() {
        let m_true = Quaternion::from_axis_angle(&Vector3::y(), 0.7);
        let (q_static, accel) = mounted(&m_true);
        let cos = check_static_geometry(SegmentId::ThighLeft, &q_static, &accel).unwrap();
        assert_relative_eq!(cos, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_geometry_check_flags_inverted_gravity() {
        let err = check_static_geometry(
            SegmentId::Pelvis,
            &Quaternion::identity(),
            &Vector3::new(0.0, 9.81, 0.0),
        )
        .unwrap_err();
        match err {
            CalError::GeometryViolation { detail, .. } => {
                assert!(detail.contains("inverted"), "{detail}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_geometry_check_flags_horizontal_gravity() {
        let err = check_static_geometry(
            SegmentId::Chest,
            &Quaternion::identity(),
            &Vector3::new(9.81, -1.0, 0.0),
        )
        .unwrap_err();
        assert!(matches!(err, CalError::GeometryViolation { .. }));
    }

    #[test]
    fn test_method_selection_prefers_confident_functional_axis() {
        let gates = GateConfig::default();
        let fallback = FallbackConfig::default();
        let pca = AxisEstimate {
            axis: Vector3::x(),
            confidence: 0.85,
            split_half_divergence_deg: Some(3.0),
            flagged_nonstationary: false,
            samples: 200,
        };
        let choice = select_method(SegmentId::ShankLeft, Some(&pca), None, &gates, &fallback);
        assert_eq!(choice.method, TareMethod::PcaRefined);

        // A stronger hinge axis takes over
        let hinge = JointConstraintResult {
            joint: capture::JointId::KneeLeft,
            axis_world: Vector3::x(),
            axis_proximal: Vector3::x(),
            axis_distal: Vector3::x(),
            confidence: 0.95,
            frames_used: 150,
            frames_skipped: 4,
        };
        let choice = select_method(
            SegmentId::ShankLeft,
            Some(&pca),
            Some(&hinge),
            &gates,
            &fallback,
        );
        assert_eq!(choice.method, TareMethod::SaraRefined);
        assert_relative_eq!(choice.axis_confidence, 0.95);
    }

    #[test]
    fn test_ball_driven_segments_need_the_stricter_threshold() {
        let gates = GateConfig::default();
        let fallback = FallbackConfig::default();
        let pca = AxisEstimate {
            axis: Vector3::x(),
            confidence: 0.65,
            split_half_divergence_deg: None,
            flagged_nonstationary: false,
            samples: 120,
        };
        // 0.65 clears the hinge threshold but not the ball-driven one
        let shank = select_method(SegmentId::ShankLeft, Some(&pca), None, &gates, &fallback);
        assert_eq!(shank.method, TareMethod::PcaRefined);
        let thigh = select_method(SegmentId::ThighLeft, Some(&pca), None, &gates, &fallback);
        assert_eq!(thigh.method, TareMethod::GravityOnly);
    }

    #[test]
    fn test_fallback_uses_pose_when_heading_trusted() {
        let gates = GateConfig::default();
        let mut fallback = FallbackConfig::default();
        fallback.trust_orientation_heading = true;
        let choice = select_method(SegmentId::Pelvis, None, None, &gates, &fallback);
        assert_eq!(choice.method, TareMethod::Pose);
    }

    #[test]
    fn test_quality_formula_and_gravity_cap() {
        let fallback = FallbackConfig::default();
        let q = quality_score(TareMethod::PcaRefined, 0.9, 0.8, 1.0, &fallback);
        assert_eq!(q, 89);
        // Perfect fallback still hits the cap
        let q = quality_score(TareMethod::GravityOnly, 0.0, 1.0, 1.0, &fallback);
        assert_eq!(q, 60);
        let q = quality_score(TareMethod::Pose, 0.0, 1.0, 1.0, &fallback);
        assert_eq!(q, 100);
    }
}
