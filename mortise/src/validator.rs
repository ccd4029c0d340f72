//! Post-calibration sanity checks over the finished tare set.
//!
//! Runs after the gates, on the anchors and counters the session kept.
//! Findings never fail the session; they grade it and tell the operator
//! what to fix before trusting the output downstream.

use std::collections::BTreeMap;

use capture::{joint_definition, SegmentId, Side};
use serde::{Deserialize, Serialize};

use crate::config::ValidatorConfig;
use crate::session::CalibrationSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IssueSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueCategory {
    PoseDeviation,
    Asymmetry,
    RangeOfMotion,
    GyroDrift,
    Timeline,
    Fallback,
    DataQuality,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    pub category: IssueCategory,
    pub segment: Option<SegmentId>,
    pub message: String,
    pub remediation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Mean segment quality degraded by findings, 0..=100
    pub overall_score: u8,
    pub issues: Vec<ValidationIssue>,
    /// Calibrated-vs-neutral angle per segment at the validation anchor
    pub segment_deviation_deg: BTreeMap<SegmentId, f64>,
}

/// Grade the finished session. Deviations are measured at the final-pose
/// anchor; when none was captured the initial static anchor stands in,
/// which validates little (the heading tare is anchored there) and is
/// called out as a finding of its own.
pub(crate) fn validate_session(
    session: &CalibrationSession,
    config: &ValidatorConfig,
) -> ValidationReport {
    let mut issues = Vec::new();
    let mut deviations = BTreeMap::new();

    let anchor = match (&session.final_anchor, &session.static_anchor) {
        (Some(anchor), _) => Some(anchor),
        (None, Some(anchor)) => {
            issues.push(ValidationIssue {
                severity: IssueSeverity::Info,
                category: IssueCategory::DataQuality,
                segment: None,
                message: "no final pose captured; deviations measured at the initial static \
                          anchor"
                    .to_string(),
                remediation: "repeat the session and hold the closing neutral pose".to_string(),
            });
            Some(anchor)
        }
        (None, None) => None,
    };

    if let Some(anchor) = anchor {
        for (segment, result) in &session.calibrations {
            let Some(q_raw) = anchor.orientation.get(&result.device) else {
                issues.push(ValidationIssue {
                    severity: IssueSeverity::Warning,
                    category: IssueCategory::DataQuality,
                    segment: Some(*segment),
                    message: format!("{segment}: no averaged sample at the validation anchor"),
                    remediation: "check the device stayed connected through the closing pose"
                        .to_string(),
                });
                continue;
            };
            let neutral = session.neutral_poses.get(*segment);
            let deviation = result.calibrated(q_raw).angle_to(&neutral).to_degrees();
            deviations.insert(*segment, deviation);

            let severity = if deviation >= config.error_deviation_deg {
                Some(IssueSeverity::Error)
            } else if deviation >= config.warning_deviation_deg {
                Some(IssueSeverity::Warning)
            } else if deviation >= config.info_deviation_deg {
                Some(IssueSeverity::Info)
            } else {
                None
            };
            if let Some(severity) = severity {
                issues.push(ValidationIssue {
                    severity,
                    category: IssueCategory::PoseDeviation,
                    segment: Some(*segment),
                    message: format!(
                        "{segment}: calibrated pose {deviation:.1} deg from declared neutral"
                    ),
                    remediation: "re-seat the sensor and repeat the affected region".to_string(),
                });
            }
        }
    }

    // Contralateral pairs should drift by similar amounts; a one-sided
    // deviation usually means a swapped or slipped sensor.
    for (segment, deviation) in &deviations {
        if segment.side() != Some(Side::Left) {
            continue;
        }
        let Some(mirror) = segment.mirror() else {
            continue;
        };
        if let Some(other) = deviations.get(&mirror) {
            let gap = (deviation - other).abs();
            if gap > config.max_asymmetry_deg {
                issues.push(ValidationIssue {
                    severity: IssueSeverity::Warning,
                    category: IssueCategory::Asymmetry,
                    segment: Some(*segment),
                    message: format!(
                        "{segment} and {mirror} deviations differ by {gap:.1} deg"
                    ),
                    remediation: "confirm the left and right sensors are not swapped".to_string(),
                });
            }
        }
    }

    for (joint, observed) in &session.joint_rom_deg {
        let def = joint_definition(*joint);
        if *observed > def.rom_max_deg {
            issues.push(ValidationIssue {
                severity: IssueSeverity::Warning,
                category: IssueCategory::RangeOfMotion,
                segment: Some(def.distal),
                message: format!(
                    "{joint}: observed excursion {observed:.0} deg exceeds the anatomical \
                     bound {:.0} deg",
                    def.rom_max_deg
                ),
                remediation: "check the pair assignment; an implausible range suggests the \
                              sensors observe different joints"
                    .to_string(),
            });
        }
    }

    if let (Some(static_anchor), Some(final_anchor)) =
        (&session.static_anchor, &session.final_anchor)
    {
        for (device, bias) in &static_anchor.gyro_bias {
            let Some(later) = final_anchor.gyro_bias.get(device) else {
                continue;
            };
            let drift = (later - bias).norm();
            if drift > config.max_bias_drift {
                let segment = session.assignment.segment_for(*device);
                issues.push(ValidationIssue {
                    severity: IssueSeverity::Warning,
                    category: IssueCategory::GyroDrift,
                    segment,
                    message: format!(
                        "{device}: gyro bias drifted {drift:.3} rad/s over the session"
                    ),
                    remediation: "let the sensors warm up before calibrating".to_string(),
                });
            }
        }
    }

    // Findings the orchestrator accumulated along the way (fallback notes,
    // timeline degradation) count toward the score like our own.
    issues.extend(session.extra_issues.iter().cloned());

    let overall_score = score(&session.calibrations, &issues);

    ValidationReport {
        overall_score,
        issues,
        segment_deviation_deg: deviations,
    }
}

fn score(
    calibrations: &BTreeMap<SegmentId, crate::tare::CalibrationResult>,
    issues: &[ValidationIssue],
) -> u8 {
    if calibrations.is_empty() {
        return 0;
    }
    let mean: f64 = calibrations
        .values()
        .map(|c| c.quality as f64)
        .sum::<f64>()
        / calibrations.len() as f64;
    let penalty: f64 = issues
        .iter()
        .map(|issue| match issue.severity {
            IssueSeverity::Error => 10.0,
            IssueSeverity::Warning => 5.0,
            IssueSeverity::Info => 0.0,
        })
        .sum();
    (mean - penalty).clamp(0.0, 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::session::PoseAnchor;
    use crate::tare::{CalibrationResult, TareMethod};
    use capture::{DeviceId, JointId, NeutralPoseLookup, SensorAssignment, Topology};
    use nalgebra::Vector3;
    use std::collections::BTreeMap;
    use tare_math::Quaternion;

    fn session_with(
        calibrations: Vec<(SegmentId, DeviceId, Quaternion)>,
        final_orientations: Vec<(DeviceId, Quaternion)>,
    ) -> CalibrationSession {
        let config = EngineConfig::default();
        let mut assignment = SensorAssignment::new();
        for (segment, device, _) in &calibrations {
            assignment.assign(*segment, *device);
        }
        let mut session = CalibrationSession::new(
            Topology::LowerBody,
            assignment,
            NeutralPoseLookup::new(),
            &config,
        );
        for (segment, device, mounting) in calibrations {
            session.calibrations.insert(
                segment,
                CalibrationResult {
                    segment,
                    device,
                    mounting_tare: mounting,
                    heading_tare: Quaternion::identity(),
                    quality: 90,
                    method: TareMethod::PcaRefined,
                    axis_confidence: 0.9,
                    stability_confidence: 0.9,
                    gravity_confidence: 0.95,
                    timestamp_sec: 1.0,
                },
            );
        }
        session.final_anchor = Some(PoseAnchor {
            t_sec: 60.0,
            orientation: final_orientations.into_iter().collect(),
            accel: BTreeMap::new(),
            gyro_bias: BTreeMap::new(),
        });
        session
    }

    #[test]
    fn test_deviation_grading() {
        let config = ValidatorConfig::default();
        let tilt = |deg: f64| Quaternion::from_axis_angle(&Vector3::z(), f64::to_radians(deg));

        // Identity mounting, neutral identity: the raw orientation IS the
        // calibrated pose, so the tilt below is the deviation.
        let session = session_with(
            vec![
                (SegmentId::ThighLeft, DeviceId(1), Quaternion::identity()),
                (SegmentId::ThighRight, DeviceId(2), Quaternion::identity()),
            ],
            vec![(DeviceId(1), tilt(12.0)), (DeviceId(2), tilt(1.0))],
        );
        let report = validate_session(&session, &config);

        let dev = report.segment_deviation_deg[&SegmentId::ThighLeft];
        assert!((dev - 12.0).abs() < 1e-6, "{dev}");
        let issue = report
            .issues
            .iter()
            .find(|i| i.segment == Some(SegmentId::ThighLeft))
            .unwrap();
        assert_eq!(issue.severity, IssueSeverity::Warning);
        assert_eq!(issue.category, IssueCategory::PoseDeviation);

        // 12 vs 1 deg across sides also trips the asymmetry check.
        assert!(report
            .issues
            .iter()
            .any(|i| i.category == IssueCategory::Asymmetry));
    }

    #[test]
    fn test_rom_violation_flags_joint() {
        let config = ValidatorConfig::default();
        let mut session = session_with(vec![], vec![]);
        session.joint_rom_deg.insert(JointId::AnkleLeft, 95.0);
        let report = validate_session(&session, &config);
        let issue = report
            .issues
            .iter()
            .find(|i| i.category == IssueCategory::RangeOfMotion)
            .unwrap();
        assert!(issue.message.contains("left ankle"));
        assert_eq!(issue.segment, Some(SegmentId::FootLeft));
    }

    #[test]
    fn test_bias_drift_flagged() {
        let config = ValidatorConfig::default();
        let mut session = session_with(
            vec![(SegmentId::Pelvis, DeviceId(1), Quaternion::identity())],
            vec![(DeviceId(1), Quaternion::identity())],
        );
        let mut static_bias = BTreeMap::new();
        static_bias.insert(DeviceId(1), Vector3::new(0.001, 0.0, 0.0));
        session.static_anchor = Some(PoseAnchor {
            t_sec: 5.0,
            orientation: BTreeMap::new(),
            accel: BTreeMap::new(),
            gyro_bias: static_bias,
        });
        let mut final_bias = BTreeMap::new();
        final_bias.insert(DeviceId(1), Vector3::new(0.04, 0.0, 0.0));
        session.final_anchor.as_mut().unwrap().gyro_bias = final_bias;

        let report = validate_session(&session, &config);
        assert!(report
            .issues
            .iter()
            .any(|i| i.category == IssueCategory::GyroDrift));
    }

    #[test]
    fn test_score_penalties() {
        let config = ValidatorConfig::default();
        let session = session_with(
            vec![(SegmentId::ThighLeft, DeviceId(1), Quaternion::identity())],
            vec![(
                DeviceId(1),
                Quaternion::from_axis_angle(&Vector3::z(), f64::to_radians(25.0)),
            )],
        );
        let report = validate_session(&session, &config);
        // quality 90, one Error finding
        assert_eq!(report.overall_score, 80);
    }
}
