//! QC artifact: everything a host needs to accept, store or re-run a
//! calibration session, plus a human-readable rendering of it.

use std::fmt::Write as _;
use std::path::Path;

use capture::{TimelineDiagnostics, Topology};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::gating::{GateResult, GateStatus, RetryPlan, TimelineTier, TimelineWindow};
use crate::sara::JointConstraintResult;
use crate::score::JointCenterResult;
use crate::session::CalibrationSession;
use crate::tare::CalibrationResult;
use crate::validator::{validate_session, IssueSeverity, ValidationReport};

/// One timestamped line of the session's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub t_sec: f64,
    pub entry: String,
}

/// Monotonic counters kept over a session. Nothing is silently dropped:
/// every rejection path increments one of these.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TelemetryCounters {
    pub samples_ingested: u64,
    pub frames_assembled: u64,
    pub frames_dropped: u64,
    pub step_extensions: u64,
    pub step_retries: u64,
    pub gate_failures: u64,
    pub stability_rejections: u64,
    pub hard_failures: u64,
}

/// Outcome of one functional check (pose check, squat check).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub name: String,
    pub passed: bool,
    pub metric_deg: f64,
    pub detail: String,
}

/// How far downstream consumers should trust this calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrustLevel {
    Full,
    Degraded,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineReport {
    /// Worst tier over all capture windows
    pub tier: TimelineTier,
    pub reasons: Vec<String>,
    pub windows: Vec<TimelineWindow>,
    /// Counters summed over all windows
    pub totals: TimelineDiagnostics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QcArtifact {
    /// Engine-clock time the artifact was assembled
    pub created_sec: f64,
    pub topology: Topology,
    pub trust: TrustLevel,
    pub segments: Vec<CalibrationResult>,
    pub gates: Vec<GateResult>,
    pub joint_axes: Vec<JointConstraintResult>,
    pub joint_centers: Vec<JointCenterResult>,
    pub timeline: TimelineReport,
    pub pose_check: Option<CheckOutcome>,
    pub squat_check: Option<CheckOutcome>,
    pub validation: ValidationReport,
    pub retry: Option<RetryPlan>,
    pub audit: Vec<AuditEntry>,
    pub telemetry: TelemetryCounters,
}

pub(crate) fn assemble_artifact(
    session: &CalibrationSession,
    config: &EngineConfig,
) -> QcArtifact {
    let validation = validate_session(session, &config.validator);

    let tier = session
        .windows
        .iter()
        .map(|w| w.tier)
        .max()
        .unwrap_or(TimelineTier::Green);
    let mut totals = TimelineDiagnostics::default();
    let mut reasons = Vec::new();
    for window in &session.windows {
        totals.total_pairs += window.diagnostics.total_pairs;
        totals.interpolated_pairs += window.diagnostics.interpolated_pairs;
        totals.dropped_pairs += window.diagnostics.dropped_pairs;
        totals.max_skew_ms = totals.max_skew_ms.max(window.diagnostics.max_skew_ms);
        for reason in &window.reasons {
            reasons.push(format!("{}: {reason}", window.step));
        }
    }
    let timeline = TimelineReport {
        tier,
        reasons,
        windows: session.windows.clone(),
        totals,
    };

    let trust = trust_level(
        &session.gate_results,
        tier,
        &validation,
        session.pose_check.as_ref(),
        session.squat_check.as_ref(),
    );

    QcArtifact {
        created_sec: session.now(),
        topology: session.topology,
        trust,
        segments: session.calibrations.values().cloned().collect(),
        gates: session.gate_results.clone(),
        joint_axes: session.joint_axes.values().cloned().collect(),
        joint_centers: session.joint_centers.values().cloned().collect(),
        timeline,
        pose_check: session.pose_check.clone(),
        squat_check: session.squat_check.clone(),
        validation,
        retry: session.pending_retry.clone(),
        audit: session.audit.clone(),
        telemetry: session.telemetry,
    }
}

fn trust_level(
    gates: &[GateResult],
    tier: TimelineTier,
    validation: &ValidationReport,
    pose_check: Option<&CheckOutcome>,
    squat_check: Option<&CheckOutcome>,
) -> TrustLevel {
    let any_error = validation
        .issues
        .iter()
        .any(|i| i.severity == IssueSeverity::Error);
    if tier == TimelineTier::Red || validation.overall_score < 50 || any_error {
        return TrustLevel::Low;
    }

    let gates_pass = gates.iter().all(|g| g.status == GateStatus::Pass);
    let any_warning = validation
        .issues
        .iter()
        .any(|i| i.severity == IssueSeverity::Warning);
    let checks_pass =
        pose_check.map_or(true, |c| c.passed) && squat_check.map_or(true, |c| c.passed);

    if gates_pass && tier == TimelineTier::Green && !any_warning && checks_pass {
        TrustLevel::Full
    } else {
        TrustLevel::Degraded
    }
}

impl QcArtifact {
    /// Render the operator-facing plain-text report.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "body-imu calibration report ({})", self.topology);
        let _ = writeln!(
            out,
            "trust: {:?}   validation score: {}/100   t={:.1}s",
            self.trust, self.validation.overall_score, self.created_sec
        );

        let _ = writeln!(out, "\nsegments:");
        for seg in &self.segments {
            let _ = writeln!(
                out,
                "  {:<16} {}  {:<13} quality {:>3}  axis {:.2}  stability {:.2}",
                seg.segment.to_string(),
                seg.device,
                seg.method.to_string(),
                seg.quality,
                seg.axis_confidence,
                seg.stability_confidence
            );
        }

        let failed: Vec<&GateResult> = self
            .gates
            .iter()
            .filter(|g| g.status == GateStatus::RetryRequired)
            .collect();
        if failed.is_empty() {
            let _ = writeln!(out, "gates: all passed");
        } else {
            let _ = writeln!(out, "gates: {} require retry", failed.len());
            for gate in failed {
                let reason = gate.reason.as_deref().unwrap_or("unspecified");
                let _ = writeln!(out, "  - {}: {reason}", gate.segment);
            }
        }

        let _ = writeln!(out, "timeline: {:?}", self.timeline.tier);
        for reason in &self.timeline.reasons {
            let _ = writeln!(out, "  - {reason}");
        }

        for check in [&self.pose_check, &self.squat_check].into_iter().flatten() {
            let verdict = if check.passed { "pass" } else { "fail" };
            let _ = writeln!(
                out,
                "{}: {verdict} ({:.1} deg; {})",
                check.name, check.metric_deg, check.detail
            );
        }

        if !self.validation.issues.is_empty() {
            let _ = writeln!(out, "issues:");
            for issue in &self.validation.issues {
                let tag = match issue.severity {
                    IssueSeverity::Info => "info",
                    IssueSeverity::Warning => "warning",
                    IssueSeverity::Error => "error",
                };
                let _ = writeln!(out, "  [{tag}] {}", issue.message);
            }
        }

        if let Some(retry) = &self.retry {
            let regions: Vec<String> = retry.regions.iter().map(|r| r.to_string()).collect();
            let _ = writeln!(out, "retry suggested: {}", regions.join(", "));
        }

        let _ = writeln!(
            out,
            "telemetry: {} samples, {} pairs ({} dropped), {} extensions, {} retries",
            self.telemetry.samples_ingested,
            self.telemetry.frames_assembled,
            self.telemetry.frames_dropped,
            self.telemetry.step_extensions,
            self.telemetry.step_retries
        );
        out
    }

    /// Save to JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Load from JSON file
    pub fn load_from_file(path: &Path) -> Result<Self, std::io::Error> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gating::RetryPlan;
    use crate::tare::TareMethod;
    use capture::{BodyRegion, DeviceId, SegmentId};
    use std::collections::BTreeMap;
    use tare_math::Quaternion;

    fn sample_artifact() -> QcArtifact {
        QcArtifact {
            created_sec: 71.5,
            topology: Topology::LowerBody,
            trust: TrustLevel::Degraded,
            segments: vec![CalibrationResult {
                segment: SegmentId::ThighLeft,
                device: DeviceId(2),
                mounting_tare: Quaternion::identity(),
                heading_tare: Quaternion::identity(),
                quality: 87,
                method: TareMethod::PcaRefined,
                axis_confidence: 0.84,
                stability_confidence: 0.92,
                gravity_confidence: 0.97,
                timestamp_sec: 9.0,
            }],
            gates: vec![GateResult {
                segment: SegmentId::ShankLeft,
                status: GateStatus::RetryRequired,
                reason: Some("axis confidence 0.41 below required 0.60".to_string()),
                measured_confidence: 0.41,
                required_confidence: 0.6,
            }],
            joint_axes: vec![],
            joint_centers: vec![],
            timeline: TimelineReport {
                tier: TimelineTier::Yellow,
                reasons: vec!["knee flexion (left): dropped 7.0% of aligned pairs".to_string()],
                windows: vec![],
                totals: TimelineDiagnostics::default(),
            },
            pose_check: Some(CheckOutcome {
                name: "pose check".to_string(),
                passed: true,
                metric_deg: 3.2,
                detail: "worst segment left thigh".to_string(),
            }),
            squat_check: None,
            validation: ValidationReport {
                overall_score: 78,
                issues: vec![],
                segment_deviation_deg: BTreeMap::new(),
            },
            retry: Some(RetryPlan {
                regions: vec![BodyRegion::LeftLeg],
                reasons: vec!["left shank: axis confidence 0.41 below required 0.60".to_string()],
            }),
            audit: vec![AuditEntry {
                t_sec: 0.5,
                entry: "session started".to_string(),
            }],
            telemetry: TelemetryCounters {
                samples_ingested: 4200,
                frames_assembled: 2000,
                frames_dropped: 12,
                ..TelemetryCounters::default()
            },
        }
    }

    #[test]
    fn test_artifact_json_round_trip() {
        let artifact = sample_artifact();
        let json = serde_json::to_string(&artifact).unwrap();
        let back: QcArtifact = serde_json::from_str(&json).unwrap();
        assert_eq!(back.trust, TrustLevel::Degraded);
        assert_eq!(back.segments.len(), 1);
        assert_eq!(back.gates[0].status, GateStatus::RetryRequired);
        assert_eq!(back.retry.unwrap().regions, vec![BodyRegion::LeftLeg]);
    }

    #[test]
    fn test_render_text_mentions_the_load_bearing_facts() {
        let text = sample_artifact().render_text();
        assert!(text.contains("lower body"));
        assert!(text.contains("left thigh"));
        assert!(text.contains("pca-refined"));
        assert!(text.contains("axis confidence 0.41 below required 0.60"));
        assert!(text.contains("retry suggested: left leg"));
        assert!(text.contains("pose check: pass"));
    }

    #[test]
    fn test_trust_levels() {
        let mut artifact = sample_artifact();
        // failed gate + yellow timeline -> degraded already
        assert_eq!(artifact.trust, TrustLevel::Degraded);

        artifact.timeline.tier = TimelineTier::Red;
        let trust = trust_level(
            &artifact.gates,
            artifact.timeline.tier,
            &artifact.validation,
            artifact.pose_check.as_ref(),
            None,
        );
        assert_eq!(trust, TrustLevel::Low);

        let trust = trust_level(
            &[],
            TimelineTier::Green,
            &artifact.validation,
            artifact.pose_check.as_ref(),
            None,
        );
        assert_eq!(trust, TrustLevel::Full);
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir();
        let path = dir.join("mortise_artifact_test.json");
        let artifact = sample_artifact();
        artifact.save_to_file(&path).unwrap();
        let loaded = QcArtifact::load_from_file(&path).unwrap();
        assert_eq!(loaded.segments[0].quality, 87);
        let _ = std::fs::remove_file(&path);
    }
}
