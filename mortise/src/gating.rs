//! Post-capture quality gates, timeline-health grading and retry planning.

use capture::{BodyRegion, SegmentId, TimelineDiagnostics};
use serde::{Deserialize, Serialize};

use crate::config::{GateConfig, TimelineConfig};
use crate::steps::StepId;
use crate::tare::{CalibrationResult, TareMethod};

/// Gate verdict for one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateStatus {
    Pass,
    RetryRequired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResult {
    pub segment: SegmentId,
    pub status: GateStatus,
    /// Populated for failures, citing measured against required
    pub reason: Option<String>,
    pub measured_confidence: f64,
    pub required_confidence: f64,
}

/// Orientation excursion of one segment over the verification window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RomSummary {
    /// Largest angle from the window's first orientation, degrees
    pub total_deg: f64,
    /// Largest single-frame orientation step, degrees
    pub max_jitter_deg: f64,
}

/// Evaluate one segment's calibration against the acceptance gates.
///
/// `has_functional_step` says whether the topology guides a motion for
/// this segment; segments without one (the pelvis) are designed to ride
/// the fallback path and pass on their gravity evidence. `motion_proven`
/// is set when the segment's functional capture already demonstrated
/// confident motion, which stands in for the verification movement check.
pub fn evaluate_segment_gate(
    result: &CalibrationResult,
    rom: Option<&RomSummary>,
    has_functional_step: bool,
    motion_proven: bool,
    config: &GateConfig,
) -> GateResult {
    let required = if result.segment.is_ball_driven() {
        config.ball_joint_axis_confidence
    } else {
        config.default_axis_confidence
    };

    let functional = matches!(
        result.method,
        TareMethod::PcaRefined | TareMethod::SaraRefined
    );

    let fail = |reason: String, measured: f64| GateResult {
        segment: result.segment,
        status: GateStatus::RetryRequired,
        reason: Some(reason),
        measured_confidence: measured,
        required_confidence: required,
    };

    if functional && result.axis_confidence < required {
        return fail(
            format!(
                "axis confidence {:.2} below required {:.2}",
                result.axis_confidence, required
            ),
            result.axis_confidence,
        );
    }

    if !functional && has_functional_step {
        return fail(
            format!(
                "functional capture degraded to {} (axis confidence {:.2}, required {:.2})",
                result.method, result.axis_confidence, required
            ),
            result.axis_confidence,
        );
    }

    // Movement must be demonstrated somewhere: either the functional step
    // proved it or the verification window has to.
    if has_functional_step && !motion_proven {
        match rom {
            Some(rom) if rom.total_deg < config.verification_min_rom_deg => {
                return fail(
                    format!(
                        "verification movement {:.1} deg below required {:.1}",
                        rom.total_deg, config.verification_min_rom_deg
                    ),
                    result.axis_confidence,
                );
            }
            Some(rom) if rom.max_jitter_deg > config.verification_max_jitter_deg => {
                return fail(
                    format!(
                        "verification jitter {:.1} deg/frame above {:.1}",
                        rom.max_jitter_deg, config.verification_max_jitter_deg
                    ),
                    result.axis_confidence,
                );
            }
            None => {
                return fail(
                    "no verification movement observed".to_string(),
                    result.axis_confidence,
                );
            }
            Some(_) => {}
        }
    }

    GateResult {
        segment: result.segment,
        status: GateStatus::Pass,
        reason: None,
        measured_confidence: if functional {
            result.axis_confidence
        } else {
            result.gravity_confidence
        },
        required_confidence: required,
    }
}

/// Timeline health of a capture window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimelineTier {
    Green,
    Yellow,
    Red,
}

impl TimelineTier {
    pub fn worst(self, other: TimelineTier) -> TimelineTier {
        self.max(other)
    }
}

/// One classified capture window, kept for the QC artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineWindow {
    pub step: StepId,
    pub tier: TimelineTier,
    pub reasons: Vec<String>,
    pub diagnostics: TimelineDiagnostics,
}

/// Grade the pair-assembly diagnostics of one capture window.
pub fn classify_timeline(
    diag: &TimelineDiagnostics,
    config: &TimelineConfig,
) -> (TimelineTier, Vec<String>) {
    if diag.total_pairs == 0 {
        return (
            TimelineTier::Red,
            vec!["no aligned pairs assembled".to_string()],
        );
    }

    let drop_ratio = diag.dropped_ratio();
    let interp_ratio = diag.interpolated_ratio();
    let mut reasons = Vec::new();

    if drop_ratio >= config.red_drop_ratio {
        reasons.push(format!(
            "dropped {:.0}% of aligned pairs",
            drop_ratio * 100.0
        ));
        return (TimelineTier::Red, reasons);
    }

    if drop_ratio >= config.yellow_drop_ratio {
        reasons.push(format!(
            "dropped {:.1}% of aligned pairs",
            drop_ratio * 100.0
        ));
    }
    if interp_ratio >= config.yellow_interp_ratio {
        reasons.push(format!(
            "{:.0}% of pairs needed interpolation",
            interp_ratio * 100.0
        ));
    }
    if diag.max_skew_ms > config.max_skew_ms {
        reasons.push(format!(
            "device streams drifted up to {:.0} ms apart",
            diag.max_skew_ms
        ));
    }

    if reasons.is_empty() {
        (TimelineTier::Green, reasons)
    } else {
        (TimelineTier::Yellow, reasons)
    }
}

/// Targeted-replay request covering the body regions whose segments failed
/// their gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPlan {
    pub regions: Vec<BodyRegion>,
    pub reasons: Vec<String>,
}

/// Build a retry plan from failed gates; `None` when everything passed.
pub fn build_retry_plan(gates: &[GateResult]) -> Option<RetryPlan> {
    let mut regions = Vec::new();
    let mut reasons = Vec::new();
    for gate in gates {
        if gate.status != GateStatus::RetryRequired {
            continue;
        }
        let region = BodyRegion::of_segment(gate.segment);
        if !regions.contains(&region) {
            regions.push(region);
        }
        if let Some(reason) = &gate.reason {
            reasons.push(format!("{}: {reason}", gate.segment));
        }
    }
    if regions.is_empty() {
        None
    } else {
        Some(RetryPlan { regions, reasons })
    }
}
