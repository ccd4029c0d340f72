//! Per-session working state owned by the engine while a run is active.
//!
//! Everything captured during a run lives here rather than in module
//! statics, so `Start` gets a fresh context and replays are deterministic.
//! Collections that feed the QC artifact are `BTreeMap`s: iteration order
//! must not depend on hash seeds or the artifact would differ between
//! identical runs.

use std::collections::{BTreeMap, VecDeque};

use capture::{
    DeviceId, JointId, NeutralPoseLookup, SegmentId, SensorAssignment, SensorSample,
    SensorStreamBuffers, Topology,
};
use nalgebra::Vector3;
use tare_math::Quaternion;

use crate::axis::AxisEstimate;
use crate::config::EngineConfig;
use crate::gating::{GateResult, RetryPlan, RomSummary, TimelineWindow};
use crate::report::{AuditEntry, CheckOutcome, TelemetryCounters};
use crate::sara::{JointConstraintResult, SaraAccumulator};
use crate::score::{JointCenterResult, ScoreAccumulator};
use crate::steps::{motion_steps, MotionDef};
use crate::tare::CalibrationResult;
use crate::validator::ValidationIssue;

/// Averaged device state captured over a held static pose, anchored at the
/// engine-clock instant the window was accepted.
#[derive(Debug, Clone)]
pub(crate) struct PoseAnchor {
    pub(crate) t_sec: f64,
    pub(crate) orientation: BTreeMap<DeviceId, Quaternion>,
    pub(crate) accel: BTreeMap<DeviceId, Vector3<f64>>,
    pub(crate) gyro_bias: BTreeMap<DeviceId, Vector3<f64>>,
}

/// Orientation excursion tracker over one observation window.
#[derive(Debug, Clone)]
pub(crate) struct RomTracker {
    first: Quaternion,
    prev: Quaternion,
    total_deg: f64,
    max_jitter_deg: f64,
}

impl RomTracker {
    pub(crate) fn new(q: Quaternion) -> Self {
        RomTracker {
            first: q,
            prev: q,
            total_deg: 0.0,
            max_jitter_deg: 0.0,
        }
    }

    pub(crate) fn observe(&mut self, q: &Quaternion) {
        let jitter = self.prev.angle_to(q).to_degrees();
        if jitter > self.max_jitter_deg {
            self.max_jitter_deg = jitter;
        }
        let excursion = self.first.angle_to(q).to_degrees();
        if excursion > self.total_deg {
            self.total_deg = excursion;
        }
        self.prev = *q;
    }

    pub(crate) fn summary(&self) -> RomSummary {
        RomSummary {
            total_deg: self.total_deg,
            max_jitter_deg: self.max_jitter_deg,
        }
    }
}

/// Min/max band of a scalar angle series.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AngleRange {
    min_deg: f64,
    max_deg: f64,
}

impl AngleRange {
    pub(crate) fn new() -> Self {
        AngleRange {
            min_deg: f64::INFINITY,
            max_deg: f64::NEG_INFINITY,
        }
    }

    pub(crate) fn observe(&mut self, deg: f64) {
        self.min_deg = self.min_deg.min(deg);
        self.max_deg = self.max_deg.max(deg);
    }

    pub(crate) fn observed(&self) -> bool {
        self.max_deg >= self.min_deg
    }

    pub(crate) fn range_deg(&self) -> f64 {
        if self.observed() {
            self.max_deg - self.min_deg
        } else {
            0.0
        }
    }
}

/// Accumulators for the functional step currently capturing.
///
/// Ring buffers only span a few seconds, so estimator input is accumulated
/// here as samples arrive instead of being harvested from the rings when
/// the step ends.
pub(crate) struct ActiveCapture {
    pub(crate) step_index: usize,
    pub(crate) target_device: DeviceId,
    /// Proximal and distal devices of the observed joint; `None` when either
    /// side of the pair is unassigned (pair estimators skip this step).
    pub(crate) pair_devices: Option<(DeviceId, DeviceId)>,
    /// Bias-subtracted gyro of the target device
    pub(crate) pca_samples: Vec<Vector3<f64>>,
    pub(crate) sara: Option<SaraAccumulator>,
    pub(crate) score: Option<ScoreAccumulator>,
    rel_first: Option<Quaternion>,
    rel_max_deg: f64,
    /// Timestamp of the last aligned pair fed to the estimators
    pub(crate) last_frame_t: f64,
}

impl ActiveCapture {
    pub(crate) fn new(
        step_index: usize,
        target_device: DeviceId,
        pair_devices: Option<(DeviceId, DeviceId)>,
        sara: Option<SaraAccumulator>,
        score: Option<ScoreAccumulator>,
    ) -> Self {
        ActiveCapture {
            step_index,
            target_device,
            pair_devices,
            pca_samples: Vec::new(),
            sara,
            score,
            rel_first: None,
            rel_max_deg: 0.0,
            last_frame_t: f64::NEG_INFINITY,
        }
    }

    /// Track the joint excursion seen so far from the pair's relative
    /// orientation.
    pub(crate) fn track_relative(&mut self, proximal: &Quaternion, distal: &Quaternion) {
        let rel = (proximal.conjugate() * *distal).normalize();
        match &self.rel_first {
            None => self.rel_first = Some(rel),
            Some(first) => {
                let deg = first.angle_to(&rel).to_degrees();
                if deg > self.rel_max_deg {
                    self.rel_max_deg = deg;
                }
            }
        }
    }

    pub(crate) fn joint_excursion_deg(&self) -> f64 {
        self.rel_max_deg
    }
}

/// All mutable context of one calibration run.
pub(crate) struct CalibrationSession {
    pub(crate) topology: Topology,
    pub(crate) assignment: SensorAssignment,
    pub(crate) neutral_poses: NeutralPoseLookup,
    pub(crate) buffers: SensorStreamBuffers,

    /// Engine clock: the largest timestamp seen on any sample or tick
    clock_sec: Option<f64>,
    /// Set on the first clock observation after a step entry
    step_started_sec: Option<f64>,
    last_progress_sec: Option<f64>,

    pub(crate) gyro_bias: BTreeMap<DeviceId, Vector3<f64>>,
    /// Per-segment stillness score of the accepted static hold
    pub(crate) stability_confidence: BTreeMap<SegmentId, f64>,
    pub(crate) static_anchor: Option<PoseAnchor>,
    pub(crate) final_anchor: Option<PoseAnchor>,
    /// Raw samples accumulated while a pose step holds
    pub(crate) pose_samples: BTreeMap<DeviceId, Vec<SensorSample>>,

    pub(crate) active: Option<ActiveCapture>,
    pub(crate) remaining_steps: VecDeque<usize>,

    pub(crate) axis_estimates: BTreeMap<SegmentId, AxisEstimate>,
    pub(crate) joint_axes: BTreeMap<JointId, JointConstraintResult>,
    pub(crate) joint_centers: BTreeMap<JointId, JointCenterResult>,
    /// Largest relative excursion observed per joint during its step
    pub(crate) joint_rom_deg: BTreeMap<JointId, f64>,

    /// Per-segment raw-orientation excursion over the verification window
    pub(crate) rom_trackers: BTreeMap<SegmentId, RomTracker>,
    pub(crate) squat_knee_left: AngleRange,
    pub(crate) squat_knee_right: AngleRange,
    pub(crate) squat_trunk: Option<RomTracker>,

    pub(crate) calibrations: BTreeMap<SegmentId, CalibrationResult>,
    pub(crate) gate_results: Vec<GateResult>,
    pub(crate) windows: Vec<TimelineWindow>,
    pub(crate) pending_retry: Option<RetryPlan>,
    pub(crate) retry_round: u32,
    pub(crate) pose_check: Option<CheckOutcome>,
    pub(crate) squat_check: Option<CheckOutcome>,
    pub(crate) extra_issues: Vec<ValidationIssue>,

    pub(crate) audit: Vec<AuditEntry>,
    pub(crate) telemetry: TelemetryCounters,
}

impl CalibrationSession {
    pub(crate) fn new(
        topology: Topology,
        assignment: SensorAssignment,
        neutral_poses: NeutralPoseLookup,
        config: &EngineConfig,
    ) -> Self {
        CalibrationSession {
            topology,
            assignment,
            neutral_poses,
            buffers: SensorStreamBuffers::new(config.buffer_capacity),
            clock_sec: None,
            step_started_sec: None,
            last_progress_sec: None,
            gyro_bias: BTreeMap::new(),
            stability_confidence: BTreeMap::new(),
            static_anchor: None,
            final_anchor: None,
            pose_samples: BTreeMap::new(),
            active: None,
            remaining_steps: VecDeque::new(),
            axis_estimates: BTreeMap::new(),
            joint_axes: BTreeMap::new(),
            joint_centers: BTreeMap::new(),
            joint_rom_deg: BTreeMap::new(),
            rom_trackers: BTreeMap::new(),
            squat_knee_left: AngleRange::new(),
            squat_knee_right: AngleRange::new(),
            squat_trunk: None,
            calibrations: BTreeMap::new(),
            gate_results: Vec::new(),
            windows: Vec::new(),
            pending_retry: None,
            retry_round: 0,
            pose_check: None,
            squat_check: None,
            extra_issues: Vec::new(),
            audit: Vec::new(),
            telemetry: TelemetryCounters::default(),
        }
    }

    /// Advance the engine clock. Older timestamps never move it backwards.
    /// The first observation after a step entry stamps the step start.
    pub(crate) fn observe_time(&mut self, t_sec: f64) {
        if !t_sec.is_finite() {
            return;
        }
        match self.clock_sec {
            Some(now) if t_sec <= now => {}
            _ => self.clock_sec = Some(t_sec),
        }
        if self.step_started_sec.is_none() {
            self.step_started_sec = self.clock_sec;
        }
    }

    pub(crate) fn now(&self) -> f64 {
        self.clock_sec.unwrap_or(0.0)
    }

    pub(crate) fn step_elapsed(&self) -> f64 {
        match (self.step_started_sec, self.clock_sec) {
            (Some(start), Some(now)) => (now - start).max(0.0),
            _ => 0.0,
        }
    }

    /// Reset the step clock and progress throttle; the next clock
    /// observation stamps the new step's start.
    pub(crate) fn reset_step_clock(&mut self) {
        self.step_started_sec = None;
        self.last_progress_sec = None;
    }

    /// Rate-limit progress callbacks to one per second of engine time.
    pub(crate) fn should_emit_progress(&mut self) -> bool {
        let now = self.now();
        match self.last_progress_sec {
            Some(last) if now - last < 1.0 => false,
            _ => {
                self.last_progress_sec = Some(now);
                true
            }
        }
    }

    pub(crate) fn motions(&self) -> &'static [MotionDef] {
        motion_steps(self.topology)
    }

    pub(crate) fn bias_for(&self, device: DeviceId) -> Vector3<f64> {
        self.gyro_bias.get(&device).copied().unwrap_or_else(Vector3::zeros)
    }

    pub(crate) fn record_audit(&mut self, entry: impl Into<String>) {
        self.audit.push(AuditEntry {
            t_sec: self.now(),
            entry: entry.into(),
        });
    }
}
