use capture::{DeviceId, NeutralPoseLookup, SensorAssignment, SensorSample, Topology};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::gating::RetryPlan;

/// Calibration engine states.
///
/// The full run is `Idle -> WarmUp -> StaticPose -> Functional* -> FinalPose
/// -> Verification -> PoseCheck -> SquatCheck -> Complete`; `Error` is
/// terminal and reachable from any active state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CalState {
    /// Waiting for a session start.
    Idle,
    /// Devices stream and buffers warm; subject moves freely.
    WarmUp,
    /// Neutral standing hold; establishes the static anchor and gyro biases.
    StaticPose { retries: u32 },
    /// One functional-motion capture window (index into the session's step
    /// plan).
    Functional {
        step_index: usize,
        extensions: u32,
        retries: u32,
    },
    /// Closing standing hold for repeatability checks.
    FinalPose { retries: u32 },
    /// Gentle-movement window feeding the range-of-motion gates.
    Verification,
    /// Guided neutral-pose functional check.
    PoseCheck,
    /// Guided squat functional check.
    SquatCheck,
    /// Session finished; the QC artifact is available.
    Complete,
    /// Terminal failure.
    Error {
        category: FailureCategory,
        message: String,
    },
}

impl CalState {
    /// Short state name for logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            CalState::Idle => "Idle",
            CalState::WarmUp => "WarmUp",
            CalState::StaticPose { .. } => "StaticPose",
            CalState::Functional { .. } => "Functional",
            CalState::FinalPose { .. } => "FinalPose",
            CalState::Verification => "Verification",
            CalState::PoseCheck => "PoseCheck",
            CalState::SquatCheck => "SquatCheck",
            CalState::Complete => "Complete",
            CalState::Error { .. } => "Error",
        }
    }
}

impl fmt::Display for CalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Machine-readable category carried by the `Error` state and failure
/// callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureCategory {
    DataInsufficiency,
    StabilityViolation,
    ConfidenceTooLow,
    GeometryViolation,
    DeviceLoss,
}

/// Events that drive the state machine.
#[derive(Debug, Clone)]
pub enum CalEvent {
    /// Begin a session. Cancels any active session first.
    Start {
        topology: Topology,
        assignment: SensorAssignment,
        neutral_poses: NeutralPoseLookup,
    },
    /// One sensor sample from a device.
    Sample {
        device: DeviceId,
        sample: SensorSample,
    },
    /// External position observation for a device (optional channel, feeds
    /// joint-center estimation in position mode).
    Position {
        device: DeviceId,
        timestamp_sec: f64,
        position: Vector3<f64>,
    },
    /// Clock advance without new data. Drives step timeouts when sensors
    /// are quiet.
    Tick { now_sec: f64 },
    /// Transport reports an assigned device gone.
    DeviceLost { device: DeviceId },
    /// Targeted replay of the functional steps covering failed regions.
    RetryRegions { plan: RetryPlan },
    /// Abandon the session.
    Cancel,
}

impl CalEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CalEvent::Start { .. } => "Start",
            CalEvent::Sample { .. } => "Sample",
            CalEvent::Position { .. } => "Position",
            CalEvent::Tick { .. } => "Tick",
            CalEvent::DeviceLost { .. } => "DeviceLost",
            CalEvent::RetryRegions { .. } => "RetryRegions",
            CalEvent::Cancel => "Cancel",
        }
    }
}
