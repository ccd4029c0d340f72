use capture::{DeviceId, SegmentId};
use thiserror::Error;

use crate::state::FailureCategory;

/// Errors produced by the calibration engine.
#[derive(Error, Debug)]
pub enum CalError {
    /// A capture window closed without enough usable data.
    #[error("insufficient data during {context}: have {have}, need {need}")]
    DataInsufficiency {
        /// What was being captured.
        context: String,
        /// Usable samples or frames collected.
        have: usize,
        /// Minimum required.
        need: usize,
    },

    /// A pose hold never settled within the retry budget.
    #[error("stability violation in {step}: {reason}")]
    StabilityViolation {
        /// Step that was rejecting windows.
        step: String,
        /// First failing metric of the last rejected window.
        reason: String,
    },

    /// A segment's estimate fell below its acceptance threshold.
    #[error("confidence too low for {segment}: {measured:.2} < {required:.2}")]
    ConfidenceTooLow {
        /// Affected segment.
        segment: SegmentId,
        /// Confidence achieved.
        measured: f64,
        /// Configured threshold.
        required: f64,
    },

    /// Sensor geometry contradicts the declared pose.
    #[error("geometry violation for {segment}: {detail}")]
    GeometryViolation {
        /// Affected segment.
        segment: SegmentId,
        detail: String,
    },

    /// An assigned device stopped reporting.
    #[error("device {device} lost while assigned to {segment}")]
    DeviceLoss {
        device: DeviceId,
        segment: SegmentId,
    },

    /// Event is not meaningful in the current state.
    #[error("event {event} not valid in state {state}")]
    InvalidTransition { state: String, event: String },

    /// An event that needs a session arrived while none is active.
    #[error("no active session")]
    SessionInactive,

    /// The sensor assignment does not cover the requested topology.
    #[error("invalid sensor assignment: {detail}")]
    AssignmentInvalid { detail: String },

    /// Configuration validation failure.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CalError {
    /// Failure category for errors that terminate the session. API misuse
    /// errors (invalid transition, inactive session, bad assignment or
    /// config) leave the session untouched and return `None`.
    pub fn failure_category(&self) -> Option<FailureCategory> {
        match self {
            CalError::DataInsufficiency { .. } => Some(FailureCategory::DataInsufficiency),
            CalError::StabilityViolation { .. } => Some(FailureCategory::StabilityViolation),
            CalError::ConfidenceTooLow { .. } => Some(FailureCategory::ConfidenceTooLow),
            CalError::GeometryViolation { .. } => Some(FailureCategory::GeometryViolation),
            CalError::DeviceLoss { .. } => Some(FailureCategory::DeviceLoss),
            CalError::InvalidTransition { .. }
            | CalError::SessionInactive
            | CalError::AssignmentInvalid { .. }
            | CalError::InvalidConfig(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_measured_values() {
        let err = CalError::ConfidenceTooLow {
            segment: SegmentId::ThighLeft,
            measured: 0.41,
            required: 0.7,
        };
        assert_eq!(
            err.to_string(),
            "confidence too low for left thigh: 0.41 < 0.70"
        );
    }

    #[test]
    fn test_api_errors_have_no_failure_category() {
        assert!(CalError::SessionInactive.failure_category().is_none());
        let err = CalError::DeviceLoss {
            device: DeviceId(3),
            segment: SegmentId::Pelvis,
        };
        assert_eq!(err.failure_category(), Some(FailureCategory::DeviceLoss));
    }
}
