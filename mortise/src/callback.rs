use capture::SegmentId;
use std::sync::Arc;

use crate::gating::{RetryPlan, TimelineTier};
use crate::report::QcArtifact;
use crate::state::FailureCategory;
use crate::steps::StepId;
use crate::tare::TareMethod;

/// Updates emitted by the engine. Every update is returned from
/// `process_event` and delivered to registered callbacks.
#[derive(Debug, Clone)]
pub enum CalUpdate {
    /// A step began; `prompt` is the subject-facing instruction.
    StepStarted {
        step: StepId,
        prompt: String,
        planned_secs: f64,
    },
    /// Periodic progress within the active step (at most once per second).
    StepProgress {
        step: StepId,
        elapsed_secs: f64,
        planned_secs: f64,
        /// Live axis confidence during functional capture
        live_confidence: Option<f64>,
    },
    /// A functional step extended itself to gather more motion.
    StepExtended {
        step: StepId,
        added_secs: f64,
        reason: String,
    },
    /// A step restarted after a rejected window.
    StepRetried {
        step: StepId,
        attempt: u32,
        reason: String,
    },
    /// A step finished.
    StepCompleted { step: StepId },
    /// A pose hold was accepted after its stability window.
    PoseCaptured { step: StepId, held_secs: f64 },
    /// Timeline health of the capture window that just closed.
    TimelineEvaluated {
        step: StepId,
        tier: TimelineTier,
        reasons: Vec<String>,
    },
    /// A segment's tare computation finished.
    SegmentCalibrated {
        segment: SegmentId,
        quality: u8,
        method: TareMethod,
    },
    /// Quality gates ran; `retry` carries the targeted plan when any failed.
    GatesEvaluated {
        passed: usize,
        failed: usize,
        retry: Option<RetryPlan>,
    },
    /// The session finished and the QC artifact is available.
    SessionComplete { artifact: Box<QcArtifact> },
    /// The session was abandoned by request.
    SessionCancelled,
    /// The session failed terminally.
    SessionFailed {
        category: FailureCategory,
        message: String,
    },
}

/// Callback ID for registration/deregistration.
pub type CallbackId = u64;

/// Callback function type.
pub type CalCallback = Arc<dyn Fn(&CalUpdate) + Send + Sync>;
