//! MORTISE - Motion-driven Orientation Refinement & Tare Inference State Engine
//!
//! Guided-motion calibration engine for body-worn IMUs. A session walks the
//! subject through states: Idle -> WarmUp -> StaticPose -> functional steps ->
//! FinalPose -> Verification -> PoseCheck -> SquatCheck -> Complete, and
//! produces per-segment mounting and heading tares plus a QC artifact.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use capture::{
    joint_definition, BodyRegion, DeviceId, JointType, NeutralPoseLookup, SegmentId,
    SensorAssignment, SensorSample, Topology,
};
use nalgebra::Vector3;

pub mod axis;
pub mod callback;
pub mod config;
pub mod error;
pub mod gating;
pub mod report;
pub mod sara;
pub mod score;
mod session;
pub mod stability;
pub mod state;
pub mod steps;
pub mod tare;
pub mod validator;

use crate::axis::{estimate_axis, live_confidence};
use crate::config::StepTiming;
use crate::gating::{
    build_retry_plan, classify_timeline, evaluate_segment_gate, GateStatus, TimelineTier,
    TimelineWindow,
};
use crate::report::{assemble_artifact, CheckOutcome};
use crate::sara::SaraAccumulator;
use crate::score::ScoreAccumulator;
use crate::session::{ActiveCapture, AngleRange, CalibrationSession, PoseAnchor, RomTracker};
use crate::stability::{
    evaluate_window, mean_accel, mean_gyro, mean_orientation, stability_confidence,
};
use crate::steps::{motion_for_segment, step_planned_secs, step_prompt, MotionDef, StepId};
use crate::tare::{
    build_functional_tare, build_gravity_tare, build_heading_tare, build_pose_tare,
    check_static_geometry, gravity_agreement, quality_score, resolve_axis_sign, select_method,
    CalibrationResult, TareMethod, BONE_DOWN, WORLD_DOWN,
};
use crate::validator::{IssueCategory, IssueSeverity, ValidationIssue};

// Re-export commonly used types for external use
pub use crate::callback::{CalCallback, CalUpdate, CallbackId};
pub use crate::config::EngineConfig;
pub use crate::error::CalError;
pub use crate::gating::RetryPlan;
pub use crate::report::{QcArtifact, TrustLevel};
pub use crate::state::{CalEvent, CalState, FailureCategory};

/// Main calibration engine state machine.
///
/// Hosts feed it `CalEvent`s (samples, ticks, lifecycle requests) and
/// receive `CalUpdate`s both as return values and through registered
/// callbacks. One session at a time; `Start` cancels any active session.
pub struct CalibrationEngine {
    /// Current state
    state: CalState,
    /// Engine configuration
    config: EngineConfig,
    /// Per-session working context (None outside a session)
    session: Option<CalibrationSession>,
    /// QC artifact of the last completed session
    artifact: Option<QcArtifact>,
    /// Registered callbacks
    callbacks: Arc<Mutex<HashMap<CallbackId, CalCallback>>>,
    /// Next callback ID
    next_callback_id: Arc<Mutex<CallbackId>>,
}

impl CalibrationEngine {
    /// Create a new calibration engine.
    pub fn new(config: EngineConfig) -> Result<Self, CalError> {
        config.validate()?;
        Ok(Self {
            state: CalState::Idle,
            config,
            session: None,
            artifact: None,
            callbacks: Arc::new(Mutex::new(HashMap::new())),
            next_callback_id: Arc::new(Mutex::new(0)),
        })
    }

    /// Get the current state
    pub fn state(&self) -> &CalState {
        &self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Artifact of the last completed session. While a session is active
    /// (or hard-failed) this assembles a snapshot of whatever has been
    /// captured so far.
    pub fn qc_artifact(&self) -> Option<QcArtifact> {
        self.artifact.clone().or_else(|| {
            self.session
                .as_ref()
                .map(|session| assemble_artifact(session, &self.config))
        })
    }

    /// Register a callback for engine updates
    pub fn register_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&CalUpdate) + Send + Sync + 'static,
    {
        let mut callbacks = self.callbacks.lock().unwrap();
        let mut next_id = self.next_callback_id.lock().unwrap();

        let callback_id = *next_id;
        *next_id += 1;

        callbacks.insert(callback_id, Arc::new(callback));
        callback_id
    }

    /// Deregister a callback
    pub fn deregister_callback(&self, callback_id: CallbackId) -> bool {
        let mut callbacks = self.callbacks.lock().unwrap();
        callbacks.remove(&callback_id).is_some()
    }

    /// Get the number of registered callbacks
    pub fn callback_count(&self) -> usize {
        self.callbacks.lock().unwrap().len()
    }

    /// Emit an update to all registered callbacks
    fn emit_event(&self, update: &CalUpdate) {
        let callbacks = self.callbacks.lock().unwrap();
        for callback in callbacks.values() {
            callback(update);
        }
    }

    /// Process one event against the current state.
    ///
    /// Returns the updates produced (also delivered to callbacks). Errors
    /// with a failure category transition the engine to `Error`; API-misuse
    /// errors leave the state untouched.
    pub fn process_event(&mut self, event: CalEvent) -> Result<Vec<CalUpdate>, CalError> {
        use CalState::*;

        let result = match (&self.state, event) {
            (
                _,
                CalEvent::Start {
                    topology,
                    assignment,
                    neutral_poses,
                },
            ) => self.handle_start(topology, assignment, neutral_poses),

            // Data and transport events are meaningless without a session.
            (
                Idle | Complete | Error { .. },
                CalEvent::Sample { .. }
                | CalEvent::Position { .. }
                | CalEvent::Tick { .. }
                | CalEvent::DeviceLost { .. },
            ) => {
                log::debug!("no active session, ignoring event");
                Ok((self.state.clone(), vec![]))
            }

            (_, CalEvent::Sample { device, sample }) => self.handle_sample(device, sample),
            (
                _,
                CalEvent::Position {
                    device,
                    timestamp_sec,
                    position,
                },
            ) => self.handle_position(device, timestamp_sec, position),
            (_, CalEvent::Tick { now_sec }) => self.handle_tick(now_sec),
            (_, CalEvent::DeviceLost { device }) => self.handle_device_lost(device),

            (Idle | Complete | Error { .. }, CalEvent::Cancel) => {
                log::debug!("cancel with no active session, ignoring");
                Ok((self.state.clone(), vec![]))
            }
            (_, CalEvent::Cancel) => Ok(self.handle_cancel()),

            (Complete, CalEvent::RetryRegions { plan }) => self.handle_retry_regions(plan),
            (Idle, CalEvent::RetryRegions { .. }) => Err(CalError::SessionInactive),
            (state, event @ CalEvent::RetryRegions { .. }) => {
                log::warn!("event {} not valid in state {}", event.name(), state.name());
                Err(CalError::InvalidTransition {
                    state: state.name().to_string(),
                    event: event.name().to_string(),
                })
            }
        };

        match result {
            Ok((new_state, updates)) => {
                for update in &updates {
                    if let CalUpdate::SessionComplete { artifact } = update {
                        self.artifact = Some((**artifact).clone());
                    }
                }
                if self.state.name() != new_state.name() {
                    log::info!("state {} -> {}", self.state.name(), new_state.name());
                }
                self.state = new_state;
                for update in &updates {
                    self.emit_event(update);
                }
                Ok(updates)
            }
            Err(err) => {
                if let Some(category) = err.failure_category() {
                    let message = err.to_string();
                    log::error!("session failed: {message}");
                    if let Some(session) = self.session.as_mut() {
                        session.telemetry.hard_failures += 1;
                        session.record_audit(format!("hard failure: {message}"));
                    }
                    self.state = Error {
                        category,
                        message: message.clone(),
                    };
                    self.emit_event(&CalUpdate::SessionFailed { category, message });
                }
                Err(err)
            }
        }
    }

    fn handle_start(
        &mut self,
        topology: Topology,
        assignment: SensorAssignment,
        neutral_poses: NeutralPoseLookup,
    ) -> Result<(CalState, Vec<CalUpdate>), CalError> {
        assignment
            .validate(topology)
            .map_err(|err| CalError::AssignmentInvalid {
                detail: err.to_string(),
            })?;

        let mut updates = Vec::new();
        let mid_session = !matches!(
            self.state,
            CalState::Idle | CalState::Complete | CalState::Error { .. }
        );
        if mid_session {
            log::info!("start received mid-session, cancelling the active session");
            updates.push(CalUpdate::SessionCancelled);
        }
        self.artifact = None;

        let mut session = CalibrationSession::new(topology, assignment, neutral_poses, &self.config);
        session.record_audit(format!("session started ({topology})"));
        self.session = Some(session);

        log::info!("calibration session started: {topology}");
        updates.push(step_started(StepId::WarmUp, &self.config.timing));
        Ok((CalState::WarmUp, updates))
    }

    fn handle_sample(
        &mut self,
        device: DeviceId,
        sample: SensorSample,
    ) -> Result<(CalState, Vec<CalUpdate>), CalError> {
        let state = self.state.clone();
        let session = self.session.as_mut().ok_or(CalError::SessionInactive)?;

        let Some(segment) = session.assignment.segment_for(device) else {
            log::debug!("sample from unassigned {device} ignored");
            return Ok((state, vec![]));
        };

        session.observe_time(sample.timestamp_sec);
        session.telemetry.samples_ingested += 1;
        session.buffers.push_sample(device, &sample);
        accumulate_sample(session, &self.config, &state, segment, device, &sample);

        advance_step(session, &self.config, &state)
    }

    fn handle_position(
        &mut self,
        device: DeviceId,
        timestamp_sec: f64,
        position: Vector3<f64>,
    ) -> Result<(CalState, Vec<CalUpdate>), CalError> {
        let state = self.state.clone();
        let session = self.session.as_mut().ok_or(CalError::SessionInactive)?;
        session.observe_time(timestamp_sec);
        session.buffers.push_position(device, timestamp_sec, position);
        advance_step(session, &self.config, &state)
    }

    fn handle_tick(&mut self, now_sec: f64) -> Result<(CalState, Vec<CalUpdate>), CalError> {
        let state = self.state.clone();
        let session = self.session.as_mut().ok_or(CalError::SessionInactive)?;
        session.observe_time(now_sec);
        advance_step(session, &self.config, &state)
    }

    fn handle_device_lost(
        &mut self,
        device: DeviceId,
    ) -> Result<(CalState, Vec<CalUpdate>), CalError> {
        let session = self.session.as_mut().ok_or(CalError::SessionInactive)?;
        match session.assignment.segment_for(device) {
            Some(segment) => Err(CalError::DeviceLoss { device, segment }),
            None => {
                log::debug!("unassigned device {device} lost, ignoring");
                Ok((self.state.clone(), vec![]))
            }
        }
    }

    fn handle_cancel(&mut self) -> (CalState, Vec<CalUpdate>) {
        log::info!("session cancelled in state {}", self.state.name());
        self.session = None;
        self.artifact = None;
        (CalState::Idle, vec![CalUpdate::SessionCancelled])
    }

    /// Targeted replay: re-enter only the functional steps whose target
    /// segments fall in the failed regions, then run the closing sequence
    /// again. Bounded by `max_retry_rounds`.
    fn handle_retry_regions(
        &mut self,
        plan: RetryPlan,
    ) -> Result<(CalState, Vec<CalUpdate>), CalError> {
        let session = self.session.as_mut().ok_or(CalError::SessionInactive)?;

        if session.retry_round >= self.config.timing.max_retry_rounds {
            log::warn!(
                "retry rounds exhausted ({}), ignoring retry request",
                session.retry_round
            );
            return Ok((CalState::Complete, vec![]));
        }

        let indices: VecDeque<usize> = session
            .motions()
            .iter()
            .enumerate()
            .filter(|(_, def)| {
                plan.regions
                    .contains(&BodyRegion::of_segment(def.target_segment))
            })
            .map(|(index, _)| index)
            .collect();
        if indices.is_empty() {
            log::warn!("retry plan covers no functional steps, ignoring");
            return Ok((CalState::Complete, vec![]));
        }

        session.retry_round += 1;
        let regions: Vec<String> = plan.regions.iter().map(|r| r.to_string()).collect();
        log::info!(
            "targeted retry round {} over {}",
            session.retry_round,
            regions.join(", ")
        );
        session.record_audit(format!(
            "targeted retry round {} over {}",
            session.retry_round,
            regions.join(", ")
        ));
        session.pending_retry = None;
        session.remaining_steps = indices;
        self.artifact = None;

        let mut updates = Vec::new();
        let session = self.session.as_mut().ok_or(CalError::SessionInactive)?;
        let state = next_capture_state(session, &self.config, &mut updates)?;
        Ok((state, updates))
    }
}

fn step_started(step: StepId, timing: &StepTiming) -> CalUpdate {
    CalUpdate::StepStarted {
        step,
        prompt: step_prompt(step).to_string(),
        planned_secs: step_planned_secs(step, timing),
    }
}

fn sorted_assignment(session: &CalibrationSession) -> Vec<(SegmentId, DeviceId)> {
    let mut pairs: Vec<(SegmentId, DeviceId)> = session.assignment.iter().collect();
    pairs.sort();
    pairs
}

fn push_progress(
    session: &mut CalibrationSession,
    step: StepId,
    elapsed: f64,
    planned: f64,
    live: Option<f64>,
    updates: &mut Vec<CalUpdate>,
) {
    if session.should_emit_progress() {
        updates.push(CalUpdate::StepProgress {
            step,
            elapsed_secs: elapsed,
            planned_secs: planned,
            live_confidence: live,
        });
    }
}

/// Clear buffers and pose accumulators for a fresh hold window.
fn begin_pose_hold(session: &mut CalibrationSession) {
    session.buffers.clear_window();
    session.pose_samples.clear();
    session.reset_step_clock();
}

/// Arm the capture context for one functional step. Prior estimates for the
/// target segment and observed joint are dropped so a retried step cannot
/// resurrect stale evidence.
fn begin_functional(
    session: &mut CalibrationSession,
    index: usize,
    def: &'static MotionDef,
    retries: u32,
) -> Result<CalState, CalError> {
    let Some(target_device) = session.assignment.device_for(def.target_segment) else {
        return Err(CalError::AssignmentInvalid {
            detail: format!("no device assigned to {}", def.target_segment),
        });
    };

    let joint_def = joint_definition(def.observed_joint);
    let pair = session
        .assignment
        .device_for(joint_def.proximal)
        .zip(session.assignment.device_for(joint_def.distal));
    if pair.is_none() {
        log::info!(
            "{}: joint pair incomplete, hinge estimators idle for this step",
            def.step_id()
        );
    }
    let sara = match (pair.is_some(), joint_def.joint_type) {
        (true, JointType::Hinge) => SaraAccumulator::new(joint_def).ok(),
        _ => None,
    };
    let score = pair
        .is_some()
        .then(|| ScoreAccumulator::new(def.observed_joint));

    session.axis_estimates.remove(&def.target_segment);
    session.joint_axes.remove(&def.observed_joint);
    session.joint_centers.remove(&def.observed_joint);

    session.active = Some(ActiveCapture::new(index, target_device, pair, sara, score));
    session.buffers.clear_window();
    session.reset_step_clock();
    Ok(CalState::Functional {
        step_index: index,
        extensions: 0,
        retries,
    })
}

/// Enter the next pending functional step, or FinalPose when the plan is
/// drained.
fn next_capture_state(
    session: &mut CalibrationSession,
    config: &EngineConfig,
    updates: &mut Vec<CalUpdate>,
) -> Result<CalState, CalError> {
    while let Some(index) = session.remaining_steps.pop_front() {
        let Some(def) = session.motions().get(index) else {
            continue;
        };
        let state = begin_functional(session, index, def, 0)?;
        log::info!("functional step started: {}", def.step_id());
        session.record_audit(format!("step started: {}", def.step_id()));
        updates.push(CalUpdate::StepStarted {
            step: def.step_id(),
            prompt: def.prompt.to_string(),
            planned_secs: def.base_secs,
        });
        return Ok(state);
    }

    begin_pose_hold(session);
    log::info!("functional steps complete, entering final pose");
    updates.push(step_started(StepId::FinalPose, &config.timing));
    Ok(CalState::FinalPose { retries: 0 })
}

/// State-specific accumulation of one arriving sample. Ring buffers span
/// only a few seconds, so everything estimators need later is banked here
/// as it arrives.
fn accumulate_sample(
    session: &mut CalibrationSession,
    config: &EngineConfig,
    state: &CalState,
    segment: SegmentId,
    device: DeviceId,
    sample: &SensorSample,
) {
    match state {
        CalState::StaticPose { .. } | CalState::FinalPose { .. } | CalState::PoseCheck => {
            session
                .pose_samples
                .entry(device)
                .or_default()
                .push(*sample);
        }
        CalState::Functional { .. } => {
            let bias = session.bias_for(device);
            let pair_biases = session.active.as_ref().and_then(|active| {
                active
                    .pair_devices
                    .map(|(p, d)| (session.bias_for(p), session.bias_for(d)))
            });
            let Some(active) = session.active.as_mut() else {
                return;
            };

            if device == active.target_device {
                active.pca_samples.push(sample.gyro - bias);
            }

            // Pair assembly keyed to the distal device's cadence.
            if let (Some((p_dev, d_dev)), Some((bias_p, bias_d))) =
                (active.pair_devices, pair_biases)
            {
                if device != d_dev {
                    return;
                }
                match session
                    .buffers
                    .aligned_joint_frame(p_dev, d_dev, config.timeline.max_skew_ms)
                {
                    Some(frame) => {
                        if frame.t <= active.last_frame_t {
                            return;
                        }
                        active.last_frame_t = frame.t;
                        session.telemetry.frames_assembled += 1;
                        active.track_relative(
                            &frame.proximal.orientation,
                            &frame.distal.orientation,
                        );
                        if let Some(sara) = active.sara.as_mut() {
                            sara.add_frame(
                                &frame,
                                &bias_p,
                                &bias_d,
                                config.estimators.sara_min_rel_omega,
                            );
                        }
                        if let Some(score) = active.score.as_mut() {
                            score.add_frame(&frame, &bias_p, &bias_d);
                        }
                    }
                    None => {
                        session.telemetry.frames_dropped += 1;
                    }
                }
            }
        }
        CalState::Verification => match session.rom_trackers.get_mut(&segment) {
            Some(tracker) => tracker.observe(&sample.orientation),
            None => {
                session
                    .rom_trackers
                    .insert(segment, RomTracker::new(sample.orientation));
            }
        },
        CalState::SquatCheck => accumulate_squat(session, config, segment, sample),
        _ => {}
    }
}

/// Squat-check accumulation: knee flexion from calibrated thigh/shank pairs
/// where assigned, trunk lean from the chest otherwise.
fn accumulate_squat(
    session: &mut CalibrationSession,
    config: &EngineConfig,
    segment: SegmentId,
    sample: &SensorSample,
) {
    if segment == SegmentId::Chest {
        if let Some(result) = session.calibrations.get(&SegmentId::Chest) {
            let q = result.calibrated(&sample.orientation);
            match session.squat_trunk.as_mut() {
                Some(tracker) => tracker.observe(&q),
                None => session.squat_trunk = Some(RomTracker::new(q)),
            }
        }
        return;
    }

    let (thigh, left) = match segment {
        SegmentId::ShankLeft => (SegmentId::ThighLeft, true),
        SegmentId::ShankRight => (SegmentId::ThighRight, false),
        _ => return,
    };
    let pair = session
        .assignment
        .device_for(thigh)
        .zip(session.assignment.device_for(segment));
    let Some((thigh_dev, shank_dev)) = pair else {
        return;
    };
    let Some(frame) =
        session
            .buffers
            .aligned_joint_frame(thigh_dev, shank_dev, config.timeline.max_skew_ms)
    else {
        return;
    };
    if let (Some(thigh_cal), Some(shank_cal)) = (
        session.calibrations.get(&thigh),
        session.calibrations.get(&segment),
    ) {
        let angle = thigh_cal
            .calibrated(&frame.proximal.orientation)
            .angle_to(&shank_cal.calibrated(&frame.distal.orientation))
            .to_degrees();
        if left {
            session.squat_knee_left.observe(angle);
        } else {
            session.squat_knee_right.observe(angle);
        }
    }
}

enum PoseWindow {
    Settled {
        anchor: PoseAnchor,
        confidence: BTreeMap<SegmentId, f64>,
    },
    Unsettled {
        reason: String,
        starved: bool,
    },
}

/// Evaluate the trailing stability window of a pose hold across all
/// assigned devices.
fn evaluate_pose_window(session: &CalibrationSession, config: &EngineConfig) -> PoseWindow {
    let now = session.now();
    let cutoff = now - config.stability.window_secs;

    let mut orientation = BTreeMap::new();
    let mut accel = BTreeMap::new();
    let mut gyro_bias = BTreeMap::new();
    let mut confidence = BTreeMap::new();

    for (segment, device) in sorted_assignment(session) {
        let window: Vec<SensorSample> = session
            .pose_samples
            .get(&device)
            .map(|samples| {
                samples
                    .iter()
                    .filter(|s| s.timestamp_sec >= cutoff)
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        let report = evaluate_window(&window, &config.stability);
        if !report.stationary {
            let reason = report
                .reasons
                .first()
                .cloned()
                .unwrap_or_else(|| "unstable window".to_string());
            return PoseWindow::Unsettled {
                reason: format!("{segment}: {reason}"),
                starved: window.is_empty(),
            };
        }
        confidence.insert(segment, stability_confidence(&report, &config.stability));
        orientation.insert(device, mean_orientation(&window));
        accel.insert(device, mean_accel(&window));
        gyro_bias.insert(device, mean_gyro(&window));
    }

    PoseWindow::Settled {
        anchor: PoseAnchor {
            t_sec: now,
            orientation,
            accel,
            gyro_bias,
        },
        confidence,
    }
}

/// Advance the step clock: emit progress, extend, retry, or move on. The
/// single place where step timeouts are decided, driven by both samples
/// and ticks.
fn advance_step(
    session: &mut CalibrationSession,
    config: &EngineConfig,
    state: &CalState,
) -> Result<(CalState, Vec<CalUpdate>), CalError> {
    let timing = &config.timing;
    let mut updates = Vec::new();
    let elapsed = session.step_elapsed();

    let new_state = match state {
        CalState::WarmUp => {
            if elapsed >= timing.warm_up_secs {
                log::info!("warm-up complete after {elapsed:.1}s");
                session.record_audit("warm-up complete");
                updates.push(CalUpdate::StepCompleted { step: StepId::WarmUp });
                begin_pose_hold(session);
                updates.push(step_started(StepId::StaticPose, timing));
                CalState::StaticPose { retries: 0 }
            } else {
                push_progress(
                    session,
                    StepId::WarmUp,
                    elapsed,
                    timing.warm_up_secs,
                    None,
                    &mut updates,
                );
                state.clone()
            }
        }

        CalState::StaticPose { retries } => {
            if elapsed < timing.static_pose_secs {
                push_progress(
                    session,
                    StepId::StaticPose,
                    elapsed,
                    timing.static_pose_secs,
                    None,
                    &mut updates,
                );
                state.clone()
            } else {
                match evaluate_pose_window(session, config) {
                    PoseWindow::Settled { anchor, confidence } => {
                        // The static anchor is load-bearing: a sensor whose
                        // gravity contradicts the declared pose fails hard
                        // before anything downstream consumes it.
                        for (segment, device) in sorted_assignment(session) {
                            let (Some(q), Some(a)) =
                                (anchor.orientation.get(&device), anchor.accel.get(&device))
                            else {
                                continue;
                            };
                            check_static_geometry(segment, q, a)?;
                        }

                        session.gyro_bias = anchor.gyro_bias.clone();
                        session.stability_confidence = confidence;
                        session.record_audit(format!(
                            "static anchor established at t={:.2}s",
                            anchor.t_sec
                        ));
                        session.static_anchor = Some(anchor);
                        log::info!("static pose accepted after {elapsed:.1}s");
                        updates.push(CalUpdate::PoseCaptured {
                            step: StepId::StaticPose,
                            held_secs: elapsed,
                        });
                        updates.push(CalUpdate::StepCompleted {
                            step: StepId::StaticPose,
                        });

                        session.remaining_steps = (0..session.motions().len()).collect();
                        next_capture_state(session, config, &mut updates)?
                    }
                    PoseWindow::Unsettled { reason, starved } => {
                        session.telemetry.stability_rejections += 1;
                        if *retries < timing.max_step_retries {
                            let attempt = retries + 1;
                            log::warn!("static pose window rejected ({reason}), retry {attempt}");
                            session.record_audit(format!("static pose retry {attempt}: {reason}"));
                            session.telemetry.step_retries += 1;
                            begin_pose_hold(session);
                            updates.push(CalUpdate::StepRetried {
                                step: StepId::StaticPose,
                                attempt,
                                reason,
                            });
                            CalState::StaticPose { retries: attempt }
                        } else if starved {
                            return Err(CalError::DataInsufficiency {
                                context: "static pose".to_string(),
                                have: 0,
                                need: config.stability.min_frames,
                            });
                        } else {
                            return Err(CalError::StabilityViolation {
                                step: "static pose".to_string(),
                                reason,
                            });
                        }
                    }
                }
            }
        }

        CalState::Functional {
            step_index,
            extensions,
            retries,
        } => {
            let Some(def) = session.motions().get(*step_index) else {
                log::warn!("no motion at step index {step_index}");
                return Ok((state.clone(), updates));
            };
            let planned = def.base_secs + f64::from(*extensions) * timing.extension_secs;
            if elapsed < planned {
                let live = session
                    .active
                    .as_ref()
                    .and_then(|active| live_confidence(&active.pca_samples, &config.estimators));
                push_progress(session, def.step_id(), elapsed, planned, live, &mut updates);
                state.clone()
            } else {
                let live = session
                    .active
                    .as_ref()
                    .and_then(|active| live_confidence(&active.pca_samples, &config.estimators))
                    .unwrap_or(0.0);
                let can_extend = *extensions < timing.max_extensions
                    && f64::from(extensions + 1) * timing.extension_secs
                        <= def.max_extension_secs + 1e-9;
                if live < config.gates.live_axis_confidence && can_extend {
                    session.telemetry.step_extensions += 1;
                    log::info!(
                        "{} extended by {:.0}s (live axis confidence {live:.2})",
                        def.step_id(),
                        timing.extension_secs
                    );
                    session.record_audit(format!(
                        "{} extended (live axis confidence {live:.2})",
                        def.step_id()
                    ));
                    updates.push(CalUpdate::StepExtended {
                        step: def.step_id(),
                        added_secs: timing.extension_secs,
                        reason: format!(
                            "live axis confidence {live:.2} below {:.2}",
                            config.gates.live_axis_confidence
                        ),
                    });
                    CalState::Functional {
                        step_index: *step_index,
                        extensions: extensions + 1,
                        retries: *retries,
                    }
                } else {
                    finalize_functional(session, config, def, *retries, &mut updates)?
                }
            }
        }

        CalState::FinalPose { retries } => {
            if elapsed < timing.final_pose_secs {
                push_progress(
                    session,
                    StepId::FinalPose,
                    elapsed,
                    timing.final_pose_secs,
                    None,
                    &mut updates,
                );
                state.clone()
            } else {
                match evaluate_pose_window(session, config) {
                    PoseWindow::Settled { anchor, .. } => {
                        session
                            .record_audit(format!("final anchor captured at t={:.2}s", anchor.t_sec));
                        session.final_anchor = Some(anchor);
                        log::info!("final pose accepted after {elapsed:.1}s");
                        updates.push(CalUpdate::PoseCaptured {
                            step: StepId::FinalPose,
                            held_secs: elapsed,
                        });
                        updates.push(CalUpdate::StepCompleted {
                            step: StepId::FinalPose,
                        });
                        enter_verification(session, timing, &mut updates);
                        CalState::Verification
                    }
                    PoseWindow::Unsettled { reason, .. } => {
                        session.telemetry.stability_rejections += 1;
                        if *retries < timing.max_step_retries {
                            let attempt = retries + 1;
                            log::warn!("final pose window rejected ({reason}), retry {attempt}");
                            session.record_audit(format!("final pose retry {attempt}: {reason}"));
                            session.telemetry.step_retries += 1;
                            begin_pose_hold(session);
                            updates.push(CalUpdate::StepRetried {
                                step: StepId::FinalPose,
                                attempt,
                                reason,
                            });
                            CalState::FinalPose { retries: attempt }
                        } else {
                            // The final anchor only feeds repeatability
                            // checks; the session continues without it.
                            log::warn!(
                                "final pose never settled ({reason}), continuing without it"
                            );
                            session.record_audit(format!("final pose abandoned: {reason}"));
                            session.extra_issues.push(ValidationIssue {
                                severity: IssueSeverity::Warning,
                                category: IssueCategory::DataQuality,
                                segment: None,
                                message: format!("final pose never settled: {reason}"),
                                remediation:
                                    "repeat the session with a calmer closing hold".to_string(),
                            });
                            updates.push(CalUpdate::StepCompleted {
                                step: StepId::FinalPose,
                            });
                            enter_verification(session, timing, &mut updates);
                            CalState::Verification
                        }
                    }
                }
            }
        }

        CalState::Verification => {
            if elapsed < timing.verification_secs {
                push_progress(
                    session,
                    StepId::Verification,
                    elapsed,
                    timing.verification_secs,
                    None,
                    &mut updates,
                );
                state.clone()
            } else {
                updates.push(CalUpdate::StepCompleted {
                    step: StepId::Verification,
                });
                finalize_session(session, config, &mut updates)?
            }
        }

        CalState::PoseCheck => {
            if elapsed < timing.pose_check_secs {
                push_progress(
                    session,
                    StepId::PoseCheck,
                    elapsed,
                    timing.pose_check_secs,
                    None,
                    &mut updates,
                );
                state.clone()
            } else {
                let outcome = evaluate_pose_check(session, config);
                log::info!(
                    "pose check {} ({:.1} deg)",
                    if outcome.passed { "passed" } else { "failed" },
                    outcome.metric_deg
                );
                session.record_audit(format!(
                    "pose check {}: {:.1} deg ({})",
                    if outcome.passed { "passed" } else { "failed" },
                    outcome.metric_deg,
                    outcome.detail
                ));
                session.pose_check = Some(outcome);
                updates.push(CalUpdate::StepCompleted {
                    step: StepId::PoseCheck,
                });

                session.squat_knee_left = AngleRange::new();
                session.squat_knee_right = AngleRange::new();
                session.squat_trunk = None;
                session.buffers.clear_window();
                session.reset_step_clock();
                updates.push(step_started(StepId::SquatCheck, timing));
                CalState::SquatCheck
            }
        }

        CalState::SquatCheck => {
            if elapsed < timing.squat_check_secs {
                push_progress(
                    session,
                    StepId::SquatCheck,
                    elapsed,
                    timing.squat_check_secs,
                    None,
                    &mut updates,
                );
                state.clone()
            } else {
                let outcome = evaluate_squat_check(session, config);
                log::info!(
                    "squat check {} ({:.1} deg)",
                    if outcome.passed { "passed" } else { "failed" },
                    outcome.metric_deg
                );
                session.record_audit(format!(
                    "squat check {}: {:.1} deg ({})",
                    if outcome.passed { "passed" } else { "failed" },
                    outcome.metric_deg,
                    outcome.detail
                ));
                session.squat_check = Some(outcome);
                updates.push(CalUpdate::StepCompleted {
                    step: StepId::SquatCheck,
                });

                session.record_audit("session complete");
                let artifact = assemble_artifact(session, config);
                log::info!(
                    "session complete: trust {:?}, validation score {}",
                    artifact.trust,
                    artifact.validation.overall_score
                );
                updates.push(CalUpdate::SessionComplete {
                    artifact: Box::new(artifact),
                });
                CalState::Complete
            }
        }

        CalState::Idle | CalState::Complete | CalState::Error { .. } => state.clone(),
    };

    Ok((new_state, updates))
}

fn enter_verification(
    session: &mut CalibrationSession,
    timing: &StepTiming,
    updates: &mut Vec<CalUpdate>,
) {
    session.rom_trackers.clear();
    session.buffers.clear_window();
    session.reset_step_clock();
    updates.push(step_started(StepId::Verification, timing));
}

/// Close one functional capture window: grade its timeline, run the
/// estimators over what was banked, then move to the next step.
fn finalize_functional(
    session: &mut CalibrationSession,
    config: &EngineConfig,
    def: &'static MotionDef,
    retries: u32,
    updates: &mut Vec<CalUpdate>,
) -> Result<CalState, CalError> {
    let timing = &config.timing;
    let Some(active) = session.active.take() else {
        log::warn!("{} closed without capture context", def.step_id());
        return next_capture_state(session, config, updates);
    };

    if active.pair_devices.is_some() {
        let diagnostics = session.buffers.diagnostics();
        let (tier, reasons) = classify_timeline(&diagnostics, &config.timeline);
        updates.push(CalUpdate::TimelineEvaluated {
            step: def.step_id(),
            tier,
            reasons: reasons.clone(),
        });
        session.windows.push(TimelineWindow {
            step: def.step_id(),
            tier,
            reasons: reasons.clone(),
            diagnostics,
        });
        if tier == TimelineTier::Red {
            if retries < timing.max_step_retries {
                let attempt = retries + 1;
                session.telemetry.step_retries += 1;
                let reason = reasons.join("; ");
                log::warn!("{} timeline red ({reason}), retry {attempt}", def.step_id());
                session
                    .record_audit(format!("{} retried for timeline: {reason}", def.step_id()));
                updates.push(CalUpdate::StepRetried {
                    step: def.step_id(),
                    attempt,
                    reason,
                });
                return begin_functional(session, active.step_index, def, attempt);
            }
            log::warn!("{} timeline red after retries, proceeding degraded", def.step_id());
        }
    }

    match estimate_axis(&active.pca_samples, &config.estimators) {
        Ok(estimate) => {
            log::debug!(
                "{}: axis confidence {:.2} over {} samples",
                def.step_id(),
                estimate.confidence,
                estimate.samples
            );
            if estimate.flagged_nonstationary {
                log::warn!(
                    "{}: split halves disagree, capture flagged non-stationary",
                    def.step_id()
                );
            }
            session.axis_estimates.insert(def.target_segment, estimate);
        }
        Err(err) => {
            log::warn!(
                "{}: functional axis unusable ({err}), segment will fall back",
                def.step_id()
            );
            session.record_audit(format!("{}: {err}", def.step_id()));
        }
    }

    if let Some(sara) = &active.sara {
        match sara.finalize(&config.estimators) {
            Ok(result) => {
                log::debug!(
                    "{}: hinge axis confidence {:.2} over {} frames",
                    def.step_id(),
                    result.confidence,
                    result.frames_used
                );
                session.joint_axes.insert(def.observed_joint, result);
            }
            Err(err) => log::debug!("{}: hinge axis skipped ({err})", def.step_id()),
        }
    }
    if let Some(score) = &active.score {
        match score.finalize(&config.estimators) {
            Ok(result) => {
                log::debug!(
                    "{}: joint center residual {:.4} over {} frames",
                    def.step_id(),
                    result.rms_residual,
                    result.frames
                );
                session.joint_centers.insert(def.observed_joint, result);
            }
            Err(err) => log::debug!("{}: joint center skipped ({err})", def.step_id()),
        }
    }

    if active.pair_devices.is_some() {
        let rom = session.joint_rom_deg.entry(def.observed_joint).or_insert(0.0);
        if active.joint_excursion_deg() > *rom {
            *rom = active.joint_excursion_deg();
        }
    }

    session.record_audit(format!(
        "{} complete ({} samples)",
        def.step_id(),
        active.pca_samples.len()
    ));
    updates.push(CalUpdate::StepCompleted {
        step: def.step_id(),
    });
    next_capture_state(session, config, updates)
}

/// Per-segment tare computation and quality gates, run when verification
/// closes. Everything is derived from banked evidence, so re-running after
/// a targeted retry reproduces untouched segments bit for bit.
fn finalize_session(
    session: &mut CalibrationSession,
    config: &EngineConfig,
    updates: &mut Vec<CalUpdate>,
) -> Result<CalState, CalError> {
    let Some(anchor) = session.static_anchor.clone() else {
        return Err(CalError::DataInsufficiency {
            context: "static anchor".to_string(),
            have: 0,
            need: 1,
        });
    };

    // Fallback findings are regenerated below; drop the previous round's.
    session
        .extra_issues
        .retain(|issue| issue.category != IssueCategory::Fallback);

    let mut gates = Vec::new();
    for (segment, device) in sorted_assignment(session) {
        let (Some(q_static), Some(accel_static)) = (
            anchor.orientation.get(&device).copied(),
            anchor.accel.get(&device).copied(),
        ) else {
            log::warn!("{segment}: no averaged static sample, skipped");
            continue;
        };

        let motion = motion_for_segment(session.topology, segment);
        let axis_estimate = session.axis_estimates.get(&segment).cloned();
        let hinge = motion
            .and_then(|m| session.joint_axes.get(&m.observed_joint))
            .cloned();
        let choice = select_method(
            segment,
            axis_estimate.as_ref(),
            hinge.as_ref(),
            &config.gates,
            &config.fallback,
        );
        let neutral = session.neutral_poses.get(segment);
        let stability_conf = session
            .stability_confidence
            .get(&segment)
            .copied()
            .unwrap_or(0.0);
        let gravity_conf = gravity_agreement(&q_static, &accel_static);

        let mut method = choice.method;
        let expected_axis = motion
            .map(|m| m.expected_axis_bone)
            .unwrap_or_else(Vector3::x);
        let mounting = match (method, choice.axis_sensor) {
            (TareMethod::PcaRefined | TareMethod::SaraRefined, Some(axis)) => {
                let signed = resolve_axis_sign(&axis, &expected_axis, &q_static, &neutral);
                match build_functional_tare(&signed, &expected_axis, &accel_static) {
                    Ok(mounting) => mounting,
                    Err(err) => {
                        log::warn!(
                            "{segment}: functional frame degenerate ({err}), gravity fallback"
                        );
                        session.extra_issues.push(ValidationIssue {
                            severity: IssueSeverity::Warning,
                            category: IssueCategory::Fallback,
                            segment: Some(segment),
                            message: format!(
                                "{segment}: functional frame construction failed ({err})"
                            ),
                            remediation: "repeat the motion with the limb further from vertical"
                                .to_string(),
                        });
                        method = TareMethod::GravityOnly;
                        build_gravity_tare(&accel_static)
                    }
                }
            }
            (TareMethod::Pose, _) => build_pose_tare(&q_static, &neutral),
            _ => build_gravity_tare(&accel_static),
        };

        if method == TareMethod::GravityOnly {
            let bone_down_world = neutral.rotate_vector(&BONE_DOWN);
            let tilt_deg = bone_down_world
                .dot(&WORLD_DOWN)
                .clamp(-1.0, 1.0)
                .acos()
                .to_degrees();
            let (severity, message) = if tilt_deg <= config.fallback.small_tilt_deg {
                (
                    IssueSeverity::Info,
                    format!(
                        "{segment}: gravity-only tare; heading about gravity is taken from \
                         the declared neutral (tilt {tilt_deg:.0} deg), not measured"
                    ),
                )
            } else {
                (
                    IssueSeverity::Warning,
                    format!(
                        "{segment}: gravity-only tare is weakly constrained; the declared \
                         neutral leans {tilt_deg:.0} deg off vertical"
                    ),
                )
            };
            session.extra_issues.push(ValidationIssue {
                severity,
                category: IssueCategory::Fallback,
                segment: Some(segment),
                message,
                remediation: "guide a functional motion for this segment or enable the pose \
                              method"
                    .to_string(),
            });
        }

        let heading = build_heading_tare(&neutral, &mounting, &q_static);
        let quality = quality_score(
            method,
            choice.axis_confidence,
            stability_conf,
            gravity_conf,
            &config.fallback,
        );
        let result = CalibrationResult {
            segment,
            device,
            mounting_tare: mounting,
            heading_tare: heading,
            quality,
            method,
            axis_confidence: choice.axis_confidence,
            stability_confidence: stability_conf,
            gravity_confidence: gravity_conf,
            timestamp_sec: anchor.t_sec,
        };

        let rom = session.rom_trackers.get(&segment).map(|t| t.summary());
        let motion_proven = match method {
            TareMethod::SaraRefined => true,
            TareMethod::PcaRefined => axis_estimate
                .as_ref()
                .map_or(false, |e| !e.flagged_nonstationary),
            _ => false,
        };
        let gate = evaluate_segment_gate(
            &result,
            rom.as_ref(),
            motion.is_some(),
            motion_proven,
            &config.gates,
        );
        if gate.status == GateStatus::RetryRequired {
            session.telemetry.gate_failures += 1;
            log::warn!(
                "gate failed for {segment}: {}",
                gate.reason.as_deref().unwrap_or("unspecified")
            );
        }

        log::info!(
            "{segment} calibrated: method {method}, quality {quality}, axis {:.2}",
            choice.axis_confidence
        );
        updates.push(CalUpdate::SegmentCalibrated {
            segment,
            quality,
            method,
        });
        session.calibrations.insert(segment, result);
        gates.push(gate);
    }

    let passed = gates.iter().filter(|g| g.status == GateStatus::Pass).count();
    let failed = gates.len() - passed;
    let plan = build_retry_plan(&gates);
    session.pending_retry = plan.clone();
    session.gate_results = gates;
    session.record_audit(format!("gates evaluated: {passed} passed, {failed} failed"));
    log::info!("gates evaluated: {passed} passed, {failed} failed");
    updates.push(CalUpdate::GatesEvaluated {
        passed,
        failed,
        retry: plan,
    });

    begin_pose_hold(session);
    updates.push(step_started(StepId::PoseCheck, &config.timing));
    Ok(CalState::PoseCheck)
}

/// Mean held orientation per segment against its declared neutral.
fn evaluate_pose_check(session: &CalibrationSession, config: &EngineConfig) -> CheckOutcome {
    let mut worst: Option<(SegmentId, f64)> = None;
    let mut missing: Vec<String> = Vec::new();

    for (segment, device) in sorted_assignment(session) {
        let Some(result) = session.calibrations.get(&segment) else {
            continue;
        };
        let samples = session
            .pose_samples
            .get(&device)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        if samples.is_empty() {
            missing.push(segment.to_string());
            continue;
        }
        let mean = mean_orientation(samples);
        let deviation = result
            .calibrated(&mean)
            .angle_to(&session.neutral_poses.get(segment))
            .to_degrees();
        if worst.map_or(true, |(_, w)| deviation > w) {
            worst = Some((segment, deviation));
        }
    }

    match (worst, missing.is_empty()) {
        (Some((segment, deviation)), true) => CheckOutcome {
            name: "pose check".to_string(),
            passed: deviation <= config.gates.pose_check_max_dev_deg,
            metric_deg: deviation,
            detail: format!("worst segment {segment}"),
        },
        (Some((_, deviation)), false) => CheckOutcome {
            name: "pose check".to_string(),
            passed: false,
            metric_deg: deviation,
            detail: format!("no samples from {}", missing.join(", ")),
        },
        (None, _) => CheckOutcome {
            name: "pose check".to_string(),
            passed: false,
            metric_deg: 0.0,
            detail: "no samples captured".to_string(),
        },
    }
}

/// Knee flexion range where a thigh/shank pair exists, trunk lean range
/// otherwise.
fn evaluate_squat_check(session: &CalibrationSession, config: &EngineConfig) -> CheckOutcome {
    let left = &session.squat_knee_left;
    let right = &session.squat_knee_right;
    if left.observed() || right.observed() {
        let best = left.range_deg().max(right.range_deg());
        return CheckOutcome {
            name: "squat check".to_string(),
            passed: best >= config.gates.squat_min_flexion_deg,
            metric_deg: best,
            detail: format!(
                "knee flexion range left {:.0} deg, right {:.0} deg",
                left.range_deg(),
                right.range_deg()
            ),
        };
    }
    if let Some(trunk) = &session.squat_trunk {
        let range = trunk.summary().total_deg;
        return CheckOutcome {
            name: "squat check".to_string(),
            passed: range >= config.gates.trunk_min_range_deg,
            metric_deg: range,
            detail: "no knee pair assigned, trunk lean range used".to_string(),
        };
    }
    CheckOutcome {
        name: "squat check".to_string(),
        passed: false,
        metric_deg: 0.0,
        detail: "no knee or trunk data captured".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lower_body_assignment() -> SensorAssignment {
        let mut assignment = SensorAssignment::new();
        for (index, segment) in Topology::LowerBody.segments().iter().enumerate() {
            assignment.assign(*segment, DeviceId(index as u16 + 1));
        }
        assignment
    }

    fn started_engine() -> CalibrationEngine {
        let mut engine = CalibrationEngine::new(EngineConfig::default()).unwrap();
        engine
            .process_event(CalEvent::Start {
                topology: Topology::LowerBody,
                assignment: lower_body_assignment(),
                neutral_poses: NeutralPoseLookup::new(),
            })
            .unwrap();
        engine
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = EngineConfig::default();
        config.buffer_capacity = 0;
        assert!(matches!(
            CalibrationEngine::new(config),
            Err(CalError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_callback_registration_and_deregistration() {
        let engine = CalibrationEngine::new(EngineConfig::default()).unwrap();
        assert_eq!(engine.callback_count(), 0);

        let id_a = engine.register_callback(|_| {});
        let id_b = engine.register_callback(|_| {});
        assert_ne!(id_a, id_b);
        assert_eq!(engine.callback_count(), 2);

        assert!(engine.deregister_callback(id_a));
        assert!(!engine.deregister_callback(id_a));
        assert_eq!(engine.callback_count(), 1);
    }

    #[test]
    fn test_start_validates_assignment() {
        let mut engine = CalibrationEngine::new(EngineConfig::default()).unwrap();
        let mut assignment = SensorAssignment::new();
        assignment.assign(SegmentId::Pelvis, DeviceId(1));

        let err = engine
            .process_event(CalEvent::Start {
                topology: Topology::LowerBody,
                assignment,
                neutral_poses: NeutralPoseLookup::new(),
            })
            .unwrap_err();
        assert!(matches!(err, CalError::AssignmentInvalid { .. }));
        assert_eq!(engine.state(), &CalState::Idle);
    }

    #[test]
    fn test_passive_events_ignored_outside_sessions() {
        let mut engine = CalibrationEngine::new(EngineConfig::default()).unwrap();
        let sample = SensorSample::from_parts(
            [0.0; 3],
            [0.0, -9.81, 0.0],
            [1.0, 0.0, 0.0, 0.0],
            1.0,
        );
        let updates = engine
            .process_event(CalEvent::Sample {
                device: DeviceId(1),
                sample,
            })
            .unwrap();
        assert!(updates.is_empty());
        assert_eq!(engine.state(), &CalState::Idle);
    }

    #[test]
    fn test_retry_regions_needs_a_finished_session() {
        let mut engine = CalibrationEngine::new(EngineConfig::default()).unwrap();
        let plan = RetryPlan {
            regions: vec![BodyRegion::LeftLeg],
            reasons: vec![],
        };
        assert!(matches!(
            engine.process_event(CalEvent::RetryRegions { plan: plan.clone() }),
            Err(CalError::SessionInactive)
        ));

        let mut engine = started_engine();
        assert!(matches!(
            engine.process_event(CalEvent::RetryRegions { plan }),
            Err(CalError::InvalidTransition { .. })
        ));
        assert_eq!(engine.state().name(), "WarmUp");
    }

    #[test]
    fn test_cancel_returns_to_idle() {
        let mut engine = started_engine();
        let updates = engine.process_event(CalEvent::Cancel).unwrap();
        assert!(matches!(updates[0], CalUpdate::SessionCancelled));
        assert_eq!(engine.state(), &CalState::Idle);
        assert!(engine.qc_artifact().is_none());
    }

    #[test]
    fn test_device_loss_is_a_hard_failure() {
        let mut engine = started_engine();
        let err = engine
            .process_event(CalEvent::DeviceLost { device: DeviceId(3) })
            .unwrap_err();
        assert!(matches!(err, CalError::DeviceLoss { .. }));
        match engine.state() {
            CalState::Error { category, message } => {
                assert_eq!(*category, FailureCategory::DeviceLoss);
                assert!(message.contains("dev003"));
            }
            other => panic!("expected Error state, got {other}"),
        }
        // Partial artifact remains inspectable after the failure.
        assert!(engine.qc_artifact().is_some());
    }

    #[test]
    fn test_warm_up_advances_on_engine_clock() {
        let mut engine = started_engine();
        engine.process_event(CalEvent::Tick { now_sec: 100.0 }).unwrap();
        assert_eq!(engine.state().name(), "WarmUp");

        let updates = engine.process_event(CalEvent::Tick { now_sec: 105.5 }).unwrap();
        assert_eq!(engine.state().name(), "StaticPose");
        assert!(updates
            .iter()
            .any(|u| matches!(u, CalUpdate::StepCompleted { step: StepId::WarmUp })));
        assert!(updates.iter().any(|u| matches!(
            u,
            CalUpdate::StepStarted {
                step: StepId::StaticPose,
                ..
            }
        )));
    }

    #[test]
    fn test_unassigned_samples_are_ignored() {
        let mut engine = started_engine();
        let sample = SensorSample::from_parts(
            [0.0; 3],
            [0.0, -9.81, 0.0],
            [1.0, 0.0, 0.0, 0.0],
            50.0,
        );
        engine
            .process_event(CalEvent::Sample {
                device: DeviceId(99),
                sample,
            })
            .unwrap();
        // The unassigned sample must not advance the engine clock.
        engine.process_event(CalEvent::Tick { now_sec: 1.0 }).unwrap();
        engine.process_event(CalEvent::Tick { now_sec: 4.0 }).unwrap();
        assert_eq!(engine.state().name(), "WarmUp");
    }
}
