//! Gate-failure and targeted-retry flows over the synthetic rig.
//!
//! A weakly performed functional step must degrade that segment to the
//! gravity-only fallback, fail its gate, and produce a retry plan scoped
//! to the affected body region. Replaying just that region must recover
//! the segment without disturbing any other.

mod common;

use capture::{BodyRegion, SegmentId};
use common::{BodyRig, SessionDriver};
use mortise::gating::GateStatus;
use mortise::tare::TareMethod;
use mortise::{CalEvent, CalState, CalUpdate, CalibrationEngine, EngineConfig, TrustLevel};
use test_helpers::{collect_updates, count_updates, init_logging, upright_neutral};

fn start_session(engine: &mut CalibrationEngine, rig: &BodyRig) {
    engine
        .process_event(CalEvent::Start {
            topology: rig.topology,
            assignment: rig.assignment.clone(),
            neutral_poses: upright_neutral(),
        })
        .expect("session start rejected");
}

fn shank_json(artifact: &mortise::QcArtifact, segment: SegmentId) -> String {
    let result = artifact
        .segments
        .iter()
        .find(|r| r.segment == segment)
        .unwrap_or_else(|| panic!("no calibration result for {segment}"));
    serde_json::to_string(result).expect("serialize")
}

#[test]
fn test_weak_motion_degrades_then_targeted_retry_recovers() {
    init_logging();
    let rig = BodyRig::lower_body(11);
    let mut engine = CalibrationEngine::new(EngineConfig::default()).expect("default config");
    let updates = collect_updates(&engine);
    start_session(&mut engine, &rig);

    let mut driver = SessionDriver::new(rig);

    // === Round 1: the left knee flexion is barely performed ===
    driver.weak.insert(SegmentId::ShankLeft);
    driver.run_until(&mut engine, 200.0, |s| matches!(s, CalState::Complete));

    let first = engine.qc_artifact().expect("artifact after round 1");
    let shank = first
        .segments
        .iter()
        .find(|r| r.segment == SegmentId::ShankLeft)
        .expect("left shank calibrated");
    assert_eq!(shank.method, TareMethod::GravityOnly);

    let gate = first
        .gates
        .iter()
        .find(|g| g.segment == SegmentId::ShankLeft)
        .expect("left shank gated");
    assert_eq!(gate.status, GateStatus::RetryRequired);
    let reason = gate.reason.as_deref().expect("failed gate carries a reason");
    assert!(reason.contains("degraded"), "{reason}");

    let plan = first.retry.clone().expect("targeted retry plan");
    assert_eq!(plan.regions, vec![BodyRegion::LeftLeg]);
    assert_ne!(first.trust, TrustLevel::Full);
    assert_eq!(first.telemetry.gate_failures, 1);

    // The step stretched itself to its budget before giving up.
    assert!(count_updates(&updates, |u| matches!(u, CalUpdate::StepExtended { .. })) >= 1);

    let right_before = shank_json(&first, SegmentId::ShankRight);

    // === Round 2: the left-leg steps are replayed, this time properly ===
    driver.weak.clear();
    engine
        .process_event(CalEvent::RetryRegions { plan })
        .expect("retry request refused");
    assert!(
        matches!(engine.state(), CalState::Functional { .. }),
        "retry should resume at the first left-leg step, got {}",
        engine.state()
    );

    driver.run_until(&mut engine, 120.0, |s| matches!(s, CalState::Complete));

    let second = engine.qc_artifact().expect("artifact after round 2");
    let shank = second
        .segments
        .iter()
        .find(|r| r.segment == SegmentId::ShankLeft)
        .expect("left shank recalibrated");
    assert!(
        matches!(
            shank.method,
            TareMethod::PcaRefined | TareMethod::SaraRefined
        ),
        "method after retry: {}",
        shank.method
    );
    assert!(shank.quality > 80, "quality after retry: {}", shank.quality);
    assert!(second.gates.iter().all(|g| g.status == GateStatus::Pass));
    assert!(second.retry.is_none());
    assert_eq!(second.trust, TrustLevel::Full);

    // Capture windows accumulate across rounds: six from the first pass,
    // three from the replayed left-leg steps.
    assert_eq!(second.timeline.windows.len(), 9);

    // Segments outside the retried region reproduce bit for bit: same
    // anchor, same estimates, same tares.
    let right_after = shank_json(&second, SegmentId::ShankRight);
    assert_eq!(right_before, right_after);

    assert_eq!(
        count_updates(&updates, |u| matches!(u, CalUpdate::SessionComplete { .. })),
        2
    );
}

#[test]
fn test_retry_rounds_are_bounded() {
    init_logging();
    let mut config = EngineConfig::default();
    config.timing.max_retry_rounds = 0;

    let rig = BodyRig::lower_body(13);
    let mut engine = CalibrationEngine::new(config).expect("config");
    start_session(&mut engine, &rig);

    let mut driver = SessionDriver::new(rig);
    driver.weak.insert(SegmentId::FootRight);
    driver.run_until(&mut engine, 200.0, |s| matches!(s, CalState::Complete));

    let artifact = engine.qc_artifact().expect("artifact");
    let plan = artifact.retry.clone().expect("plan for the failed foot");
    assert_eq!(plan.regions, vec![BodyRegion::RightLeg]);

    // The round budget is already spent: the request is refused without
    // disturbing the finished session.
    let updates = engine
        .process_event(CalEvent::RetryRegions { plan })
        .expect("an exhausted budget is not an error");
    assert!(updates.is_empty());
    assert_eq!(engine.state().name(), "Complete");
    assert!(engine.qc_artifact().expect("artifact survives").retry.is_some());
}
