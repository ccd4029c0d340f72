//! Static step tables: which functional motions each topology runs, in
//! which order, and what each motion is expected to reveal.

use capture::{JointId, SegmentId, Side, Topology};
use nalgebra::Vector3;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::StepTiming;

/// Functional motions the engine can guide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Motion {
    TrunkLean,
    HipSwing,
    KneeFlexion,
    AnkleFlexion,
    ShoulderSwing,
    ElbowFlexion,
}

impl fmt::Display for Motion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Motion::TrunkLean => "trunk lean",
            Motion::HipSwing => "hip swing",
            Motion::KneeFlexion => "knee flexion",
            Motion::AnkleFlexion => "ankle flexion",
            Motion::ShoulderSwing => "shoulder swing",
            Motion::ElbowFlexion => "elbow flexion",
        };
        f.write_str(name)
    }
}

/// Identity of a step within a session, stable across retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepId {
    WarmUp,
    StaticPose,
    Functional { motion: Motion, side: Option<Side> },
    FinalPose,
    Verification,
    PoseCheck,
    SquatCheck,
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepId::WarmUp => write!(f, "warm-up"),
            StepId::StaticPose => write!(f, "static pose"),
            StepId::Functional {
                motion,
                side: Some(side),
            } => write!(f, "{motion} ({side})"),
            StepId::Functional { motion, side: None } => write!(f, "{motion}"),
            StepId::FinalPose => write!(f, "final pose"),
            StepId::Verification => write!(f, "verification"),
            StepId::PoseCheck => write!(f, "pose check"),
            StepId::SquatCheck => write!(f, "squat check"),
        }
    }
}

/// One functional motion: what the subject does, which segment it isolates,
/// which joint the paired estimators observe, and the bone axis the motion
/// should reveal.
#[derive(Debug, Clone)]
pub struct MotionDef {
    pub motion: Motion,
    pub side: Option<Side>,
    /// Segment whose functional axis this motion estimates
    pub target_segment: SegmentId,
    /// Joint watched by the hinge-axis and joint-center estimators
    pub observed_joint: JointId,
    /// Bone-frame direction the motion axis corresponds to
    pub expected_axis_bone: Vector3<f64>,
    pub prompt: &'static str,
    /// Planned capture duration, seconds
    pub base_secs: f64,
    /// Total self-extension allowed on top of the base duration, seconds
    pub max_extension_secs: f64,
}

impl MotionDef {
    pub fn step_id(&self) -> StepId {
        StepId::Functional {
            motion: self.motion,
            side: self.side,
        }
    }
}

const MEDIOLATERAL: [f64; 3] = [1.0, 0.0, 0.0];
const ANTERIOR: [f64; 3] = [0.0, 0.0, 1.0];

fn motion(
    motion: Motion,
    side: Option<Side>,
    target_segment: SegmentId,
    observed_joint: JointId,
    axis: [f64; 3],
    prompt: &'static str,
) -> MotionDef {
    MotionDef {
        motion,
        side,
        target_segment,
        observed_joint,
        expected_axis_bone: Vector3::new(axis[0], axis[1], axis[2]),
        prompt,
        base_secs: 10.0,
        max_extension_secs: 10.0,
    }
}

static LOWER_BODY_MOTIONS: Lazy<Vec<MotionDef>> = Lazy::new(|| {
    vec![
        motion(
            Motion::HipSwing,
            Some(Side::Left),
            SegmentId::ThighLeft,
            JointId::HipLeft,
            MEDIOLATERAL,
            "swing your left leg forward and back from the hip",
        ),
        motion(
            Motion::HipSwing,
            Some(Side::Right),
            SegmentId::ThighRight,
            JointId::HipRight,
            MEDIOLATERAL,
            "swing your right leg forward and back from the hip",
        ),
        motion(
            Motion::KneeFlexion,
            Some(Side::Left),
            SegmentId::ShankLeft,
            JointId::KneeLeft,
            MEDIOLATERAL,
            "bend and straighten your left knee",
        ),
        motion(
            Motion::KneeFlexion,
            Some(Side::Right),
            SegmentId::ShankRight,
            JointId::KneeRight,
            MEDIOLATERAL,
            "bend and straighten your right knee",
        ),
        motion(
            Motion::AnkleFlexion,
            Some(Side::Left),
            SegmentId::FootLeft,
            JointId::AnkleLeft,
            MEDIOLATERAL,
            "point and flex your left foot",
        ),
        motion(
            Motion::AnkleFlexion,
            Some(Side::Right),
            SegmentId::FootRight,
            JointId::AnkleRight,
            MEDIOLATERAL,
            "point and flex your right foot",
        ),
    ]
});

static UPPER_BODY_MOTIONS: Lazy<Vec<MotionDef>> = Lazy::new(|| {
    vec![
        motion(
            Motion::TrunkLean,
            None,
            SegmentId::Chest,
            JointId::Spine,
            ANTERIOR,
            "lean your trunk gently side to side",
        ),
        motion(
            Motion::ShoulderSwing,
            Some(Side::Left),
            SegmentId::UpperArmLeft,
            JointId::ShoulderLeft,
            MEDIOLATERAL,
            "swing your left arm forward and back",
        ),
        motion(
            Motion::ShoulderSwing,
            Some(Side::Right),
            SegmentId::UpperArmRight,
            JointId::ShoulderRight,
            MEDIOLATERAL,
            "swing your right arm forward and back",
        ),
        motion(
            Motion::ElbowFlexion,
            Some(Side::Left),
            SegmentId::ForearmLeft,
            JointId::ElbowLeft,
            MEDIOLATERAL,
            "bend and straighten your left elbow",
        ),
        motion(
            Motion::ElbowFlexion,
            Some(Side::Right),
            SegmentId::ForearmRight,
            JointId::ElbowRight,
            MEDIOLATERAL,
            "bend and straighten your right elbow",
        ),
    ]
});

static FULL_BODY_MOTIONS: Lazy<Vec<MotionDef>> = Lazy::new(|| {
    let mut all = UPPER_BODY_MOTIONS[..1].to_vec();
    all.extend(LOWER_BODY_MOTIONS.iter().cloned());
    all.extend(UPPER_BODY_MOTIONS[1..].iter().cloned());
    all
});

/// Ordered functional motions for a topology.
pub fn motion_steps(topology: Topology) -> &'static [MotionDef] {
    match topology {
        Topology::FullBody => &FULL_BODY_MOTIONS,
        Topology::LowerBody => &LOWER_BODY_MOTIONS,
        Topology::UpperBody => &UPPER_BODY_MOTIONS,
    }
}

/// The motion step targeting a segment, if the topology has one. Segments
/// without a functional step (the pelvis) calibrate through the fallback
/// path.
pub fn motion_for_segment(topology: Topology, segment: SegmentId) -> Option<&'static MotionDef> {
    motion_steps(topology)
        .iter()
        .find(|m| m.target_segment == segment)
}

/// Prompt text for the non-functional steps.
pub fn step_prompt(step: StepId) -> &'static str {
    match step {
        StepId::WarmUp => "move gently in place while the sensors connect",
        StepId::StaticPose => "stand still in a neutral upright pose",
        StepId::Functional { .. } => "",
        StepId::FinalPose => "return to the neutral upright pose and hold still",
        StepId::Verification => "move each limb gently through a small range",
        StepId::PoseCheck => "match the guided neutral pose and hold",
        StepId::SquatCheck => "perform one slow squat and stand back up",
    }
}

/// Planned duration of a non-functional step.
pub fn step_planned_secs(step: StepId, timing: &StepTiming) -> f64 {
    match step {
        StepId::WarmUp => timing.warm_up_secs,
        StepId::StaticPose => timing.static_pose_secs,
        StepId::Functional { .. } => 0.0,
        StepId::FinalPose => timing.final_pose_secs,
        StepId::Verification => timing.verification_secs,
        StepId::PoseCheck => timing.pose_check_secs,
        StepId::SquatCheck => timing.squat_check_secs,
    }
}
