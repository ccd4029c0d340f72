//! Body model: segments, joints, topologies and the device assignment.
//!
//! The joint table is static and never mutated at runtime. Joint typing
//! (hinge vs ball) lives here so estimator code can refuse structurally
//! meaningless requests instead of detecting them numerically.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tare_math::Quaternion;
use thiserror::Error;

use crate::sample::DeviceId;

/// Body side for paired segments and joints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}

/// Logical body segment a sensor is strapped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SegmentId {
    Pelvis,
    Chest,
    UpperArmLeft,
    UpperArmRight,
    ForearmLeft,
    ForearmRight,
    ThighLeft,
    ThighRight,
    ShankLeft,
    ShankRight,
    FootLeft,
    FootRight,
}

impl SegmentId {
    pub const ALL: [SegmentId; 12] = [
        SegmentId::Pelvis,
        SegmentId::Chest,
        SegmentId::UpperArmLeft,
        SegmentId::UpperArmRight,
        SegmentId::ForearmLeft,
        SegmentId::ForearmRight,
        SegmentId::ThighLeft,
        SegmentId::ThighRight,
        SegmentId::ShankLeft,
        SegmentId::ShankRight,
        SegmentId::FootLeft,
        SegmentId::FootRight,
    ];

    /// Side of a paired segment; `None` for midline segments.
    pub fn side(&self) -> Option<Side> {
        use SegmentId::*;
        match self {
            Pelvis | Chest => None,
            UpperArmLeft | ForearmLeft | ThighLeft | ShankLeft | FootLeft => Some(Side::Left),
            UpperArmRight | ForearmRight | ThighRight | ShankRight | FootRight => Some(Side::Right),
        }
    }

    /// Contralateral counterpart; `None` for midline segments.
    pub fn mirror(&self) -> Option<SegmentId> {
        use SegmentId::*;
        match self {
            Pelvis | Chest => None,
            UpperArmLeft => Some(UpperArmRight),
            UpperArmRight => Some(UpperArmLeft),
            ForearmLeft => Some(ForearmRight),
            ForearmRight => Some(ForearmLeft),
            ThighLeft => Some(ThighRight),
            ThighRight => Some(ThighLeft),
            ShankLeft => Some(ShankRight),
            ShankRight => Some(ShankLeft),
            FootLeft => Some(FootRight),
            FootRight => Some(FootLeft),
        }
    }

    /// True when the segment hangs off a ball-and-socket joint. Functional
    /// motion on these segments excites more than one axis, so axis
    /// confidence thresholds are stricter.
    pub fn is_ball_driven(&self) -> bool {
        matches!(
            joint_driving(*self),
            Some(def) if def.joint_type == JointType::Ball
        )
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use SegmentId::*;
        let name = match self {
            Pelvis => "pelvis",
            Chest => "chest",
            UpperArmLeft => "left upper arm",
            UpperArmRight => "right upper arm",
            ForearmLeft => "left forearm",
            ForearmRight => "right forearm",
            ThighLeft => "left thigh",
            ThighRight => "right thigh",
            ShankLeft => "left shank",
            ShankRight => "right shank",
            FootLeft => "left foot",
            FootRight => "right foot",
        };
        write!(f, "{name}")
    }
}

/// Mechanical joint class. Only hinges have a single dominant rotation axis;
/// ball joints must never reach the hinge-axis estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JointType {
    Hinge,
    Ball,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JointId {
    Spine,
    ShoulderLeft,
    ShoulderRight,
    ElbowLeft,
    ElbowRight,
    HipLeft,
    HipRight,
    KneeLeft,
    KneeRight,
    AnkleLeft,
    AnkleRight,
}

impl JointId {
    pub const ALL: [JointId; 11] = [
        JointId::Spine,
        JointId::ShoulderLeft,
        JointId::ShoulderRight,
        JointId::ElbowLeft,
        JointId::ElbowRight,
        JointId::HipLeft,
        JointId::HipRight,
        JointId::KneeLeft,
        JointId::KneeRight,
        JointId::AnkleLeft,
        JointId::AnkleRight,
    ];
}

impl fmt::Display for JointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use JointId::*;
        let name = match self {
            Spine => "spine",
            ShoulderLeft => "left shoulder",
            ShoulderRight => "right shoulder",
            ElbowLeft => "left elbow",
            ElbowRight => "right elbow",
            HipLeft => "left hip",
            HipRight => "right hip",
            KneeLeft => "left knee",
            KneeRight => "right knee",
            AnkleLeft => "left ankle",
            AnkleRight => "right ankle",
        };
        write!(f, "{name}")
    }
}

/// Static description of one joint: which segments it connects, its
/// mechanical class, and the anatomical range-of-motion bound used by the
/// post-calibration validator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointPairDefinition {
    pub joint: JointId,
    pub proximal: SegmentId,
    pub distal: SegmentId,
    pub joint_type: JointType,
    /// Maximum plausible relative angle between the segments, degrees.
    pub rom_max_deg: f64,
}

pub const JOINT_DEFINITIONS: [JointPairDefinition; 11] = [
    JointPairDefinition {
        joint: JointId::Spine,
        proximal: SegmentId::Pelvis,
        distal: SegmentId::Chest,
        joint_type: JointType::Ball,
        rom_max_deg: 75.0,
    },
    JointPairDefinition {
        joint: JointId::ShoulderLeft,
        proximal: SegmentId::Chest,
        distal: SegmentId::UpperArmLeft,
        joint_type: JointType::Ball,
        rom_max_deg: 180.0,
    },
    JointPairDefinition {
        joint: JointId::ShoulderRight,
        proximal: SegmentId::Chest,
        distal: SegmentId::UpperArmRight,
        joint_type: JointType::Ball,
        rom_max_deg: 180.0,
    },
    JointPairDefinition {
        joint: JointId::ElbowLeft,
        proximal: SegmentId::UpperArmLeft,
        distal: SegmentId::ForearmLeft,
        joint_type: JointType::Hinge,
        rom_max_deg: 150.0,
    },
    JointPairDefinition {
        joint: JointId::ElbowRight,
        proximal: SegmentId::UpperArmRight,
        distal: SegmentId::ForearmRight,
        joint_type: JointType::Hinge,
        rom_max_deg: 150.0,
    },
    JointPairDefinition {
        joint: JointId::HipLeft,
        proximal: SegmentId::Pelvis,
        distal: SegmentId::ThighLeft,
        joint_type: JointType::Ball,
        rom_max_deg: 130.0,
    },
    JointPairDefinition {
        joint: JointId::HipRight,
        proximal: SegmentId::Pelvis,
        distal: SegmentId::ThighRight,
        joint_type: JointType::Ball,
        rom_max_deg: 130.0,
    },
    JointPairDefinition {
        joint: JointId::KneeLeft,
        proximal: SegmentId::ThighLeft,
        distal: SegmentId::ShankLeft,
        joint_type: JointType::Hinge,
        rom_max_deg: 160.0,
    },
    JointPairDefinition {
        joint: JointId::KneeRight,
        proximal: SegmentId::ThighRight,
        distal: SegmentId::ShankRight,
        joint_type: JointType::Hinge,
        rom_max_deg: 160.0,
    },
    JointPairDefinition {
        joint: JointId::AnkleLeft,
        proximal: SegmentId::ShankLeft,
        distal: SegmentId::FootLeft,
        joint_type: JointType::Hinge,
        rom_max_deg: 70.0,
    },
    JointPairDefinition {
        joint: JointId::AnkleRight,
        proximal: SegmentId::ShankRight,
        distal: SegmentId::FootRight,
        joint_type: JointType::Hinge,
        rom_max_deg: 70.0,
    },
];

static JOINT_BY_DISTAL: Lazy<HashMap<SegmentId, &'static JointPairDefinition>> = Lazy::new(|| {
    JOINT_DEFINITIONS
        .iter()
        .map(|def| (def.distal, def))
        .collect()
});

static JOINT_BY_ID: Lazy<HashMap<JointId, &'static JointPairDefinition>> =
    Lazy::new(|| JOINT_DEFINITIONS.iter().map(|def| (def.joint, def)).collect());

/// Definition of the joint whose distal segment is `segment`, i.e. the joint
/// this segment rotates about. `None` for the kinematic root (pelvis).
pub fn joint_driving(segment: SegmentId) -> Option<&'static JointPairDefinition> {
    JOINT_BY_DISTAL.get(&segment).copied()
}

/// Definition for a joint id. The table covers every id.
pub fn joint_definition(joint: JointId) -> &'static JointPairDefinition {
    JOINT_BY_ID[&joint]
}

/// Arrangement of active sensors on the body. Selects the calibration step
/// sequence and the set of segments that must carry a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topology {
    FullBody,
    LowerBody,
    UpperBody,
}

const LOWER_BODY_SEGMENTS: [SegmentId; 7] = [
    SegmentId::Pelvis,
    SegmentId::ThighLeft,
    SegmentId::ThighRight,
    SegmentId::ShankLeft,
    SegmentId::ShankRight,
    SegmentId::FootLeft,
    SegmentId::FootRight,
];

const UPPER_BODY_SEGMENTS: [SegmentId; 5] = [
    SegmentId::Chest,
    SegmentId::UpperArmLeft,
    SegmentId::UpperArmRight,
    SegmentId::ForearmLeft,
    SegmentId::ForearmRight,
];

impl Topology {
    /// Segments that must carry a device under this topology.
    pub fn segments(&self) -> &'static [SegmentId] {
        match self {
            Topology::FullBody => &SegmentId::ALL,
            Topology::LowerBody => &LOWER_BODY_SEGMENTS,
            Topology::UpperBody => &UPPER_BODY_SEGMENTS,
        }
    }

    pub fn contains(&self, segment: SegmentId) -> bool {
        self.segments().contains(&segment)
    }

    /// Joint definitions with both endpoints inside this topology.
    pub fn joints(&self) -> Vec<&'static JointPairDefinition> {
        JOINT_DEFINITIONS
            .iter()
            .filter(|def| self.contains(def.proximal) && self.contains(def.distal))
            .collect()
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topology::FullBody => write!(f, "full body"),
            Topology::LowerBody => write!(f, "lower body"),
            Topology::UpperBody => write!(f, "upper body"),
        }
    }
}

/// Coarse body region used to target retry captures at failed segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BodyRegion {
    Torso,
    LeftArm,
    RightArm,
    LeftLeg,
    RightLeg,
}

impl BodyRegion {
    pub fn of_segment(segment: SegmentId) -> BodyRegion {
        use SegmentId::*;
        match segment {
            Pelvis | Chest => BodyRegion::Torso,
            UpperArmLeft | ForearmLeft => BodyRegion::LeftArm,
            UpperArmRight | ForearmRight => BodyRegion::RightArm,
            ThighLeft | ShankLeft | FootLeft => BodyRegion::LeftLeg,
            ThighRight | ShankRight | FootRight => BodyRegion::RightLeg,
        }
    }
}

impl fmt::Display for BodyRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyRegion::Torso => write!(f, "torso"),
            BodyRegion::LeftArm => write!(f, "left arm"),
            BodyRegion::RightArm => write!(f, "right arm"),
            BodyRegion::LeftLeg => write!(f, "left leg"),
            BodyRegion::RightLeg => write!(f, "right leg"),
        }
    }
}

/// Declared neutral world orientation per segment. Segments without an entry
/// default to identity (upright N-pose).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NeutralPoseLookup {
    poses: HashMap<SegmentId, Quaternion>,
}

impl NeutralPoseLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, segment: SegmentId, pose: Quaternion) {
        self.poses.insert(segment, pose.normalize());
    }

    pub fn get(&self, segment: SegmentId) -> Quaternion {
        self.poses
            .get(&segment)
            .copied()
            .unwrap_or_else(Quaternion::identity)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum AssignmentError {
    #[error("segment {0} has no device assigned")]
    MissingSegment(SegmentId),
    #[error("device {0} is assigned to more than one segment")]
    DuplicateDevice(DeviceId),
    #[error("segment {segment} is not part of the {topology} topology")]
    SegmentOutsideTopology {
        segment: SegmentId,
        topology: Topology,
    },
}

/// External device-to-segment binding. At most one device per segment and at
/// most one segment per device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SensorAssignment {
    by_segment: HashMap<SegmentId, DeviceId>,
}

impl SensorAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a device to a segment, replacing any previous binding for that
    /// segment.
    pub fn assign(&mut self, segment: SegmentId, device: DeviceId) {
        self.by_segment.insert(segment, device);
    }

    pub fn device_for(&self, segment: SegmentId) -> Option<DeviceId> {
        self.by_segment.get(&segment).copied()
    }

    pub fn segment_for(&self, device: DeviceId) -> Option<SegmentId> {
        self.by_segment
            .iter()
            .find(|(_, d)| **d == device)
            .map(|(s, _)| *s)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SegmentId, DeviceId)> + '_ {
        self.by_segment.iter().map(|(s, d)| (*s, *d))
    }

    pub fn len(&self) -> usize {
        self.by_segment.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_segment.is_empty()
    }

    /// Check the assignment covers the topology exactly: every topology
    /// segment has a device, no device appears twice, no bindings outside
    /// the topology.
    pub fn validate(&self, topology: Topology) -> Result<(), AssignmentError> {
        for segment in topology.segments() {
            if !self.by_segment.contains_key(segment) {
                return Err(AssignmentError::MissingSegment(*segment));
            }
        }

        let mut seen = HashSet::new();
        for (segment, device) in &self.by_segment {
            if !topology.contains(*segment) {
                return Err(AssignmentError::SegmentOutsideTopology {
                    segment: *segment,
                    topology,
                });
            }
            if !seen.insert(*device) {
                return Err(AssignmentError::DuplicateDevice(*device));
            }
        }
        Ok(())
    }
}
