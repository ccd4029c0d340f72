//! Sample model, body topology and per-device stream buffering.
//!
//! This crate owns everything upstream of the calibration estimators: the
//! immutable sensor sample type, the body model (segments, joints,
//! topologies, device assignment), bounded per-channel ring buffers and the
//! cross-device timeline alignment that reconstructs joint frames at a
//! common timestamp.

pub mod body;
pub mod ring_buffer;
pub mod sample;
pub mod stream;

pub use crate::body::{
    joint_definition, joint_driving, BodyRegion, JointId, JointPairDefinition, JointType,
    NeutralPoseLookup, SegmentId, SensorAssignment, Side, Topology,
};
pub use crate::ring_buffer::RingBuffer;
pub use crate::sample::{DeviceId, SensorSample};
pub use crate::stream::{
    AlignedJointFrame, Channel, DeviceState, SensorStreamBuffers, Stamped, TimelineDiagnostics,
};
