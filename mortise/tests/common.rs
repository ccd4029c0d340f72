//! Common utilities for mortise integration tests
//!
//! A synthetic body rig with known ground truth: each device is mounted on
//! its segment with a fixed misalignment and gyro bias, and sample streams
//! are generated from analytic bone motion. A correct engine must invert
//! the rig's mounting quaternions from the streams alone.

use std::collections::{BTreeMap, BTreeSet};

use capture::{DeviceId, SegmentId, SensorAssignment, SensorSample, Topology};
use mortise::steps::motion_steps;
use mortise::{CalEvent, CalState, CalibrationEngine};
use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tare_math::Quaternion;

pub const SAMPLE_HZ: f64 = 100.0;
pub const GRAVITY_WORLD: Vector3<f64> = Vector3::new(0.0, -9.81, 0.0);

/// What the simulated body is doing.
#[derive(Debug, Clone)]
pub enum Scene {
    /// Neutral upright hold, nothing moves
    Still,
    /// One segment swings about a bone-frame axis
    Swing {
        segment: SegmentId,
        axis: Vector3<f64>,
        amplitude_rad: f64,
        freq_hz: f64,
        since: f64,
    },
    /// One slow squat: both shanks flex and recover
    Squat { since: f64, duration: f64 },
}

impl Scene {
    /// Bone orientation and world angular velocity for a segment at time t.
    fn bone_pose(&self, segment: SegmentId, t: f64) -> (Quaternion, Vector3<f64>) {
        match self {
            Scene::Still => (Quaternion::identity(), Vector3::zeros()),
            Scene::Swing {
                segment: moving,
                axis,
                amplitude_rad,
                freq_hz,
                since,
            } => {
                if segment != *moving {
                    return (Quaternion::identity(), Vector3::zeros());
                }
                let omega = 2.0 * std::f64::consts::PI * freq_hz;
                let phase = omega * (t - since);
                let theta = amplitude_rad * phase.sin();
                let rate = amplitude_rad * omega * phase.cos();
                (Quaternion::from_axis_angle(axis, theta), axis * rate)
            }
            Scene::Squat { since, duration } => {
                // Smooth 0 -> peak -> 0 over the window: knees flex, the
                // trunk leans forward
                let peak = match segment {
                    SegmentId::ShankLeft | SegmentId::ShankRight => 0.9,
                    SegmentId::Chest => 0.45,
                    _ => return (Quaternion::identity(), Vector3::zeros()),
                };
                let phase = 2.0 * std::f64::consts::PI * (t - since) / duration;
                let theta = peak * 0.5 * (1.0 - phase.cos());
                let rate = peak * (std::f64::consts::PI / duration) * phase.sin();
                let axis = Vector3::x();
                (Quaternion::from_axis_angle(&axis, theta), axis * rate)
            }
        }
    }
}

/// Ground-truth body rig: mounting misalignment and gyro bias per segment.
pub struct BodyRig {
    pub topology: Topology,
    pub assignment: SensorAssignment,
    pub mounting: BTreeMap<SegmentId, Quaternion>,
    pub bias: BTreeMap<SegmentId, Vector3<f64>>,
    rng: ChaCha8Rng,
    pub gyro_noise: f64,
    pub accel_noise: f64,
}

impl BodyRig {
    pub fn lower_body(seed: u64) -> Self {
        Self::for_topology(Topology::LowerBody, seed)
    }

    pub fn upper_body(seed: u64) -> Self {
        Self::for_topology(Topology::UpperBody, seed)
    }

    fn for_topology(topology: Topology, seed: u64) -> Self {
        let mut assignment = SensorAssignment::new();
        let mut mounting = BTreeMap::new();
        let mut bias = BTreeMap::new();

        for (index, &segment) in topology.segments().iter().enumerate() {
            let device = DeviceId(index as u16 + 1);
            assignment.assign(segment, device);

            // Distinct, sizeable misalignment per segment
            let angle = 0.15 + 0.08 * index as f64;
            let axis = match index % 3 {
                0 => Vector3::z(),
                1 => Vector3::x(),
                _ => Vector3::new(1.0, 0.0, 1.0).normalize(),
            };
            mounting.insert(
                segment,
                Quaternion::from_axis_angle(&axis, angle).normalize(),
            );
            bias.insert(
                segment,
                Vector3::new(0.004, -0.003, 0.002) * (1.0 + 0.3 * index as f64),
            );
        }

        Self {
            topology,
            assignment,
            mounting,
            bias,
            rng: ChaCha8Rng::seed_from_u64(seed),
            gyro_noise: 0.002,
            accel_noise: 0.01,
        }
    }

    pub fn true_mounting(&self, segment: SegmentId) -> Quaternion {
        self.mounting[&segment]
    }

    fn noise(&mut self, scale: f64) -> Vector3<f64> {
        Vector3::new(
            self.rng.gen_range(-scale..=scale),
            self.rng.gen_range(-scale..=scale),
            self.rng.gen_range(-scale..=scale),
        )
    }

    /// Synthesize the sample a segment's device would report at time t.
    ///
    /// Raw orientation composes bone pose with the mounting misalignment;
    /// gyro and accel are world quantities rotated into the sensor frame,
    /// with the device's bias and noise on top.
    pub fn sample_at(&mut self, segment: SegmentId, t: f64, scene: &Scene) -> SensorSample {
        let m = self.mounting[&segment];
        let (bone, omega_world) = scene.bone_pose(segment, t);
        let q_raw = (bone * m).normalize();

        let gyro = q_raw.conjugate().rotate_vector(&omega_world)
            + self.bias[&segment]
            + self.noise(self.gyro_noise);
        let accel = q_raw.conjugate().rotate_vector(&GRAVITY_WORLD) + self.noise(self.accel_noise);

        SensorSample {
            gyro,
            accel,
            orientation: q_raw,
            timestamp_sec: t,
        }
    }
}

/// Streams rig samples into an engine, choosing the scene from the engine's
/// own state so guided steps always receive the motion they prompt for.
pub struct SessionDriver {
    pub rig: BodyRig,
    pub t: f64,
    /// Segments whose functional steps should be performed badly
    pub weak: BTreeSet<SegmentId>,
    /// Keep fidgeting instead of holding the closing neutral pose
    pub restless_final: bool,
    phase_key: Option<String>,
    phase_start: f64,
}

impl SessionDriver {
    pub fn new(rig: BodyRig) -> Self {
        Self {
            rig,
            t: 0.0,
            weak: BTreeSet::new(),
            restless_final: false,
            phase_key: None,
            phase_start: 0.0,
        }
    }

    fn scene_for(&mut self, state: &CalState) -> Scene {
        let key = match state {
            CalState::Functional { step_index, .. } => format!("functional-{step_index}"),
            other => other.name().to_string(),
        };
        if self.phase_key.as_deref() != Some(key.as_str()) {
            self.phase_key = Some(key);
            self.phase_start = self.t;
        }

        match state {
            CalState::Functional { step_index, .. } => {
                let def = &motion_steps(self.rig.topology)[*step_index];
                let weak = self.weak.contains(&def.target_segment);
                Scene::Swing {
                    segment: def.target_segment,
                    axis: def.expected_axis_bone,
                    amplitude_rad: if weak { 0.0005 } else { 0.6 },
                    freq_hz: if weak { 0.3 } else { 0.5 },
                    since: self.phase_start,
                }
            }
            CalState::FinalPose { .. } if self.restless_final => Scene::Swing {
                segment: self.rig.topology.segments()[0],
                axis: Vector3::z(),
                amplitude_rad: 0.3,
                freq_hz: 1.0,
                since: self.phase_start,
            },
            CalState::SquatCheck => Scene::Squat {
                since: self.phase_start,
                duration: 6.0,
            },
            _ => Scene::Still,
        }
    }

    /// One 10 ms frame: a sample from every device, proximal first.
    pub fn step(&mut self, engine: &mut CalibrationEngine) {
        let scene = self.scene_for(engine.state());
        self.t += 1.0 / SAMPLE_HZ;
        let t = self.t;
        for &segment in self.rig.topology.segments() {
            let device = self
                .rig
                .assignment
                .device_for(segment)
                .expect("rig assigns every segment");
            let sample = self.rig.sample_at(segment, t, &scene);
            engine
                .process_event(CalEvent::Sample { device, sample })
                .expect("sample rejected");
        }
    }

    /// Stream frames until the predicate accepts the engine state. Panics
    /// if the budget runs out, naming the state it was stuck in.
    pub fn run_until(
        &mut self,
        engine: &mut CalibrationEngine,
        budget_secs: f64,
        pred: impl Fn(&CalState) -> bool,
    ) {
        let deadline = self.t + budget_secs;
        while self.t < deadline {
            if pred(engine.state()) {
                return;
            }
            self.step(engine);
        }
        panic!(
            "engine stuck in {} after {budget_secs}s of streaming",
            engine.state()
        );
    }
}
