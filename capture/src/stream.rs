//! Per-device stream buffering and cross-device timeline alignment.
//!
//! Packets from different sensors arrive at different wall-clock times, so
//! pairing each device's merely-latest sample tears joints apart under fast
//! motion. `aligned_joint_frame` reconstructs both devices' channels at one
//! common timestamp instead, interpolating where needed and refusing pairs
//! whose streams have drifted too far apart.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tare_math::Quaternion;

use crate::ring_buffer::RingBuffer;
use crate::sample::{DeviceId, SensorSample};

/// Timestamps closer than this count as the same instant.
const TIME_EPSILON_SEC: f64 = 1e-9;

/// A timestamped channel entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stamped<T> {
    pub t: f64,
    pub value: T,
}

/// The four per-device channels. Position is fed only by hosts that can
/// supply segment positions and exists for the joint-center estimator's
/// position mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Gyro,
    Accel,
    Orientation,
    Position,
}

#[derive(Debug, Clone)]
struct DeviceChannels {
    gyro: RingBuffer<Stamped<Vector3<f64>>>,
    accel: RingBuffer<Stamped<Vector3<f64>>>,
    orientation: RingBuffer<Stamped<Quaternion>>,
    position: RingBuffer<Stamped<Vector3<f64>>>,
}

impl DeviceChannels {
    fn new(capacity: usize) -> Self {
        Self {
            gyro: RingBuffer::new(capacity),
            accel: RingBuffer::new(capacity),
            orientation: RingBuffer::new(capacity),
            position: RingBuffer::new(capacity),
        }
    }

    fn clear(&mut self) {
        self.gyro.clear();
        self.accel.clear();
        self.orientation.clear();
        self.position.clear();
    }

    /// Newest timestamp across the required channels (position excluded).
    fn latest(&self) -> Option<f64> {
        [
            self.gyro.back().map(|s| s.t),
            self.accel.back().map(|s| s.t),
            self.orientation.back().map(|s| s.t),
        ]
        .into_iter()
        .flatten()
        .fold(None, |acc: Option<f64>, t| {
            Some(acc.map_or(t, |a| a.max(t)))
        })
    }
}

/// Pair-assembly counters for one capture window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimelineDiagnostics {
    /// Assembly attempts, accepted or not
    pub total_pairs: u64,
    /// Accepted frames that needed interpolation on any channel
    pub interpolated_pairs: u64,
    /// Attempts rejected for empty buffers, interpolation bounds or skew
    pub dropped_pairs: u64,
    /// Largest device head lag observed, milliseconds
    pub max_skew_ms: f64,
}

impl TimelineDiagnostics {
    pub fn interpolated_ratio(&self) -> f64 {
        if self.total_pairs == 0 {
            0.0
        } else {
            self.interpolated_pairs as f64 / self.total_pairs as f64
        }
    }

    pub fn dropped_ratio(&self) -> f64 {
        if self.total_pairs == 0 {
            0.0
        } else {
            self.dropped_pairs as f64 / self.total_pairs as f64
        }
    }
}

/// One device's channels reconstructed at the frame timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceState {
    pub gyro: Vector3<f64>,
    pub accel: Vector3<f64>,
    pub orientation: Quaternion,
    pub position: Option<Vector3<f64>>,
}

/// Two devices' states at one common timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignedJointFrame {
    /// Common reconstruction timestamp, seconds
    pub t: f64,
    pub proximal: DeviceState,
    pub distal: DeviceState,
    /// True iff any channel was evaluated strictly between two samples
    pub interpolated: bool,
    /// Lag between the two devices' stream heads at assembly, milliseconds
    pub head_lag_ms: f64,
}

enum Bracket {
    Empty,
    Exact(usize),
    Between(usize, usize),
    Outside,
}

fn bracket<T>(ring: &RingBuffer<Stamped<T>>, t: f64) -> Bracket {
    if ring.is_empty() {
        return Bracket::Empty;
    }
    let first = match ring.front() {
        Some(s) => s.t,
        None => return Bracket::Empty,
    };
    let last = match ring.back() {
        Some(s) => s.t,
        None => return Bracket::Empty,
    };

    if t < first - TIME_EPSILON_SEC || t > last + TIME_EPSILON_SEC {
        return Bracket::Outside;
    }

    // Binary search for the first entry at or after t
    let mut lo = 0usize;
    let mut hi = ring.len() - 1;
    while lo < hi {
        let mid = (lo + hi) / 2;
        let mid_t = match ring.get(mid) {
            Some(s) => s.t,
            None => return Bracket::Empty,
        };
        if mid_t < t - TIME_EPSILON_SEC {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }

    let found_t = match ring.get(lo) {
        Some(s) => s.t,
        None => return Bracket::Empty,
    };
    if (found_t - t).abs() <= TIME_EPSILON_SEC {
        Bracket::Exact(lo)
    } else if lo == 0 {
        // t precedes the first entry by more than epsilon
        Bracket::Outside
    } else {
        Bracket::Between(lo - 1, lo)
    }
}

/// Linear interpolation of a vector channel at `t`. Second tuple element is
/// true when the value was interpolated rather than read exactly.
fn sample_vector(ring: &RingBuffer<Stamped<Vector3<f64>>>, t: f64) -> Option<(Vector3<f64>, bool)> {
    match bracket(ring, t) {
        Bracket::Exact(i) => ring.get(i).map(|s| (s.value, false)),
        Bracket::Between(lo, hi) => {
            let a = ring.get(lo)?;
            let b = ring.get(hi)?;
            let span = b.t - a.t;
            if span <= 0.0 {
                return Some((a.value, false));
            }
            let alpha = (t - a.t) / span;
            Some((a.value + (b.value - a.value) * alpha, true))
        }
        Bracket::Empty | Bracket::Outside => None,
    }
}

/// SLERP of the orientation channel at `t`.
fn sample_orientation(ring: &RingBuffer<Stamped<Quaternion>>, t: f64) -> Option<(Quaternion, bool)> {
    match bracket(ring, t) {
        Bracket::Exact(i) => ring.get(i).map(|s| (s.value, false)),
        Bracket::Between(lo, hi) => {
            let a = ring.get(lo)?;
            let b = ring.get(hi)?;
            let span = b.t - a.t;
            if span <= 0.0 {
                return Some((a.value, false));
            }
            let alpha = (t - a.t) / span;
            Some((a.value.slerp(&b.value, alpha), true))
        }
        Bracket::Empty | Bracket::Outside => None,
    }
}

/// Bounded per-device channel history plus cross-device frame assembly.
#[derive(Debug, Clone)]
pub struct SensorStreamBuffers {
    devices: HashMap<DeviceId, DeviceChannels>,
    capacity: usize,
    diagnostics: TimelineDiagnostics,
}

impl SensorStreamBuffers {
    /// # Panics
    /// Panics if capacity is zero (propagated from `RingBuffer::new`).
    pub fn new(capacity: usize) -> Self {
        Self {
            devices: HashMap::new(),
            capacity,
            diagnostics: TimelineDiagnostics::default(),
        }
    }

    fn entry(&mut self, device: DeviceId) -> &mut DeviceChannels {
        let capacity = self.capacity;
        self.devices
            .entry(device)
            .or_insert_with(|| DeviceChannels::new(capacity))
    }

    /// Append one full sample: gyro, accel and orientation share the sample
    /// timestamp.
    pub fn push_sample(&mut self, device: DeviceId, sample: &SensorSample) {
        let t = sample.timestamp_sec;
        let channels = self.entry(device);
        channels.gyro.push(Stamped {
            t,
            value: sample.gyro,
        });
        channels.accel.push(Stamped {
            t,
            value: sample.accel,
        });
        channels.orientation.push(Stamped {
            t,
            value: sample.orientation.normalize(),
        });
    }

    /// Append a position observation (optional channel).
    pub fn push_position(&mut self, device: DeviceId, t: f64, position: Vector3<f64>) {
        self.entry(device).position.push(Stamped { t, value: position });
    }

    /// Newest timestamp a device has on any required channel.
    pub fn latest_timestamp(&self, device: DeviceId) -> Option<f64> {
        self.devices.get(&device).and_then(|c| c.latest())
    }

    pub fn channel_len(&self, device: DeviceId, channel: Channel) -> usize {
        match self.devices.get(&device) {
            None => 0,
            Some(c) => match channel {
                Channel::Gyro => c.gyro.len(),
                Channel::Accel => c.accel.len(),
                Channel::Orientation => c.orientation.len(),
                Channel::Position => c.position.len(),
            },
        }
    }

    /// Copy of a device's gyro window, oldest first.
    pub fn gyro_window(&self, device: DeviceId) -> Vec<Stamped<Vector3<f64>>> {
        self.devices
            .get(&device)
            .map(|c| c.gyro.to_vec())
            .unwrap_or_default()
    }

    /// Copy of a device's accel window, oldest first.
    pub fn accel_window(&self, device: DeviceId) -> Vec<Stamped<Vector3<f64>>> {
        self.devices
            .get(&device)
            .map(|c| c.accel.to_vec())
            .unwrap_or_default()
    }

    /// Copy of a device's orientation window, oldest first.
    pub fn orientation_window(&self, device: DeviceId) -> Vec<Stamped<Quaternion>> {
        self.devices
            .get(&device)
            .map(|c| c.orientation.to_vec())
            .unwrap_or_default()
    }

    /// Reconstruct both devices at a common timestamp.
    ///
    /// The query time is the earlier of the two stream heads: the lagging
    /// device bounds the latest instant both can be evaluated at. Fails
    /// (counting a drop) when a required buffer is empty, when the query
    /// leaves a channel's interpolation bounds, or when the heads have
    /// drifted more than `max_skew_ms` apart.
    pub fn aligned_joint_frame(
        &mut self,
        proximal: DeviceId,
        distal: DeviceId,
        max_skew_ms: f64,
    ) -> Option<AlignedJointFrame> {
        self.diagnostics.total_pairs += 1;

        let (latest_p, latest_d) = match (
            self.latest_timestamp(proximal),
            self.latest_timestamp(distal),
        ) {
            (Some(p), Some(d)) => (p, d),
            _ => {
                self.diagnostics.dropped_pairs += 1;
                log::debug!("aligned frame dropped: empty buffer ({proximal} / {distal})");
                return None;
            }
        };

        let t = latest_p.min(latest_d);
        let head_lag_ms = (latest_p - latest_d).abs() * 1000.0;
        if head_lag_ms > self.diagnostics.max_skew_ms {
            self.diagnostics.max_skew_ms = head_lag_ms;
        }

        if head_lag_ms > max_skew_ms {
            self.diagnostics.dropped_pairs += 1;
            log::debug!(
                "aligned frame dropped: head lag {head_lag_ms:.1} ms exceeds {max_skew_ms:.1} ms"
            );
            return None;
        }

        let result = {
            let p = self.devices.get(&proximal)?;
            let d = self.devices.get(&distal)?;

            let assemble = || -> Option<(DeviceState, DeviceState, bool)> {
                let (pg, i1) = sample_vector(&p.gyro, t)?;
                let (pa, i2) = sample_vector(&p.accel, t)?;
                let (po, i3) = sample_orientation(&p.orientation, t)?;
                let (dg, i4) = sample_vector(&d.gyro, t)?;
                let (da, i5) = sample_vector(&d.accel, t)?;
                let (do_, i6) = sample_orientation(&d.orientation, t)?;

                // Positions are optional; absence never drops the frame
                let pp = sample_vector(&p.position, t).map(|(v, _)| v);
                let dp = sample_vector(&d.position, t).map(|(v, _)| v);

                Some((
                    DeviceState {
                        gyro: pg,
                        accel: pa,
                        orientation: po,
                        position: pp,
                    },
                    DeviceState {
                        gyro: dg,
                        accel: da,
                        orientation: do_,
                        position: dp,
                    },
                    i1 || i2 || i3 || i4 || i5 || i6,
                ))
            };
            assemble()
        };

        match result {
            Some((proximal_state, distal_state, interpolated)) => {
                if interpolated {
                    self.diagnostics.interpolated_pairs += 1;
                }
                Some(AlignedJointFrame {
                    t,
                    proximal: proximal_state,
                    distal: distal_state,
                    interpolated,
                    head_lag_ms,
                })
            }
            None => {
                self.diagnostics.dropped_pairs += 1;
                log::debug!("aligned frame dropped: query {t:.4}s outside interpolation bounds");
                None
            }
        }
    }

    pub fn diagnostics(&self) -> TimelineDiagnostics {
        self.diagnostics
    }

    /// Reset rings and diagnostics for a new capture window. Called at every
    /// step transition so stale samples cannot leak across steps.
    pub fn clear_window(&mut self) {
        for channels in self.devices.values_mut() {
            channels.clear();
        }
        self.diagnostics = TimelineDiagnostics::default();
    }
}
