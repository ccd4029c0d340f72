//! Immutable sensor samples as delivered by the device transport.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt;
use tare_math::Quaternion;

/// Identifier of a physical sensor node. Transport-assigned; the body model
/// never interprets the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub u16);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{:03}", self.0)
    }
}

/// One sensor reading. Produced externally, never mutated.
///
/// Gyro and accel are sensor-local; the orientation quaternion rotates
/// sensor-frame vectors into the world frame. Timestamps are seconds on the
/// transport's monotonic clock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    /// Angular velocity, rad/s, sensor frame
    pub gyro: Vector3<f64>,
    /// Specific force, m/s^2, sensor frame
    pub accel: Vector3<f64>,
    /// Sensor-to-world rotation, unit quaternion
    pub orientation: Quaternion,
    /// Sample time, seconds
    pub timestamp_sec: f64,
}

impl SensorSample {
    /// Build a sample from wire-order arrays: gyro, accel, quaternion as
    /// (w, x, y, z).
    pub fn from_parts(gyro: [f64; 3], accel: [f64; 3], quat: [f64; 4], timestamp_sec: f64) -> Self {
        Self {
            gyro: Vector3::new(gyro[0], gyro[1], gyro[2]),
            accel: Vector3::new(accel[0], accel[1], accel[2]),
            orientation: Quaternion::new(quat[0], quat[1], quat[2], quat[3]),
            timestamp_sec,
        }
    }
}
