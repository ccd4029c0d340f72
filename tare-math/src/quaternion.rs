//! Quaternion implementation for sensor and bone orientations.
//!
//! Tares and device orientations are unit quaternions in (w, x, y, z) order,
//! matching the wire order the sensor firmware emits. Rotations compose by
//! multiplication; `rotate_vector` maps frame-local vectors through a
//! rotation.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul};

/// A quaternion representing a rotation in 3D space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    /// Real/scalar component (w)
    pub w: f64,
    /// First complex component (i)
    pub x: f64,
    /// Second complex component (j)
    pub y: f64,
    /// Third complex component (k)
    pub z: f64,
}

impl Quaternion {
    /// Create a new quaternion
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// Create an identity quaternion (no rotation)
    pub fn identity() -> Self {
        Self {
            w: 1.0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }

    /// Create a quaternion from axis-angle representation
    pub fn from_axis_angle(axis: &Vector3<f64>, angle: f64) -> Self {
        let half_angle = angle / 2.0;
        let sin_half_angle = half_angle.sin();

        Self {
            w: half_angle.cos(),
            x: axis[0] * sin_half_angle,
            y: axis[1] * sin_half_angle,
            z: axis[2] * sin_half_angle,
        }
    }

    /// Build a quaternion from an orthonormal rotation matrix.
    ///
    /// Uses the largest-diagonal branch (Shepperd's method) so the result is
    /// well conditioned for any input rotation.
    pub fn from_rotation_matrix(m: &Matrix3<f64>) -> Self {
        let trace = m[(0, 0)] + m[(1, 1)] + m[(2, 2)];

        let q = if trace > 0.0 {
            let s = (trace + 1.0).sqrt() * 2.0;
            Self {
                w: 0.25 * s,
                x: (m[(2, 1)] - m[(1, 2)]) / s,
                y: (m[(0, 2)] - m[(2, 0)]) / s,
                z: (m[(1, 0)] - m[(0, 1)]) / s,
            }
        } else if m[(0, 0)] > m[(1, 1)] && m[(0, 0)] > m[(2, 2)] {
            let s = (1.0 + m[(0, 0)] - m[(1, 1)] - m[(2, 2)]).sqrt() * 2.0;
            Self {
                w: (m[(2, 1)] - m[(1, 2)]) / s,
                x: 0.25 * s,
                y: (m[(0, 1)] + m[(1, 0)]) / s,
                z: (m[(0, 2)] + m[(2, 0)]) / s,
            }
        } else if m[(1, 1)] > m[(2, 2)] {
            let s = (1.0 + m[(1, 1)] - m[(0, 0)] - m[(2, 2)]).sqrt() * 2.0;
            Self {
                w: (m[(0, 2)] - m[(2, 0)]) / s,
                x: (m[(0, 1)] + m[(1, 0)]) / s,
                y: 0.25 * s,
                z: (m[(1, 2)] + m[(2, 1)]) / s,
            }
        } else {
            let s = (1.0 + m[(2, 2)] - m[(0, 0)] - m[(1, 1)]).sqrt() * 2.0;
            Self {
                w: (m[(1, 0)] - m[(0, 1)]) / s,
                x: (m[(0, 2)] + m[(2, 0)]) / s,
                y: (m[(1, 2)] + m[(2, 1)]) / s,
                z: 0.25 * s,
            }
        };

        q.normalize()
    }

    /// Shortest-arc rotation carrying unit direction `from` onto `to`.
    ///
    /// Antiparallel inputs rotate 180 degrees about an arbitrary axis
    /// orthogonal to `from`.
    pub fn rotation_between(from: &Vector3<f64>, to: &Vector3<f64>) -> Self {
        let f = from.normalize();
        let t = to.normalize();
        let d = f.dot(&t);

        if d < -1.0 + 1e-10 {
            // Antiparallel: any axis orthogonal to `from` works.
            let ortho = if f.x.abs() < 0.9 {
                Vector3::new(1.0, 0.0, 0.0).cross(&f)
            } else {
                Vector3::new(0.0, 1.0, 0.0).cross(&f)
            };
            return Self::from_axis_angle(&ortho.normalize(), std::f64::consts::PI);
        }

        let c = f.cross(&t);
        Self {
            w: 1.0 + d,
            x: c.x,
            y: c.y,
            z: c.z,
        }
        .normalize()
    }

    /// Calculate the norm (magnitude) of the quaternion
    pub fn norm(&self) -> f64 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Normalize the quaternion to unit length
    pub fn normalize(&self) -> Self {
        let norm = self.norm();
        if norm.abs() < 1e-10 {
            Self::identity()
        } else {
            Self {
                w: self.w / norm,
                x: self.x / norm,
                y: self.y / norm,
                z: self.z / norm,
            }
        }
    }

    /// Four-component dot product
    pub fn dot(&self, other: &Self) -> f64 {
        self.w * other.w + self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Calculate the conjugate of the quaternion
    pub fn conjugate(&self) -> Self {
        Self {
            w: self.w,
            x: -self.x,
            y: -self.y,
            z: -self.z,
        }
    }

    /// Calculate the inverse of the quaternion
    pub fn inverse(&self) -> Self {
        let norm_squared = self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z;
        if norm_squared < 1e-10 {
            Self::identity()
        } else {
            let inv_norm_squared = 1.0 / norm_squared;
            Self {
                w: self.w * inv_norm_squared,
                x: -self.x * inv_norm_squared,
                y: -self.y * inv_norm_squared,
                z: -self.z * inv_norm_squared,
            }
        }
    }

    /// Rotate a 3D vector using this quaternion
    pub fn rotate_vector(&self, v: &Vector3<f64>) -> Vector3<f64> {
        // Convert vector to pure quaternion (w=0)
        let v_quat = Quaternion::new(0.0, v[0], v[1], v[2]);

        // Perform rotation: q * v * q^(-1)
        let rotated = *self * v_quat * self.conjugate();

        // Extract vector part
        Vector3::new(rotated.x, rotated.y, rotated.z)
    }

    /// Geodesic angle in radians between the rotations represented by
    /// `self` and `other`. Sign-insensitive: q and -q are the same rotation.
    pub fn angle_to(&self, other: &Self) -> f64 {
        let d = self.normalize().dot(&other.normalize()).abs().min(1.0);
        2.0 * d.acos()
    }

    /// Spherical linear interpolation from `self` (t=0) to `other` (t=1).
    ///
    /// Takes the shorter arc; falls back to normalized linear interpolation
    /// when the endpoints are nearly identical, where the sin terms lose
    /// precision.
    pub fn slerp(&self, other: &Self, t: f64) -> Self {
        let a = self.normalize();
        let mut b = other.normalize();

        let mut d = a.dot(&b);
        if d < 0.0 {
            b = b * -1.0;
            d = -d;
        }

        if d > 1.0 - 1e-9 {
            return (a * (1.0 - t) + b * t).normalize();
        }

        let theta = d.min(1.0).acos();
        let sin_theta = theta.sin();
        let wa = ((1.0 - t) * theta).sin() / sin_theta;
        let wb = (t * theta).sin() / sin_theta;
        (a * wa + b * wb).normalize()
    }

    /// Average of a tight cluster of rotations.
    ///
    /// Sign-aligns every sample to the first, sums components and
    /// renormalizes. Valid for clusters spanning a few degrees (static-pose
    /// windows); not a general rotation mean. Empty input yields identity.
    pub fn average(samples: &[Quaternion]) -> Self {
        let mut iter = samples.iter();
        let first = match iter.next() {
            Some(q) => *q,
            None => return Self::identity(),
        };

        let mut acc = first;
        for q in iter {
            let aligned = if first.dot(q) < 0.0 { *q * -1.0 } else { *q };
            acc = acc + aligned;
        }
        acc.normalize()
    }

    /// Convert quaternion to 3x3 rotation matrix
    pub fn to_rotation_matrix(&self) -> Matrix3<f64> {
        let q = self.normalize();

        let w = q.w;
        let x = q.x;
        let y = q.y;
        let z = q.z;

        let xx = x * x;
        let xy = x * y;
        let xz = x * z;
        let xw = x * w;

        let yy = y * y;
        let yz = y * z;
        let yw = y * w;

        let zz = z * z;
        let zw = z * w;

        Matrix3::new(
            1.0 - 2.0 * (yy + zz),
            2.0 * (xy - zw),
            2.0 * (xz + yw),
            2.0 * (xy + zw),
            1.0 - 2.0 * (xx + zz),
            2.0 * (yz - xw),
            2.0 * (xz - yw),
            2.0 * (yz + xw),
            1.0 - 2.0 * (xx + yy),
        )
    }
}

// Quaternion multiplication
impl Mul for Quaternion {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        Self {
            w: self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            x: self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            y: self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            z: self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        }
    }
}

// Scalar scaling (used by interpolation and averaging)
impl Mul<f64> for Quaternion {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self::Output {
        Self {
            w: self.w * rhs,
            x: self.x * rhs,
            y: self.y * rhs,
            z: self.z * rhs,
        }
    }
}

// Component-wise addition
impl Add for Quaternion {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            w: self.w + rhs.w,
            x: self.x + rhs.x,
            y: self.y + rhs.y,
            z: self.z + rhs.z,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

    #[test]
    fn test_quaternion_identity() {
        let q = Quaternion::identity();
        assert_eq!(q.w, 1.0);
        assert_eq!(q.x, 0.0);
        assert_eq!(q.y, 0.0);
        assert_eq!(q.z, 0.0);
    }

    #[test]
    fn test_quaternion_norm() {
        let q = Quaternion::new(1.0, 2.0, 3.0, 4.0);
        let expected_norm = (1.0f64 + 4.0 + 9.0 + 16.0).sqrt();
        assert_relative_eq!(q.norm(), expected_norm);
    }

    #[test]
    fn test_quaternion_normalization() {
        let q = Quaternion::new(1.0, 2.0, 3.0, 4.0);
        let q_normalized = q.normalize();

        assert_relative_eq!(q_normalized.norm(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_quaternion_conjugate() {
        let q = Quaternion::new(1.0, 2.0, 3.0, 4.0);
        let q_conj = q.conjugate();

        assert_eq!(q_conj.w, 1.0);
        assert_eq!(q_conj.x, -2.0);
        assert_eq!(q_conj.y, -3.0);
        assert_eq!(q_conj.z, -4.0);
    }

    #[test]
    fn test_quaternion_inverse() {
        let q = Quaternion::new(1.0, 2.0, 3.0, 4.0).normalize();
        let q_inv = q.inverse();

        // q * q_inv must be the identity
        let identity = q * q_inv;
        assert_relative_eq!(identity.w, 1.0, epsilon = 1e-10);
        assert_relative_eq!(identity.x, 0.0, epsilon = 1e-10);
        assert_relative_eq!(identity.y, 0.0, epsilon = 1e-10);
        assert_relative_eq!(identity.z, 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_quaternion_multiplication() {
        let q1 = Quaternion::new(1.0, 2.0, 3.0, 4.0);
        let q2 = Quaternion::new(5.0, 6.0, 7.0, 8.0);

        let result = q1 * q2;

        // Expected values verified against standard quaternion multiplication
        assert_eq!(result.w, 1.0 * 5.0 - 2.0 * 6.0 - 3.0 * 7.0 - 4.0 * 8.0);
        assert_eq!(result.x, 1.0 * 6.0 + 2.0 * 5.0 + 3.0 * 8.0 - 4.0 * 7.0);
        assert_eq!(result.y, 1.0 * 7.0 - 2.0 * 8.0 + 3.0 * 5.0 + 4.0 * 6.0);
        assert_eq!(result.z, 1.0 * 8.0 + 2.0 * 7.0 - 3.0 * 6.0 + 4.0 * 5.0);
    }

    #[test]
    fn test_axis_angle_conversion() {
        // 90 degrees around x
        let axis = Vector3::new(1.0, 0.0, 0.0);
        let q = Quaternion::from_axis_angle(&axis, FRAC_PI_2);

        assert_relative_eq!(q.w, FRAC_PI_4.cos(), epsilon = 1e-10);
        assert_relative_eq!(q.x, FRAC_PI_4.sin(), epsilon = 1e-10);
        assert_relative_eq!(q.y, 0.0, epsilon = 1e-10);
        assert_relative_eq!(q.z, 0.0, epsilon = 1e-10);

        // (0,1,0) rotated 90 degrees about x lands on (0,0,1)
        let v = Vector3::new(0.0, 1.0, 0.0);
        let rotated = q.rotate_vector(&v);

        assert_relative_eq!(rotated[0], 0.0, epsilon = 1e-10);
        assert_relative_eq!(rotated[1], 0.0, epsilon = 1e-10);
        assert_relative_eq!(rotated[2], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_to_rotation_matrix() {
        // 90 degrees around z
        let axis = Vector3::new(0.0, 0.0, 1.0);
        let q = Quaternion::from_axis_angle(&axis, FRAC_PI_2);
        let matrix = q.to_rotation_matrix();

        let expected = Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);

        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(matrix[(i, j)], expected[(i, j)], epsilon = 1e-10);
            }
        }

        // Matrix and quaternion paths agree
        let v = Vector3::new(1.0, 0.0, 0.0);
        let rotated_matrix = matrix * v;
        let rotated_quat = q.rotate_vector(&v);

        for i in 0..3 {
            assert_relative_eq!(rotated_matrix[i], rotated_quat[i], epsilon = 1e-10);
        }
    }

    #[test]
    fn test_from_rotation_matrix_recovers_rotation() {
        let cases = vec![
            Quaternion::from_axis_angle(&Vector3::new(1.0, 0.0, 0.0), 0.3),
            Quaternion::from_axis_angle(&Vector3::new(0.0, 1.0, 0.0), -2.8),
            Quaternion::from_axis_angle(&Vector3::new(0.6, -0.64, 0.48).normalize(), 3.0),
            Quaternion::identity(),
        ];

        for q in cases {
            let recovered = Quaternion::from_rotation_matrix(&q.to_rotation_matrix());
            // q and -q are the same rotation
            assert_relative_eq!(q.angle_to(&recovered), 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_rotation_between_maps_direction() {
        let from = Vector3::new(0.0, -1.0, 0.0);
        let to = Vector3::new(0.3, -0.9, 0.1).normalize();

        let q = Quaternion::rotation_between(&from, &to);
        let mapped = q.rotate_vector(&from);

        assert_relative_eq!(mapped[0], to[0], epsilon = 1e-10);
        assert_relative_eq!(mapped[1], to[1], epsilon = 1e-10);
        assert_relative_eq!(mapped[2], to[2], epsilon = 1e-10);
    }

    #[test]
    fn test_rotation_between_antiparallel() {
        let from = Vector3::new(0.0, 1.0, 0.0);
        let to = Vector3::new(0.0, -1.0, 0.0);

        let q = Quaternion::rotation_between(&from, &to);
        let mapped = q.rotate_vector(&from);

        assert_relative_eq!(mapped[1], -1.0, epsilon = 1e-10);
        assert_relative_eq!(q.norm(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_slerp_endpoints_and_midpoint() {
        let a = Quaternion::identity();
        let b = Quaternion::from_axis_angle(&Vector3::new(0.0, 0.0, 1.0), FRAC_PI_2);

        let at_start = a.slerp(&b, 0.0);
        let at_end = a.slerp(&b, 1.0);
        let mid = a.slerp(&b, 0.5);

        assert_relative_eq!(a.angle_to(&at_start), 0.0, epsilon = 1e-10);
        assert_relative_eq!(b.angle_to(&at_end), 0.0, epsilon = 1e-10);

        // Midpoint is a 45 degree rotation about z
        let expected = Quaternion::from_axis_angle(&Vector3::new(0.0, 0.0, 1.0), FRAC_PI_4);
        assert_relative_eq!(mid.angle_to(&expected), 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_slerp_takes_shorter_arc() {
        let a = Quaternion::from_axis_angle(&Vector3::new(1.0, 0.0, 0.0), 0.1);
        // Same rotation as a small negative angle, but with flipped sign
        let b = Quaternion::from_axis_angle(&Vector3::new(1.0, 0.0, 0.0), -0.1) * -1.0;

        let mid = a.slerp(&b, 0.5);
        assert_relative_eq!(mid.angle_to(&Quaternion::identity()), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_angle_to_is_sign_insensitive() {
        let q = Quaternion::from_axis_angle(&Vector3::new(0.0, 1.0, 0.0), 1.2);
        assert_relative_eq!(q.angle_to(&(q * -1.0)), 0.0, epsilon = 1e-10);
        assert_relative_eq!(Quaternion::identity().angle_to(&q), 1.2, epsilon = 1e-10);
    }

    #[test]
    fn test_average_of_cluster() {
        let base = Quaternion::from_axis_angle(&Vector3::new(0.0, 0.0, 1.0), 0.5);
        let wiggle = |a: f64| Quaternion::from_axis_angle(&Vector3::new(1.0, 0.0, 0.0), a);

        // Symmetric wiggle around base, with one sign-flipped sample
        let samples = vec![
            base * wiggle(0.01),
            base * wiggle(-0.01),
            (base * wiggle(0.02)) * -1.0,
            base * wiggle(-0.02),
        ];

        let mean = Quaternion::average(&samples);
        assert_relative_eq!(mean.angle_to(&base), 0.0, epsilon = 1e-4);
        assert_relative_eq!(mean.norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_average_empty_is_identity() {
        let mean = Quaternion::average(&[]);
        assert_eq!(mean, Quaternion::identity());
    }

    #[test]
    fn test_half_turn_angle() {
        let q = Quaternion::from_axis_angle(&Vector3::new(1.0, 0.0, 0.0), PI);
        assert_relative_eq!(Quaternion::identity().angle_to(&q), PI, epsilon = 1e-10);
    }
}
