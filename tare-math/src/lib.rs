//! Rotation and least-squares primitives shared by the calibration engine.
//!
//! Everything here is pure math over f64: quaternions for sensor and bone
//! orientations, Gram-Schmidt frame construction, dominant-eigenvector
//! helpers, and a small dense linear solver. No I/O, no state.

pub mod eigen;
pub mod gram_schmidt;
pub mod linsolve;
pub mod quaternion;
pub mod stats;

pub use crate::gram_schmidt::{change_of_basis, FrameError};
pub use crate::quaternion::Quaternion;
