//! Gram-Schmidt frame construction.
//!
//! Builds the rotation between two frames from one exactly-known direction
//! (the primary axis) and one best-effort direction (the secondary
//! reference), given both expressed in each frame. The primary axis maps
//! exactly; the secondary is projected orthogonal to it, so only its
//! component perpendicular to the primary contributes.

use nalgebra::{Matrix3, Vector3};
use thiserror::Error;

/// Inputs below this norm carry no direction.
const MIN_AXIS_NORM: f64 = 1e-9;

/// Rejected-secondary norms below this mean primary and secondary are
/// parallel and the third axis is undefined.
const MIN_REJECTION_NORM: f64 = 1e-6;

#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    #[error("degenerate {which} axis (norm {norm:.3e})")]
    DegenerateAxis { which: &'static str, norm: f64 },
    #[error("primary and secondary axes are parallel (separation {separation_deg:.4} deg)")]
    ParallelAxes { separation_deg: f64 },
}

/// Right-handed orthonormal basis from a primary axis and a secondary
/// reference, as matrix columns [a1 a2 a3].
pub fn orthonormal_basis(
    primary: &Vector3<f64>,
    secondary: &Vector3<f64>,
) -> Result<Matrix3<f64>, FrameError> {
    let p_norm = primary.norm();
    if p_norm < MIN_AXIS_NORM {
        return Err(FrameError::DegenerateAxis {
            which: "primary",
            norm: p_norm,
        });
    }
    let s_norm = secondary.norm();
    if s_norm < MIN_AXIS_NORM {
        return Err(FrameError::DegenerateAxis {
            which: "secondary",
            norm: s_norm,
        });
    }

    let a1 = primary / p_norm;
    let s_unit = secondary / s_norm;

    let rejection = s_unit - a1 * s_unit.dot(&a1);
    let r_norm = rejection.norm();
    if r_norm < MIN_REJECTION_NORM {
        let separation_deg = s_unit.dot(&a1).abs().min(1.0).acos().to_degrees();
        return Err(FrameError::ParallelAxes { separation_deg });
    }

    let a2 = rejection / r_norm;
    let a3 = a1.cross(&a2);

    Ok(Matrix3::from_columns(&[a1, a2, a3]))
}

/// Rotation mapping source-frame coordinates to target-frame coordinates.
///
/// `primary_src`/`primary_dst` are the same physical direction expressed in
/// each frame, likewise the secondaries. The returned matrix maps the
/// normalized primary exactly and the secondary best-effort. Degenerate
/// input fails closed; no arbitrary frame is ever fabricated.
pub fn change_of_basis(
    primary_src: &Vector3<f64>,
    secondary_src: &Vector3<f64>,
    primary_dst: &Vector3<f64>,
    secondary_dst: &Vector3<f64>,
) -> Result<Matrix3<f64>, FrameError> {
    let basis_src = orthonormal_basis(primary_src, secondary_src)?;
    let basis_dst = orthonormal_basis(primary_dst, secondary_dst)?;

    // Both bases are orthonormal, so the inverse is the transpose.
    Ok(basis_dst * basis_src.transpose())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn assert_orthonormal(m: &Matrix3<f64>) {
        let should_be_identity = m * m.transpose();
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(should_be_identity[(i, j)], expected, epsilon = 1e-10);
            }
        }
        assert_relative_eq!(m.determinant(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_equal_bases_give_identity() {
        let primary = Vector3::new(1.0, 0.0, 0.0);
        let secondary = Vector3::new(0.0, -1.0, 0.0);

        let rot = change_of_basis(&primary, &secondary, &primary, &secondary).unwrap();

        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(rot[(i, j)], expected, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_primary_maps_exactly() {
        let primary_src = Vector3::new(0.2, 0.9, -0.1);
        let secondary_src = Vector3::new(0.1, -0.2, -1.0);
        let primary_dst = Vector3::new(1.0, 0.0, 0.0);
        let secondary_dst = Vector3::new(0.0, -1.0, 0.0);

        let rot = change_of_basis(&primary_src, &secondary_src, &primary_dst, &secondary_dst)
            .unwrap();

        let mapped = rot * primary_src.normalize();
        let expected = primary_dst.normalize();
        for i in 0..3 {
            assert_relative_eq!(mapped[i], expected[i], epsilon = 1e-10);
        }
    }

    #[test]
    fn test_output_is_orthonormal_for_random_input() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        for _ in 0..50 {
            let rand_vec = |rng: &mut ChaCha8Rng| -> Vector3<f64> {
                Vector3::new(
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                )
            };

            let p_src = rand_vec(&mut rng);
            let s_src = rand_vec(&mut rng);
            let p_dst = rand_vec(&mut rng);
            let s_dst = rand_vec(&mut rng);

            // Skip draws that are legitimately degenerate
            if p_src.norm() < 0.1 || s_src.norm() < 0.1 || p_dst.norm() < 0.1 || s_dst.norm() < 0.1
            {
                continue;
            }
            if p_src.normalize().dot(&s_src.normalize()).abs() > 0.99
                || p_dst.normalize().dot(&s_dst.normalize()).abs() > 0.99
            {
                continue;
            }

            let rot = change_of_basis(&p_src, &s_src, &p_dst, &s_dst).unwrap();
            assert_orthonormal(&rot);
        }
    }

    #[test]
    fn test_parallel_axes_fail_closed() {
        let primary = Vector3::new(0.0, 1.0, 0.0);
        let secondary = Vector3::new(0.0, 2.0, 0.0);
        let reference = Vector3::new(1.0, 0.0, 0.0);

        let err = change_of_basis(&primary, &secondary, &reference, &primary).unwrap_err();
        assert!(matches!(err, FrameError::ParallelAxes { .. }));

        // Antiparallel is just as degenerate
        let err = orthonormal_basis(&primary, &-secondary).unwrap_err();
        assert!(matches!(err, FrameError::ParallelAxes { .. }));
    }

    #[test]
    fn test_zero_axis_fails_closed() {
        let zero = Vector3::zeros();
        let ok = Vector3::new(1.0, 0.0, 0.0);

        let err = orthonormal_basis(&zero, &ok).unwrap_err();
        assert!(matches!(
            err,
            FrameError::DegenerateAxis {
                which: "primary",
                ..
            }
        ));

        let err = orthonormal_basis(&ok, &zero).unwrap_err();
        assert!(matches!(
            err,
            FrameError::DegenerateAxis {
                which: "secondary",
                ..
            }
        ));
    }

    #[test]
    fn test_known_ninety_degree_mapping() {
        // Source frame: primary along +x, secondary along -y.
        // Target frame: the same directions seen rotated 90 degrees about z.
        let p_src = Vector3::new(1.0, 0.0, 0.0);
        let s_src = Vector3::new(0.0, -1.0, 0.0);
        let p_dst = Vector3::new(0.0, 1.0, 0.0);
        let s_dst = Vector3::new(-1.0, 0.0, 0.0);

        let rot = change_of_basis(&p_src, &s_src, &p_dst, &s_dst).unwrap();
        let mapped = rot * Vector3::new(1.0, 0.0, 0.0);

        assert_relative_eq!(mapped[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(mapped[1], 1.0, epsilon = 1e-12);
        assert_relative_eq!(mapped[2], 0.0, epsilon = 1e-12);
    }
}
