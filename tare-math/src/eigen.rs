//! Dominant-eigenvector extraction for symmetric 3x3 matrices.
//!
//! Axis accumulators build positive semi-definite outer-product sums; the
//! dominant eigenvector of such a sum is the shared rotation axis. Power
//! iteration is sufficient there because the accumulated matrices are PSD
//! and the callers only need the top eigenpair.

use nalgebra::{Matrix3, Vector3};

/// Result of a converged power iteration.
#[derive(Debug, Clone, Copy)]
pub struct DominantEigen {
    /// Dominant eigenvalue (Rayleigh quotient at convergence)
    pub value: f64,
    /// Unit eigenvector; sign is arbitrary
    pub vector: Vector3<f64>,
    /// Iterations used
    pub iterations: usize,
}

/// Dominant eigenpair of a symmetric matrix by power iteration.
///
/// Returns `None` if the matrix is numerically zero or the iteration fails
/// to make progress. For repeated eigenvalues any vector of the dominant
/// eigenspace may be returned, which is what the confidence math expects:
/// an isotropic accumulation has no preferred axis and scores accordingly.
pub fn power_iteration(m: &Matrix3<f64>, max_iters: usize, tol: f64) -> Option<DominantEigen> {
    if m.norm() < 1e-12 {
        return None;
    }

    let mut v = Vector3::new(1.0, 1.0, 1.0).normalize();

    for iteration in 1..=max_iters {
        let mut next = m * v;
        if next.norm() < 1e-12 {
            // Started orthogonal to the dominant eigenspace; nudge off it.
            next = m * Vector3::new(1.0, 0.0, 0.0);
            if next.norm() < 1e-12 {
                next = m * Vector3::new(0.0, 1.0, 0.0);
            }
            if next.norm() < 1e-12 {
                return None;
            }
        }
        let next = next.normalize();

        let converged = next.dot(&v).abs() > 1.0 - tol;
        v = next;
        if converged {
            let value = v.dot(&(m * v));
            return Some(DominantEigen {
                value,
                vector: v,
                iterations: iteration,
            });
        }
    }

    // Ran out of iterations; report the current estimate anyway. Slow
    // convergence happens when the top two eigenvalues are close, which the
    // callers' variance-ratio confidence already penalizes.
    let value = v.dot(&(m * v));
    Some(DominantEigen {
        value,
        vector: v,
        iterations: max_iters,
    })
}
