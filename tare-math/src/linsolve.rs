//! Dense linear solve by Gaussian elimination with partial pivoting.
//!
//! The joint-center estimator accumulates 6x6 normal equations; the solver
//! is generic over the (small, compile-time) dimension so tests can exercise
//! it on 3x3 systems too.

use nalgebra::{SMatrix, SVector};
use thiserror::Error;

/// Pivots below this magnitude mean the normal equations are rank deficient.
const MIN_PIVOT: f64 = 1e-12;

#[derive(Debug, Error, PartialEq)]
pub enum SolveError {
    #[error("singular system: pivot {pivot:.3e} in column {column}")]
    Singular { column: usize, pivot: f64 },
}

/// Solve `a * x = b` for square `a` with partial pivoting.
pub fn solve<const N: usize>(
    a: &SMatrix<f64, N, N>,
    b: &SVector<f64, N>,
) -> Result<SVector<f64, N>, SolveError> {
    let mut m = *a;
    let mut rhs = *b;

    // Forward elimination
    for col in 0..N {
        // Partial pivot: largest magnitude on or below the diagonal
        let mut pivot_row = col;
        let mut pivot_val = m[(col, col)].abs();
        for row in (col + 1)..N {
            let candidate = m[(row, col)].abs();
            if candidate > pivot_val {
                pivot_val = candidate;
                pivot_row = row;
            }
        }

        if pivot_val < MIN_PIVOT {
            return Err(SolveError::Singular {
                column: col,
                pivot: pivot_val,
            });
        }

        if pivot_row != col {
            m.swap_rows(col, pivot_row);
            rhs.swap_rows(col, pivot_row);
        }

        let pivot = m[(col, col)];
        for row in (col + 1)..N {
            let factor = m[(row, col)] / pivot;
            if factor == 0.0 {
                continue;
            }
            for k in col..N {
                m[(row, k)] -= factor * m[(col, k)];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    // Back substitution
    let mut x = SVector::<f64, N>::zeros();
    for col in (0..N).rev() {
        let mut sum = rhs[col];
        for k in (col + 1)..N {
            sum -= m[(col, k)] * x[k];
        }
        x[col] = sum / m[(col, col)];
    }

    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3, SMatrix, SVector, Vector3};

    #[test]
    fn test_solve_known_3x3() {
        let a = Matrix3::new(2.0, 1.0, -1.0, -3.0, -1.0, 2.0, -2.0, 1.0, 2.0);
        let b = Vector3::new(8.0, -11.0, -3.0);

        let x = solve(&a, &b).unwrap();

        // Known solution (2, 3, -1)
        assert_relative_eq!(x[0], 2.0, epsilon = 1e-10);
        assert_relative_eq!(x[1], 3.0, epsilon = 1e-10);
        assert_relative_eq!(x[2], -1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_solve_requires_pivoting() {
        // Zero leading diagonal forces a row swap
        let a = Matrix3::new(0.0, 1.0, 1.0, 1.0, 0.0, 1.0, 1.0, 1.0, 0.0);
        let b = Vector3::new(3.0, 4.0, 5.0);

        let x = solve(&a, &b).unwrap();
        let reconstructed = a * x;
        for i in 0..3 {
            assert_relative_eq!(reconstructed[i], b[i], epsilon = 1e-10);
        }
    }

    #[test]
    fn test_solve_6x6_roundtrip() {
        // Symmetric positive-definite matrix of the normal-equation shape
        let mut a = SMatrix::<f64, 6, 6>::identity() * 2.0;
        for i in 0..6 {
            for j in 0..6 {
                if i != j {
                    a[(i, j)] = 0.3 / (1.0 + (i as f64 - j as f64).abs());
                }
            }
        }
        let expected = SVector::<f64, 6>::from_row_slice(&[0.1, -0.2, 0.05, 0.3, -0.15, 0.08]);
        let b = a * expected;

        let x = solve(&a, &b).unwrap();
        for i in 0..6 {
            assert_relative_eq!(x[i], expected[i], epsilon = 1e-10);
        }
    }

    #[test]
    fn test_singular_system_detected() {
        // Rank 2: third row is the sum of the first two
        let a = Matrix3::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 5.0, 7.0, 9.0);
        let b = Vector3::new(1.0, 2.0, 3.0);

        let err = solve(&a, &b).unwrap_err();
        assert!(matches!(err, SolveError::Singular { .. }));
    }
}
