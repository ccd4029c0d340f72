//! Small statistics helpers for capture-window checks.

use nalgebra::Vector3;

/// Arithmetic mean; 0.0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Component-wise mean vector; zeros for an empty slice.
pub fn vector_mean(values: &[Vector3<f64>]) -> Vector3<f64> {
    if values.is_empty() {
        return Vector3::zeros();
    }
    let sum = values.iter().fold(Vector3::zeros(), |acc, v| acc + v);
    sum / values.len() as f64
}
