//! Functional-axis estimation from angular-velocity samples.
//!
//! During a guided motion the target segment rotates predominantly about
//! one axis, so the dominant principal component of its (bias-subtracted)
//! gyro samples is the motion axis in the sensor frame. Samples must be
//! centered before the covariance is formed: an uncentered second moment is
//! dominated by any constant rate offset and returns the offset direction
//! instead of the motion axis.

use nalgebra::{Matrix3, Vector3};

use crate::config::EstimatorConfig;
use crate::error::CalError;

/// A functional-axis estimate in the sensor frame. The sign of `axis` is
/// ambiguous; callers resolve it against an expected reference direction.
#[derive(Debug, Clone)]
pub struct AxisEstimate {
    /// Unit motion axis, sensor frame
    pub axis: Vector3<f64>,
    /// Explained-variance ratio, penalized when flagged
    pub confidence: f64,
    /// Angle between first-half and second-half estimates, degrees
    pub split_half_divergence_deg: Option<f64>,
    /// True when the split halves disagreed beyond the configured bound
    pub flagged_nonstationary: bool,
    pub samples: usize,
}

fn centered_covariance(samples: &[Vector3<f64>]) -> Matrix3<f64> {
    let n = samples.len() as f64;
    let centroid = samples.iter().sum::<Vector3<f64>>() / n;
    let mut cov = Matrix3::zeros();
    for s in samples {
        let d = s - centroid;
        cov += d * d.transpose();
    }
    cov / n
}

/// Dominant principal direction of centered samples with its
/// explained-variance ratio. Returns `None` when the samples carry no
/// rotational energy (degenerate covariance).
fn principal_direction(samples: &[Vector3<f64>]) -> Option<(Vector3<f64>, f64)> {
    let cov = centered_covariance(samples);
    let trace = cov.trace();
    if trace < 1e-12 {
        return None;
    }
    let eigen = cov.symmetric_eigen();
    let mut max_idx = 0;
    for i in 1..3 {
        if eigen.eigenvalues[i] > eigen.eigenvalues[max_idx] {
            max_idx = i;
        }
    }
    let axis = eigen.eigenvectors.column(max_idx).into_owned().normalize();
    Some((axis, eigen.eigenvalues[max_idx] / trace))
}

/// Estimate the motion axis from bias-subtracted gyro samples.
///
/// Degenerate input (no rotational energy) yields a zero-confidence
/// estimate along an arbitrary axis rather than an error; the quality gates
/// discard it downstream.
pub fn estimate_axis(
    samples: &[Vector3<f64>],
    config: &EstimatorConfig,
) -> Result<AxisEstimate, CalError> {
    if samples.len() < config.min_axis_samples {
        return Err(CalError::DataInsufficiency {
            context: "functional axis estimation".into(),
            have: samples.len(),
            need: config.min_axis_samples,
        });
    }

    let Some((axis, raw_confidence)) = principal_direction(samples) else {
        log::debug!("axis estimation: no rotational energy in {} samples", samples.len());
        return Ok(AxisEstimate {
            axis: Vector3::x(),
            confidence: 0.0,
            split_half_divergence_deg: None,
            flagged_nonstationary: false,
            samples: samples.len(),
        });
    };

    // Split-half stability: a motion that wanders between halves produces
    // diverging axes even when the pooled covariance looks clean.
    let mid = samples.len() / 2;
    let halves = (
        principal_direction(&samples[..mid]),
        principal_direction(&samples[mid..]),
    );
    let (divergence_deg, flagged) = match halves {
        (Some((a, _)), Some((b, _))) => {
            let d = a.dot(&b).abs().clamp(0.0, 1.0).acos().to_degrees();
            (Some(d), d > config.split_half_max_divergence_deg)
        }
        _ => (None, false),
    };

    let confidence = if flagged {
        raw_confidence * config.split_half_penalty
    } else {
        raw_confidence
    };

    Ok(AxisEstimate {
        axis,
        confidence: confidence.clamp(0.0, 1.0),
        split_half_divergence_deg: divergence_deg,
        flagged_nonstationary: flagged,
        samples: samples.len(),
    })
}

/// Live variant used while a functional step is running: tolerant of short
/// input, no split-half pass. Drives the self-extension decision only.
pub fn live_confidence(samples: &[Vector3<f64>], config: &EstimatorConfig) -> Option<f64> {
    if samples.len() < config.min_axis_samples {
        return None;
    }
    principal_direction(samples).map(|(_, evr)| evr)
}
