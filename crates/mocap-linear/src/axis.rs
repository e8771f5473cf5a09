//! Rotation-axis fits from marker traces.
//!
//! Both fits return the direction associated with the smallest
//! eigen/singular value together with that value. A value near zero means the
//! traces are confined to planes perpendicular to a single axis.

use mocap_core::{Dir3, Mat3, Pt3, Real, Vec3};
use nalgebra::Unit;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum AxisFitError {
    #[error("no samples to fit an axis")]
    NoData,
    #[error("degenerate axis estimate")]
    Degenerate,
}

/// An axis direction and the confidence value it was selected by.
#[derive(Debug, Clone, Copy)]
pub struct AxisFit {
    pub axis: Dir3,
    pub singular_value: Real,
}

fn smallest_direction(m: &Mat3) -> Result<(Dir3, Real), AxisFitError> {
    let sym = (m + m.transpose()) * 0.5;
    let eig = sym.symmetric_eigen();
    let (k, value) = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(k, v)| (k, *v))
        .ok_or(AxisFitError::Degenerate)?;
    let dir: Vec3 = eig.eigenvectors.column(k).into_owned();
    let axis = Unit::try_new(dir, 1e-12).ok_or(AxisFitError::Degenerate)?;
    Ok((axis, value))
}

/// Axis from the SVD of mean-centered trace samples.
///
/// Samples are taken relative to `center` and then to their own trace mean,
/// stacked as rows, and the right singular vector of smallest singular value
/// is returned.
pub fn fit_axis_svd(traces: &[Vec<Pt3>], center: &Pt3) -> Result<AxisFit, AxisFitError> {
    let mut scatter = Mat3::zeros();
    let mut count = 0usize;
    for trace in traces.iter().filter(|t| !t.is_empty()) {
        let sum = trace.iter().fold(Vec3::zeros(), |acc, p| acc + (p - center));
        let mean = sum / trace.len() as Real;
        for p in trace {
            let row = (p - center) - mean;
            scatter += row * row.transpose();
            count += 1;
        }
    }
    if count == 0 {
        return Err(AxisFitError::NoData);
    }
    let (axis, eigenvalue) = smallest_direction(&scatter)?;
    Ok(AxisFit {
        axis,
        singular_value: eigenvalue.max(0.0).sqrt(),
    })
}

/// Gamage–Lasenby axis: smallest eigenvector of `Σ_k (E[ppᵀ] − E[p]E[p]ᵀ)`
/// summed over traces.
pub fn fit_axis_gamage_lasenby(traces: &[Vec<Pt3>]) -> Result<AxisFit, AxisFitError> {
    let mut a = Mat3::zeros();
    let mut used = 0usize;
    for trace in traces.iter().filter(|t| !t.is_empty()) {
        let n = trace.len() as Real;
        let mut mean = Vec3::zeros();
        let mut outer = Mat3::zeros();
        for p in trace {
            mean += p.coords;
            outer += p.coords * p.coords.transpose();
        }
        mean /= n;
        outer /= n;
        a += outer - mean * mean.transpose();
        used += 1;
    }
    if used == 0 {
        return Err(AxisFitError::NoData);
    }
    let (axis, value) = smallest_direction(&a)?;
    Ok(AxisFit {
        axis,
        singular_value: value.max(0.0),
    })
}
