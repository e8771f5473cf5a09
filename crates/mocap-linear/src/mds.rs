//! Classical multidimensional scaling.
//!
//! Reconstructs a 3D point configuration from squared pairwise distances and
//! overlays it onto known anchor points. The reconstruction has no inherent
//! handedness, so anchoring allows reflections.

use crate::rigid::{procrustes_rotation, RigidAlignError};
use mocap_core::{Mat3, Pt3, Real, Vec3};
use nalgebra::{DMatrix, Matrix3xX};
use thiserror::Error;

/// Floor applied to eigenvalues before taking square roots.
const EIGEN_FLOOR: Real = 1e-16;

#[derive(Debug, Error)]
pub enum MdsError {
    #[error("distance matrix must be square, got {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },
    #[error("distance matrix is empty")]
    Empty,
    #[error("need {needed} reconstructed points to anchor, got {got}")]
    TooFewPoints { needed: usize, got: usize },
    #[error("reconstruction produced non-finite coordinates")]
    NonFinite,
    #[error(transparent)]
    Align(#[from] RigidAlignError),
}

/// Squared pairwise distances between `points`.
pub fn squared_distance_matrix(points: &[Pt3]) -> DMatrix<Real> {
    let n = points.len();
    DMatrix::from_fn(n, n, |i, j| (points[i] - points[j]).norm_squared())
}

/// Reconstruct a `3×N` point cloud from an `N×N` squared-distance matrix.
///
/// Double-centers the matrix (`B = −½ J D J`), keeps the three eigenpairs of
/// largest eigenvalue and returns `diag(√λ) Vᵀ`. Negative eigenvalues are
/// clipped to a tiny positive floor. Rows beyond `N` are zero when `N < 3`.
pub fn reconstruct_from_distance_matrix(sq: &DMatrix<Real>) -> Result<Matrix3xX<Real>, MdsError> {
    let n = sq.nrows();
    if sq.ncols() != n {
        return Err(MdsError::NotSquare {
            rows: n,
            cols: sq.ncols(),
        });
    }
    if n == 0 {
        return Err(MdsError::Empty);
    }

    let j = DMatrix::<Real>::identity(n, n) - DMatrix::from_element(n, n, 1.0 / n as Real);
    let b = (&j * sq * &j) * -0.5;
    let b = (&b + b.transpose()) * 0.5;
    let eig = b.symmetric_eigen();

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));

    let mut cloud = Matrix3xX::<Real>::zeros(n);
    for (row, &k) in order.iter().take(3).enumerate() {
        let scale = eig.eigenvalues[k].max(EIGEN_FLOOR).sqrt();
        for col in 0..n {
            cloud[(row, col)] = scale * eig.eigenvectors[(col, k)];
        }
    }

    if cloud.iter().any(|v| !v.is_finite()) {
        return Err(MdsError::NonFinite);
    }
    Ok(cloud)
}

/// Rigidly overlay the first `anchors.len()` columns of `cloud` onto
/// `anchors` (reflection allowed) and apply the same map to every column.
pub fn map_to_anchors(
    cloud: &Matrix3xX<Real>,
    anchors: &[Pt3],
) -> Result<Matrix3xX<Real>, MdsError> {
    let n = anchors.len();
    if n == 0 {
        return Err(MdsError::Empty);
    }
    if cloud.ncols() < n {
        return Err(MdsError::TooFewPoints {
            needed: n,
            got: cloud.ncols(),
        });
    }

    let source_c: Vec3 = cloud.columns(0, n).column_mean();
    let target_c: Vec3 = anchors.iter().fold(Vec3::zeros(), |acc, p| acc + p.coords) / n as Real;

    let mut h = Mat3::zeros();
    for (i, a) in anchors.iter().enumerate() {
        h += (a.coords - target_c) * (cloud.column(i) - source_c).transpose();
    }
    let r = procrustes_rotation(&h, true)?;

    let mut out = Matrix3xX::<Real>::zeros(cloud.ncols());
    for (i, col) in cloud.column_iter().enumerate() {
        out.set_column(i, &(r * (col - source_c) + target_c));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Isometry3, Translation3, UnitQuaternion};

    fn points() -> Vec<Pt3> {
        vec![
            Pt3::new(0.05, -0.02, 0.03),
            Pt3::new(-0.04, -0.1, 0.02),
            Pt3::new(0.03, -0.2, -0.04),
            Pt3::new(-0.02, -0.26, -0.03),
        ]
    }

    #[test]
    fn recovers_hidden_point_from_distances() {
        let world_tf = Isometry3::from_parts(
            Translation3::new(0.4, 1.1, -0.3),
            UnitQuaternion::from_euler_angles(0.3, 1.0, -0.5),
        );
        let anchors: Vec<Pt3> = points().iter().map(|p| world_tf * p).collect();
        let hidden = world_tf * Pt3::new(0.0, 0.0, 0.0);

        let mut all = anchors.clone();
        all.push(hidden);
        let sq = squared_distance_matrix(&all);

        let cloud = reconstruct_from_distance_matrix(&sq).unwrap();
        let mapped = map_to_anchors(&cloud, &anchors).unwrap();
        let est = Pt3::from(mapped.column(4).into_owned());
        let err = (est - hidden).norm();
        assert!(err < 1e-6, "joint center error {}", err);
    }

    #[test]
    fn cloud_preserves_distances() {
        let p = points();
        let sq = squared_distance_matrix(&p);
        let cloud = reconstruct_from_distance_matrix(&sq).unwrap();
        for i in 0..p.len() {
            for j in 0..p.len() {
                let d = (cloud.column(i) - cloud.column(j)).norm_squared();
                assert!(
                    (d - sq[(i, j)]).abs() < 1e-10,
                    "pair ({}, {}): {} vs {}",
                    i,
                    j,
                    d,
                    sq[(i, j)]
                );
            }
        }
    }

    #[test]
    fn small_inputs_are_padded() {
        let p = vec![Pt3::new(0.0, 0.0, 0.0), Pt3::new(0.3, 0.0, 0.0)];
        let cloud = reconstruct_from_distance_matrix(&squared_distance_matrix(&p)).unwrap();
        assert_eq!(cloud.ncols(), 2);
        assert!(((cloud.column(0) - cloud.column(1)).norm() - 0.3).abs() < 1e-12);
        assert!(reconstruct_from_distance_matrix(&DMatrix::zeros(2, 3)).is_err());
    }
}
