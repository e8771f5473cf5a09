//! Weighted rigid registration (Kabsch / Procrustes).

use mocap_core::{Iso3, Mat3, Pt3, Real, Vec3};
use nalgebra::{Rotation3, Translation3, UnitQuaternion};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum RigidAlignError {
    #[error("need at least one point pair")]
    Empty,
    #[error("point counts differ: {local} local vs {world} world")]
    SizeMismatch { local: usize, world: usize },
    #[error("got {weights} weights for {points} points")]
    WeightCount { weights: usize, points: usize },
    #[error("weights must be positive and finite")]
    InvalidWeight,
    #[error("svd failed in rigid alignment")]
    SvdFailed,
}

/// Orthogonal factor `R = U Vᵀ` maximizing `tr(Rᵀ H)` for a cross-covariance `H`.
///
/// With `allow_reflection == false` the smallest singular direction is flipped
/// whenever `det(U Vᵀ) < 0`, giving the closest proper rotation.
pub(crate) fn procrustes_rotation(
    h: &Mat3,
    allow_reflection: bool,
) -> Result<Mat3, RigidAlignError> {
    let svd = h.svd(true, true);
    let mut u = svd.u.ok_or(RigidAlignError::SvdFailed)?;
    let v_t = svd.v_t.ok_or(RigidAlignError::SvdFailed)?;
    let r = u * v_t;
    if allow_reflection || r.determinant() >= 0.0 {
        return Ok(r);
    }
    let smallest = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(2);
    u.column_mut(smallest).neg_mut();
    Ok(u * v_t)
}

/// Weighted least-squares rigid transform `T` minimizing
/// `Σ wᵢ ‖T·localᵢ − worldᵢ‖²`.
///
/// Always returns a proper rotation. Collinear or single-point input is
/// underdetermined; a valid transform is still returned.
pub fn rigid_align(
    local: &[Pt3],
    world: &[Pt3],
    weights: &[Real],
) -> Result<Iso3, RigidAlignError> {
    if local.len() != world.len() {
        return Err(RigidAlignError::SizeMismatch {
            local: local.len(),
            world: world.len(),
        });
    }
    if weights.len() != local.len() {
        return Err(RigidAlignError::WeightCount {
            weights: weights.len(),
            points: local.len(),
        });
    }
    if local.is_empty() {
        return Err(RigidAlignError::Empty);
    }
    if weights.iter().any(|w| !(w.is_finite() && *w > 0.0)) {
        return Err(RigidAlignError::InvalidWeight);
    }

    let w_sum: Real = weights.iter().sum();
    let mut lc = Vec3::zeros();
    let mut wc = Vec3::zeros();
    for ((l, w), &wi) in local.iter().zip(world).zip(weights) {
        lc += l.coords * wi;
        wc += w.coords * wi;
    }
    lc /= w_sum;
    wc /= w_sum;

    let mut h = Mat3::zeros();
    for ((l, w), &wi) in local.iter().zip(world).zip(weights) {
        h += (w.coords - wc) * (l.coords - lc).transpose() * wi;
    }

    let r = procrustes_rotation(&h, false)?;
    let rot = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
    let t = wc - rot * lc;
    Ok(Iso3::from_parts(Translation3::from(t), rot))
}

/// [`rigid_align`] with unit weights.
pub fn rigid_align_unweighted(local: &[Pt3], world: &[Pt3]) -> Result<Iso3, RigidAlignError> {
    rigid_align(local, world, &vec![1.0; local.len()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn make_iso(angles: (Real, Real, Real), t: (Real, Real, Real)) -> Iso3 {
        Iso3::from_parts(
            Translation3::new(t.0, t.1, t.2),
            UnitQuaternion::from_euler_angles(angles.0, angles.1, angles.2),
        )
    }

    fn cloud() -> Vec<Pt3> {
        vec![
            Pt3::new(0.1, 0.0, 0.0),
            Pt3::new(0.0, 0.2, 0.0),
            Pt3::new(0.0, 0.0, 0.3),
            Pt3::new(0.1, 0.1, 0.1),
            Pt3::new(-0.2, 0.05, 0.02),
        ]
    }

    #[test]
    fn recovers_known_transform() {
        let gt = make_iso((0.4, -0.7, 2.1), (0.3, -1.2, 0.8));
        let local = cloud();
        let world: Vec<Pt3> = local.iter().map(|p| gt * p).collect();

        let est = rigid_align_unweighted(&local, &world).unwrap();
        let dt = (est.translation.vector - gt.translation.vector).norm();
        let dr = est.rotation.angle_to(&gt.rotation);
        assert!(dt < 1e-10, "translation error {}", dt);
        assert!(dr < 1e-10, "rotation error {}", dr);

        let r = est.rotation.to_rotation_matrix().into_inner();
        assert!((r.determinant() - 1.0).abs() < 1e-12);
        assert!((r.transpose() * r - Mat3::identity()).norm() < 1e-12);
    }

    #[test]
    fn never_returns_reflection() {
        let local = cloud();
        let world: Vec<Pt3> = local.iter().map(|p| Pt3::new(-p.x, p.y, p.z)).collect();
        let est = rigid_align_unweighted(&local, &world).unwrap();
        let det = est.rotation.to_rotation_matrix().into_inner().determinant();
        assert!((det - 1.0).abs() < 1e-12, "det {}", det);
    }

    #[test]
    fn heavy_weights_dominate() {
        let gt = make_iso((0.0, 0.0, 0.5), (0.0, 0.0, 0.0));
        let local = cloud();
        let mut world: Vec<Pt3> = local.iter().map(|p| gt * p).collect();
        world[4] += Vector3::new(0.5, 0.5, 0.5);
        let mut weights = vec![1.0; 5];
        weights[4] = 1e-9;

        let est = rigid_align(&local, &world, &weights).unwrap();
        assert!(est.rotation.angle_to(&gt.rotation) < 1e-6);
    }

    #[test]
    fn rejects_bad_input() {
        let p = cloud();
        assert_eq!(rigid_align(&[], &[], &[]), Err(RigidAlignError::Empty));
        assert!(matches!(
            rigid_align(&p, &p[..2], &[1.0; 5]),
            Err(RigidAlignError::SizeMismatch { .. })
        ));
        assert_eq!(
            rigid_align(&p, &p, &[1.0, 1.0, 0.0, 1.0, 1.0]),
            Err(RigidAlignError::InvalidWeight)
        );
    }
}
