//! Scalar, vector and transform aliases plus small point/line helpers.

use nalgebra::{Isometry3, Matrix3, Point3, Unit, Vector3};

pub type Real = f64;

pub type Vec3 = Vector3<Real>;
/// World or body-local position.
pub type Pt3 = Point3<Real>;
pub type Mat3 = Matrix3<Real>;
/// Rigid body pose: body frame to world.
pub type Iso3 = Isometry3<Real>;
/// Rotation axis or other unit direction.
pub type Dir3 = Unit<Vector3<Real>>;

/// Arithmetic mean of a set of points.
///
/// Returns `None` for an empty slice.
pub fn centroid(points: &[Pt3]) -> Option<Pt3> {
    if points.is_empty() {
        return None;
    }
    let sum = points.iter().fold(Vec3::zeros(), |acc, p| acc + p.coords);
    Some(Pt3::from(sum / points.len() as Real))
}

/// Closest point to `p` on the infinite line through `origin` along `axis`.
pub fn closest_point_on_line(origin: &Pt3, axis: &Dir3, p: &Pt3) -> Pt3 {
    let t = (p - origin).dot(axis);
    origin + axis.into_inner() * t
}

/// `count` indices spread evenly over `0..len`, always including both ends.
///
/// If `count >= len` every index is returned.
pub fn evenly_spaced_indices(len: usize, count: usize) -> Vec<usize> {
    if count >= len {
        return (0..len).collect();
    }
    if count == 0 {
        return Vec::new();
    }
    if count == 1 {
        return vec![0];
    }
    let step = (len - 1) as Real / (count - 1) as Real;
    let mut out: Vec<usize> = (0..count)
        .map(|i| ((i as Real * step).round() as usize).min(len - 1))
        .collect();
    out.dedup();
    out
}
