//! Plane tests used to resolve reflection ambiguity.

use mocap_core::{Pt3, Real, Vec3};

/// Index of the first point that spans a plane with the first two.
fn third_plane_point(points: &[Pt3]) -> Option<usize> {
    let p0 = points.first()?;
    let e1 = points.get(1)? - p0;
    (2..points.len()).find(|&k| e1.cross(&(points[k] - p0)).norm() > 1e-12)
}

/// Unit normal of the plane through points `0`, `1` and `third`.
fn normal_through(points: &[Pt3], third: usize) -> Option<Vec3> {
    let p0 = points.first()?;
    let n = (points.get(1)? - p0).cross(&(points.get(third)? - p0));
    (n.norm() > 1e-12).then(|| n.normalize())
}

/// True if every point lies within `threshold` of the plane through the
/// first three (non-collinear) points. Fewer than four points are always
/// coplanar, and so are fully collinear sets.
pub fn is_coplanar(points: &[Pt3], threshold: Real) -> bool {
    if points.len() < 4 {
        return true;
    }
    let Some(normal) = third_plane_point(points).and_then(|k| normal_through(points, k)) else {
        return true;
    };
    let p0 = points[0];
    points.iter().all(|p| (p - p0).dot(&normal).abs() <= threshold)
}

/// Reflect `point` through the plane of `plane` if it lies on the opposite
/// side from where `reference_point` lies relative to `reference_plane`.
///
/// Both planes are given as corresponding point lists. The same three
/// indices span both planes, chosen as the first non-collinear triple of
/// `reference_plane`. Degenerate planes leave `point` unchanged.
pub fn ensure_same_side_of_plane(
    reference_plane: &[Pt3],
    reference_point: &Pt3,
    plane: &[Pt3],
    point: &Pt3,
) -> Pt3 {
    let Some(third) = third_plane_point(reference_plane) else {
        return *point;
    };
    let (Some(ref_normal), Some(normal)) = (
        normal_through(reference_plane, third),
        normal_through(plane, third),
    ) else {
        return *point;
    };
    let ref_side = (reference_point - reference_plane[0]).dot(&ref_normal);
    let side = (point - plane[0]).dot(&normal);
    if ref_side * side < 0.0 {
        point - normal * (2.0 * side)
    } else {
        *point
    }
}
