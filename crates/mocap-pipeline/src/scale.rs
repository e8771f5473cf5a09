//! Body scales from estimated joint-to-joint distances.

use crate::config::IkInitConfig;
use crate::mds_centers::JointCenterFrame;
use crate::reference::ReferencePose;
use crate::topology::{StackedBodyId, StackedJointId, Topology};
use log::{debug, warn};
use mocap_core::{BodyScales, Pt3, Real, SkeletonModel, Vec3};
use mocap_linear::{map_to_anchors, reconstruct_from_distance_matrix, MdsError};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Reference coordinates smaller than this carry no scale information.
const MIN_EXTENT: Real = 1e-6;

/// Scales per scale group and per original body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleEstimate {
    /// One entry per [`SkeletonModel::scale_groups`] group.
    pub group_scales: Vec<Vec3>,
    pub body_scales: BodyScales,
}

/// Mean distance between every pair of adjacent joints that are observed
/// together in at least one frame.
pub fn estimate_joint_distances(
    topo: &Topology,
    centers: &[JointCenterFrame],
) -> BTreeMap<(StackedJointId, StackedJointId), Real> {
    let mut pairs = BTreeSet::new();
    for body in 0..topo.num_bodies() {
        let adjacent = topo.adjacent_joints(body);
        for (i, &a) in adjacent.iter().enumerate() {
            for &b in &adjacent[i + 1..] {
                pairs.insert((a.min(b), a.max(b)));
            }
        }
    }
    pairs
        .into_iter()
        .filter_map(|(a, b)| {
            let (sum, n) = centers
                .iter()
                .filter_map(|c| Some((c.get(&a)? - c.get(&b)?).norm()))
                .fold((0.0, 0usize), |(s, n), d| (s + d, n + 1));
            (n > 0).then(|| ((a, b), sum / n as Real))
        })
        .collect()
}

fn pair_distance(
    distances: &BTreeMap<(StackedJointId, StackedJointId), Real>,
    a: StackedJointId,
    b: StackedJointId,
) -> Option<Real> {
    distances.get(&(a.min(b), a.max(b))).copied()
}

/// Per-axis scale of one body from several joint distances: the observed
/// distance matrix is embedded by MDS, overlaid on the reference local joint
/// positions and compared axis by axis.
fn anisotropic_scale(
    locals: &[Pt3],
    joints: &[StackedJointId],
    distances: &BTreeMap<(StackedJointId, StackedJointId), Real>,
) -> Result<Option<Vec3>, MdsError> {
    let n = locals.len();
    let sq = DMatrix::from_fn(n, n, |i, k| {
        pair_distance(distances, joints[i], joints[k])
            .filter(|_| i != k)
            .map_or_else(|| (locals[i] - locals[k]).norm_squared(), |d| d * d)
    });
    let cloud = reconstruct_from_distance_matrix(&sq)?;
    let mut aligned = map_to_anchors(&cloud, locals)?;
    if let Some(origin) = locals.iter().position(|p| p.coords.norm() < 1e-9) {
        let shift = aligned.column(origin).into_owned();
        for mut col in aligned.column_iter_mut() {
            col -= &shift;
        }
    }

    let mut axes = [None; 3];
    for (k, axis) in axes.iter_mut().enumerate() {
        let ratios: Vec<Real> = locals
            .iter()
            .enumerate()
            .filter(|(_, p)| p[k].abs() > MIN_EXTENT)
            .map(|(i, p)| aligned[(k, i)] / p[k])
            .collect();
        if !ratios.is_empty() {
            *axis = Some(ratios.iter().sum::<Real>() / ratios.len() as Real);
        }
    }
    let observed: Vec<Real> = axes.iter().flatten().copied().collect();
    if observed.is_empty() {
        return Ok(None);
    }
    let fill = observed.iter().sum::<Real>() / observed.len() as Real;
    Ok(Some(Vec3::new(
        axes[0].unwrap_or(fill),
        axes[1].unwrap_or(fill),
        axes[2].unwrap_or(fill),
    )))
}

/// Scale and averaging weight of one stacked body.
fn body_scale(
    topo: &Topology,
    unit: &ReferencePose,
    body: StackedBodyId,
    distances: &BTreeMap<(StackedJointId, StackedJointId), Real>,
    default: (Vec3, Real),
) -> (Vec3, Real) {
    let joints = topo.adjacent_joints(body);
    let frame = unit.bodies[topo.bodies[body].anchor()];
    let locals: Vec<Pt3> = joints
        .iter()
        .map(|&j| frame.inverse_transform_point(&topo.reference_center(unit, j)))
        .collect();

    let mut observed = Vec::new();
    for (i, &a) in joints.iter().enumerate() {
        for (k, &b) in joints.iter().enumerate().skip(i + 1) {
            if let Some(d) = pair_distance(distances, a, b) {
                observed.push((i, k, d));
            }
        }
    }

    let name = &topo.bodies[body].name;
    match observed.as_slice() {
        [] => default,
        [(i, k, d)] => {
            let reference = (locals[*i] - locals[*k]).norm();
            if reference < MIN_EXTENT {
                return default;
            }
            (Vec3::repeat(d / reference), reference * reference)
        }
        _ => {
            let weight: Real = observed
                .iter()
                .map(|(i, k, _)| (locals[*i] - locals[*k]).norm_squared())
                .sum();
            match anisotropic_scale(&locals, &joints, distances) {
                Ok(Some(scale)) => (scale, weight),
                Ok(None) => {
                    warn!("body '{}' has no reference extent, using unit scale", name);
                    (Vec3::repeat(1.0), weight)
                }
                Err(e) => {
                    warn!("body '{}': scale reconstruction failed ({}), using default", name, e);
                    default
                }
            }
        }
    }
}

/// Estimate per-group scales from joint centers.
///
/// `unit` must be the unit-scale reference pose. Bodies without distance data
/// take the height ratio when `target_height` is given, else 1.
pub fn estimate_scales<S: SkeletonModel>(
    model: &S,
    topo: &Topology,
    unit: &ReferencePose,
    centers: &[JointCenterFrame],
    target_height: Option<Real>,
    cfg: &IkInitConfig,
) -> ScaleEstimate {
    let distances = estimate_joint_distances(topo, centers);
    let fallback = target_height
        .map(|h| h / model.height(&model.zero_pose(), &unit.scales))
        .filter(|r| r.is_finite() && *r > 0.0)
        .unwrap_or(1.0);
    let default = (Vec3::repeat(fallback), cfg.default_scale_weight);

    let per_body: Vec<(Vec3, Real)> = (0..topo.num_bodies())
        .map(|b| body_scale(topo, unit, b, &distances, default))
        .collect();

    let mut body_scales = vec![Vec3::repeat(fallback); model.num_bodies()];
    let group_scales = model
        .scale_groups()
        .iter()
        .map(|group| {
            // Every member counts, also when several share one stacked body.
            let (sum, total) = group.iter().fold((Vec3::zeros(), 0.0), |(sum, total), &b| {
                let (scale, w) = per_body[topo.body_of(b)];
                let w = if w > 0.0 { w } else { cfg.min_scale_weight };
                (sum + scale * w, total + w)
            });
            let scale = if total > 0.0 { sum / total } else { default.0 };
            for &b in group {
                body_scales[b] = scale;
            }
            debug!("scale group {:?}: {:?}", group, scale);
            scale
        })
        .collect();

    ScaleEstimate {
        group_scales,
        body_scales,
    }
}
