//! Per-frame joint centers from distance geometry.
//!
//! A joint center is triangulated from its squared distances to visible
//! adjacent markers and to adjacent joint centers already solved in the same
//! frame. Joints that become solvable only through other joints are picked up
//! by repeating the pass until no new joint is added.

use crate::config::IkInitConfig;
use crate::reference::ReferencePose;
use crate::topology::{DistanceCache, StackedJointId, Topology};
use log::debug;
use mocap_core::{MarkerFrame, Pt3, Real};
use mocap_linear::{
    ensure_same_side_of_plane, is_coplanar, map_to_anchors, reconstruct_from_distance_matrix,
    squared_distance_matrix, MdsError,
};
use nalgebra::DMatrix;
use std::collections::BTreeMap;

/// Joint centers of one frame, keyed by stacked joint.
pub type JointCenterFrame = BTreeMap<StackedJointId, Pt3>;

/// A known point with its squared distance to the joint being solved.
struct Constraint {
    world: Pt3,
    reference: Pt3,
    dist_sq: Real,
}

/// Result of triangulating one frame.
#[derive(Debug, Clone, Default)]
pub struct MdsFrame {
    pub centers: JointCenterFrame,
    /// Mean distance between reconstructed and observed constraint points,
    /// averaged over solved joints. `None` when nothing was solved.
    pub mean_error: Option<Real>,
}

fn constraints(
    joint: StackedJointId,
    topo: &Topology,
    cache: &DistanceCache,
    reference: &ReferencePose,
    frame: &MarkerFrame,
    solved: &JointCenterFrame,
) -> Vec<Constraint> {
    let mut out: Vec<Constraint> = cache
        .joint_markers
        .get(joint)
        .into_iter()
        .flatten()
        .filter_map(|(name, &dist_sq)| {
            Some(Constraint {
                world: *frame.get(name)?,
                reference: *reference.markers.get(name)?,
                dist_sq,
            })
        })
        .collect();
    out.extend(cache.joint_neighbors(joint).into_iter().filter_map(|(other, dist_sq)| {
        Some(Constraint {
            world: *solved.get(&other)?,
            reference: topo.reference_center(reference, other),
            dist_sq,
        })
    }));
    out
}

/// Triangulate a point from its squared distances to `constraints`.
/// Returns the point and the mean constraint reconstruction error.
fn triangulate(
    constraints: &[Constraint],
    reference_center: &Pt3,
    coplanar_threshold: Real,
) -> Result<(Pt3, Real), MdsError> {
    let n = constraints.len();
    let world: Vec<Pt3> = constraints.iter().map(|c| c.world).collect();
    let reference: Vec<Pt3> = constraints.iter().map(|c| c.reference).collect();

    let pairwise = squared_distance_matrix(&world);
    let mut sq = DMatrix::<Real>::zeros(n + 1, n + 1);
    sq.view_mut((0, 0), (n, n)).copy_from(&pairwise);
    for (i, c) in constraints.iter().enumerate() {
        sq[(i, n)] = c.dist_sq;
        sq[(n, i)] = c.dist_sq;
    }

    let cloud = reconstruct_from_distance_matrix(&sq)?;
    let aligned = map_to_anchors(&cloud, &world)?;
    let mut center = Pt3::from(aligned.column(n).into_owned());

    if is_coplanar(&world, coplanar_threshold) || is_coplanar(&reference, coplanar_threshold) {
        center = ensure_same_side_of_plane(&reference, reference_center, &world, &center);
    }

    let error = world
        .iter()
        .enumerate()
        .map(|(i, p)| (aligned.column(i) - p.coords).norm())
        .sum::<Real>()
        / n as Real;
    Ok((center, error))
}

fn solve_round(
    topo: &Topology,
    cache: &DistanceCache,
    reference: &ReferencePose,
    frame: &MarkerFrame,
    solved: &JointCenterFrame,
    cfg: &IkInitConfig,
) -> (JointCenterFrame, Vec<Real>) {
    let mut centers = JointCenterFrame::new();
    let mut errors = Vec::new();
    for joint in (0..topo.num_joints()).filter(|&j| topo.joints[j].tracked) {
        let cs = constraints(joint, topo, cache, reference, frame, solved);
        if cs.len() < cfg.min_markers {
            continue;
        }
        let reference_center = topo.reference_center(reference, joint);
        match triangulate(&cs, &reference_center, cfg.coplanar_threshold) {
            Ok((center, error)) => {
                centers.insert(joint, center);
                errors.push(error);
            }
            Err(e) => debug!("mds: joint '{}' skipped: {}", topo.joints[joint].name, e),
        }
    }
    (centers, errors)
}

/// Triangulate every solvable tracked joint of one frame.
pub fn solve_frame(
    topo: &Topology,
    cache: &DistanceCache,
    reference: &ReferencePose,
    frame: &MarkerFrame,
    cfg: &IkInitConfig,
) -> MdsFrame {
    let mut best = MdsFrame::default();
    let guard = topo.num_joints() + 1;
    for _ in 0..guard {
        let (centers, errors) = solve_round(topo, cache, reference, frame, &best.centers, cfg);
        if centers.len() <= best.centers.len() {
            break;
        }
        best = MdsFrame {
            centers,
            mean_error: (!errors.is_empty())
                .then(|| errors.iter().sum::<Real>() / errors.len() as Real),
        };
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use mocap_core::synthetic::{motion, skeletons};
    use mocap_core::SkeletonModel;

    #[test]
    fn recovers_elbow_center_without_noise() {
        let (arm, markers) = skeletons::planar_arm().unwrap();
        let reference = ReferencePose::unit(&arm, &markers);
        let topo = Topology::build(&arm, &markers, &reference, 0.07, 3);
        let cache = DistanceCache::from_reference(&topo, &reference);

        let elbow = arm.joint_by_name("elbow").unwrap();
        let poses = motion::sweep_joint(&arm, elbow, 0.0, 1.2, 4);
        let frames = motion::simulate_markers(&arm, &markers, &poses, &arm.unit_scales());
        let cfg = IkInitConfig::default();

        for (pose, frame) in poses.iter().zip(&frames) {
            let truth = arm.joint_world_positions(pose, &arm.unit_scales());
            let solved = solve_frame(&topo, &cache, &reference, frame, &cfg);
            for (&j, center) in &solved.centers {
                let member = topo.joints[j].joints[0];
                let err = (center - truth[member]).norm();
                assert!(err < 1e-6, "joint {} off by {}", topo.joints[j].name, err);
            }
            assert_eq!(solved.centers.len(), 2);
            assert!(solved.mean_error.unwrap() < 1e-6);
        }
    }

    #[test]
    fn three_markers_resolve_reflection_from_reference() {
        let (arm, markers) = skeletons::planar_arm().unwrap();
        let reference = ReferencePose::unit(&arm, &markers);
        let topo = Topology::build(&arm, &markers, &reference, 0.07, 3);
        let cache = DistanceCache::from_reference(&topo, &reference);

        let (zero, scales) = (arm.zero_pose(), arm.unit_scales());
        let mut frame = motion::simulate_markers(&arm, &markers, &[zero], &scales).remove(0);
        frame.retain(|name, _| name.starts_with("UA") && name != "UA4");

        let root = topo.joint_by_name("root").unwrap();
        let solved = solve_frame(&topo, &cache, &reference, &frame, &IkInitConfig::default());
        let center = solved.centers[&root];
        let truth = reference.joints[arm.joint_by_name("root").unwrap()];
        assert!((center - truth).norm() < 1e-6, "root center {:?}", center);
    }

    #[test]
    fn hidden_frame_solves_nothing() {
        let (arm, markers) = skeletons::planar_arm().unwrap();
        let reference = ReferencePose::unit(&arm, &markers);
        let topo = Topology::build(&arm, &markers, &reference, 0.07, 3);
        let cache = DistanceCache::from_reference(&topo, &reference);

        let solved = solve_frame(
            &topo,
            &cache,
            &reference,
            &MarkerFrame::new(),
            &IkInitConfig::default(),
        );
        assert!(solved.centers.is_empty());
        assert!(solved.mean_error.is_none());
    }
}
