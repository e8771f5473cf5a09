//! Slide axis-ambiguous joint centers along their axis.
//!
//! A hinge-like joint is only located up to a line. Its position along that
//! line is recovered from a neighbouring joint with an unambiguous center:
//! the ratio of the neighbour offset's along-axis and off-axis components is
//! measured on the reference skeleton and imposed frame by frame.

use crate::config::IkInitConfig;
use crate::mds_centers::JointCenterFrame;
use crate::pivot::JointAxisFrame;
use crate::reference::ReferencePose;
use crate::topology::{StackedBodyId, StackedJointId, Topology};
use log::debug;
use mocap_core::{closest_point_on_line, Dir3, Marker, MarkerFrame, Pt3, Real, SkeletonModel, Vec3};
use mocap_linear::{fit_axis_gamage_lasenby, rigid_align_unweighted};
use std::collections::BTreeSet;
use std::f64::consts::PI;

/// Below this off-axis distance a neighbour cannot fix the along-axis position.
const MIN_PERPENDICULAR: Real = 1e-9;

/// Summary of a recentering run.
#[derive(Debug, Clone, Default)]
pub struct RecenterReport {
    /// Joints moved in at least one frame, in the order they were settled.
    pub recentered: Vec<StackedJointId>,
    pub moves: usize,
    /// Moves rejected for exceeding the shift limit.
    pub rejected: usize,
}

/// Reference-pose axis of a stacked joint's first DOF.
///
/// Pure rotations report their axis directly. Other joints are swept through
/// their first DOF's range with three unit virtual markers on the child body,
/// and the axis is fitted to the resulting traces.
pub fn reference_axis<S: SkeletonModel>(
    model: &S,
    topo: &Topology,
    reference: &ReferencePose,
    joint: StackedJointId,
    steps: usize,
) -> Option<Dir3> {
    let first = *topo.joints[joint].joints.first()?;
    let zero = model.zero_pose();
    if let Some(axis) = model.joint_world_axis(first, &zero, &reference.scales) {
        return Some(axis);
    }

    let dofs = model.joint_dofs(first);
    if dofs.is_empty() || steps < 2 {
        return None;
    }
    let dof = dofs.start;
    let (lo, hi) = model.dof_limits(dof);
    let lo = if lo.is_finite() { lo } else { -PI };
    let hi = if hi.is_finite() { hi } else { PI };

    let body = model.joint_child_body(first);
    let virtual_markers = [Vec3::x(), Vec3::y(), Vec3::z()].map(|o| Marker::new("", body, o));
    let mut traces = vec![Vec::with_capacity(steps); 3];
    let mut pose = zero;
    for i in 0..steps {
        pose[dof] = lo + (hi - lo) * i as Real / (steps - 1) as Real;
        let bodies = model.body_world_transforms(&pose, &reference.scales);
        for (trace, m) in traces.iter_mut().zip(&virtual_markers) {
            trace.push(model.marker_world_position(m, &bodies, &reference.scales));
        }
    }
    fit_axis_gamage_lasenby(&traces).ok().map(|fit| fit.axis)
}

/// Body whose rigid motion carries the reference axis into the world when
/// `joint` is recentered against `neighbor`.
fn intervening_body(
    topo: &Topology,
    joint: StackedJointId,
    neighbor: StackedJointId,
) -> Option<StackedBodyId> {
    let j = &topo.joints[joint];
    if topo.joints[neighbor].parent_body == Some(j.child_body) {
        Some(j.child_body)
    } else {
        j.parent_body
    }
}

fn neighbors(topo: &Topology, joint: StackedJointId) -> Vec<StackedJointId> {
    let j = &topo.joints[joint];
    let up = j.parent_body.map(|p| topo.bodies[p].parent_joint);
    up.into_iter()
        .chain(topo.bodies[j.child_body].child_joints.iter().copied())
        .collect()
}

struct Neighbor {
    joint: StackedJointId,
    ratio: Real,
    body: StackedBodyId,
}

/// World rotation of `body` relative to the reference pose, applied to `axis`.
fn transport_axis(
    topo: &Topology,
    reference: &ReferencePose,
    body: StackedBodyId,
    frame: &MarkerFrame,
    axis: &Dir3,
    min_markers: usize,
) -> Option<Dir3> {
    let (from, to): (Vec<Pt3>, Vec<Pt3>) = topo.bodies[body]
        .markers
        .iter()
        .filter_map(|m| Some((*reference.markers.get(m)?, *frame.get(m)?)))
        .unzip();
    if from.len() < min_markers {
        return None;
    }
    let t = rigid_align_unweighted(&from, &to).ok()?;
    Some(t.rotation * *axis)
}

/// Recenter every axis joint that has a usable center-joint neighbour, to a
/// fixpoint. Updates `centers` in place and replaces each used frame axis
/// with its sign-corrected version.
pub fn recenter_axis_joints<S: SkeletonModel>(
    model: &S,
    topo: &Topology,
    reference: &ReferencePose,
    frames: &[MarkerFrame],
    centers: &mut [JointCenterFrame],
    axes: &mut [JointAxisFrame],
    cfg: &IkInitConfig,
) -> RecenterReport {
    let mut axis_joints: Vec<StackedJointId> = (0..topo.num_joints())
        .filter(|j| {
            centers
                .iter()
                .zip(axes.iter())
                .any(|(c, a)| c.contains_key(j) && a.contains_key(j))
        })
        .collect();
    let mut center_joints: BTreeSet<StackedJointId> = (0..topo.num_joints())
        .filter(|j| !axis_joints.contains(j) && centers.iter().any(|c| c.contains_key(j)))
        .collect();

    let mut report = RecenterReport::default();
    let guard = axis_joints.len() + 1;
    for _ in 0..guard {
        let mut settled = None;
        for (k, &joint) in axis_joints.iter().enumerate() {
            let moved = recenter_joint(
                model,
                topo,
                reference,
                frames,
                centers,
                axes,
                cfg,
                joint,
                &center_joints,
                &mut report,
            );
            if moved {
                settled = Some(k);
                break;
            }
        }
        let Some(k) = settled else {
            break;
        };
        let joint = axis_joints.remove(k);
        center_joints.insert(joint);
        report.recentered.push(joint);
    }
    report
}

#[allow(clippy::too_many_arguments)]
fn recenter_joint<S: SkeletonModel>(
    model: &S,
    topo: &Topology,
    reference: &ReferencePose,
    frames: &[MarkerFrame],
    centers: &mut [JointCenterFrame],
    axes: &mut [JointAxisFrame],
    cfg: &IkInitConfig,
    joint: StackedJointId,
    center_joints: &BTreeSet<StackedJointId>,
    report: &mut RecenterReport,
) -> bool {
    let Some(ref_axis) = reference_axis(model, topo, reference, joint, cfg.axis_sweep_steps) else {
        debug!("recenter: no reference axis for '{}'", topo.joints[joint].name);
        return false;
    };
    let ref_center = topo.reference_center(reference, joint);

    let mut candidates: Vec<(usize, Neighbor)> = neighbors(topo, joint)
        .into_iter()
        .filter(|n| center_joints.contains(n))
        .filter_map(|n| {
            let d = topo.reference_center(reference, n) - ref_center;
            let along = d.dot(&ref_axis);
            let perp = (d - ref_axis.into_inner() * along).norm();
            if perp < MIN_PERPENDICULAR {
                return None;
            }
            let body = intervening_body(topo, joint, n)?;
            let shared = centers
                .iter()
                .filter(|c| c.contains_key(&joint) && c.contains_key(&n))
                .count();
            Some((
                shared,
                Neighbor {
                    joint: n,
                    ratio: along / perp,
                    body,
                },
            ))
        })
        .collect();
    candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.joint.cmp(&b.1.joint)));

    let mut moved = false;
    for (f, frame) in frames.iter().enumerate() {
        let (Some(&center), Some(&axis)) = (centers[f].get(&joint), axes[f].get(&joint)) else {
            continue;
        };
        for (_, n) in &candidates {
            let Some(&other) = centers[f].get(&n.joint) else {
                continue;
            };
            let Some(expected) =
                transport_axis(topo, reference, n.body, frame, &ref_axis, cfg.min_markers)
            else {
                continue;
            };
            let axis = if axis.dot(&expected) < 0.0 { -axis } else { axis };

            let closest = closest_point_on_line(&center, &axis, &other);
            let perp = (other - closest).norm();
            let corrected = closest - axis.into_inner() * (perp * n.ratio);
            let shift = (corrected - center).norm();
            if shift > cfg.max_recenter_shift {
                debug!(
                    "recenter: '{}' frame {}: rejected {:.3} m move via '{}'",
                    topo.joints[joint].name, f, shift, topo.joints[n.joint].name
                );
                report.rejected += 1;
                continue;
            }
            centers[f].insert(joint, corrected);
            axes[f].insert(joint, axis);
            report.moves += 1;
            moved = true;
            break;
        }
    }
    moved
}

#[cfg(test)]
mod tests {
    use super::*;
    use mocap_core::synthetic::{motion, skeletons};
    use mocap_core::{JointKind, KinematicTree};
    use nalgebra::DVector;

    struct Scene {
        model: KinematicTree,
        topo: Topology,
        reference: ReferencePose,
        frames: Vec<MarkerFrame>,
        centers: Vec<JointCenterFrame>,
        axes: Vec<JointAxisFrame>,
    }

    impl Scene {
        /// Exact centers for every joint and exact axes for the hinges.
        fn new(model: KinematicTree, markers: &[Marker], poses: &[DVector<Real>]) -> Self {
            let scales = model.unit_scales();
            let reference = ReferencePose::unit(&model, markers);
            let topo = Topology::build(&model, markers, &reference, 0.07, 3);
            let frames = motion::simulate_markers(&model, markers, poses, &scales);
            let mut centers = Vec::new();
            let mut axes = Vec::new();
            for pose in poses {
                let truth = model.joint_world_positions(pose, &scales);
                let mut c = JointCenterFrame::new();
                let mut a = JointAxisFrame::new();
                for (j, joint) in topo.joints.iter().enumerate() {
                    let first = joint.joints[0];
                    c.insert(j, truth[first]);
                    if let Some(axis) = model.joint_world_axis(first, pose, &scales) {
                        a.insert(j, axis);
                    }
                }
                centers.push(c);
                axes.push(a);
            }
            Self {
                model,
                topo,
                reference,
                frames,
                centers,
                axes,
            }
        }

        fn joint(&self, name: &str) -> StackedJointId {
            self.topo.joint_by_name(name).unwrap()
        }

        /// Slide a joint's center along its axis in every frame.
        fn slide(&mut self, name: &str, by: Real) {
            let j = self.joint(name);
            for (c, a) in self.centers.iter_mut().zip(&self.axes) {
                *c.get_mut(&j).unwrap() += a[&j].into_inner() * by;
            }
        }

        fn run(&mut self, cfg: &IkInitConfig) -> RecenterReport {
            recenter_axis_joints(
                &self.model,
                &self.topo,
                &self.reference,
                &self.frames,
                &mut self.centers,
                &mut self.axes,
                cfg,
            )
        }
    }

    /// The arm pitching at the root while the elbow bends.
    fn arm_scene() -> Scene {
        let (arm, markers) = skeletons::planar_arm().unwrap();
        let root = arm.joint_dofs(arm.joint_by_name("root").unwrap()).start;
        let elbow = arm.joint_dofs(arm.joint_by_name("elbow").unwrap()).start;
        let poses: Vec<DVector<Real>> = (0..8)
            .map(|i| {
                let mut pose = arm.zero_pose();
                pose[root + 1] = 0.1 * i as Real;
                pose[elbow] = 0.2 * i as Real;
                pose
            })
            .collect();
        Scene::new(arm, &markers, &poses)
    }

    fn assert_centers_match(
        moved: &[JointCenterFrame],
        truth: &[JointCenterFrame],
        joint: StackedJointId,
    ) {
        for (f, (m, t)) in moved.iter().zip(truth).enumerate() {
            let err = (m[&joint] - t[&joint]).norm();
            assert!(err < 1e-9, "frame {}: center error {:.3e}", f, err);
        }
    }

    #[test]
    fn slid_center_returns_to_true_position() {
        let mut scene = arm_scene();
        let truth = scene.centers.clone();
        let elbow = scene.joint("elbow");
        scene.slide("elbow", 0.05);

        let report = scene.run(&IkInitConfig::default());

        assert_eq!(report.recentered, vec![elbow]);
        assert_eq!(report.moves, scene.frames.len());
        assert_eq!(report.rejected, 0);
        assert_centers_match(&scene.centers, &truth, elbow);
    }

    #[test]
    fn large_shift_is_rejected() {
        let mut scene = arm_scene();
        scene.slide("elbow", 0.2);
        let before = scene.centers.clone();

        let report = scene.run(&IkInitConfig::default());

        assert!(report.recentered.is_empty());
        assert_eq!(report.moves, 0);
        assert_eq!(report.rejected, scene.frames.len());
        assert_eq!(scene.centers, before);
    }

    #[test]
    fn shift_equal_to_limit_is_accepted() {
        let mut first = arm_scene();
        first.slide("elbow", 0.05);
        let before = first.centers.clone();
        first.run(&IkInitConfig::default());
        let elbow = first.joint("elbow");
        let largest = before
            .iter()
            .zip(&first.centers)
            .map(|(b, a)| (a[&elbow] - b[&elbow]).norm())
            .fold(0.0, Real::max);

        let mut scene = arm_scene();
        scene.slide("elbow", 0.05);
        let cfg = IkInitConfig {
            max_recenter_shift: largest,
            ..IkInitConfig::default()
        };
        let report = scene.run(&cfg);
        assert_eq!(report.rejected, 0);
        assert_eq!(report.moves, scene.frames.len());
    }

    #[test]
    fn flipped_axis_is_sign_corrected() {
        let mut scene = arm_scene();
        let truth_axes = scene.axes.clone();
        let truth = scene.centers.clone();
        let elbow = scene.joint("elbow");
        for a in scene.axes.iter_mut().step_by(2) {
            let flipped = -a[&elbow];
            a.insert(elbow, flipped);
        }
        scene.slide("elbow", -0.03);

        scene.run(&IkInitConfig::default());

        for (f, (a, t)) in scene.axes.iter().zip(&truth_axes).enumerate() {
            assert!(a[&elbow].dot(&t[&elbow]) > 1.0 - 1e-12, "frame {}", f);
        }
        assert_centers_match(&scene.centers, &truth, elbow);
    }

    /// Upper arm, forearm and hand joined by two parallel hinges; the wrist
    /// sits off the elbow's plane along the axis.
    fn hinge_chain() -> (KinematicTree, Vec<Marker>) {
        let mut tree = KinematicTree::new();
        let hinge = || JointKind::Revolute {
            axis: Vec3::z_axis(),
        };
        let upper = tree
            .add_root_body("root", JointKind::Free, Vec3::new(0.0, 1.2, 0.0), "upper_arm")
            .unwrap();
        let forearm = tree
            .add_body(upper, "elbow", hinge(), Vec3::new(0.0, -0.3, 0.0), "forearm")
            .unwrap();
        let hand = tree
            .add_body(forearm, "wrist", hinge(), Vec3::new(0.0, -0.25, 0.05), "hand")
            .unwrap();

        let mut markers = Vec::new();
        let segments = [("UA", upper, 0.3), ("FA", forearm, 0.25), ("HA", hand, 0.1)];
        for (prefix, body, length) in segments {
            let offsets = [
                Vec3::new(0.04, -0.2 * length, 0.03),
                Vec3::new(-0.04, -0.4 * length, 0.02),
                Vec3::new(0.03, -0.7 * length, -0.04),
                Vec3::new(-0.02, -0.9 * length, -0.03),
            ];
            for (i, o) in offsets.into_iter().enumerate() {
                markers.push(Marker::new(format!("{}{}", prefix, i + 1), body, o));
            }
        }
        (tree, markers)
    }

    #[test]
    fn recentered_hinge_anchors_the_next_one() {
        let (tree, markers) = hinge_chain();
        let root = tree.joint_dofs(tree.joint_by_name("root").unwrap()).start;
        let elbow = tree.joint_dofs(tree.joint_by_name("elbow").unwrap()).start;
        let wrist = tree.joint_dofs(tree.joint_by_name("wrist").unwrap()).start;
        let poses: Vec<DVector<Real>> = (0..6)
            .map(|i| {
                let mut pose = tree.zero_pose();
                pose[root] = 0.05 * i as Real;
                pose[elbow] = 0.25 * i as Real;
                pose[wrist] = -0.15 * i as Real;
                pose
            })
            .collect();
        let mut scene = Scene::new(tree, &markers, &poses);
        let truth = scene.centers.clone();
        scene.slide("elbow", 0.04);
        scene.slide("wrist", -0.06);

        let report = scene.run(&IkInitConfig::default());

        let (e, w) = (scene.joint("elbow"), scene.joint("wrist"));
        assert_eq!(report.recentered, vec![e, w]);
        assert_eq!(report.rejected, 0);
        assert_centers_match(&scene.centers, &truth, e);
        assert_centers_match(&scene.centers, &truth, w);
    }

    #[test]
    fn sweep_finds_axis_of_coupled_joint() {
        let mut tree = KinematicTree::new();
        let base = tree
            .add_root_body("root", JointKind::Free, Vec3::new(0.0, 1.0, 0.0), "base")
            .unwrap();
        let axis = Dir3::new_normalize(Vec3::new(0.0, 0.3, 1.0));
        tree.add_body(
            base,
            "slide",
            JointKind::CoupledRevolute {
                axis,
                translation_rate: Vec3::new(0.01, 0.0, 0.0),
            },
            Vec3::new(0.0, -0.3, 0.0),
            "link",
        )
        .unwrap();
        let markers = vec![];
        let reference = ReferencePose::unit(&tree, &markers);
        let topo = Topology::build(&tree, &markers, &reference, 0.07, 3);
        let j = topo.joint_by_name("slide").unwrap();

        let found = reference_axis(&tree, &topo, &reference, j, 500).unwrap();
        assert!(found.dot(&axis).abs() > 1.0 - 1e-9, "axis {:?}", found);
    }

    #[test]
    fn revolute_axis_needs_no_sweep() {
        let (arm, markers) = mocap_core::synthetic::skeletons::planar_arm().unwrap();
        let reference = ReferencePose::unit(&arm, &markers);
        let topo = Topology::build(&arm, &markers, &reference, 0.07, 3);
        let elbow = topo.joint_by_name("elbow").unwrap();
        let axis = reference_axis(&arm, &topo, &reference, elbow, 0).unwrap();
        assert!((axis.z - 1.0).abs() < 1e-12);
    }
}
