//! Closed-form per-frame poses from body transforms.
//!
//! Each stacked body is registered to the world from its visible markers and
//! known adjacent joint centers. Joint positions then follow from the
//! relative transform between the bodies on either side, first leaf-to-root
//! (so that the child side of every joint can use its whole solved sub-chain)
//! and then root-to-leaf against the forward-kinematics parent.

use crate::config::IkInitConfig;
use crate::mds_centers::JointCenterFrame;
use crate::reference::ReferencePose;
use crate::topology::{StackedBodyId, StackedJointId, Topology};
use log::debug;
use mocap_core::{BodyId, Iso3, Marker, MarkerFrame, Pt3, Real, SkeletonModel, Vec3};
use mocap_linear::rigid_align;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Closed-form pose of one frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FramePose {
    pub positions: DVector<Real>,
    /// `true` for every DOF set by the closed-form solve.
    pub resolved: Vec<bool>,
    /// Estimated world transform of every body that could be registered.
    pub body_transforms: BTreeMap<String, Iso3>,
}

impl FramePose {
    pub fn num_resolved(&self) -> usize {
        self.resolved.iter().filter(|&&r| r).count()
    }
}

/// Weighted point correspondences for one rigid fit.
#[derive(Default)]
struct Fit {
    local: Vec<Pt3>,
    world: Vec<Pt3>,
    weights: Vec<Real>,
}

impl Fit {
    fn push(&mut self, local: Pt3, world: Pt3, weight: Real) {
        self.local.push(local);
        self.world.push(world);
        self.weights.push(weight);
    }

    fn solve(&self, min_points: usize) -> Option<Iso3> {
        if self.local.len() < min_points {
            return None;
        }
        rigid_align(&self.local, &self.world, &self.weights).ok()
    }
}

/// Per-frame working state.
struct FrameState {
    anchors: BTreeMap<StackedBodyId, Iso3>,
    bodies: BTreeMap<BodyId, Iso3>,
    positions: DVector<Real>,
    resolved: Vec<bool>,
}

pub struct PoseSolver<'a, S: SkeletonModel> {
    model: &'a S,
    topo: &'a Topology,
    reference: &'a ReferencePose,
    markers: BTreeMap<&'a str, &'a Marker>,
    cfg: &'a IkInitConfig,
}

impl<'a, S: SkeletonModel> PoseSolver<'a, S> {
    /// `reference` must carry the scales the poses are solved for.
    pub fn new(
        model: &'a S,
        topo: &'a Topology,
        reference: &'a ReferencePose,
        markers: &'a [Marker],
        cfg: &'a IkInitConfig,
    ) -> Self {
        Self {
            model,
            topo,
            reference,
            markers: markers.iter().map(|m| (m.name.as_str(), m)).collect(),
            cfg,
        }
    }

    fn anchor_reference(&self, body: StackedBodyId) -> Iso3 {
        self.reference.bodies[self.topo.bodies[body].anchor()]
    }

    fn fit_body(
        &self,
        body: StackedBodyId,
        frame: &MarkerFrame,
        centers: &JointCenterFrame,
    ) -> Option<Iso3> {
        let inv = self.anchor_reference(body).inverse();
        let mut fit = Fit::default();
        for j in self.topo.adjacent_joints(body) {
            if let Some(c) = centers.get(&j) {
                let local = inv * self.topo.reference_center(self.reference, j);
                fit.push(local, *c, self.cfg.joint_weight);
            }
        }
        for name in &self.topo.bodies[body].markers {
            if let (Some(w), Some(r)) = (frame.get(name), self.reference.markers.get(name)) {
                fit.push(inv * r, *w, self.cfg.marker_weight);
            }
        }
        fit.solve(self.cfg.min_markers)
    }

    /// Set the anchor transform of `body` and every member body.
    fn place_body(&self, state: &mut FrameState, body: StackedBodyId, anchor: Iso3) {
        let inv = self.anchor_reference(body).inverse();
        for &m in &self.topo.bodies[body].bodies {
            state.bodies.insert(m, anchor * inv * self.reference.bodies[m]);
        }
        state.anchors.insert(body, anchor);
    }

    /// World transform of the body on the parent side of `joint`'s first
    /// member; identity for root joints.
    fn parent_side(&self, joint: StackedJointId, bodies: &BTreeMap<BodyId, Iso3>) -> Option<Iso3> {
        let first = *self.topo.joints[joint].joints.first()?;
        match self.model.joint_parent_body(first) {
            Some(b) => bodies.get(&b).copied(),
            None => Some(Iso3::identity()),
        }
    }

    /// Write the local positions of every member of `joint` that carry
    /// `parent` onto `child`.
    fn decompose(
        &self,
        joint: StackedJointId,
        parent: &Iso3,
        child: &Iso3,
        state: &mut FrameState,
    ) {
        let scales = &self.reference.scales;
        let mut remaining = parent.inverse() * child;
        for &m in &self.topo.joints[joint].joints {
            let mut q = self.model.nearest_positions(m, &remaining.rotation, scales);
            let mut recovered = self.model.joint_relative_transform(m, &q, scales);
            if self.model.joint_kind(m).has_free_translation() && q.len() >= 6 {
                let fix: Vec3 = remaining.translation.vector - recovered.translation.vector;
                for (k, v) in fix.iter().enumerate() {
                    q[3 + k] += v;
                }
                recovered = self.model.joint_relative_transform(m, &q, scales);
            }
            for (dof, v) in self.model.joint_dofs(m).zip(&q) {
                state.positions[dof] = *v;
                state.resolved[dof] = true;
            }
            remaining = recovered.inverse() * remaining;
        }
    }

    /// Bodies reachable from `body` through joints in `solved`, starting with `body`.
    fn solved_subtree(
        &self,
        body: StackedBodyId,
        solved: &BTreeSet<StackedJointId>,
    ) -> Vec<StackedBodyId> {
        let mut out = vec![body];
        let mut i = 0;
        while i < out.len() {
            let b = out[i];
            out.extend(
                self.topo.bodies[b]
                    .child_joints
                    .iter()
                    .filter(|k| solved.contains(k))
                    .map(|&k| self.topo.joints[k].child_body),
            );
            i += 1;
        }
        out
    }

    /// Refit the anchor of `body` against every constraint in its solved
    /// sub-chain, placed by forward kinematics relative to the anchor.
    fn refit_with_subtree(
        &self,
        body: StackedBodyId,
        frame: &MarkerFrame,
        centers: &JointCenterFrame,
        solved: &BTreeSet<StackedJointId>,
        state: &FrameState,
    ) -> Option<Iso3> {
        let scales = &self.reference.scales;
        let fk = self.model.body_world_transforms(&state.positions, scales);
        let fk_joints = self.model.joint_world_positions(&state.positions, scales);
        let inv = fk[self.topo.bodies[body].anchor()].inverse();

        let mut fit = Fit::default();
        let mut seen = BTreeSet::new();
        for b in self.solved_subtree(body, solved) {
            for name in &self.topo.bodies[b].markers {
                let (Some(w), Some(m)) = (frame.get(name), self.markers.get(name.as_str())) else {
                    continue;
                };
                let p = self.model.marker_world_position(m, &fk, scales);
                fit.push(inv * p, *w, self.cfg.marker_weight);
            }
            for j in self.topo.adjacent_joints(b) {
                let Some(c) = centers.get(&j) else {
                    continue;
                };
                if !seen.insert(j) {
                    continue;
                }
                let members = &self.topo.joints[j].joints;
                let sum = members.iter().fold(Vec3::zeros(), |acc, &m| acc + fk_joints[m].coords);
                let p = Pt3::from(sum / members.len() as Real);
                fit.push(inv * p, *c, self.cfg.joint_weight);
            }
        }
        fit.solve(self.cfg.min_markers)
    }

    fn ready(
        &self,
        joint: StackedJointId,
        solved: &BTreeSet<StackedJointId>,
        state: &FrameState,
    ) -> bool {
        let j = &self.topo.joints[joint];
        state.anchors.contains_key(&j.child_body)
            && self.parent_side(joint, &state.bodies).is_some()
            && self.topo.bodies[j.child_body].child_joints.iter().all(|k| {
                solved.contains(k) || !state.anchors.contains_key(&self.topo.joints[*k].child_body)
            })
    }

    /// Solve one frame from its markers and joint centers.
    pub fn solve_frame(&self, frame: &MarkerFrame, centers: &JointCenterFrame) -> FramePose {
        let mut state = FrameState {
            anchors: BTreeMap::new(),
            bodies: BTreeMap::new(),
            positions: self.model.zero_pose(),
            resolved: vec![false; self.model.num_dofs()],
        };
        for b in 0..self.topo.num_bodies() {
            if let Some(t) = self.fit_body(b, frame, centers) {
                self.place_body(&mut state, b, t);
            }
        }

        // Leaf-to-root.
        let mut solved = BTreeSet::new();
        for _ in 0..=self.topo.num_joints() {
            let mut progress = false;
            for joint in (0..self.topo.num_joints()).rev() {
                if solved.contains(&joint) || !self.ready(joint, &solved, &state) {
                    continue;
                }
                let child = self.topo.joints[joint].child_body;
                let chain = self.topo.bodies[child].child_joints.iter().any(|k| solved.contains(k));
                if chain {
                    let refit = self.refit_with_subtree(child, frame, centers, &solved, &state);
                    if let Some(t) = refit {
                        self.place_body(&mut state, child, t);
                    }
                }
                let (Some(parent), Some(child_t)) =
                    (self.parent_side(joint, &state.bodies), state.anchors.get(&child).copied())
                else {
                    continue;
                };
                self.decompose(joint, &parent, &child_t, &mut state);
                solved.insert(joint);
                progress = true;
            }
            if !progress {
                break;
            }
        }

        // Root-to-leaf against the kinematic parent.
        for joint in 0..self.topo.num_joints() {
            if !solved.contains(&joint) {
                continue;
            }
            let Some(&first) = self.topo.joints[joint].joints.first() else {
                continue;
            };
            let parent = match self.model.joint_parent_body(first) {
                Some(b) => {
                    let scales = &self.reference.scales;
                    self.model.body_world_transforms(&state.positions, scales)[b]
                }
                None => Iso3::identity(),
            };
            let child = self.topo.joints[joint].child_body;
            if let Some(child_t) = state.anchors.get(&child).copied() {
                self.decompose(joint, &parent, &child_t, &mut state);
            }
        }

        let unsolved = self.topo.num_joints() - solved.len();
        if unsolved > 0 {
            debug!("pose: {} joints left for iterative completion", unsolved);
        }

        FramePose {
            positions: state.positions,
            resolved: state.resolved,
            body_transforms: state
                .bodies
                .into_iter()
                .map(|(b, t)| (self.model.body_name(b).to_string(), t))
                .collect(),
        }
    }
}
