//! Topology reduction of the skeleton graph.
//!
//! Bodies and joints are first copied 1:1 into an arena of nodes addressed by
//! index. Two merge passes then collapse the graph:
//! 1. a child joint whose center lies within `merge_distance` of its parent
//!    joint is folded into the parent joint, and the intermediate body into
//!    the child body;
//! 2. joints made only of fixed joints are removed and their child body is
//!    welded onto the parent body.
//!
//! Merged-away bodies are redirected union-find style, so original body ids
//! always resolve to their current stacked body. The final [`Topology`] is
//! compacted so that stacked joint `i` is the parent joint of stacked body `i`,
//! and parents always have smaller indices than their children, whatever
//! order the model lists its bodies in.

use crate::reference::ReferencePose;
use log::debug;
use mocap_core::{BodyId, JointId, JointKind, Marker, MarkerFrame, Pt3, Real, SkeletonModel};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub type StackedBodyId = usize;
pub type StackedJointId = usize;

/// One or more skeleton bodies treated as a single rigid segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackedBody {
    pub name: String,
    /// Member bodies. The first entry is the anchor: the child body of the
    /// last sub-joint of this body's parent joint.
    pub bodies: Vec<BodyId>,
    pub parent_joint: StackedJointId,
    pub child_joints: Vec<StackedJointId>,
    /// Markers attached to any member body.
    pub markers: Vec<String>,
}

impl StackedBody {
    pub fn anchor(&self) -> BodyId {
        self.bodies[0]
    }
}

/// One or more skeleton joints treated as a single anatomical joint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackedJoint {
    pub name: String,
    /// Member joints, parent-most first.
    pub joints: Vec<JointId>,
    pub parent_body: Option<StackedBodyId>,
    pub child_body: StackedBodyId,
    /// Enough adjacent markers for a closed-form center.
    pub tracked: bool,
}

/// Immutable reduced skeleton graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    pub bodies: Vec<StackedBody>,
    pub joints: Vec<StackedJoint>,
    body_of: Vec<StackedBodyId>,
    joint_of: Vec<Option<StackedJointId>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Arena
// ─────────────────────────────────────────────────────────────────────────────

struct BodyNode {
    bodies: Vec<BodyId>,
    parent_joint: usize,
    child_joints: Vec<usize>,
}

struct JointNode {
    joints: Vec<JointId>,
    parent_body: Option<usize>,
    child_body: usize,
}

struct Arena {
    bodies: Vec<Option<BodyNode>>,
    joints: Vec<Option<JointNode>>,
    redirect: Vec<usize>,
}

impl Arena {
    fn new<S: SkeletonModel>(model: &S) -> Self {
        let bodies = (0..model.num_bodies())
            .map(|b| {
                Some(BodyNode {
                    bodies: vec![b],
                    parent_joint: model.body_parent_joint(b),
                    child_joints: model.body_child_joints(b).to_vec(),
                })
            })
            .collect();
        let joints = (0..model.num_joints())
            .map(|j| {
                Some(JointNode {
                    joints: vec![j],
                    parent_body: model.joint_parent_body(j),
                    child_body: model.joint_child_body(j),
                })
            })
            .collect();
        Self {
            bodies,
            joints,
            redirect: (0..model.num_bodies()).collect(),
        }
    }

    fn find(&mut self, body: usize) -> usize {
        let mut root = body;
        while self.redirect[root] != root {
            root = self.redirect[root];
        }
        let mut current = body;
        while self.redirect[current] != root {
            let next = self.redirect[current];
            self.redirect[current] = root;
            current = next;
        }
        root
    }

    fn live_joints(&self) -> impl Iterator<Item = (usize, &JointNode)> + '_ {
        self.joints
            .iter()
            .enumerate()
            .filter_map(|(i, j)| j.as_ref().map(|node| (i, node)))
    }

    fn coincident_pair(
        &self,
        reference: &ReferencePose,
        threshold: Real,
    ) -> Option<(usize, usize)> {
        self.live_joints().find_map(|(j, node)| {
            let center = reference.mean_joint(&node.joints);
            let child = self.bodies[node.child_body].as_ref()?;
            child.child_joints.iter().copied().find_map(|k| {
                let other = self.joints[k].as_ref()?;
                let d = (reference.mean_joint(&other.joints) - center).norm();
                (d < threshold).then_some((j, k))
            })
        })
    }

    fn fixed_joint<S: SkeletonModel>(&self, model: &S) -> Option<usize> {
        self.live_joints()
            .find(|(_, node)| {
                node.parent_body.is_some()
                    && node
                        .joints
                        .iter()
                        .all(|&m| model.joint_kind(m) == JointKind::Fixed)
            })
            .map(|(j, _)| j)
    }

    fn parent_body(&self, body: usize) -> Option<usize> {
        let node = self.bodies[body].as_ref()?;
        self.joints[node.parent_joint].as_ref()?.parent_body
    }

    /// Live bodies ordered so that every parent precedes its children. Bodies
    /// keep their index order where the model already lists them that way.
    fn parent_first(&self) -> Vec<usize> {
        let mut pending: Vec<usize> = (0..self.bodies.len())
            .filter(|&b| self.bodies[b].is_some())
            .collect();
        let mut placed = BTreeSet::new();
        let mut order = Vec::with_capacity(pending.len());
        while !pending.is_empty() {
            let before = pending.len();
            pending.retain(|&b| {
                let ready = self.parent_body(b).map_or(true, |p| placed.contains(&p));
                if ready {
                    placed.insert(b);
                    order.push(b);
                }
                !ready
            });
            if pending.len() == before {
                // Parents that are not live bodies; keep the remainder as is.
                order.append(&mut pending);
            }
        }
        order
    }

    fn joint_name<'m, S: SkeletonModel>(&self, model: &'m S, j: usize) -> &'m str {
        self.joints[j]
            .as_ref()
            .and_then(|node| node.joints.first())
            .map_or("?", |&m| model.joint_name(m))
    }

    /// Fold joint `k` into its parent joint `j`; the body between them joins
    /// `k`'s child body.
    fn merge_coincident(&mut self, j: usize, k: usize) {
        let (Some(k_node), Some(j_node)) = (self.joints[k].take(), self.joints[j].as_ref()) else {
            return;
        };
        let x = j_node.child_body;
        let y = k_node.child_body;
        let Some(x_node) = self.bodies[x].take() else {
            return;
        };

        for &c in x_node.child_joints.iter().filter(|&&c| c != k) {
            if let Some(node) = self.joints[c].as_mut() {
                node.parent_body = Some(y);
            }
        }
        if let Some(y_node) = self.bodies[y].as_mut() {
            y_node.bodies.extend(x_node.bodies);
            y_node.parent_joint = j;
            y_node
                .child_joints
                .extend(x_node.child_joints.into_iter().filter(|&c| c != k));
        }
        if let Some(j_node) = self.joints[j].as_mut() {
            j_node.joints.extend(k_node.joints);
            j_node.child_body = y;
        }
        self.redirect[x] = y;
    }

    /// Remove fixed joint `f`, welding its child body onto its parent body.
    fn merge_fixed(&mut self, f: usize) {
        let Some(f_node) = self.joints[f].take() else {
            return;
        };
        let Some(p) = f_node.parent_body else {
            return;
        };
        let c = f_node.child_body;
        let Some(c_node) = self.bodies[c].take() else {
            return;
        };
        for &g in &c_node.child_joints {
            if let Some(node) = self.joints[g].as_mut() {
                node.parent_body = Some(p);
            }
        }
        if let Some(p_node) = self.bodies[p].as_mut() {
            p_node.bodies.extend(c_node.bodies);
            p_node.child_joints.retain(|&g| g != f);
            p_node.child_joints.extend(c_node.child_joints);
        }
        self.redirect[c] = p;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Topology
// ─────────────────────────────────────────────────────────────────────────────

impl Topology {
    /// Reduce `model`'s graph using joint positions from `reference`.
    pub fn build<S: SkeletonModel>(
        model: &S,
        markers: &[Marker],
        reference: &ReferencePose,
        merge_distance: Real,
        min_markers: usize,
    ) -> Self {
        let mut arena = Arena::new(model);
        let guard = model.num_joints() + 1;

        for _ in 0..guard {
            let Some((j, k)) = arena.coincident_pair(reference, merge_distance) else {
                break;
            };
            debug!(
                "merging coincident joint '{}' into '{}'",
                arena.joint_name(model, k),
                arena.joint_name(model, j)
            );
            arena.merge_coincident(j, k);
        }
        for _ in 0..guard {
            let Some(f) = arena.fixed_joint(model) else {
                break;
            };
            debug!("welding across fixed joint '{}'", arena.joint_name(model, f));
            arena.merge_fixed(f);
        }

        Self::compact(model, markers, &mut arena, min_markers)
    }

    fn compact<S: SkeletonModel>(
        model: &S,
        markers: &[Marker],
        arena: &mut Arena,
        min_markers: usize,
    ) -> Self {
        let live: Vec<(usize, BodyNode, JointNode)> = arena
            .parent_first()
            .into_iter()
            .filter_map(|b| {
                let body = arena.bodies[b].take()?;
                let joint = arena.joints[body.parent_joint].take()?;
                Some((b, body, joint))
            })
            .collect();
        let dense_body: BTreeMap<usize, StackedBodyId> =
            live.iter().enumerate().map(|(new, (old, _, _))| (*old, new)).collect();
        let dense_joint: BTreeMap<usize, StackedJointId> = live
            .iter()
            .enumerate()
            .map(|(new, (_, body, _))| (body.parent_joint, new))
            .collect();

        let body_of: Vec<StackedBodyId> = (0..model.num_bodies())
            .map(|b| dense_body.get(&arena.find(b)).copied().unwrap_or(0))
            .collect();
        let mut joint_of = vec![None; model.num_joints()];

        let mut bodies = Vec::with_capacity(live.len());
        let mut joints = Vec::with_capacity(live.len());
        for (new, (_, body, joint)) in live.into_iter().enumerate() {
            for &j in &joint.joints {
                joint_of[j] = Some(new);
            }
            bodies.push(StackedBody {
                name: model.body_name(body.bodies[0]).to_string(),
                child_joints: body
                    .child_joints
                    .iter()
                    .filter_map(|c| dense_joint.get(c).copied())
                    .collect(),
                bodies: body.bodies,
                parent_joint: new,
                markers: markers
                    .iter()
                    .filter(|m| body_of[m.body] == new)
                    .map(|m| m.name.clone())
                    .collect(),
            });
            joints.push(StackedJoint {
                name: model.joint_name(joint.joints[0]).to_string(),
                joints: joint.joints,
                parent_body: joint.parent_body.and_then(|p| dense_body.get(&p).copied()),
                child_body: new,
                tracked: false,
            });
        }

        let mut topo = Self {
            bodies,
            joints,
            body_of,
            joint_of,
        };
        for j in 0..topo.joints.len() {
            let count = topo.joint_markers(j).len();
            topo.joints[j].tracked = count >= min_markers;
            if !topo.joints[j].tracked {
                debug!(
                    "joint '{}' touches only {} markers, no closed-form center",
                    topo.joints[j].name, count
                );
            }
        }
        topo
    }

    pub fn num_bodies(&self) -> usize {
        self.bodies.len()
    }

    pub fn num_joints(&self) -> usize {
        self.joints.len()
    }

    /// Stacked body containing an original body.
    pub fn body_of(&self, body: BodyId) -> StackedBodyId {
        self.body_of[body]
    }

    /// Stacked joint containing an original joint; `None` for welded fixed joints.
    pub fn joint_of(&self, joint: JointId) -> Option<StackedJointId> {
        self.joint_of[joint]
    }

    pub fn joint_by_name(&self, name: &str) -> Option<StackedJointId> {
        self.joints.iter().position(|j| j.name == name)
    }

    pub fn body_by_name(&self, name: &str) -> Option<StackedBodyId> {
        self.bodies.iter().position(|b| b.name == name)
    }

    /// Parent joint followed by child joints.
    pub fn adjacent_joints(&self, body: StackedBodyId) -> Vec<StackedJointId> {
        let b = &self.bodies[body];
        std::iter::once(b.parent_joint)
            .chain(b.child_joints.iter().copied())
            .collect()
    }

    /// Parent body (if any) followed by the child body.
    pub fn adjacent_bodies(&self, joint: StackedJointId) -> Vec<StackedBodyId> {
        let j = &self.joints[joint];
        j.parent_body.into_iter().chain(std::iter::once(j.child_body)).collect()
    }

    /// Markers on either body adjacent to `joint`.
    pub fn joint_markers(&self, joint: StackedJointId) -> Vec<&str> {
        self.adjacent_bodies(joint)
            .into_iter()
            .flat_map(|b| self.bodies[b].markers.iter().map(String::as_str))
            .collect()
    }

    /// Reference center of a stacked joint: the mean of its members.
    pub fn reference_center(&self, reference: &ReferencePose, joint: StackedJointId) -> Pt3 {
        reference.mean_joint(&self.joints[joint].joints)
    }

    /// Stacked bodies below `joint`, starting with its child body.
    pub fn subtree_bodies(&self, joint: StackedJointId) -> Vec<StackedBodyId> {
        let mut out = vec![self.joints[joint].child_body];
        let mut i = 0;
        while i < out.len() {
            let b = out[i];
            out.extend(self.bodies[b].child_joints.iter().map(|&c| self.joints[c].child_body));
            i += 1;
        }
        out
    }

    /// Pairs of tracked joints that share an adjacent body, each as `(a, b)` with `a < b`.
    pub fn tracked_joint_pairs(&self) -> Vec<(StackedJointId, StackedJointId)> {
        let mut pairs = BTreeSet::new();
        for body in 0..self.bodies.len() {
            let adjacent: Vec<_> = self
                .adjacent_joints(body)
                .into_iter()
                .filter(|&j| self.joints[j].tracked)
                .collect();
            for (i, &a) in adjacent.iter().enumerate() {
                for &b in &adjacent[i + 1..] {
                    pairs.insert((a.min(b), a.max(b)));
                }
            }
        }
        pairs.into_iter().collect()
    }

    /// Tracked joints with at least one adjacent marker visible in `frame`.
    pub fn visible_joints(&self, frame: &MarkerFrame) -> Vec<StackedJointId> {
        (0..self.joints.len())
            .filter(|&j| self.joints[j].tracked)
            .filter(|&j| self.joint_markers(j).iter().any(|m| frame.contains_key(*m)))
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Distance caches
// ─────────────────────────────────────────────────────────────────────────────

/// Squared joint↔marker and joint↔joint distances used as triangulation
/// constraints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DistanceCache {
    /// Per stacked joint: adjacent marker name → squared distance.
    pub joint_markers: Vec<BTreeMap<String, Real>>,
    /// `(a, b)` with `a < b` → squared distance.
    pub joint_joints: BTreeMap<(StackedJointId, StackedJointId), Real>,
}

impl DistanceCache {
    /// Distances measured on the reference skeleton, for tracked joints only.
    pub fn from_reference(topo: &Topology, reference: &ReferencePose) -> Self {
        let joint_markers = (0..topo.num_joints())
            .map(|j| {
                if !topo.joints[j].tracked {
                    return BTreeMap::new();
                }
                let center = topo.reference_center(reference, j);
                topo.joint_markers(j)
                    .into_iter()
                    .filter_map(|m| {
                        reference
                            .markers
                            .get(m)
                            .map(|p| (m.to_string(), (p - center).norm_squared()))
                    })
                    .collect()
            })
            .collect();
        let joint_joints = topo
            .tracked_joint_pairs()
            .into_iter()
            .map(|(a, b)| {
                let d = topo.reference_center(reference, a) - topo.reference_center(reference, b);
                ((a, b), d.norm_squared())
            })
            .collect();
        Self {
            joint_markers,
            joint_joints,
        }
    }

    pub fn marker_distance_sq(&self, joint: StackedJointId, marker: &str) -> Option<Real> {
        self.joint_markers.get(joint)?.get(marker).copied()
    }

    pub fn joint_distance_sq(&self, a: StackedJointId, b: StackedJointId) -> Option<Real> {
        self.joint_joints.get(&(a.min(b), a.max(b))).copied()
    }

    /// Joints paired with `joint`, with their squared distances.
    pub fn joint_neighbors(&self, joint: StackedJointId) -> Vec<(StackedJointId, Real)> {
        self.joint_joints
            .iter()
            .filter_map(|(&(a, b), &d)| {
                if a == joint {
                    Some((b, d))
                } else if b == joint {
                    Some((a, d))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Replace every cached distance that has observations with the mean
    /// squared distance across frames.
    pub fn reestimate_from_joint_centers(
        &mut self,
        frames: &[MarkerFrame],
        centers: &[BTreeMap<StackedJointId, Pt3>],
    ) {
        for (joint, markers) in self.joint_markers.iter_mut().enumerate() {
            for (name, dist) in markers.iter_mut() {
                let (sum, n) = frames
                    .iter()
                    .zip(centers)
                    .filter_map(|(f, c)| Some((f.get(name)? - c.get(&joint)?).norm_squared()))
                    .fold((0.0, 0usize), |(s, n), d| (s + d, n + 1));
                if n > 0 {
                    *dist = sum / n as Real;
                }
            }
        }
        for (&(a, b), dist) in self.joint_joints.iter_mut() {
            let (sum, n) = centers
                .iter()
                .filter_map(|c| Some((c.get(&a)? - c.get(&b)?).norm_squared()))
                .fold((0.0, 0usize), |(s, n), d| (s + d, n + 1));
            if n > 0 {
                *dist = sum / n as Real;
            }
        }
    }
}
