//! Skeleton model query interface.
//!
//! Every kinematic query is a pure function of the pose vector and the
//! per-body scales passed in; implementations never hold a "current" pose.

mod tree;

pub use tree::*;

use crate::{Dir3, Iso3, Marker, Pt3, Real, Vec3};
use nalgebra::{DVector, UnitQuaternion};
use std::ops::Range;

/// Index of a body segment in a [`SkeletonModel`].
pub type BodyId = usize;
/// Index of a joint in a [`SkeletonModel`].
pub type JointId = usize;

/// Per-body anisotropic scale factors, indexed by [`BodyId`].
pub type BodyScales = Vec<Vec3>;

/// Kinematic type of a joint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JointKind {
    /// Zero degrees of freedom.
    Fixed,
    /// Single rotation about a fixed axis in the joint frame.
    Revolute { axis: Dir3 },
    /// Three rotational DOFs `(roll, pitch, yaw)`, `R = Rz(yaw) Ry(pitch) Rx(roll)`.
    Ball,
    /// Ball rotation followed by three translational DOFs.
    Free,
    /// Rotation about `axis` coupled with a translation of
    /// `translation_rate * angle`. The joint center slides as it turns, so it
    /// has no single fixed reference axis.
    CoupledRevolute { axis: Dir3, translation_rate: Vec3 },
}

impl JointKind {
    pub fn num_dofs(&self) -> usize {
        match self {
            JointKind::Fixed => 0,
            JointKind::Revolute { .. } | JointKind::CoupledRevolute { .. } => 1,
            JointKind::Ball => 3,
            JointKind::Free => 6,
        }
    }

    /// True for joints whose motion is a pure rotation about a fixed point.
    pub fn is_pure_rotation(&self) -> bool {
        matches!(self, JointKind::Revolute { .. } | JointKind::Ball)
    }

    /// True for joints with independent translational DOFs.
    pub fn has_free_translation(&self) -> bool {
        matches!(self, JointKind::Free)
    }
}

/// Read-only queries over an articulated skeleton.
pub trait SkeletonModel {
    fn num_bodies(&self) -> usize;
    fn num_joints(&self) -> usize;
    fn num_dofs(&self) -> usize;

    fn body_name(&self, body: BodyId) -> &str;
    fn joint_name(&self, joint: JointId) -> &str;

    /// The joint connecting `body` to its parent (or to the world).
    fn body_parent_joint(&self, body: BodyId) -> JointId;
    fn body_child_joints(&self, body: BodyId) -> &[JointId];
    /// `None` for joints attached to the world.
    fn joint_parent_body(&self, joint: JointId) -> Option<BodyId>;
    fn joint_child_body(&self, joint: JointId) -> BodyId;

    fn joint_kind(&self, joint: JointId) -> JointKind;
    /// Range of this joint's DOFs inside the pose vector.
    fn joint_dofs(&self, joint: JointId) -> Range<usize>;
    /// `(lower, upper)` position limits for a DOF.
    fn dof_limits(&self, dof: usize) -> (Real, Real);

    /// Groups of bodies constrained to share one scale vector. Every body
    /// belongs to exactly one group.
    fn scale_groups(&self) -> &[Vec<BodyId>];

    /// World transform of every body.
    fn body_world_transforms(&self, pose: &DVector<Real>, scales: &BodyScales) -> Vec<Iso3>;

    /// World position of every joint center.
    fn joint_world_positions(&self, pose: &DVector<Real>, scales: &BodyScales) -> Vec<Pt3>;

    /// Transform from the joint's parent body frame to its child body frame
    /// for the given local joint positions.
    fn joint_relative_transform(&self, joint: JointId, positions: &[Real], scales: &BodyScales)
        -> Iso3;

    /// Local joint positions whose relative rotation is closest to `desired`.
    /// Translational DOFs are returned as zero.
    fn nearest_positions(
        &self,
        joint: JointId,
        desired: &UnitQuaternion<Real>,
        scales: &BodyScales,
    ) -> Vec<Real>;

    /// World direction of the first DOF's rotation axis in the given pose.
    /// `None` for joints that are not a pure rotation about a fixed point.
    fn joint_world_axis(
        &self,
        joint: JointId,
        pose: &DVector<Real>,
        scales: &BodyScales,
    ) -> Option<Dir3>;

    fn zero_pose(&self) -> DVector<Real> {
        DVector::zeros(self.num_dofs())
    }

    fn unit_scales(&self) -> BodyScales {
        vec![Vec3::new(1.0, 1.0, 1.0); self.num_bodies()]
    }

    /// Marker world position given precomputed body transforms.
    fn marker_world_position(&self, marker: &Marker, bodies: &[Iso3], scales: &BodyScales) -> Pt3 {
        let local = marker.offset.component_mul(&scales[marker.body]);
        bodies[marker.body] * Pt3::from(local)
    }

    /// Vertical (Y) extent of the joint centers.
    fn height(&self, pose: &DVector<Real>, scales: &BodyScales) -> Real {
        let joints = self.joint_world_positions(pose, scales);
        let (lo, hi) = joints
            .iter()
            .fold((Real::INFINITY, Real::NEG_INFINITY), |(lo, hi), p| {
                (lo.min(p.y), hi.max(p.y))
            });
        if joints.is_empty() {
            0.0
        } else {
            hi - lo
        }
    }

    /// Joints from `joint` up to its root joint, inclusive.
    fn joint_ancestors(&self, joint: JointId) -> Vec<JointId> {
        let mut out = vec![joint];
        let mut current = joint;
        while let Some(body) = self.joint_parent_body(current) {
            current = self.body_parent_joint(body);
            out.push(current);
        }
        out
    }
}
