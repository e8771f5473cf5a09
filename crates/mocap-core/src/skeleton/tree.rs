use super::{BodyId, BodyScales, JointId, JointKind, SkeletonModel};
use crate::{Dir3, Iso3, Pt3, Real, Vec3};
use nalgebra::{DVector, Translation3, UnitQuaternion};
use std::f64::consts::PI;
use std::ops::Range;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SkeletonError {
    #[error("unknown body id {0}")]
    UnknownBody(BodyId),
    #[error("unknown joint id {0}")]
    UnknownJoint(JointId),
    #[error("name '{0}' is already used")]
    DuplicateName(String),
    #[error("joint {joint} has {expected} dofs, got {got} limits")]
    LimitCount {
        joint: JointId,
        expected: usize,
        got: usize,
    },
    #[error("inverted limits [{lower}, {upper}] on dof {dof}")]
    InvertedLimits { dof: usize, lower: Real, upper: Real },
}

#[derive(Debug, Clone)]
struct BodyNode {
    name: String,
    parent_joint: JointId,
    child_joints: Vec<JointId>,
}

#[derive(Debug, Clone)]
struct JointNode {
    name: String,
    kind: JointKind,
    parent_body: Option<BodyId>,
    child_body: BodyId,
    /// Joint center in the parent body frame at unit scale (world frame for roots).
    offset: Vec3,
    dof_start: usize,
}

/// Tree-structured skeleton of rigid bodies connected by joints.
///
/// Each body's frame has its origin at its parent joint center and the same
/// orientation as the joint frame, so joint offsets are pure translations
/// expressed in the parent body frame. Bodies are stored parent-first, which
/// lets forward kinematics run in a single pass.
#[derive(Debug, Clone, Default)]
pub struct KinematicTree {
    bodies: Vec<BodyNode>,
    joints: Vec<JointNode>,
    limits: Vec<(Real, Real)>,
    scale_groups: Vec<Vec<BodyId>>,
}

fn default_limits(kind: &JointKind) -> Vec<(Real, Real)> {
    match kind {
        JointKind::Fixed => Vec::new(),
        JointKind::Revolute { .. } | JointKind::CoupledRevolute { .. } => vec![(-PI, PI)],
        JointKind::Ball => vec![(-PI, PI); 3],
        JointKind::Free => {
            let mut l = vec![(-PI, PI); 3];
            l.extend([(Real::NEG_INFINITY, Real::INFINITY); 3]);
            l
        }
    }
}

/// Motion of a joint frame for the given local positions.
fn joint_motion(kind: &JointKind, q: &[Real]) -> Iso3 {
    match kind {
        JointKind::Fixed => Iso3::identity(),
        JointKind::Revolute { axis } => {
            Iso3::from_parts(Translation3::identity(), UnitQuaternion::from_axis_angle(axis, q[0]))
        }
        JointKind::Ball => Iso3::from_parts(
            Translation3::identity(),
            UnitQuaternion::from_euler_angles(q[0], q[1], q[2]),
        ),
        JointKind::Free => Iso3::from_parts(
            Translation3::new(q[3], q[4], q[5]),
            UnitQuaternion::from_euler_angles(q[0], q[1], q[2]),
        ),
        JointKind::CoupledRevolute {
            axis,
            translation_rate,
        } => Iso3::from_parts(
            Translation3::from(translation_rate * q[0]),
            UnitQuaternion::from_axis_angle(axis, q[0]),
        ),
    }
}

/// Angle of the rotation about `axis` closest to `r`.
fn nearest_angle_about(axis: &Dir3, r: &UnitQuaternion<Real>) -> Real {
    let m = r.to_rotation_matrix().into_inner();
    let w = Vec3::new(m[(2, 1)] - m[(1, 2)], m[(0, 2)] - m[(2, 0)], m[(1, 0)] - m[(0, 1)]);
    let a = axis.into_inner();
    let along = (m * a).dot(&a);
    w.dot(&a).atan2(m.trace() - along)
}

impl KinematicTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_name(&self, name: &str) -> Result<(), SkeletonError> {
        if self.bodies.iter().any(|b| b.name == name) || self.joints.iter().any(|j| j.name == name)
        {
            return Err(SkeletonError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    fn push(
        &mut self,
        parent: Option<BodyId>,
        joint_name: &str,
        kind: JointKind,
        offset: Vec3,
        body_name: &str,
    ) -> Result<BodyId, SkeletonError> {
        self.check_name(joint_name)?;
        self.check_name(body_name)?;
        if joint_name == body_name {
            return Err(SkeletonError::DuplicateName(body_name.to_string()));
        }
        let body = self.bodies.len();
        let joint = self.joints.len();
        self.joints.push(JointNode {
            name: joint_name.to_string(),
            kind,
            parent_body: parent,
            child_body: body,
            offset,
            dof_start: self.limits.len(),
        });
        self.limits.extend(default_limits(&kind));
        self.bodies.push(BodyNode {
            name: body_name.to_string(),
            parent_joint: joint,
            child_joints: Vec::new(),
        });
        if let Some(p) = parent {
            self.bodies[p].child_joints.push(joint);
        }
        self.scale_groups.push(vec![body]);
        Ok(body)
    }

    /// Add a body attached to the world through `kind`, with its joint at `origin`.
    pub fn add_root_body(
        &mut self,
        joint_name: &str,
        kind: JointKind,
        origin: Vec3,
        body_name: &str,
    ) -> Result<BodyId, SkeletonError> {
        self.push(None, joint_name, kind, origin, body_name)
    }

    /// Add a body whose parent joint sits at `offset` in `parent`'s frame.
    pub fn add_body(
        &mut self,
        parent: BodyId,
        joint_name: &str,
        kind: JointKind,
        offset: Vec3,
        body_name: &str,
    ) -> Result<BodyId, SkeletonError> {
        if parent >= self.bodies.len() {
            return Err(SkeletonError::UnknownBody(parent));
        }
        self.push(Some(parent), joint_name, kind, offset, body_name)
    }

    pub fn set_joint_limits(
        &mut self,
        joint: JointId,
        limits: &[(Real, Real)],
    ) -> Result<(), SkeletonError> {
        let node = self.joints.get(joint).ok_or(SkeletonError::UnknownJoint(joint))?;
        let expected = node.kind.num_dofs();
        if limits.len() != expected {
            return Err(SkeletonError::LimitCount {
                joint,
                expected,
                got: limits.len(),
            });
        }
        let start = node.dof_start;
        for (i, &(lower, upper)) in limits.iter().enumerate() {
            if lower > upper {
                return Err(SkeletonError::InvertedLimits {
                    dof: start + i,
                    lower,
                    upper,
                });
            }
            self.limits[start + i] = (lower, upper);
        }
        Ok(())
    }

    /// Constrain `bodies` to share one scale, e.g. left and right limbs.
    pub fn group_scales(&mut self, bodies: &[BodyId]) -> Result<(), SkeletonError> {
        if let Some(&bad) = bodies.iter().find(|&&b| b >= self.bodies.len()) {
            return Err(SkeletonError::UnknownBody(bad));
        }
        for group in &mut self.scale_groups {
            group.retain(|b| !bodies.contains(b));
        }
        self.scale_groups.retain(|g| !g.is_empty());
        self.scale_groups.push(bodies.to_vec());
        Ok(())
    }

    pub fn body_by_name(&self, name: &str) -> Option<BodyId> {
        self.bodies.iter().position(|b| b.name == name)
    }

    pub fn joint_by_name(&self, name: &str) -> Option<JointId> {
        self.joints.iter().position(|j| j.name == name)
    }

    fn parent_translation(&self, joint: &JointNode, scales: &BodyScales) -> Vec3 {
        match joint.parent_body {
            Some(p) => joint.offset.component_mul(&scales[p]),
            None => joint.offset,
        }
    }
}

impl SkeletonModel for KinematicTree {
    fn num_bodies(&self) -> usize {
        self.bodies.len()
    }

    fn num_joints(&self) -> usize {
        self.joints.len()
    }

    fn num_dofs(&self) -> usize {
        self.limits.len()
    }

    fn body_name(&self, body: BodyId) -> &str {
        &self.bodies[body].name
    }

    fn joint_name(&self, joint: JointId) -> &str {
        &self.joints[joint].name
    }

    fn body_parent_joint(&self, body: BodyId) -> JointId {
        self.bodies[body].parent_joint
    }

    fn body_child_joints(&self, body: BodyId) -> &[JointId] {
        &self.bodies[body].child_joints
    }

    fn joint_parent_body(&self, joint: JointId) -> Option<BodyId> {
        self.joints[joint].parent_body
    }

    fn joint_child_body(&self, joint: JointId) -> BodyId {
        self.joints[joint].child_body
    }

    fn joint_kind(&self, joint: JointId) -> JointKind {
        self.joints[joint].kind
    }

    fn joint_dofs(&self, joint: JointId) -> Range<usize> {
        let j = &self.joints[joint];
        j.dof_start..j.dof_start + j.kind.num_dofs()
    }

    fn dof_limits(&self, dof: usize) -> (Real, Real) {
        self.limits[dof]
    }

    fn scale_groups(&self) -> &[Vec<BodyId>] {
        &self.scale_groups
    }

    fn body_world_transforms(&self, pose: &DVector<Real>, scales: &BodyScales) -> Vec<Iso3> {
        let mut out: Vec<Iso3> = Vec::with_capacity(self.bodies.len());
        for body in &self.bodies {
            let joint = &self.joints[body.parent_joint];
            let q = &pose.as_slice()[self.joint_dofs(body.parent_joint)];
            let parent = joint.parent_body.map(|p| out[p]).unwrap_or_else(Iso3::identity);
            let local = Iso3::from_parts(
                Translation3::from(self.parent_translation(joint, scales)),
                UnitQuaternion::identity(),
            ) * joint_motion(&joint.kind, q);
            out.push(parent * local);
        }
        out
    }

    fn joint_world_positions(&self, pose: &DVector<Real>, scales: &BodyScales) -> Vec<Pt3> {
        let bodies = self.body_world_transforms(pose, scales);
        self.joints
            .iter()
            .map(|j| {
                let parent = j.parent_body.map(|p| bodies[p]).unwrap_or_else(Iso3::identity);
                parent * Pt3::from(self.parent_translation(j, scales))
            })
            .collect()
    }

    fn joint_relative_transform(
        &self,
        joint: JointId,
        positions: &[Real],
        scales: &BodyScales,
    ) -> Iso3 {
        let j = &self.joints[joint];
        Iso3::from_parts(
            Translation3::from(self.parent_translation(j, scales)),
            UnitQuaternion::identity(),
        ) * joint_motion(&j.kind, positions)
    }

    fn nearest_positions(
        &self,
        joint: JointId,
        desired: &UnitQuaternion<Real>,
        _scales: &BodyScales,
    ) -> Vec<Real> {
        match self.joints[joint].kind {
            JointKind::Fixed => Vec::new(),
            JointKind::Revolute { axis } | JointKind::CoupledRevolute { axis, .. } => {
                vec![nearest_angle_about(&axis, desired)]
            }
            JointKind::Ball => {
                let (roll, pitch, yaw) = desired.euler_angles();
                vec![roll, pitch, yaw]
            }
            JointKind::Free => {
                let (roll, pitch, yaw) = desired.euler_angles();
                vec![roll, pitch, yaw, 0.0, 0.0, 0.0]
            }
        }
    }

    fn joint_world_axis(
        &self,
        joint: JointId,
        pose: &DVector<Real>,
        scales: &BodyScales,
    ) -> Option<Dir3> {
        let j = &self.joints[joint];
        let frame = match j.parent_body {
            Some(p) => self.body_world_transforms(pose, scales)[p].rotation,
            None => UnitQuaternion::identity(),
        };
        match j.kind {
            JointKind::Revolute { axis } => Some(frame * axis),
            JointKind::Ball => {
                let q = &pose.as_slice()[self.joint_dofs(joint)];
                let outer = UnitQuaternion::from_euler_angles(0.0, q[1], q[2]);
                Some(frame * outer * Vec3::x_axis())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arm() -> KinematicTree {
        let mut tree = KinematicTree::new();
        let upper = tree
            .add_root_body("shoulder", JointKind::Ball, Vec3::new(0.0, 1.4, 0.0), "upper")
            .unwrap();
        tree.add_body(
            upper,
            "elbow",
            JointKind::Revolute {
                axis: Vec3::z_axis(),
            },
            Vec3::new(0.0, -0.3, 0.0),
            "forearm",
        )
        .unwrap();
        tree
    }

    #[test]
    fn forward_kinematics_rotates_child_about_joint() {
        let tree = arm();
        let mut pose = tree.zero_pose();
        pose[3] = std::f64::consts::FRAC_PI_2;
        let scales = tree.unit_scales();
        let joints = tree.joint_world_positions(&pose, &scales);
        assert!((joints[1] - Pt3::new(0.0, 1.1, 0.0)).norm() < 1e-12);

        let bodies = tree.body_world_transforms(&pose, &scales);
        let tip = bodies[1] * Pt3::new(0.0, -0.25, 0.0);
        assert!((tip - Pt3::new(0.25, 1.1, 0.0)).norm() < 1e-12, "tip {}", tip);
    }

    #[test]
    fn scaling_parent_moves_child_joint() {
        let tree = arm();
        let mut scales = tree.unit_scales();
        scales[0] = Vec3::new(1.0, 2.0, 1.0);
        let joints = tree.joint_world_positions(&tree.zero_pose(), &scales);
        assert!((joints[1].y - 0.8).abs() < 1e-12);
        assert!((tree.height(&tree.zero_pose(), &scales) - 0.6).abs() < 1e-12);
    }

    #[test]
    fn nearest_positions_invert_joint_motion() {
        let tree = arm();
        let axis = Vec3::z_axis();
        let q = UnitQuaternion::from_axis_angle(&axis, 1.2);
        let angle = tree.nearest_positions(1, &q, &tree.unit_scales());
        assert!((angle[0] - 1.2).abs() < 1e-12);

        let q = UnitQuaternion::from_euler_angles(0.3, -0.2, 0.9);
        let euler = tree.nearest_positions(0, &q, &tree.unit_scales());
        assert!((euler[0] - 0.3).abs() < 1e-12);
        assert!((euler[1] + 0.2).abs() < 1e-12);
        assert!((euler[2] - 0.9).abs() < 1e-12);
    }

    #[test]
    fn grouping_keeps_every_body_in_one_group() {
        let mut tree = arm();
        tree.group_scales(&[0, 1]).unwrap();
        assert_eq!(tree.scale_groups(), &[vec![0, 1]]);
        assert!(tree.add_body(7, "x", JointKind::Fixed, Vec3::zeros(), "y").is_err());
        assert!(tree.add_body(0, "elbow", JointKind::Fixed, Vec3::zeros(), "z").is_err());
    }
}
