//! Skeleton quantities evaluated at the zero pose for a fixed scale vector.

use mocap_core::{BodyScales, Iso3, Marker, Pt3, SkeletonModel, Vec3};
use std::collections::BTreeMap;

/// World transforms, joint centers and marker positions of a skeleton at its
/// zero pose, for one scale vector.
#[derive(Debug, Clone)]
pub struct ReferencePose {
    pub scales: BodyScales,
    pub bodies: Vec<Iso3>,
    pub joints: Vec<Pt3>,
    pub markers: BTreeMap<String, Pt3>,
}

impl ReferencePose {
    pub fn new<S: SkeletonModel>(model: &S, markers: &[Marker], scales: BodyScales) -> Self {
        let pose = model.zero_pose();
        let bodies = model.body_world_transforms(&pose, &scales);
        let joints = model.joint_world_positions(&pose, &scales);
        let markers = markers
            .iter()
            .map(|m| (m.name.clone(), model.marker_world_position(m, &bodies, &scales)))
            .collect();
        Self {
            scales,
            bodies,
            joints,
            markers,
        }
    }

    /// Zero pose at unit scale.
    pub fn unit<S: SkeletonModel>(model: &S, markers: &[Marker]) -> Self {
        Self::new(model, markers, model.unit_scales())
    }

    /// Zero pose with every body uniformly scaled by `factor`.
    pub fn uniform<S: SkeletonModel>(model: &S, markers: &[Marker], factor: f64) -> Self {
        Self::new(model, markers, vec![Vec3::repeat(factor); model.num_bodies()])
    }

    /// Mean position of a set of joints.
    pub fn mean_joint(&self, joints: &[usize]) -> Pt3 {
        let sum = joints.iter().fold(Vec3::zeros(), |acc, &j| acc + self.joints[j].coords);
        Pt3::from(sum / joints.len().max(1) as f64)
    }
}
