//! Pose sweeps and marker simulation.

use crate::{BodyScales, JointId, Marker, MarkerFrame, MarkerSequence, Real, SkeletonModel};
use nalgebra::DVector;

/// `frames` poses with the first DOF of `joint` moving linearly from `from`
/// to `to`, all other DOFs at zero.
pub fn sweep_joint<S: SkeletonModel>(
    model: &S,
    joint: JointId,
    from: Real,
    to: Real,
    frames: usize,
) -> Vec<DVector<Real>> {
    sweep_joint_from(model, &model.zero_pose(), joint, from, to, frames)
}

/// Like [`sweep_joint`] but starting from `base` instead of the zero pose.
pub fn sweep_joint_from<S: SkeletonModel>(
    model: &S,
    base: &DVector<Real>,
    joint: JointId,
    from: Real,
    to: Real,
    frames: usize,
) -> Vec<DVector<Real>> {
    let dof = model.joint_dofs(joint).start;
    let denom = frames.saturating_sub(1).max(1) as Real;
    (0..frames)
        .map(|i| {
            let mut pose = base.clone();
            pose[dof] = from + (to - from) * i as Real / denom;
            pose
        })
        .collect()
}

/// Exact marker positions for every pose.
pub fn simulate_markers<S: SkeletonModel>(
    model: &S,
    markers: &[Marker],
    poses: &[DVector<Real>],
    scales: &BodyScales,
) -> MarkerSequence {
    poses
        .iter()
        .map(|pose| {
            let bodies = model.body_world_transforms(pose, scales);
            markers
                .iter()
                .map(|m| (m.name.clone(), model.marker_world_position(m, &bodies, scales)))
                .collect::<MarkerFrame>()
        })
        .collect()
}
