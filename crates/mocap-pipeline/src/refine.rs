//! Iterative completion and fine tuning of closed-form poses.

use crate::config::IkInitConfig;
use crate::mds_centers::JointCenterFrame;
use crate::pose::FramePose;
use crate::topology::Topology;
use mocap_core::{BodyScales, Marker, MarkerFrame, SkeletonModel};
use mocap_optim::{
    solve_ik_with_restarts, IkProblem, IkTargets, LmBackend, RestartOptions, SolveReport,
};

/// Visible markers and known joint centers of one frame as IK targets.
pub fn frame_targets(
    topo: &Topology,
    markers: &[Marker],
    frame: &MarkerFrame,
    centers: &JointCenterFrame,
) -> IkTargets {
    IkTargets {
        markers: markers
            .iter()
            .filter_map(|m| frame.get(&m.name).map(|p| (m.clone(), *p)))
            .collect(),
        joints: centers
            .iter()
            .map(|(&j, c)| (topo.joints[j].joints.clone(), *c))
            .collect(),
    }
}

/// Least-squares IK over one frame's targets for a fixed skeleton and scales.
pub struct Refiner<'a, S: SkeletonModel> {
    pub model: &'a S,
    pub topo: &'a Topology,
    pub markers: &'a [Marker],
    pub scales: &'a BodyScales,
    pub cfg: &'a IkInitConfig,
}

impl<S: SkeletonModel> Refiner<'_, S> {
    fn solve(
        &self,
        frame: &MarkerFrame,
        centers: &JointCenterFrame,
        pose: &mut FramePose,
        dofs: Vec<usize>,
        restarts: RestartOptions,
    ) -> Option<SolveReport> {
        let targets = frame_targets(self.topo, self.markers, frame, centers);
        if dofs.is_empty() || targets.is_empty() {
            return None;
        }
        let start = pose.positions.clone();
        let problem = IkProblem::new(self.model, self.scales, start, dofs, &targets)
            .with_joint_weight(self.cfg.refine.joint_weight);
        let (x, report) = solve_ik_with_restarts(
            &LmBackend,
            &problem,
            problem.initial_params(),
            &self.cfg.refine.solve_options(),
            &restarts,
        );
        pose.positions = problem.full_pose(&x);
        Some(report)
    }

    /// Solve the DOFs the closed-form pass left unresolved, with random
    /// restarts seeded per frame. The resolved mask is left untouched.
    /// Returns `None` if there was nothing to solve.
    pub fn complete(
        &self,
        frame: &MarkerFrame,
        centers: &JointCenterFrame,
        pose: &mut FramePose,
        frame_index: usize,
    ) -> Option<SolveReport> {
        let dofs: Vec<usize> = (0..pose.resolved.len()).filter(|&d| !pose.resolved[d]).collect();
        let mut restarts = self.cfg.refine.restart_options(self.cfg.refine.max_restarts);
        restarts.seed = restarts.seed.wrapping_add(frame_index as u64);
        self.solve(frame, centers, pose, dofs, restarts)
    }

    /// Polish every DOF of `pose` from its current value, without restarts.
    pub fn fine_tune(
        &self,
        frame: &MarkerFrame,
        centers: &JointCenterFrame,
        pose: &mut FramePose,
    ) -> Option<SolveReport> {
        let dofs: Vec<usize> = (0..pose.positions.len()).collect();
        self.solve(frame, centers, pose, dofs, self.cfg.refine.restart_options(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::PoseSolver;
    use crate::reference::ReferencePose;
    use mocap_core::synthetic::{motion, skeletons};

    #[test]
    fn completes_elbow_hidden_from_closed_form() {
        let (arm, markers) = skeletons::planar_arm().unwrap();
        let reference = ReferencePose::unit(&arm, &markers);
        let topo = Topology::build(&arm, &markers, &reference, 0.07, 3);
        let cfg = IkInitConfig::default();
        let elbow = arm.joint_by_name("elbow").unwrap();
        let dof = arm.joint_dofs(elbow).start;

        let poses = motion::sweep_joint(&arm, elbow, 0.8, 0.8, 1);
        let scales = arm.unit_scales();
        let mut frame = motion::simulate_markers(&arm, &markers, &poses, &scales).remove(0);
        frame.retain(|name, _| !name.starts_with("FA") || name == "FA1" || name == "FA3");

        let solver = PoseSolver::new(&arm, &topo, &reference, &markers, &cfg);
        let centers = JointCenterFrame::new();
        let mut pose = solver.solve_frame(&frame, &centers);
        assert!(!pose.resolved[dof]);

        let refiner = Refiner {
            model: &arm,
            topo: &topo,
            markers: &markers,
            scales: &scales,
            cfg: &cfg,
        };
        let report = refiner.complete(&frame, &centers, &mut pose, 0).unwrap();
        assert!(report.final_cost < 1e-10, "cost {}", report.final_cost);
        assert!((pose.positions[dof] - 0.8).abs() < 1e-5, "elbow {}", pose.positions[dof]);
        assert!(!pose.resolved[dof]);

        let tuned = refiner.fine_tune(&frame, &centers, &mut pose).unwrap();
        assert!(tuned.final_cost < 1e-10);
    }
}
