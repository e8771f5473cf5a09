//! Marker/joint-center inverse kinematics as a least-squares problem.
//!
//! A subset of pose DOFs is optimized to bring simulated marker and joint
//! positions onto observed targets. The Jacobian is taken by central finite
//! differences since [`SkeletonModel`] exposes forward kinematics only.

use crate::{finite_difference_jacobian, NllsProblem, NllsSolverBackend, SolveOptions, SolveReport};
use log::debug;
use mocap_core::{BodyScales, JointId, Marker, Pt3, Real, SkeletonModel};
use nalgebra::{DMatrix, DVector};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::f64::consts::PI;

/// Observed positions an IK solve should reproduce.
#[derive(Debug, Clone, Default)]
pub struct IkTargets {
    pub markers: Vec<(Marker, Pt3)>,
    /// Joint centers; each entry is compared against the mean position of its
    /// member joints.
    pub joints: Vec<(Vec<JointId>, Pt3)>,
}

impl IkTargets {
    pub fn len(&self) -> usize {
        self.markers.len() + self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// IK residual over a chosen set of pose DOFs.
pub struct IkProblem<'a, S: SkeletonModel> {
    model: &'a S,
    scales: &'a BodyScales,
    base: DVector<Real>,
    dofs: Vec<usize>,
    targets: &'a IkTargets,
    joint_weight: Real,
    step: Real,
}

impl<'a, S: SkeletonModel> IkProblem<'a, S> {
    /// `dofs` index into `base`; every other DOF stays fixed at its `base` value.
    pub fn new(
        model: &'a S,
        scales: &'a BodyScales,
        base: DVector<Real>,
        dofs: Vec<usize>,
        targets: &'a IkTargets,
    ) -> Self {
        Self {
            model,
            scales,
            base,
            dofs,
            targets,
            joint_weight: 1.0,
            step: 1e-6,
        }
    }

    pub fn with_joint_weight(mut self, weight: Real) -> Self {
        self.joint_weight = weight;
        self
    }

    /// Current values of the optimized DOFs in `base`.
    pub fn initial_params(&self) -> DVector<Real> {
        DVector::from_iterator(self.dofs.len(), self.dofs.iter().map(|&d| self.base[d]))
    }

    /// Full pose with `x` written into the optimized DOFs, clamped to limits.
    pub fn full_pose(&self, x: &DVector<Real>) -> DVector<Real> {
        let mut pose = self.base.clone();
        for (k, &dof) in self.dofs.iter().enumerate() {
            let (lo, hi) = self.model.dof_limits(dof);
            pose[dof] = x[k].clamp(lo, hi);
        }
        pose
    }

    /// Uniform sample inside the limits of each optimized DOF. Unbounded
    /// rotational DOFs sample `[-π, π]`; unbounded translations keep their
    /// base value.
    pub fn random_params(&self, rng: &mut StdRng) -> DVector<Real> {
        DVector::from_iterator(
            self.dofs.len(),
            self.dofs.iter().map(|&dof| {
                let (lo, hi) = self.model.dof_limits(dof);
                match (lo.is_finite(), hi.is_finite()) {
                    (true, true) if hi > lo => rng.random_range(lo..hi),
                    (true, true) => lo,
                    _ if hi.is_infinite() && lo.is_infinite() && self.is_rotational(dof) => {
                        rng.random_range(-PI..PI)
                    }
                    _ => self.base[dof],
                }
            }),
        )
    }

    fn is_rotational(&self, dof: usize) -> bool {
        (0..self.model.num_joints()).any(|j| {
            let range = self.model.joint_dofs(j);
            range.contains(&dof)
                && !(self.model.joint_kind(j).has_free_translation() && dof >= range.start + 3)
        })
    }
}

impl<S: SkeletonModel> NllsProblem for IkProblem<'_, S> {
    fn num_params(&self) -> usize {
        self.dofs.len()
    }

    fn num_residuals(&self) -> usize {
        3 * self.targets.len()
    }

    fn residuals(&self, x: &DVector<Real>) -> DVector<Real> {
        let pose = self.full_pose(x);
        let bodies = self.model.body_world_transforms(&pose, self.scales);
        let mut r = DVector::<Real>::zeros(self.num_residuals());
        let mut row = 0;
        for (marker, observed) in &self.targets.markers {
            let p = self.model.marker_world_position(marker, &bodies, self.scales);
            r.fixed_rows_mut::<3>(row).copy_from(&(p - observed));
            row += 3;
        }
        if !self.targets.joints.is_empty() {
            let joints = self.model.joint_world_positions(&pose, self.scales);
            for (members, observed) in &self.targets.joints {
                let sum = members
                    .iter()
                    .fold(nalgebra::Vector3::zeros(), |acc, &j| acc + joints[j].coords);
                let mean = sum / members.len().max(1) as Real;
                r.fixed_rows_mut::<3>(row)
                    .copy_from(&((mean - observed.coords) * self.joint_weight));
                row += 3;
            }
        }
        r
    }

    fn jacobian(&self, x: &DVector<Real>) -> DMatrix<Real> {
        finite_difference_jacobian(x, self.num_residuals(), self.step, |p| self.residuals(p))
    }
}

/// Random-restart policy for non-convex solves.
#[derive(Debug, Clone, Copy)]
pub struct RestartOptions {
    /// Additional solves from random starts after the seeded one.
    pub max_restarts: usize,
    /// A solve whose cost falls below this ends the search early.
    pub target_cost: Real,
    pub seed: u64,
}

impl Default for RestartOptions {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            target_cost: 1e-10,
            seed: 0,
        }
    }
}

/// Solve from `x0`, then from random starts until the cost target is met or
/// the restart budget is spent. Returns the best solution found, clamped to
/// the DOF limits.
pub fn solve_ik_with_restarts<S, B>(
    backend: &B,
    problem: &IkProblem<'_, S>,
    x0: DVector<Real>,
    opts: &SolveOptions,
    restarts: &RestartOptions,
) -> (DVector<Real>, SolveReport)
where
    S: SkeletonModel,
    B: NllsSolverBackend,
{
    let mut rng = StdRng::seed_from_u64(restarts.seed);
    let (mut best_x, mut best) = backend.solve(problem, x0, opts);
    let mut attempt = 0;
    while best.final_cost > restarts.target_cost && attempt < restarts.max_restarts {
        attempt += 1;
        let start = problem.random_params(&mut rng);
        let (x, report) = backend.solve(problem, start, opts);
        debug!("ik restart {}: cost {:e} (best {:e})", attempt, report.final_cost, best.final_cost);
        if report.final_cost < best.final_cost {
            best_x = x;
            best = report;
        }
    }

    let clamped = problem.full_pose(&best_x);
    let x = DVector::from_iterator(best_x.len(), problem.dofs.iter().map(|&d| clamped[d]));
    (x, best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LmBackend;
    use mocap_core::synthetic::{motion, skeletons};

    #[test]
    fn recovers_elbow_angle_from_markers() {
        let (arm, markers) = skeletons::planar_arm().unwrap();
        let elbow = arm.joint_by_name("elbow").unwrap();
        let scales = arm.unit_scales();
        let poses = motion::sweep_joint(&arm, elbow, 0.9, 0.9, 1);
        let frame = &motion::simulate_markers(&arm, &markers, &poses, &scales)[0];

        let targets = IkTargets {
            markers: markers.iter().map(|m| (m.clone(), frame[&m.name])).collect(),
            joints: Vec::new(),
        };
        let dof = arm.joint_dofs(elbow).start;
        let problem = IkProblem::new(&arm, &scales, arm.zero_pose(), vec![dof], &targets);

        let (x, report) = solve_ik_with_restarts(
            &LmBackend,
            &problem,
            problem.initial_params(),
            &SolveOptions::default(),
            &RestartOptions::default(),
        );
        assert!((x[0] - 0.9).abs() < 1e-6, "elbow angle {}", x[0]);
        assert!(report.final_cost < 1e-10, "cost {}", report.final_cost);
    }
}
