//! Step functions of the initialization pipeline.
//!
//! Each step reads the inputs and earlier results of an [`IkInitializer`],
//! stores its own result in [`IkInitializer::state`] and appends a log entry.
//! Steps can be rerun individually; a step that changes joint centers clears
//! everything derived from them.

use anyhow::{bail, Context, Result};
use log::info;
use mocap_core::{Dir3, Pt3, Real, SkeletonModel};
use std::collections::BTreeMap;

use crate::mds_centers::{self, JointCenterFrame};
use crate::pivot::{solve_pivot_centers, JointAxisFrame};
use crate::pose::{FramePose, PoseSolver};
use crate::recenter::recenter_axis_joints;
use crate::reference::ReferencePose;
use crate::refine::Refiner;
use crate::scale::estimate_scales;
use crate::session::{IkInitResult, IkInitializer};
use crate::topology::{StackedJointId, Topology};

// ─────────────────────────────────────────────────────────────────────────────
// Helper Functions
// ─────────────────────────────────────────────────────────────────────────────

fn ensure_finite<T>(
    topo: &Topology,
    frames: &[BTreeMap<StackedJointId, T>],
    is_finite: impl Fn(&T) -> bool,
    what: &str,
) -> Result<()> {
    for (f, frame) in frames.iter().enumerate() {
        if let Some((&j, _)) = frame.iter().find(|(_, v)| !is_finite(v)) {
            bail!("non-finite {} for joint '{}' in frame {}", what, topo.joints[j].name, f);
        }
    }
    Ok(())
}

fn finite_point(p: &Pt3) -> bool {
    p.coords.iter().all(|v| v.is_finite())
}

fn finite_axis(a: &Dir3) -> bool {
    a.iter().all(|v| v.is_finite())
}

fn ensure_finite_poses<S: SkeletonModel>(model: &S, poses: &[FramePose]) -> Result<()> {
    for (f, pose) in poses.iter().enumerate() {
        for j in 0..model.num_joints() {
            if model.joint_dofs(j).any(|d| !pose.positions[d].is_finite()) {
                bail!("non-finite pose value for joint '{}' in frame {}", model.joint_name(j), f);
            }
        }
    }
    Ok(())
}

/// Record a failed check in the log before propagating it.
fn checked<S: SkeletonModel>(
    init: &mut IkInitializer<S>,
    operation: &str,
    check: Result<()>,
) -> Result<()> {
    if let Err(e) = &check {
        init.log_failure(operation, e.to_string());
    }
    check
}

/// Scales for pose solving: the estimate when present, else the reference.
fn pose_reference<S: SkeletonModel>(init: &IkInitializer<S>) -> ReferencePose {
    match &init.state.scales {
        Some(est) => ReferencePose::new(init.model(), init.markers(), est.body_scales.clone()),
        None => init.reference().clone(),
    }
}

fn centers_or_empty<S: SkeletonModel>(init: &IkInitializer<S>) -> Vec<JointCenterFrame> {
    init.state
        .joint_centers
        .clone()
        .unwrap_or_else(|| vec![JointCenterFrame::new(); init.frames().len()])
}

// ─────────────────────────────────────────────────────────────────────────────
// Step Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Triangulate joint centers frame by frame from marker distances.
///
/// Replaces any earlier joint centers and axes.
pub fn step_mds_joint_centers<S: SkeletonModel>(init: &mut IkInitializer<S>) -> Result<()> {
    let (topo, reference) = (init.topology(), init.reference());
    let solved: Vec<_> = init
        .frames()
        .iter()
        .map(|f| mds_centers::solve_frame(topo, &init.cache, reference, f, &init.config))
        .collect();
    let errors: Vec<Real> = solved.iter().filter_map(|s| s.mean_error).collect();
    let mean_error =
        (!errors.is_empty()).then(|| errors.iter().sum::<Real>() / errors.len() as Real);
    let centers: Vec<JointCenterFrame> = solved.into_iter().map(|s| s.centers).collect();

    let check = ensure_finite(init.topology(), &centers, finite_point, "joint center");
    checked(init, "mds_joint_centers", check)?;

    let count: usize = centers.iter().map(|c| c.len()).sum();
    info!(
        "mds: {} joint centers over {} frames, mean error {:?}",
        count,
        centers.len(),
        mean_error
    );

    init.state.joint_centers = Some(centers);
    init.state.joint_axes = None;
    init.state.pivot_errors = None;
    init.state.mds_mean_error = mean_error;
    init.state.clear_downstream_of_centers();
    init.log_success_with_notes(
        "mds_joint_centers",
        format!("centers={}, mean_error={:?}", count, mean_error),
    );
    Ok(())
}

/// Locate joints between tracked bodies from their relative motion.
///
/// Pivot results overwrite centers from earlier steps for the same joint and
/// frame; axis-ambiguous joints also get a per-frame axis.
pub fn step_pivot_joint_centers<S: SkeletonModel>(init: &mut IkInitializer<S>) -> Result<()> {
    let mut centers = centers_or_empty(init);
    let out = solve_pivot_centers(init.topology(), init.frames(), &centers, &init.config);

    let check = ensure_finite(init.topology(), &out.centers, finite_point, "joint center")
        .and_then(|_| ensure_finite(init.topology(), &out.axes, finite_axis, "joint axis"));
    checked(init, "pivot_joint_centers", check)?;

    for (merged, solved) in centers.iter_mut().zip(&out.centers) {
        merged.extend(solved.iter().map(|(&j, &c)| (j, c)));
    }
    let axis_joints: usize = out
        .errors
        .keys()
        .filter(|j| out.axes.iter().any(|a| a.contains_key(*j)))
        .count();
    info!(
        "pivot: {} joints solved, {} axis-ambiguous",
        out.errors.len(),
        axis_joints
    );

    init.state.joint_centers = Some(centers);
    init.state.joint_axes = Some(out.axes);
    init.state.clear_downstream_of_centers();
    init.log_success_with_notes(
        "pivot_joint_centers",
        format!("joints={}, axis_joints={}", out.errors.len(), axis_joints),
    );
    init.state.pivot_errors = Some(out.errors);
    Ok(())
}

/// Slide axis-ambiguous joint centers along their axis using neighbouring
/// joints with unambiguous centers.
pub fn step_recenter_axis_joints<S: SkeletonModel>(init: &mut IkInitializer<S>) -> Result<()> {
    let mut centers = init
        .require_centers()
        .context("axis recentering requires joint centers")?
        .to_vec();
    let Some(mut axes) = init.state.joint_axes.clone() else {
        init.state.recentered = Some(Vec::new());
        init.log_success_with_notes("recenter_axis_joints", "no axis joints");
        return Ok(());
    };

    let report = recenter_axis_joints(
        init.model(),
        init.topology(),
        init.reference(),
        init.frames(),
        &mut centers,
        &mut axes,
        &init.config,
    );
    let check = ensure_finite(init.topology(), &centers, finite_point, "joint center");
    checked(init, "recenter_axis_joints", check)?;

    info!(
        "recenter: {} joints, {} moves, {} rejected",
        report.recentered.len(),
        report.moves,
        report.rejected
    );
    init.state.joint_centers = Some(centers);
    init.state.joint_axes = Some(axes);
    init.state.clear_downstream_of_centers();
    init.log_success_with_notes(
        "recenter_axis_joints",
        format!(
            "joints={}, moves={}, rejected={}",
            report.recentered.len(),
            report.moves,
            report.rejected
        ),
    );
    init.state.recentered = Some(report.recentered);
    Ok(())
}

/// Estimate per-group body scales from joint-to-joint distances.
///
/// Without joint centers every body takes the default scale.
pub fn step_estimate_scales<S: SkeletonModel>(init: &mut IkInitializer<S>) -> Result<()> {
    let centers = init.state.joint_centers.as_deref().unwrap_or(&[]);
    let est = estimate_scales(
        init.model(),
        init.topology(),
        init.unit_reference(),
        centers,
        init.target_height(),
        &init.config,
    );
    let invalid = est
        .body_scales
        .iter()
        .position(|s| !s.iter().all(|v| v.is_finite() && *v > 0.0));
    if let Some(b) = invalid {
        let name = init.model().body_name(b);
        let msg = format!("invalid scale {:?} for body '{}'", est.body_scales[b], name);
        init.log_failure("estimate_scales", msg.clone());
        bail!(msg);
    }

    info!("scales: {} groups", est.group_scales.len());
    init.log_success_with_notes("estimate_scales", format!("groups={}", est.group_scales.len()));
    init.state.scales = Some(est);
    init.state.poses = None;
    init.state.completion_costs = None;
    Ok(())
}

/// Closed-form pose of every frame from joint centers and markers.
pub fn step_closed_form_poses<S: SkeletonModel>(init: &mut IkInitializer<S>) -> Result<()> {
    let reference = pose_reference(init);
    let centers = centers_or_empty(init);
    let solver = PoseSolver::new(
        init.model(),
        init.topology(),
        &reference,
        init.markers(),
        &init.config,
    );
    let poses: Vec<FramePose> = init
        .frames()
        .iter()
        .zip(&centers)
        .map(|(frame, c)| solver.solve_frame(frame, c))
        .collect();

    let check = ensure_finite_poses(init.model(), &poses);
    checked(init, "closed_form_poses", check)?;

    let resolved: usize = poses.iter().map(FramePose::num_resolved).sum();
    let total = poses.len() * init.model().num_dofs();
    info!("poses: {}/{} DOFs resolved in closed form", resolved, total);
    init.state.poses = Some(poses);
    init.state.completion_costs = None;
    init.log_success_with_notes("closed_form_poses", format!("resolved={}/{}", resolved, total));
    Ok(())
}

/// Solve the DOFs the closed-form pass left unresolved by least squares.
pub fn step_complete_ik<S: SkeletonModel>(init: &mut IkInitializer<S>) -> Result<()> {
    let mut poses = init
        .state
        .poses
        .clone()
        .context("iterative completion requires closed-form poses")?;
    let reference = pose_reference(init);
    let centers = centers_or_empty(init);
    let refiner = Refiner {
        model: init.model(),
        topo: init.topology(),
        markers: init.markers(),
        scales: &reference.scales,
        cfg: &init.config,
    };
    let costs: Vec<Option<Real>> = init
        .frames()
        .iter()
        .zip(&centers)
        .zip(poses.iter_mut())
        .enumerate()
        .map(|(f, ((frame, c), pose))| refiner.complete(frame, c, pose, f).map(|r| r.final_cost))
        .collect();

    let check = ensure_finite_poses(init.model(), &poses);
    checked(init, "complete_ik", check)?;

    let solved = costs.iter().flatten().count();
    let worst = costs.iter().flatten().copied().fold(0.0, Real::max);
    info!("complete: {} frames refined, worst cost {:.3e}", solved, worst);
    init.state.poses = Some(poses);
    init.state.completion_costs = Some(costs);
    init.log_success_with_notes(
        "complete_ik",
        format!("frames={}, worst_cost={:.3e}", solved, worst),
    );
    Ok(())
}

/// Polish every DOF of every frame from its current value.
pub fn step_fine_tune_ik<S: SkeletonModel>(init: &mut IkInitializer<S>) -> Result<()> {
    let mut poses = init
        .state
        .poses
        .clone()
        .context("fine tuning requires poses")?;
    let reference = pose_reference(init);
    let centers = centers_or_empty(init);
    let refiner = Refiner {
        model: init.model(),
        topo: init.topology(),
        markers: init.markers(),
        scales: &reference.scales,
        cfg: &init.config,
    };
    let tuned = init
        .frames()
        .iter()
        .zip(&centers)
        .zip(poses.iter_mut())
        .filter_map(|((frame, c), pose)| refiner.fine_tune(frame, c, pose))
        .count();

    let check = ensure_finite_poses(init.model(), &poses);
    checked(init, "fine_tune_ik", check)?;

    info!("fine tune: {} frames", tuned);
    init.state.poses = Some(poses);
    init.log_success_with_notes("fine_tune_ik", format!("frames={}", tuned));
    Ok(())
}

/// Name-keyed snapshot of the current results.
pub fn collect_result<S: SkeletonModel>(init: &IkInitializer<S>) -> Result<IkInitResult> {
    let scales = init.state.scales.as_ref().context("no scale estimate")?;
    let poses = init.state.poses.clone().context("no poses")?;
    let centers = centers_or_empty(init);
    let axes: Vec<JointAxisFrame> = init
        .state
        .joint_axes
        .clone()
        .unwrap_or_else(|| vec![JointAxisFrame::new(); init.frames().len()]);
    Ok(IkInitResult {
        joint_centers: init.by_name(&centers),
        joint_axes: init.by_name(&axes),
        group_scales: scales.group_scales.clone(),
        body_scales: scales.body_scales.clone(),
        poses,
    })
}

/// Run every step in order: joint centers (triangulation, pivots, axis
/// recentering), scales, closed-form poses and iterative completion, plus
/// fine tuning when enabled in the config.
pub fn run_full_pipeline<S: SkeletonModel>(init: &mut IkInitializer<S>) -> Result<IkInitResult> {
    step_mds_joint_centers(init)?;
    step_pivot_joint_centers(init)?;
    step_recenter_axis_joints(init)?;
    step_estimate_scales(init)?;
    step_closed_form_poses(init)?;
    step_complete_ik(init)?;
    if init.config.refine.fine_tune {
        step_fine_tune_ik(init)?;
    }
    collect_result(init)
}
