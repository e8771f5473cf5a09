use mocap_core::synthetic::{motion, noise, skeletons};
use mocap_core::{JointKind, KinematicTree, Marker, Pt3, Real, SkeletonModel, Vec3};
use mocap_pipeline::steps::{
    step_closed_form_poses, step_complete_ik, step_estimate_scales, step_mds_joint_centers,
    step_pivot_joint_centers, step_recenter_axis_joints,
};
use mocap_pipeline::{
    run_full_pipeline, IkInitConfig, IkInitializer, JointCenterFrame, ReferencePose, Topology,
};
use nalgebra::DVector;
use std::f64::consts::FRAC_PI_2;

fn arm_session(poses: &[DVector<Real>]) -> IkInitializer<KinematicTree> {
    let (arm, markers) = skeletons::planar_arm().unwrap();
    let frames = motion::simulate_markers(&arm, &markers, poses, &arm.unit_scales());
    IkInitializer::new(arm, markers, frames, None, IkInitConfig::default()).unwrap()
}

fn elbow_sweep(frames: usize) -> (KinematicTree, Vec<DVector<Real>>) {
    let (arm, _) = skeletons::planar_arm().unwrap();
    let elbow = arm.joint_by_name("elbow").unwrap();
    let poses = motion::sweep_joint(&arm, elbow, 0.0, FRAC_PI_2, frames);
    (arm, poses)
}

/// Joint centers of every stacked joint from forward kinematics.
fn exact_centers<S: SkeletonModel>(
    model: &S,
    topo: &Topology,
    poses: &[DVector<Real>],
    scales: &[Vec3],
) -> Vec<JointCenterFrame> {
    let scales = scales.to_vec();
    poses
        .iter()
        .map(|pose| {
            let truth = model.joint_world_positions(pose, &scales);
            (0..topo.num_joints())
                .map(|j| {
                    let members = &topo.joints[j].joints;
                    let sum = members.iter().fold(Vec3::zeros(), |acc, &m| acc + truth[m].coords);
                    (j, Pt3::from(sum / members.len() as Real))
                })
                .collect()
        })
        .collect()
}

#[test]
fn arm_sweep_end_to_end() {
    let (arm, poses) = elbow_sweep(20);
    let mut init = arm_session(&poses);
    let result = run_full_pipeline(&mut init).unwrap();

    assert_eq!(result.poses.len(), poses.len());
    for (f, (est, truth)) in result.poses.iter().zip(&poses).enumerate() {
        let err = (&est.positions - truth).amax();
        assert!(err < 1e-4, "frame {}: pose error {:.3e}", f, err);
        assert_eq!(est.body_transforms.len(), 2, "frame {}", f);
    }
    for s in &result.body_scales {
        assert!((s - Vec3::repeat(1.0)).amax() < 1e-6, "scale {:?}", s);
    }

    let truth = arm.joint_world_positions(&poses[7], &arm.unit_scales());
    let elbow = result.joint_centers[7]["elbow"];
    assert!((elbow - truth[1]).norm() < 1e-6, "elbow center {:?}", elbow);
    assert!(result.joint_axes[7].contains_key("elbow"));
    assert!(init.log.iter().all(|e| e.success));
}

#[test]
fn occluded_forearm_is_not_registered() {
    let (arm, poses) = elbow_sweep(12);
    let mut init = {
        let (_, markers) = skeletons::planar_arm().unwrap();
        let mut frames = motion::simulate_markers(&arm, &markers, &poses, &arm.unit_scales());
        noise::occlude(&mut frames, 4, &["FA1", "FA2", "FA3"]);
        IkInitializer::new(arm.clone(), markers, frames, None, IkInitConfig::default()).unwrap()
    };
    let elbow = arm.joint_by_name("elbow").unwrap();
    let dof = arm.joint_dofs(elbow).start;

    step_mds_joint_centers(&mut init).unwrap();
    step_pivot_joint_centers(&mut init).unwrap();
    step_recenter_axis_joints(&mut init).unwrap();
    step_estimate_scales(&mut init).unwrap();
    step_closed_form_poses(&mut init).unwrap();

    // Any elbow center kept for the occluded frame comes from the upper arm
    // markers and must match the true center.
    let topo_elbow = init.topology().joint_by_name("elbow").unwrap();
    let truth = arm.joint_world_positions(&poses[4], &arm.unit_scales());
    if let Some(c) = init.state.joint_centers.as_ref().unwrap()[4].get(&topo_elbow) {
        assert!((c - truth[1]).norm() < 1e-6, "elbow center {:?}", c);
    }

    let pose = &init.state.poses.as_ref().unwrap()[4];
    assert!(!pose.body_transforms.contains_key("forearm"));
    assert!(pose.body_transforms.contains_key("upper_arm"));
    assert!(!pose.resolved[dof]);
    assert!(init.state.poses.as_ref().unwrap()[3].resolved[dof]);

    // The single forearm marker still pins the elbow angle iteratively.
    step_complete_ik(&mut init).unwrap();
    let costs = init.state.completion_costs.as_ref().unwrap();
    assert!(costs[4].is_some());
    assert!(costs[3].is_none());
    let angle = init.state.poses.as_ref().unwrap()[4].positions[dof];
    assert!((angle - poses[4][dof]).abs() < 1e-4, "elbow {} vs {}", angle, poses[4][dof]);
}

#[test]
fn hidden_frame_yields_nothing() {
    let (arm, poses) = elbow_sweep(10);
    let (_, markers) = skeletons::planar_arm().unwrap();
    let mut frames = motion::simulate_markers(&arm, &markers, &poses, &arm.unit_scales());
    frames[6].clear();
    let mut init = IkInitializer::new(arm, markers, frames, None, IkInitConfig::default()).unwrap();

    let result = run_full_pipeline(&mut init).unwrap();
    assert!(result.joint_centers[6].is_empty());
    assert!(result.poses[6].body_transforms.is_empty());
    assert_eq!(result.poses[6].num_resolved(), 0);
    assert!(init.state.completion_costs.as_ref().unwrap()[6].is_none());
    assert_eq!(result.poses[5].body_transforms.len(), 2);
}

#[test]
fn scale_estimate_is_idempotent() {
    let (arm, poses) = elbow_sweep(8);
    let mut init = arm_session(&poses);

    let mut truth = arm.unit_scales();
    truth[0] = Vec3::repeat(1.1);
    let centers = exact_centers(&arm, init.topology(), &poses, &truth);
    init.state.joint_centers = Some(centers);
    step_estimate_scales(&mut init).unwrap();
    let first = init.state.scales.clone().unwrap();
    assert!((first.body_scales[0] - Vec3::repeat(1.1)).amax() < 1e-9);

    let rescaled = exact_centers(&arm, init.topology(), &poses, &first.body_scales);
    init.state.joint_centers = Some(rescaled);
    step_estimate_scales(&mut init).unwrap();
    let second = init.state.scales.clone().unwrap();
    for (a, b) in first.body_scales.iter().zip(&second.body_scales) {
        assert!((a - b).amax() < 1e-9, "{:?} vs {:?}", a, b);
    }
}

/// Pelvis with two legs; each hip is three coincident hinges and each foot is
/// welded to the shank.
fn two_leg_skeleton() -> KinematicTree {
    let mut m = KinematicTree::new();
    let pelvis = m
        .add_root_body("root", JointKind::Free, Vec3::new(0.0, 1.0, 0.0), "pelvis")
        .unwrap();
    let hinge = |axis| JointKind::Revolute { axis };
    for (side, x) in [("l", 0.1), ("r", -0.1)] {
        let n = |s: &str| format!("{}_{}", side, s);
        let hip = Vec3::new(x, -0.05, 0.0);
        let a = m
            .add_body(pelvis, &n("hip_x"), hinge(Vec3::x_axis()), hip, &n("hip_a"))
            .unwrap();
        let b = m
            .add_body(a, &n("hip_y"), hinge(Vec3::y_axis()), Vec3::zeros(), &n("hip_b"))
            .unwrap();
        let thigh = m
            .add_body(b, &n("hip_z"), hinge(Vec3::z_axis()), Vec3::zeros(), &n("thigh"))
            .unwrap();
        let knee = Vec3::new(0.0, -0.4, 0.0);
        let shank = m
            .add_body(thigh, &n("knee"), hinge(Vec3::x_axis()), knee, &n("shank"))
            .unwrap();
        m.add_body(shank, &n("ankle"), JointKind::Fixed, Vec3::new(0.0, -0.4, 0.0), &n("foot"))
            .unwrap();
    }
    m
}

#[test]
fn topology_accounts_for_every_body_and_joint() {
    let model = two_leg_skeleton();
    let markers: Vec<Marker> = Vec::new();
    let reference = ReferencePose::unit(&model, &markers);
    let topo = Topology::build(&model, &markers, &reference, 0.07, 3);

    assert!(topo.num_bodies() + topo.num_joints() <= model.num_bodies() + model.num_joints());
    assert_eq!(topo.num_bodies(), 5);
    assert_eq!(topo.num_joints(), 5);

    let mut seen_bodies = vec![0; model.num_bodies()];
    for body in &topo.bodies {
        for &b in &body.bodies {
            seen_bodies[b] += 1;
        }
    }
    assert!(seen_bodies.iter().all(|&n| n == 1), "{:?}", seen_bodies);

    let mut seen_joints = vec![0; model.num_joints()];
    for joint in &topo.joints {
        for &j in &joint.joints {
            seen_joints[j] += 1;
        }
    }
    for j in 0..model.num_joints() {
        match model.joint_kind(j) {
            JointKind::Fixed => assert_eq!(seen_joints[j], 0),
            _ => assert_eq!(seen_joints[j], 1, "joint '{}'", model.joint_name(j)),
        }
    }

    for (i, joint) in topo.joints.iter().enumerate() {
        assert_eq!(joint.child_body, i);
        assert!(joint.parent_body.map_or(true, |p| p < i));
    }
}

#[test]
fn sparse_leg_runs_with_noise() {
    let (leg, markers) = skeletons::sparse_leg().unwrap();
    let hip = leg.joint_by_name("hip").unwrap();
    let knee = leg.joint_by_name("knee").unwrap();
    let mut base = leg.zero_pose();
    base[leg.joint_dofs(knee).start] = 0.3;
    let mut poses = motion::sweep_joint_from(&leg, &base, hip, -0.5, 0.6, 15);
    poses.extend(motion::sweep_joint(&leg, knee, 0.0, 1.2, 15));

    let exact = motion::simulate_markers(&leg, &markers, &poses, &leg.unit_scales());
    let frames = noise::add_gaussian_noise(&exact, 5e-4, 7).unwrap();
    let height = leg.height(&leg.zero_pose(), &leg.unit_scales());
    let cfg = IkInitConfig::default();
    let mut init = IkInitializer::new(leg.clone(), markers, frames, Some(height), cfg).unwrap();

    let result = run_full_pipeline(&mut init).unwrap();
    assert_eq!(result.poses.len(), poses.len());
    assert_eq!(result.group_scales.len(), leg.scale_groups().len());

    let thigh = leg.body_by_name("thigh").unwrap();
    let shank = leg.body_by_name("shank").unwrap();
    assert_eq!(result.body_scales[thigh], result.body_scales[shank]);
    let thigh_scale = result.body_scales[thigh];
    assert!((thigh_scale - Vec3::repeat(1.0)).amax() < 0.05, "{:?}", thigh_scale);

    let hip_dofs = leg.joint_dofs(hip);
    let worst = result
        .poses
        .iter()
        .zip(&poses)
        .map(|(est, truth)| {
            hip_dofs
                .clone()
                .map(|d| (est.positions[d] - truth[d]).abs())
                .fold(0.0, Real::max)
        })
        .fold(0.0, Real::max);
    assert!(worst < 0.1, "worst hip error {}", worst);
    assert!(result.poses.iter().all(|p| p.positions.iter().all(|v| v.is_finite())));
}
