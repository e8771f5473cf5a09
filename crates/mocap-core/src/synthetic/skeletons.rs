//! Reference skeletons with hand-placed marker sets.

use crate::{JointKind, KinematicTree, Marker, SkeletonError, Vec3};

/// Two-segment arm: a free root joint carrying the upper arm and a Z-axis
/// elbow hinge carrying the forearm. Four non-coplanar markers per segment.
pub fn planar_arm() -> Result<(KinematicTree, Vec<Marker>), SkeletonError> {
    let mut arm = KinematicTree::new();
    let upper = arm
        .add_root_body("root", JointKind::Free, Vec3::new(0.0, 1.2, 0.0), "upper_arm")?;
    let forearm = arm
        .add_body(
            upper,
            "elbow",
            JointKind::Revolute {
                axis: Vec3::z_axis(),
            },
            Vec3::new(0.0, -0.3, 0.0),
            "forearm",
        )?;

    let markers = vec![
        Marker::new("UA1", upper, Vec3::new(0.04, -0.05, 0.03)),
        Marker::new("UA2", upper, Vec3::new(-0.04, -0.12, 0.02)),
        Marker::new("UA3", upper, Vec3::new(0.03, -0.20, -0.04)),
        Marker::new("UA4", upper, Vec3::new(-0.02, -0.26, -0.03)),
        Marker::new("FA1", forearm, Vec3::new(0.03, -0.05, 0.04)),
        Marker::new("FA2", forearm, Vec3::new(-0.04, -0.10, -0.02)),
        Marker::new("FA3", forearm, Vec3::new(0.02, -0.18, -0.05)),
        Marker::new("FA4", forearm, Vec3::new(-0.03, -0.24, 0.03)),
    ];
    Ok((arm, markers))
}

/// Three-segment leg: free pelvis, ball hip and an X-axis knee hinge.
///
/// The shank carries a single marker, so the knee can only be located from
/// the thigh side. Thigh and shank share a scale group.
pub fn sparse_leg() -> Result<(KinematicTree, Vec<Marker>), SkeletonError> {
    let mut leg = KinematicTree::new();
    let pelvis = leg
        .add_root_body("root", JointKind::Free, Vec3::new(0.0, 1.0, 0.0), "pelvis")?;
    let thigh = leg
        .add_body(pelvis, "hip", JointKind::Ball, Vec3::new(0.1, -0.05, 0.0), "thigh")?;
    let shank = leg
        .add_body(
            thigh,
            "knee",
            JointKind::Revolute {
                axis: Vec3::x_axis(),
            },
            Vec3::new(0.0, -0.42, 0.0),
            "shank",
        )?;
    leg.group_scales(&[thigh, shank])?;

    let markers = vec![
        Marker::new("PV1", pelvis, Vec3::new(0.12, 0.05, 0.08)),
        Marker::new("PV2", pelvis, Vec3::new(-0.12, 0.04, 0.08)),
        Marker::new("PV3", pelvis, Vec3::new(0.0, 0.08, -0.10)),
        Marker::new("PV4", pelvis, Vec3::new(0.05, -0.02, 0.12)),
        Marker::new("TH1", thigh, Vec3::new(0.06, -0.10, 0.03)),
        Marker::new("TH2", thigh, Vec3::new(-0.04, -0.22, 0.05)),
        Marker::new("TH3", thigh, Vec3::new(0.05, -0.30, -0.04)),
        Marker::new("SH1", shank, Vec3::new(0.04, -0.20, 0.05)),
    ];
    Ok((leg, markers))
}
