//! Intermediate and final results of an initialization session.

use crate::mds_centers::JointCenterFrame;
use crate::pivot::JointAxisFrame;
use crate::pose::FramePose;
use crate::scale::ScaleEstimate;
use crate::topology::StackedJointId;
use mocap_core::{BodyScales, Dir3, Pt3, Real, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stage outputs, filled in as steps run. Every field is `None` until the
/// step producing it has succeeded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IkInitState {
    /// Per-frame joint centers, merged across the center steps.
    pub joint_centers: Option<Vec<JointCenterFrame>>,
    /// Per-frame axes of axis-ambiguous joints.
    pub joint_axes: Option<Vec<JointAxisFrame>>,
    /// Mean triangulation error over frames where anything was solved.
    pub mds_mean_error: Option<Real>,
    pub pivot_errors: Option<BTreeMap<StackedJointId, Real>>,
    /// Axis joints that were recentered.
    pub recentered: Option<Vec<StackedJointId>>,
    pub scales: Option<ScaleEstimate>,
    pub poses: Option<Vec<FramePose>>,
    /// Final cost of the iterative completion per frame, `None` where
    /// nothing needed solving.
    pub completion_costs: Option<Vec<Option<Real>>>,
}

impl IkInitState {
    /// Drop everything derived from joint centers.
    pub fn clear_downstream_of_centers(&mut self) {
        self.recentered = None;
        self.scales = None;
        self.poses = None;
        self.completion_costs = None;
    }
}

/// Name-keyed pipeline output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IkInitResult {
    pub joint_centers: Vec<BTreeMap<String, Pt3>>,
    pub joint_axes: Vec<BTreeMap<String, Dir3>>,
    /// One entry per skeleton scale group.
    pub group_scales: Vec<Vec3>,
    pub body_scales: BodyScales,
    pub poses: Vec<FramePose>,
}
