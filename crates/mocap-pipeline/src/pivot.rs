//! Joint centers from rigid body trajectories.
//!
//! Bodies with enough markers are tracked through the sequence as rigid
//! transforms relative to their first fully visible frame. A joint between two
//! tracked bodies is the point that stays fixed in both body frames (the pivot
//! system). A joint with only one tracked side is found by fitting a center
//! of rotation to the other side's markers, expressed in the tracked body.

use crate::config::IkInitConfig;
use crate::mds_centers::JointCenterFrame;
use crate::topology::{StackedBodyId, StackedJointId, Topology};
use log::debug;
use mocap_core::{evenly_spaced_indices, Dir3, Iso3, MarkerFrame, Pt3, Real, Vec3};
use mocap_linear::{fit_axis_gamage_lasenby, fit_center_of_rotation, rigid_align_unweighted};
use nalgebra::{DMatrix, DVector, Unit};
use std::collections::BTreeMap;

/// Axis directions of one frame, keyed by stacked joint.
pub type JointAxisFrame = BTreeMap<StackedJointId, Dir3>;

/// Rigid motion of one body relative to its identity frame.
#[derive(Debug, Clone)]
pub struct BodyTrajectory {
    pub identity_frame: usize,
    /// Marker positions at the identity frame; these define the body's local frame.
    pub local: BTreeMap<String, Pt3>,
    /// Frame index → transform from local to world.
    pub transforms: BTreeMap<usize, Iso3>,
}

impl BodyTrajectory {
    /// Track a body from the markers named in `markers`. Returns `None` if no
    /// frame shows `min_markers` of them.
    pub fn track(markers: &[String], frames: &[MarkerFrame], min_markers: usize) -> Option<Self> {
        let visible = |frame: &MarkerFrame| -> Vec<(String, Pt3)> {
            markers
                .iter()
                .filter_map(|m| frame.get(m).map(|p| (m.clone(), *p)))
                .collect()
        };
        let (identity_frame, local) = frames.iter().enumerate().find_map(|(i, f)| {
            let seen = visible(f);
            (seen.len() >= min_markers).then(|| (i, seen.into_iter().collect::<BTreeMap<_, _>>()))
        })?;

        let mut transforms = BTreeMap::new();
        transforms.insert(identity_frame, Iso3::identity());
        for (i, frame) in frames.iter().enumerate().skip(identity_frame + 1) {
            let (from, to): (Vec<Pt3>, Vec<Pt3>) = local
                .iter()
                .filter_map(|(name, p)| frame.get(name).map(|w| (*p, *w)))
                .unzip();
            if from.len() < min_markers {
                continue;
            }
            match rigid_align_unweighted(&from, &to) {
                Ok(t) => {
                    transforms.insert(i, t);
                }
                Err(e) => debug!("tracking: frame {} skipped: {}", i, e),
            }
        }
        Some(Self {
            identity_frame,
            local,
            transforms,
        })
    }

    fn local_centroid(&self) -> Vec3 {
        let sum = self.local.values().fold(Vec3::zeros(), |acc, p| acc + p.coords);
        sum / self.local.len().max(1) as Real
    }
}

/// Joint centers, axes and fit errors found from body trajectories.
#[derive(Debug, Clone, Default)]
pub struct PivotOutput {
    pub centers: Vec<JointCenterFrame>,
    pub axes: Vec<JointAxisFrame>,
    /// Mean per-frame reconstruction error per solved joint.
    pub errors: BTreeMap<StackedJointId, Real>,
}

impl PivotOutput {
    fn new(frames: usize) -> Self {
        Self {
            centers: vec![JointCenterFrame::new(); frames],
            axes: vec![JointAxisFrame::new(); frames],
            errors: BTreeMap::new(),
        }
    }
}

/// Average offset of known centers in each body's local frame, used as the
/// conditioning point of the pivot system.
fn prior_offsets(
    joint: StackedJointId,
    parent: &BodyTrajectory,
    child: &BodyTrajectory,
    frames: &[usize],
    prior: &[JointCenterFrame],
) -> (Vec3, Vec3) {
    let mut sum_p = Vec3::zeros();
    let mut sum_c = Vec3::zeros();
    let mut n = 0usize;
    for &f in frames {
        let Some(center) = prior.get(f).and_then(|c| c.get(&joint)) else {
            continue;
        };
        sum_p += parent.transforms[&f].inverse_transform_point(center).coords;
        sum_c += child.transforms[&f].inverse_transform_point(center).coords;
        n += 1;
    }
    if n == 0 {
        let mid = (parent.local_centroid() + child.local_centroid()) * 0.5;
        return (mid, mid);
    }
    (sum_p / n as Real, sum_c / n as Real)
}

fn solve_pivot(
    joint: StackedJointId,
    parent: &BodyTrajectory,
    child: &BodyTrajectory,
    prior: &[JointCenterFrame],
    cfg: &IkInitConfig,
    out: &mut PivotOutput,
) -> bool {
    let usable: Vec<usize> = parent
        .transforms
        .keys()
        .copied()
        .filter(|f| child.transforms.contains_key(f))
        .collect();
    if usable.len() < cfg.min_pivot_frames {
        return false;
    }
    let sampled: Vec<usize> = evenly_spaced_indices(usable.len(), cfg.max_pivot_samples)
        .into_iter()
        .map(|i| usable[i])
        .collect();
    let (x0_p, x0_c) = prior_offsets(joint, parent, child, &usable, prior);

    let rows = 3 * sampled.len();
    let mut a = DMatrix::<Real>::zeros(rows, 6);
    let mut b = DVector::<Real>::zeros(rows);
    for (k, f) in sampled.iter().enumerate() {
        let tp = &parent.transforms[f];
        let tc = &child.transforms[f];
        let rp = tp.rotation.to_rotation_matrix().into_inner();
        let rc = tc.rotation.to_rotation_matrix().into_inner();
        a.view_mut((3 * k, 0), (3, 3)).copy_from(&rp);
        a.view_mut((3 * k, 3), (3, 3)).copy_from(&(-rc));
        let rhs = tc.translation.vector - tp.translation.vector - (rp * x0_p - rc * x0_c);
        b.rows_mut(3 * k, 3).copy_from(&rhs);
    }

    let svd = a.svd(true, true);
    let sv = &svd.singular_values;
    let max_sv = sv.max();
    if max_sv <= 0.0 {
        return false;
    }
    let Ok(delta) = svd.solve(&b, max_sv * 1e-8) else {
        return false;
    };
    let x_p = x0_p + delta.fixed_rows::<3>(0);
    let x_c = x0_c + delta.fixed_rows::<3>(3);

    let norm = sv.norm();
    let (k_min, s_min) = sv.argmin();
    let axis_local = (norm > 0.0 && s_min / norm < cfg.axis_singular_threshold)
        .then(|| svd.v_t.as_ref().map(|vt| vt.row(k_min).transpose()))
        .flatten()
        .map(|v| (Vec3::new(v[0], v[1], v[2]), Vec3::new(v[3], v[4], v[5])));

    let mut error = 0.0;
    for f in &usable {
        let tp = &parent.transforms[f];
        let tc = &child.transforms[f];
        let cp = tp * Pt3::from(x_p);
        let cc = tc * Pt3::from(x_c);
        let mid = Pt3::from((cp.coords + cc.coords) * 0.5);
        error += (cp - mid).norm() + (cc - mid).norm();
        out.centers[*f].insert(joint, mid);
        if let Some((ap, ac)) = &axis_local {
            let world = tp.rotation * ap + tc.rotation * ac;
            if let Some(axis) = Unit::try_new(world, 1e-12) {
                out.axes[*f].insert(joint, axis);
            }
        }
    }
    out.errors.insert(joint, error / usable.len() as Real);
    true
}

fn solve_constrained(
    joint: StackedJointId,
    anchor: &BodyTrajectory,
    other_markers: &[String],
    frames: &[MarkerFrame],
    cfg: &IkInitConfig,
    out: &mut PivotOutput,
) -> bool {
    let traces: Vec<Vec<Pt3>> = other_markers
        .iter()
        .map(|name| {
            anchor
                .transforms
                .iter()
                .filter_map(|(&f, t)| frames[f].get(name).map(|p| t.inverse_transform_point(p)))
                .collect::<Vec<_>>()
        })
        .filter(|trace| trace.len() >= cfg.min_pivot_frames)
        .collect();
    if traces.is_empty() {
        return false;
    }

    let fit = match fit_center_of_rotation(&traces, &cfg.center_fit_options()) {
        Ok(fit) => fit,
        Err(e) => {
            debug!("constrained fit failed: {}", e);
            return false;
        }
    };
    let axis = fit_axis_gamage_lasenby(&traces)
        .ok()
        .filter(|a| a.singular_value < cfg.axis_singular_threshold)
        .map(|a| a.axis);

    for (&f, t) in &anchor.transforms {
        out.centers[f].insert(joint, t * fit.center);
        if let Some(axis) = &axis {
            out.axes[f].insert(joint, t.rotation * *axis);
        }
    }

    let spread: Real = traces
        .iter()
        .map(|trace| {
            let radii: Vec<Real> = trace.iter().map(|p| (p - fit.center).norm()).collect();
            let mean = radii.iter().sum::<Real>() / radii.len() as Real;
            radii.iter().map(|r| (r - mean).abs()).sum::<Real>() / radii.len() as Real
        })
        .sum::<Real>()
        / traces.len() as Real;
    out.errors.insert(joint, spread);
    true
}

/// Solve every non-root joint reachable from body trajectories.
///
/// `prior` holds centers from earlier stages; it only conditions the pivot
/// system and is never copied into the output.
pub fn solve_pivot_centers(
    topo: &Topology,
    frames: &[MarkerFrame],
    prior: &[JointCenterFrame],
    cfg: &IkInitConfig,
) -> PivotOutput {
    let trajectories: Vec<Option<BodyTrajectory>> = topo
        .bodies
        .iter()
        .map(|b| {
            (b.markers.len() >= cfg.min_markers)
                .then(|| BodyTrajectory::track(&b.markers, frames, cfg.min_markers))
                .flatten()
        })
        .collect();

    let mut out = PivotOutput::new(frames.len());
    for (j, joint) in topo.joints.iter().enumerate() {
        let Some(p) = joint.parent_body else {
            continue;
        };
        let c = joint.child_body;
        let solved = match (&trajectories[p], &trajectories[c]) {
            (Some(tp), Some(tc)) => solve_pivot(j, tp, tc, prior, cfg, &mut out),
            (Some(anchor), None) => constrained(topo, j, anchor, c, frames, cfg, &mut out),
            (None, Some(anchor)) => constrained(topo, j, anchor, p, frames, cfg, &mut out),
            (None, None) => false,
        };
        if !solved {
            debug!("pivot: joint '{}' left unsolved", joint.name);
        }
    }
    out
}

fn constrained(
    topo: &Topology,
    joint: StackedJointId,
    anchor: &BodyTrajectory,
    other: StackedBodyId,
    frames: &[MarkerFrame],
    cfg: &IkInitConfig,
    out: &mut PivotOutput,
) -> bool {
    let markers = &topo.bodies[other].markers;
    !markers.is_empty() && solve_constrained(joint, anchor, markers, frames, cfg, out)
}
