//! Initialization session: immutable inputs, derived topology and mutable
//! stage state.
//!
//! Step functions in [`crate::steps`] mutate an [`IkInitializer`] in place,
//! each reading what earlier steps left in [`IkInitState`].

mod state;
mod types;

pub use state::{IkInitResult, IkInitState};
pub use types::{current_timestamp, LogEntry};

use crate::config::IkInitConfig;
use crate::mds_centers::JointCenterFrame;
use crate::reference::ReferencePose;
use crate::scale::estimate_joint_distances;
use crate::topology::{DistanceCache, StackedJointId, Topology};
use anyhow::{bail, Context, Result};
use log::info;
use mocap_core::{visible_markers, Marker, MarkerFrame, MarkerSequence, Real, SkeletonModel};
use std::collections::{BTreeMap, BTreeSet};

/// Closed-form IK initializer for one skeleton and one marker recording.
#[derive(Debug, Clone)]
pub struct IkInitializer<S: SkeletonModel> {
    model: S,
    markers: Vec<Marker>,
    frames: MarkerSequence,
    target_height: Option<Real>,

    /// Thresholds used by every step. Changing them does not clear state.
    pub config: IkInitConfig,

    topology: Topology,
    /// Zero pose at unit scale.
    unit: ReferencePose,
    /// Zero pose scaled to the target height, if any.
    reference: ReferencePose,

    /// Joint↔marker and joint↔joint distances used for triangulation.
    pub cache: DistanceCache,
    pub state: IkInitState,
    pub log: Vec<LogEntry>,
}

impl<S: SkeletonModel> IkInitializer<S> {
    /// Validate the inputs and derive the reduced topology and distance caches.
    ///
    /// # Errors
    ///
    /// Fails on markers attached to unknown bodies, duplicate marker names,
    /// an empty recording, or a non-positive target height.
    pub fn new(
        model: S,
        markers: Vec<Marker>,
        frames: MarkerSequence,
        target_height: Option<Real>,
        config: IkInitConfig,
    ) -> Result<Self> {
        if frames.is_empty() {
            bail!("marker recording has no frames");
        }
        let mut names = BTreeSet::new();
        for m in &markers {
            if m.body >= model.num_bodies() {
                bail!("marker '{}' is attached to unknown body {}", m.name, m.body);
            }
            if !names.insert(m.name.as_str()) {
                bail!("duplicate marker name '{}'", m.name);
            }
        }

        let unit = ReferencePose::unit(&model, &markers);
        let reference = match target_height {
            Some(h) if !(h.is_finite() && h > 0.0) => {
                bail!("target height must be positive, got {}", h)
            }
            Some(h) => {
                let model_height = model.height(&model.zero_pose(), &unit.scales);
                if model_height <= 0.0 {
                    bail!("skeleton has zero height at its zero pose, cannot scale to {} m", h);
                }
                ReferencePose::uniform(&model, &markers, h / model_height)
            }
            None => unit.clone(),
        };

        let topology = Topology::build(
            &model,
            &markers,
            &reference,
            config.merge_distance,
            config.min_markers,
        );
        let cache = DistanceCache::from_reference(&topology, &reference);
        info!(
            "topology: {} bodies -> {}, {} joints -> {} ({} tracked)",
            model.num_bodies(),
            topology.num_bodies(),
            model.num_joints(),
            topology.num_joints(),
            topology.joints.iter().filter(|j| j.tracked).count()
        );

        Ok(Self {
            model,
            markers,
            frames,
            target_height,
            config,
            topology,
            unit,
            reference,
            cache,
            state: IkInitState::default(),
            log: Vec::new(),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn model(&self) -> &S {
        &self.model
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn frames(&self) -> &[MarkerFrame] {
        &self.frames
    }

    pub fn target_height(&self) -> Option<Real> {
        self.target_height
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn unit_reference(&self) -> &ReferencePose {
        &self.unit
    }

    pub fn reference(&self) -> &ReferencePose {
        &self.reference
    }

    /// Markers observed in frame `frame`.
    pub fn visible_markers(&self, frame: usize) -> Vec<&Marker> {
        self.frames
            .get(frame)
            .map(|f| visible_markers(&self.markers, f))
            .unwrap_or_default()
    }

    /// Tracked joints with at least one adjacent marker observed in `frame`.
    pub fn visible_joints(&self, frame: usize) -> Vec<StackedJointId> {
        self.frames
            .get(frame)
            .map(|f| self.topology.visible_joints(f))
            .unwrap_or_default()
    }

    pub(crate) fn require_centers(&self) -> Result<&[JointCenterFrame]> {
        self.state
            .joint_centers
            .as_deref()
            .context("no joint centers yet: run a joint-center step first")
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Distances
    // ─────────────────────────────────────────────────────────────────────────

    /// Mean joint-to-joint distances from the current joint centers, keyed by
    /// joint name pairs.
    pub fn estimate_joint_distances(&self) -> Result<BTreeMap<(String, String), Real>> {
        let centers = self.require_centers()?;
        Ok(estimate_joint_distances(&self.topology, centers)
            .into_iter()
            .map(|((a, b), d)| {
                let name = |j: StackedJointId| self.topology.joints[j].name.clone();
                ((name(a), name(b)), d)
            })
            .collect())
    }

    /// Refresh the distance caches from the current joint centers. A later
    /// triangulation step then uses distances measured on this recording
    /// instead of the reference skeleton.
    pub fn reestimate_distances_from_joint_centers(&mut self) -> Result<()> {
        let centers = self.require_centers()?.to_vec();
        self.cache.reestimate_from_joint_centers(&self.frames, &centers);
        self.log_success("reestimate_distances");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Log
    // ─────────────────────────────────────────────────────────────────────────

    pub fn log_success(&mut self, operation: impl Into<String>) {
        self.log.push(LogEntry::success(operation));
    }

    pub fn log_success_with_notes(
        &mut self,
        operation: impl Into<String>,
        notes: impl Into<String>,
    ) {
        self.log.push(LogEntry::success_with_notes(operation, notes));
    }

    pub fn log_failure(&mut self, operation: impl Into<String>, error: impl Into<String>) {
        self.log.push(LogEntry::failure(operation, error));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Name-keyed views
    // ─────────────────────────────────────────────────────────────────────────

    pub(crate) fn by_name<T: Clone>(
        &self,
        frames: &[BTreeMap<StackedJointId, T>],
    ) -> Vec<BTreeMap<String, T>> {
        frames
            .iter()
            .map(|f| {
                f.iter()
                    .map(|(&j, v)| (self.topology.joints[j].name.clone(), v.clone()))
                    .collect()
            })
            .collect()
    }
}
