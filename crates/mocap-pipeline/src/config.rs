//! Thresholds and options for the initialization pipeline.

use mocap_core::Real;
use mocap_linear::CenterFitOptions;
use mocap_optim::{RestartOptions, SolveOptions};
use serde::{Deserialize, Serialize};

/// Configuration for [`crate::IkInitializer`].
///
/// Every field has a default; partial JSON/TOML documents deserialize with
/// missing fields filled from [`Default`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IkInitConfig {
    // ─────────────────────────────────────────────────────────────────────────
    // Topology
    // ─────────────────────────────────────────────────────────────────────────
    /// Parent/child joints closer than this (meters, reference pose) are merged.
    pub merge_distance: Real,
    /// Minimum distinct markers a joint or body needs to be triangulated/tracked.
    pub min_markers: usize,

    // ─────────────────────────────────────────────────────────────────────────
    // Joint centers and axes
    // ─────────────────────────────────────────────────────────────────────────
    /// Maximum out-of-plane distance (meters) for a constraint set to count as coplanar.
    pub coplanar_threshold: Real,
    /// Normalized singular values below this flag a joint as axis-ambiguous.
    pub axis_singular_threshold: Real,
    /// Smallest accepted eigenvalue in the center-of-rotation fit.
    pub min_eigenvalue: Real,
    /// Smallest accepted quadratic coefficient in the center-of-rotation fit.
    pub min_denominator: Real,
    /// Fewest frames with both body transforms for a pivot solve.
    pub min_pivot_frames: usize,
    /// Pivot systems are built from at most this many evenly spaced frames.
    pub max_pivot_samples: usize,
    /// Axis recentering moves larger than this (meters) are rejected.
    pub max_recenter_shift: Real,
    /// Samples used to sweep non-revolute joints for a reference axis.
    pub axis_sweep_steps: usize,

    // ─────────────────────────────────────────────────────────────────────────
    // Scales and poses
    // ─────────────────────────────────────────────────────────────────────────
    /// Weights at or below zero are floored to this before group averaging.
    pub min_scale_weight: Real,
    /// Weight given to bodies whose scale falls back to a default.
    pub default_scale_weight: Real,
    /// Rigid-fit weight of a joint-center constraint point.
    pub joint_weight: Real,
    /// Rigid-fit weight of a marker constraint point.
    pub marker_weight: Real,

    // ─────────────────────────────────────────────────────────────────────────
    // Iterative refinement
    // ─────────────────────────────────────────────────────────────────────────
    pub refine: RefineConfig,
}

impl Default for IkInitConfig {
    fn default() -> Self {
        Self {
            merge_distance: 0.07,
            min_markers: 3,
            coplanar_threshold: 1e-3,
            axis_singular_threshold: 1e-2,
            min_eigenvalue: 1e-12,
            min_denominator: 1e-8,
            min_pivot_frames: 5,
            max_pivot_samples: 500,
            max_recenter_shift: 0.10,
            axis_sweep_steps: 2000,
            min_scale_weight: 1e-5,
            default_scale_weight: 0.01,
            joint_weight: 1.0,
            marker_weight: 0.01,
            refine: RefineConfig::default(),
        }
    }
}

impl IkInitConfig {
    pub fn center_fit_options(&self) -> CenterFitOptions {
        CenterFitOptions {
            min_eigenvalue: self.min_eigenvalue,
            min_denominator: self.min_denominator,
            ..CenterFitOptions::default()
        }
    }
}

/// Options for the iterative completion and fine-tuning steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineConfig {
    pub max_iters: usize,
    /// Random restarts when completing unresolved DOFs.
    pub max_restarts: usize,
    /// Cost (½‖r‖², m²) below which a solve counts as converged.
    pub target_cost: Real,
    /// Residual weight of joint-center targets relative to markers.
    pub joint_weight: Real,
    pub seed: u64,
    /// Polish every frame over all DOFs after completion in `run_full_pipeline`.
    pub fine_tune: bool,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            max_iters: 100,
            max_restarts: 5,
            target_cost: 1e-10,
            joint_weight: 1.0,
            seed: 0,
            fine_tune: false,
        }
    }
}

impl RefineConfig {
    pub fn solve_options(&self) -> SolveOptions {
        SolveOptions {
            max_iters: self.max_iters,
            ..SolveOptions::default()
        }
    }

    pub fn restart_options(&self, restarts: usize) -> RestartOptions {
        RestartOptions {
            max_restarts: restarts,
            target_cost: self.target_cost,
            seed: self.seed,
        }
    }
}
