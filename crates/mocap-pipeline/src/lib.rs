//! Closed-form IK initialization from labelled marker trajectories.
//!
//! Given a skeleton, a marker set and per-frame marker positions, the
//! pipeline estimates per-frame joint centers, per-body scales and per-frame
//! joint positions without any global optimization. The result is meant as a
//! first guess for an iterative IK solver.
//!
//! ## Session API
//!
//! An [`IkInitializer`] holds the inputs and every stage result; step
//! functions in [`steps`] advance it.
//!
//! ```no_run
//! use mocap_core::synthetic::skeletons;
//! use mocap_pipeline::{run_full_pipeline, IkInitConfig, IkInitializer};
//! use mocap_pipeline::steps::{step_closed_form_poses, step_mds_joint_centers};
//! # fn main() -> anyhow::Result<()> {
//! # let frames = unimplemented!();
//! let (skeleton, markers) = skeletons::planar_arm()?;
//! let mut init = IkInitializer::new(skeleton, markers, frames, Some(1.75), IkInitConfig::default())?;
//!
//! // Option 1: individual steps
//! step_mds_joint_centers(&mut init)?;
//! step_closed_form_poses(&mut init)?;
//!
//! // Option 2: the whole pipeline
//! let result = run_full_pipeline(&mut init)?;
//! println!("{:?}", result.body_scales);
//! # Ok(())
//! # }
//! ```
//!
//! ## Stages
//!
//! - [`topology`]: coincident and fixed joints are collapsed into stacked
//!   joints and bodies,
//! - [`mds_centers`]: joint centers triangulated from marker distances,
//! - [`pivot`]: joint centers from the relative motion of tracked bodies,
//! - [`recenter`]: hinge centers slid along their axis,
//! - [`scale`]: per-group body scales from joint-to-joint distances,
//! - [`pose`]: closed-form joint positions,
//! - [`refine`]: least-squares completion of what the closed form misses.

pub mod config;
pub mod mds_centers;
pub mod pivot;
pub mod pose;
pub mod recenter;
pub mod reference;
pub mod refine;
pub mod scale;
pub mod session;
pub mod steps;
pub mod topology;

pub use config::{IkInitConfig, RefineConfig};
pub use mds_centers::JointCenterFrame;
pub use pivot::JointAxisFrame;
pub use pose::FramePose;
pub use reference::ReferencePose;
pub use scale::ScaleEstimate;
pub use session::{IkInitResult, IkInitState, IkInitializer, LogEntry};
pub use steps::run_full_pipeline;
pub use topology::{DistanceCache, StackedJointId, Topology};
