//! Deterministic synthetic data generation helpers.
//!
//! Small building blocks for constructing synthetic fitting problems used in
//! tests:
//! - reference skeletons with marker sets ([`skeletons`]),
//! - pose sweeps and marker simulation ([`motion`]),
//! - seeded Gaussian noise and occlusion ([`noise`]).
//!
//! # Example
//!
//! ```no_run
//! use mocap_core::synthetic::{motion, skeletons};
//! use mocap_core::SkeletonModel;
//!
//! let (arm, markers) = skeletons::planar_arm().unwrap();
//! let elbow = arm.joint_by_name("elbow").unwrap();
//! let poses = motion::sweep_joint(&arm, elbow, 0.0, std::f64::consts::FRAC_PI_2, 50);
//! let frames = motion::simulate_markers(&arm, &markers, &poses, &arm.unit_scales());
//! assert_eq!(frames.len(), 50);
//! ```

pub mod motion;
pub mod noise;
pub mod skeletons;
