//! Core math and skeleton primitives for marker-based IK initialization.
//!
//! This crate contains:
//! - linear algebra type aliases (`Real`, `Vec3`, `Pt3`, `Iso3`, ...),
//! - marker definitions and per-frame observations,
//! - the [`SkeletonModel`] query trait and a concrete [`KinematicTree`],
//! - deterministic synthetic skeletons and marker sequences for tests.

/// Linear algebra type aliases and helpers.
pub mod math;
/// Markers and observation frames.
pub mod markers;
/// Skeleton query trait and kinematic tree.
pub mod skeleton;
/// Synthetic skeletons, motions and noise.
pub mod synthetic;

pub use markers::*;
pub use math::*;
pub use skeleton::*;
