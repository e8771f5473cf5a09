//! Closed-form point-cloud primitives for joint-center estimation.
//!
//! - [`rigid_align`]: weighted Kabsch registration, proper rotations only,
//! - [`reconstruct_from_distance_matrix`] / [`map_to_anchors`]: classical MDS,
//! - [`fit_center_of_rotation`]: Chang–Pollard center of rotation with a
//!   least-squares fallback,
//! - [`fit_axis_svd`] / [`fit_axis_gamage_lasenby`]: rotation-axis fits,
//! - plane-side helpers for coplanar reflection ambiguity.

mod axis;
mod geometry;
mod mds;
mod rigid;
mod sphere;

pub use axis::*;
pub use geometry::*;
pub use mds::*;
pub use rigid::{rigid_align, rigid_align_unweighted, RigidAlignError};
pub use sphere::*;
