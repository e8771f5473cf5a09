//! Non-linear least squares for IK refinement.
//!
//! - [`NllsProblem`] / [`NllsSolverBackend`]: backend-agnostic problem and
//!   solver traits,
//! - [`LmBackend`]: Levenberg–Marquardt via the `levenberg-marquardt` crate,
//! - [`IkProblem`] and [`solve_ik_with_restarts`]: marker/joint-center IK over
//!   a subset of pose DOFs with seeded random restarts.

mod backend_lm;
mod ik;
mod traits;

pub use backend_lm::LmBackend;
pub use ik::*;
pub use traits::*;
