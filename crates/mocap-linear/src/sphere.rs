//! Sphere and center-of-rotation fits.
//!
//! Two families are provided:
//! - plain linear least squares ([`fit_sphere_center`], [`fit_concentric_sphere_center`]),
//!   which works on noise-free data but biases the radius toward zero under noise;
//! - the constrained generalized eigenproblem of Chang & Pollard (2006)
//!   ([`fit_center_of_rotation`]), which stays unbiased at low noise and falls
//!   back to least squares when the data carries no radial variability.
//!
//! All fits operate on data translated to its centroid for conditioning.

use mocap_core::{Pt3, Real, Vec3};
use log::debug;
use nalgebra::{DMatrix, DVector};
use thiserror::Error;

/// How a [`CenterFit`] was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CenterFitMethod {
    /// Minimum-cost generalized eigen-solution.
    ChangPollard,
    /// Plain least-squares fallback.
    LeastSquares,
}

#[derive(Debug, Error, PartialEq)]
pub enum SphereFitError {
    #[error("no points to fit")]
    NoData,
    #[error("need at least {needed} points, got {got}")]
    TooFewPoints { needed: usize, got: usize },
    #[error("least-squares sphere solve failed: {0}")]
    SolveFailed(&'static str),
}

/// Thresholds for [`fit_center_of_rotation`].
#[derive(Debug, Clone, Copy)]
pub struct CenterFitOptions {
    /// Eigenvalues at or below this are not valid solutions.
    pub min_eigenvalue: Real,
    /// Solutions whose quadratic coefficient is smaller than this are rejected.
    pub min_denominator: Real,
    /// Scatter matrices with `λ_min / λ_max` at or below this are treated as
    /// noise-free and solved by least squares directly.
    pub degenerate_ratio: Real,
}

impl Default for CenterFitOptions {
    fn default() -> Self {
        Self {
            min_eigenvalue: 1e-12,
            min_denominator: 1e-8,
            degenerate_ratio: 1e-12,
        }
    }
}

/// Result of a center-of-rotation fit.
#[derive(Debug, Clone, Copy)]
pub struct CenterFit {
    pub center: Pt3,
    /// `uᵀSu / a²` for eigen-solutions, mean squared radial residual for the
    /// least-squares fallback.
    pub cost: Real,
    pub method: CenterFitMethod,
}

fn non_empty(traces: &[Vec<Pt3>]) -> Vec<&[Pt3]> {
    traces
        .iter()
        .filter(|t| !t.is_empty())
        .map(|t| t.as_slice())
        .collect()
}

fn mean_of(traces: &[&[Pt3]]) -> Vec3 {
    let mut sum = Vec3::zeros();
    let mut count = 0usize;
    for t in traces {
        for p in t.iter() {
            sum += p.coords;
            count += 1;
        }
    }
    sum / count.max(1) as Real
}

fn check_size(traces: &[&[Pt3]]) -> Result<usize, SphereFitError> {
    if traces.is_empty() {
        return Err(SphereFitError::NoData);
    }
    let total: usize = traces.iter().map(|t| t.len()).sum();
    let needed = 4 + traces.len();
    if total < needed {
        return Err(SphereFitError::TooFewPoints { needed, got: total });
    }
    Ok(total)
}

fn concentric_least_squares(traces: &[&[Pt3]]) -> Result<Pt3, SphereFitError> {
    let total = check_size(traces)?;
    let mean = mean_of(traces);
    let cols = 3 + traces.len();

    let mut a = DMatrix::<Real>::zeros(total, cols);
    let mut f = DVector::<Real>::zeros(total);
    let mut row = 0;
    for (k, trace) in traces.iter().enumerate() {
        for p in trace.iter() {
            let q = p.coords - mean;
            a[(row, 0)] = 2.0 * q.x;
            a[(row, 1)] = 2.0 * q.y;
            a[(row, 2)] = 2.0 * q.z;
            a[(row, 3 + k)] = 1.0;
            f[row] = q.norm_squared();
            row += 1;
        }
    }

    let svd = a.svd(true, true);
    let max_sv = svd.singular_values.max();
    let x = svd
        .solve(&f, max_sv * 1e-12)
        .map_err(SphereFitError::SolveFailed)?;
    Ok(Pt3::from(Vec3::new(x[0], x[1], x[2]) + mean))
}

/// Least-squares center of a sphere passing near `points`.
pub fn fit_sphere_center(points: &[Pt3]) -> Result<Pt3, SphereFitError> {
    concentric_least_squares(&[points])
}

/// Least-squares shared center of several spheres, one per trace, each with
/// its own radius.
pub fn fit_concentric_sphere_center(traces: &[Vec<Pt3>]) -> Result<Pt3, SphereFitError> {
    concentric_least_squares(&non_empty(traces))
}

fn radial_cost(traces: &[&[Pt3]], center: &Pt3) -> Real {
    let mut sum = 0.0;
    let mut count = 0usize;
    for trace in traces {
        let radii: Vec<Real> = trace.iter().map(|p| (p - center).norm()).collect();
        let mean = radii.iter().sum::<Real>() / radii.len() as Real;
        sum += radii.iter().map(|r| (r - mean).powi(2)).sum::<Real>();
        count += radii.len();
    }
    sum / count.max(1) as Real
}

fn least_squares_fallback(traces: &[&[Pt3]]) -> Result<CenterFit, SphereFitError> {
    let center = concentric_least_squares(traces)?;
    Ok(CenterFit {
        center,
        cost: radial_cost(traces, &center),
        method: CenterFitMethod::LeastSquares,
    })
}

/// Center of rotation shared by one or more marker traces.
///
/// Solves `S u = λ C u` for `u = [a, b₀, b₁, b₂, c₁ … c_m]`, one constant per
/// trace, where `S` is the scatter of rows `[‖p‖², p, e_k]` and
/// `uᵀCu = Σ_k (‖b‖² − 4 a c_k)`. Among positive real eigen-solutions with a
/// non-negligible `a`, normalized to `uᵀCu = 1`, the one with the smallest
/// `uᵀSu / a²` wins; its center is `−b / 2a`. Falls back to
/// [`fit_concentric_sphere_center`] when no eigen-solution qualifies.
pub fn fit_center_of_rotation(
    traces: &[Vec<Pt3>],
    opts: &CenterFitOptions,
) -> Result<CenterFit, SphereFitError> {
    let traces = non_empty(traces);
    check_size(&traces)?;
    let m = traces.len();
    let dim = 4 + m;
    let mean = mean_of(&traces);

    let mut s = DMatrix::<Real>::zeros(dim, dim);
    let mut d = DVector::<Real>::zeros(dim);
    for (k, trace) in traces.iter().enumerate() {
        for p in trace.iter() {
            let q = p.coords - mean;
            d.fill(0.0);
            d[0] = q.norm_squared();
            d[1] = q.x;
            d[2] = q.y;
            d[3] = q.z;
            d[4 + k] = 1.0;
            s += &d * d.transpose();
        }
    }

    let mut c = DMatrix::<Real>::zeros(dim, dim);
    for i in 1..4 {
        c[(i, i)] = m as Real;
    }
    for k in 0..m {
        c[(0, 4 + k)] = -2.0;
        c[(4 + k, 0)] = -2.0;
    }

    let spectrum = s.clone().symmetric_eigen().eigenvalues;
    let (lo, hi) = (spectrum.min(), spectrum.max());
    if hi <= 0.0 || lo <= opts.degenerate_ratio * hi {
        debug!("center fit: scatter is degenerate ({:e} / {:e}), using least squares", lo, hi);
        return least_squares_fallback(&traces);
    }
    let Some(chol) = s.clone().cholesky() else {
        debug!("center fit: scatter is not positive definite, using least squares");
        return least_squares_fallback(&traces);
    };
    let l = chol.l();

    // S u = λ C u  ⇔  (L⁻¹ C L⁻ᵀ) w = (1/λ) w  with  w = Lᵀ u.
    let Some(x) = l.solve_lower_triangular(&c) else {
        return least_squares_fallback(&traces);
    };
    let Some(b) = l.solve_lower_triangular(&x.transpose()) else {
        return least_squares_fallback(&traces);
    };
    let b = (&b + b.transpose()) * 0.5;
    let eig = b.symmetric_eigen();
    let l_t = l.transpose();

    let mut best: Option<CenterFit> = None;
    for k in 0..dim {
        let mu = eig.eigenvalues[k];
        if mu.is_nan() || mu <= 0.0 {
            continue;
        }
        let lambda = 1.0 / mu;
        if !lambda.is_finite() || lambda <= opts.min_eigenvalue {
            continue;
        }
        let w = eig.eigenvectors.column(k).into_owned();
        let Some(mut u) = l_t.solve_upper_triangular(&w) else {
            continue;
        };
        let constraint = (u.transpose() * &c * &u)[(0, 0)];
        if !constraint.is_finite() || constraint <= 0.0 {
            continue;
        }
        u /= constraint.sqrt();
        let a = u[0];
        if a.abs() < opts.min_denominator {
            continue;
        }
        let cost = (u.transpose() * &s * &u)[(0, 0)] / (a * a);
        let center = Pt3::from(Vec3::new(u[1], u[2], u[3]) / (-2.0 * a) + mean);
        if best.as_ref().map_or(true, |b| cost < b.cost) {
            best = Some(CenterFit {
                center,
                cost,
                method: CenterFitMethod::ChangPollard,
            });
        }
    }

    match best {
        Some(fit) => Ok(fit),
        None => {
            debug!("center fit: no valid eigen-solution, using least squares");
            least_squares_fallback(&traces)
        }
    }
}

/// Single-trace form of [`fit_center_of_rotation`].
pub fn fit_center_of_rotation_single(
    trace: &[Pt3],
    opts: &CenterFitOptions,
) -> Result<CenterFit, SphereFitError> {
    fit_center_of_rotation(&[trace.to_vec()], opts)
}
