use mocap_core::Real;
use nalgebra::{DMatrix, DVector};

/// Dense least-squares objective `x ↦ r(x)` with an explicit Jacobian.
pub trait NllsProblem {
    fn num_params(&self) -> usize;
    fn num_residuals(&self) -> usize;

    /// Residuals for the given parameters.
    fn residuals(&self, x: &DVector<Real>) -> DVector<Real>;
    /// Jacobian of [`NllsProblem::residuals`] with respect to `x`.
    fn jacobian(&self, x: &DVector<Real>) -> DMatrix<Real>;

    /// `½‖r(x)‖²`, the quantity the backends minimize.
    fn cost(&self, x: &DVector<Real>) -> Real {
        0.5 * self.residuals(x).norm_squared()
    }
}

/// Central finite-difference Jacobian of `f` at `x`.
pub fn finite_difference_jacobian<F>(
    x: &DVector<Real>,
    rows: usize,
    step: Real,
    f: F,
) -> DMatrix<Real>
where
    F: Fn(&DVector<Real>) -> DVector<Real>,
{
    let mut jac = DMatrix::<Real>::zeros(rows, x.len());
    let mut shifted = x.clone();
    for k in 0..x.len() {
        shifted[k] = x[k] + step;
        let plus = f(&shifted);
        shifted[k] = x[k] - step;
        let minus = f(&shifted);
        shifted[k] = x[k];
        jac.set_column(k, &((plus - minus) / (2.0 * step)));
    }
    jac
}

/// Termination settings shared by all backends.
#[derive(Debug, Clone, Copy)]
pub struct SolveOptions {
    /// Iteration budget. For LM this is the MINPACK patience: at most
    /// `max_iters * (n + 1)` residual evaluations.
    pub max_iters: usize,
    pub ftol: Real,
    pub gtol: Real,
    pub xtol: Real,
    /// Log every solve at debug level.
    pub verbose: bool,
}

impl Default for SolveOptions {
    fn default() -> Self {
        let tol = 1e-12;
        Self {
            max_iters: 200,
            ftol: tol,
            gtol: tol,
            xtol: tol,
            verbose: false,
        }
    }
}

/// Outcome of one solve. `iterations` counts residual evaluations for LM.
#[derive(Debug, Clone)]
pub struct SolveReport {
    pub iterations: usize,
    pub final_cost: Real,
    pub converged: bool,
}

/// A minimizer of `½‖r(x)‖²` starting from `x0`.
pub trait NllsSolverBackend {
    fn solve<P: NllsProblem>(
        &self,
        problem: &P,
        x0: DVector<Real>,
        opts: &SolveOptions,
    ) -> (DVector<Real>, SolveReport);
}
