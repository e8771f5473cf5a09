use crate::{NllsProblem, NllsSolverBackend, SolveOptions, SolveReport};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, MinimizationReport};
use log::debug;
use mocap_core::Real;
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn};

/// Non-finite evaluations are reported to the solver as failures.
fn finite<T>(values: T) -> Option<T>
where
    for<'v> &'v T: IntoIterator<Item = &'v Real>,
{
    let ok = (&values).into_iter().all(|v| v.is_finite());
    ok.then_some(values)
}

/// Adapts an [`NllsProblem`] to the crate's stateful problem interface.
struct LmAdapter<'p, P: NllsProblem> {
    inner: &'p P,
    x: DVector<Real>,
}

impl<P: NllsProblem> LeastSquaresProblem<Real, Dyn, Dyn> for LmAdapter<'_, P> {
    type ResidualStorage = Owned<Real, Dyn>;
    type JacobianStorage = Owned<Real, Dyn, Dyn>;
    type ParameterStorage = Owned<Real, Dyn>;

    fn set_params(&mut self, p: &DVector<Real>) {
        self.x.copy_from(p);
    }

    fn params(&self) -> DVector<Real> {
        self.x.clone()
    }

    fn residuals(&self) -> Option<DVector<Real>> {
        finite(self.inner.residuals(&self.x))
    }

    fn jacobian(&self) -> Option<DMatrix<Real>> {
        finite(self.inner.jacobian(&self.x))
    }
}

fn to_report(lm: &MinimizationReport<Real>) -> SolveReport {
    SolveReport {
        iterations: lm.number_of_evaluations,
        final_cost: lm.objective_function,
        converged: lm.termination.was_successful(),
    }
}

/// Levenberg–Marquardt via the `levenberg-marquardt` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct LmBackend;

impl NllsSolverBackend for LmBackend {
    fn solve<P: NllsProblem>(
        &self,
        problem: &P,
        x0: DVector<Real>,
        opts: &SolveOptions,
    ) -> (DVector<Real>, SolveReport) {
        if problem.num_params() == 0 || problem.num_residuals() == 0 {
            let report = SolveReport {
                iterations: 0,
                final_cost: problem.cost(&x0),
                converged: true,
            };
            return (x0, report);
        }

        let solver = LevenbergMarquardt::new()
            .with_ftol(opts.ftol)
            .with_xtol(opts.xtol)
            .with_gtol(opts.gtol)
            .with_patience(opts.max_iters.max(1));
        let (adapter, lm) = solver.minimize(LmAdapter { inner: problem, x: x0 });
        if opts.verbose {
            debug!(
                "lm: {:?} after {} evaluations, cost {:e}",
                lm.termination, lm.number_of_evaluations, lm.objective_function
            );
        }
        (adapter.x, to_report(&lm))
    }
}
