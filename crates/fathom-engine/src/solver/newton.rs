//! Built-in root-finding engine: damped Newton–Gauss iteration.
//!
//! The linear step solves `J·s = −r` by SVD least squares, which covers
//! non-square systems (more constraints than unknowns) and degrades
//! gracefully on rank-deficient Jacobians instead of failing the
//! factorization. A backtracking line search on `½‖r‖²` provides the
//! step-size backoff; a vanished search direction is reported as
//! `SingularJacobian`, the signature of an infeasible system such as
//! `x = x + 10`.

use super::{ResidualOracle, RootFinder, RootSolution};
use crate::config::EngineConfig;
use fathom_common::{SolverError, SolverStatus};
use nalgebra::DVector;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct NewtonRaphson {
    pub max_iterations: usize,
    pub tolerance: f64,
    pub acceptable_tolerance: f64,
}

impl Default for NewtonRaphson {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-9,
            acceptable_tolerance: 1e-6,
        }
    }
}

impl NewtonRaphson {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_iterations: config.max_solver_iterations,
            tolerance: config.solver_tolerance,
            acceptable_tolerance: config.solver_acceptable_tolerance,
        }
    }
}

impl RootFinder for NewtonRaphson {
    fn find_root(
        &self,
        x0: DVector<f64>,
        oracle: &mut dyn ResidualOracle,
    ) -> Result<RootSolution, SolverError> {
        let mut x = x0;
        let mut r = oracle.residual(&x)?;
        let mut iterations = 0;

        for iteration in 0..self.max_iterations {
            let norm = r.amax();
            if !norm.is_finite() {
                return Err(SolverError::new(
                    SolverStatus::Diverged,
                    "residual is not finite",
                ));
            }
            if norm <= self.tolerance {
                return Ok(RootSolution {
                    x,
                    status: SolverStatus::Optimal,
                    iterations,
                    residual_norm: norm,
                });
            }

            let jacobian = oracle.jacobian(&x)?;
            let step = jacobian
                .svd(true, true)
                .solve(&(-&r), 1e-12)
                .map_err(|msg| SolverError::new(SolverStatus::SingularJacobian, msg))?;

            if step.amax() <= f64::EPSILON * (1.0 + x.amax()) {
                return Err(SolverError::new(
                    SolverStatus::SingularJacobian,
                    "search direction vanished; the system admits no descent and may be infeasible",
                ));
            }

            // Backtracking on ½‖r‖²: halve the step until it reduces the
            // merit function.
            let merit = r.norm_squared();
            let mut alpha = 1.0;
            loop {
                let candidate = &x + &step * alpha;
                let r_candidate = oracle.residual(&candidate)?;
                let merit_candidate = r_candidate.norm_squared();
                if merit_candidate.is_finite() && merit_candidate < merit {
                    x = candidate;
                    r = r_candidate;
                    break;
                }
                alpha *= 0.5;
                if alpha < 1e-12 {
                    return Err(SolverError::new(
                        SolverStatus::Diverged,
                        "line search failed to reduce the residual",
                    ));
                }
            }

            iterations = iteration + 1;
            debug!(
                iteration = iterations,
                residual_norm = r.amax(),
                alpha,
                "newton step"
            );
        }

        let norm = r.amax();
        if norm <= self.acceptable_tolerance {
            Ok(RootSolution {
                x,
                status: SolverStatus::Acceptable,
                iterations,
                residual_norm: norm,
            })
        } else {
            Err(SolverError::new(
                SolverStatus::MaxIterations,
                format!("residual {norm:.3e} after {iterations} iterations"),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    struct Quadratic;

    impl ResidualOracle for Quadratic {
        fn unknowns(&self) -> usize {
            1
        }
        fn residuals(&self) -> usize {
            1
        }
        fn residual(&mut self, x: &DVector<f64>) -> Result<DVector<f64>, SolverError> {
            Ok(DVector::from_element(1, x[0] * x[0] - x[0] - 20.0))
        }
    }

    struct Infeasible;

    // r(x) = −10 regardless of x: the Jacobian is identically zero.
    impl ResidualOracle for Infeasible {
        fn unknowns(&self) -> usize {
            1
        }
        fn residuals(&self) -> usize {
            1
        }
        fn residual(&mut self, _x: &DVector<f64>) -> Result<DVector<f64>, SolverError> {
            Ok(DVector::from_element(1, -10.0))
        }
        fn jacobian(&mut self, _x: &DVector<f64>) -> Result<DMatrix<f64>, SolverError> {
            Ok(DMatrix::zeros(1, 1))
        }
    }

    struct Linear2x2;

    // x + y = 10, x − y = 2.
    impl ResidualOracle for Linear2x2 {
        fn unknowns(&self) -> usize {
            2
        }
        fn residuals(&self) -> usize {
            2
        }
        fn residual(&mut self, x: &DVector<f64>) -> Result<DVector<f64>, SolverError> {
            Ok(DVector::from_vec(vec![
                x[0] + x[1] - 10.0,
                x[0] - x[1] - 2.0,
            ]))
        }
    }

    #[test]
    fn converges_to_a_quadratic_root() {
        let solution = NewtonRaphson::default()
            .find_root(DVector::zeros(1), &mut Quadratic)
            .unwrap();
        let x = solution.x[0];
        assert!((x - 5.0).abs() < 1e-5 || (x + 4.0).abs() < 1e-5);
        assert!(solution.residual_norm < 1e-6);
    }

    #[test]
    fn linear_systems_converge_in_one_step() {
        let solution = NewtonRaphson::default()
            .find_root(DVector::zeros(2), &mut Linear2x2)
            .unwrap();
        assert!((solution.x[0] - 6.0).abs() < 1e-9);
        assert!((solution.x[1] - 4.0).abs() < 1e-9);
        assert!(solution.iterations <= 2);
    }

    #[test]
    fn infeasible_systems_error_without_panicking() {
        let err = NewtonRaphson::default()
            .find_root(DVector::zeros(1), &mut Infeasible)
            .unwrap_err();
        assert_eq!(err.status, SolverStatus::SingularJacobian);
    }
}
