//! Constraint lowering and the bridge to a nonlinear root-finder.
//!
//! Every constraint `lhs == rhs` becomes one residual row per period;
//! the unknown vector is the flattened concatenation of solver-variable
//! columns. The root-finder sees only the [`ResidualOracle`] capability:
//! write `x` back into the ledger, re-execute the constraint-reachable
//! instruction subset, read `lhs − rhs` out. Any engine implementing
//! [`RootFinder`] over that oracle is acceptable; [`NewtonRaphson`] is
//! the built-in one.
//!
//! Temporal cycles never reach this module: a lag read resolves
//! chronologically inside the VM. Only intra-period circularity does.

pub mod newton;

pub use newton::NewtonRaphson;

use crate::compiler::Program;
use crate::config::EngineConfig;
use crate::dirty::affected_instructions;
use crate::graph::ComputationGraph;
use crate::ledger::Ledger;
use crate::vm;
use fathom_common::{NodeId, SolverError, SolverStatus};
use nalgebra::{DMatrix, DVector};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::warn;

/// Cooperative cancellation signal, checked at the oracle boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// The capability a root-finding engine consumes.
pub trait ResidualOracle {
    /// Length of the unknown vector (solver variables × horizon).
    fn unknowns(&self) -> usize;

    /// Length of the residual vector (constraints × horizon).
    fn residuals(&self) -> usize;

    /// Evaluate `r(x)`.
    fn residual(&mut self, x: &DVector<f64>) -> Result<DVector<f64>, SolverError>;

    /// Evaluate `∂r/∂x`. The default is central finite differencing with
    /// step `h = max(1e-8·|x_i|, 1e-10)`.
    fn jacobian(&mut self, x: &DVector<f64>) -> Result<DMatrix<f64>, SolverError> {
        let (m, n) = (self.residuals(), self.unknowns());
        let mut jac = DMatrix::zeros(m, n);
        let mut probe = x.clone();
        for i in 0..n {
            let h = (1e-8 * x[i].abs()).max(1e-10);
            probe[i] = x[i] + h;
            let forward = self.residual(&probe)?;
            probe[i] = x[i] - h;
            let backward = self.residual(&probe)?;
            probe[i] = x[i];
            for k in 0..m {
                jac[(k, i)] = (forward[k] - backward[k]) / (2.0 * h);
            }
        }
        Ok(jac)
    }
}

/// Solution produced by a converged root-finder run.
#[derive(Debug, Clone)]
pub struct RootSolution {
    pub x: DVector<f64>,
    pub status: SolverStatus,
    pub iterations: usize,
    pub residual_norm: f64,
}

/// External-solver contract: root-finding of `r(x) = 0` from an initial
/// guess. Converged statuses return `Ok`; everything else is a
/// structured [`SolverError`], never a panic, even on infeasibility.
pub trait RootFinder {
    fn find_root(
        &self,
        x0: DVector<f64>,
        oracle: &mut dyn ResidualOracle,
    ) -> Result<RootSolution, SolverError>;
}

/// The lowered constraint system over one ledger.
pub struct ConstraintSystem<'a> {
    graph: &'a ComputationGraph,
    program: &'a Program,
    ledger: &'a mut Ledger,
    /// Unknown columns, ascending id order.
    vars: Vec<NodeId>,
    /// Instruction subset forward-reachable from the unknowns.
    subset: Vec<u32>,
    deadline: Option<Instant>,
    cancel: Option<CancelToken>,
}

impl<'a> ConstraintSystem<'a> {
    pub fn new(
        graph: &'a ComputationGraph,
        program: &'a Program,
        ledger: &'a mut Ledger,
        config: &EngineConfig,
        cancel: Option<CancelToken>,
    ) -> Self {
        let endpoints: Vec<NodeId> = graph
            .constraints()
            .iter()
            .flat_map(|c| [c.lhs, c.rhs])
            .collect();
        let vars = graph.solver_ancestors(&endpoints);
        let subset = affected_instructions(graph, program, &vars);
        Self {
            graph,
            program,
            ledger,
            vars,
            subset,
            deadline: config.solver_timeout.map(|t| Instant::now() + t),
            cancel,
        }
    }

    pub fn variables(&self) -> &[NodeId] {
        &self.vars
    }

    fn horizon(&self) -> usize {
        self.program.horizon
    }

    fn check_interrupted(&self) -> Result<(), SolverError> {
        if let Some(token) = &self.cancel
            && token.is_cancelled()
        {
            return Err(SolverError::new(
                SolverStatus::Cancelled,
                "solve was cancelled",
            ));
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(SolverError::new(
                SolverStatus::Timeout,
                "solver deadline elapsed",
            ));
        }
        Ok(())
    }

    /// Scatter the flat unknown vector back into the solver columns.
    fn write_unknowns(&mut self, x: &DVector<f64>) {
        let h = self.horizon();
        for (k, &var) in self.vars.iter().enumerate() {
            let phys = self.program.phys(var);
            let column = self.ledger.column_mut(phys);
            for t in 0..h {
                column[t] = x[k * h + t];
            }
            self.ledger.mark_column_valid(phys);
        }
    }

    /// Solved series per unknown, read back out of the ledger.
    pub fn read_solution(&self) -> Vec<(NodeId, Vec<f64>)> {
        self.vars
            .iter()
            .map(|&var| (var, self.ledger.column(self.program.phys(var)).to_vec()))
            .collect()
    }
}

impl ResidualOracle for ConstraintSystem<'_> {
    fn unknowns(&self) -> usize {
        self.vars.len() * self.program.horizon
    }

    fn residuals(&self) -> usize {
        self.graph.constraints().len() * self.program.horizon
    }

    fn residual(&mut self, x: &DVector<f64>) -> Result<DVector<f64>, SolverError> {
        self.check_interrupted()?;
        self.write_unknowns(x);
        vm::run_subset(self.program, self.ledger, &self.subset);

        let h = self.horizon();
        let mut r = DVector::zeros(self.residuals());
        for (c, constraint) in self.graph.constraints().iter().enumerate() {
            let lhs = self.program.phys(constraint.lhs);
            let rhs = self.program.phys(constraint.rhs);
            for t in 0..h {
                r[c * h + t] = self.ledger.cell(lhs, t) - self.ledger.cell(rhs, t);
            }
        }
        Ok(r)
    }
}

/// Solve the canvas's constraint system in place over `ledger`.
///
/// Returns the solved `(variable, series)` pairs so the caller can
/// persist them; batch workers discard the pairs and read the ledger
/// directly. The initial guess is strictly zero.
pub(crate) fn solve_system(
    graph: &ComputationGraph,
    program: &Program,
    ledger: &mut Ledger,
    config: &EngineConfig,
    cancel: Option<CancelToken>,
) -> Result<Vec<(NodeId, Vec<f64>)>, SolverError> {
    let mut system = ConstraintSystem::new(graph, program, ledger, config, cancel);

    // Invariant: a solver variable outside every constraint stays at its
    // default of zero, with a caller-visible warning.
    for id in graph.ids() {
        if graph.is_solver_variable(id) && !system.variables().contains(&id) {
            warn!(node = %id, name = graph.name(id), "solver variable has no constraint; leaving at 0");
        }
    }
    if graph.constraints().is_empty() {
        return Ok(Vec::new());
    }

    let finder = NewtonRaphson::from_config(config);
    let x0 = DVector::zeros(system.unknowns());
    let solution = finder.find_root(x0, &mut system)?;

    // One closing evaluation pins the ledger to the accepted iterate.
    system.residual(&solution.x)?;
    Ok(system.read_solution())
}
