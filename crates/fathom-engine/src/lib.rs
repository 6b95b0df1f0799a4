//! Fathom: a declarative financial modeling engine.
//!
//! A model is a *canvas*: a DAG of time-indexed numeric variables built
//! from constants and combinator formulas. The canvas compiles into a
//! linear bytecode program over a dense columnar *ledger*, executes it
//! in topological order, recomputes only the dirty subgraph after input
//! changes, validates units and Stock/Flow temporal types statically,
//! closes circular systems of equations through a nonlinear solver, and
//! evaluates scenario batches in parallel on cloned ledgers.
//!
//! ```
//! use fathom_engine::Canvas;
//!
//! let canvas = Canvas::new();
//! let _scope = canvas.enter();
//! let a = canvas.add_var(10.0, "A")?;
//! let b = canvas.add_var(20.0, "B")?;
//! let c = a.add(&b)?;
//! let d = a.mul(&c)?;
//! canvas.compute_all()?;
//! assert_eq!(canvas.get_value(&d)?, vec![300.0]);
//!
//! a.set(5.0)?;
//! canvas.recompute(&[&a])?;
//! assert_eq!(canvas.get_value(&d)?, vec![125.0]);
//! # Ok::<(), fathom_engine::EngineError>(())
//! ```

pub mod batch;
pub mod canvas;
pub mod compiler;
pub mod config;
pub mod dirty;
pub mod graph;
pub mod ledger;
pub mod solver;
pub mod validator;
pub mod vm;

mod persist;
mod trace;

#[cfg(test)]
mod tests;

pub use batch::{BatchReport, Scenario, ScenarioRun};
pub use canvas::{Canvas, CanvasScope, IntoSeries, Operand, Var, var};
pub use config::EngineConfig;
pub use graph::{ComputationGraph, Constraint, EdgeKind, NodeKind};
pub use ledger::Ledger;
pub use solver::{
    CancelToken, ConstraintSystem, NewtonRaphson, ResidualOracle, RootFinder, RootSolution,
};

pub use fathom_common::{
    BinaryOp, CompileError, ComputeError, EngineError, GraphError, NodeId, NodeMeta, SolverError,
    SolverStatus, TemporalType, TypeOverwrite, Unit, ValidationError, ValidationErrorKind,
};
