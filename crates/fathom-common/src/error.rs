//! Structured error taxonomy for the engine.
//!
//! Every failure the engine can produce is a value in one of five
//! families (graph construction, validation, compilation, computation,
//! solving), collected under the [`EngineError`] umbrella. Numeric
//! singularities (`0/0`, `1/0`) are deliberately *not* errors: the VM
//! follows IEEE-754 and lets `NaN`/`±Inf` propagate through the ledger.

use crate::{NodeId, TemporalType, Unit};
use thiserror::Error;

/// Failures while building or mutating the computation graph.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("no canvas scope is active on this thread")]
    NoActiveCanvas,

    #[error("node {0} belongs to a different canvas")]
    ForeignNode(NodeId),

    #[error("unknown node id {0}")]
    UnknownNode(NodeId),

    #[error("previous() lag must be at least 1, got {0}")]
    InvalidLag(usize),

    #[error("constant values must contain at least one period")]
    EmptyValue,

    #[error("node {0} is not a constant and cannot be assigned")]
    NotAConstant(NodeId),

    #[error("constraint references no solver variable on either side")]
    ConstraintWithoutVariable,

    #[error("snapshot is malformed: {0}")]
    InvalidSnapshot(String),
}

/// What a validation failure is about.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ValidationErrorKind {
    UnitMismatch,
    TemporalAmbiguous,
    DeclaredVsInferred,
}

/// Static analysis failure: the detail message names the offending units
/// or temporal types exactly as the user declared them.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{detail} (node {node})")]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub node: NodeId,
    pub detail: String,
}

impl ValidationError {
    pub fn new(kind: ValidationErrorKind, node: NodeId, detail: impl Into<String>) -> Self {
        Self {
            kind,
            node,
            detail: detail.into(),
        }
    }
}

/// Failures while lowering the graph to bytecode.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("cycle without solver closure involving nodes {0:?}")]
    Cycle(Vec<NodeId>),
}

/// Failures while seeding or executing the compiled program.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComputeError {
    #[error(
        "horizon mismatch: node {node} carries {len} periods but the model horizon is {horizon}"
    )]
    HorizonMismatch {
        node: NodeId,
        len: usize,
        horizon: usize,
    },

    #[error("node {0} has no computed value; run compute_all first")]
    NotComputed(NodeId),
}

/// Terminal state reported by a root-finding engine.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SolverStatus {
    /// Residual norm under the optimality tolerance.
    Optimal,
    /// Residual norm under the (looser) acceptable tolerance.
    Acceptable,
    /// Iteration budget exhausted without an acceptable residual.
    MaxIterations,
    /// The iteration produced non-finite values or the step search failed.
    Diverged,
    /// The Jacobian admitted no useful search direction.
    SingularJacobian,
    /// The configured deadline elapsed at an oracle boundary.
    Timeout,
    /// The cancellation token fired at an oracle boundary.
    Cancelled,
}

impl std::fmt::Display for SolverStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SolverStatus::Optimal => "optimal",
            SolverStatus::Acceptable => "acceptable",
            SolverStatus::MaxIterations => "max-iterations",
            SolverStatus::Diverged => "diverged",
            SolverStatus::SingularJacobian => "singular-jacobian",
            SolverStatus::Timeout => "timeout",
            SolverStatus::Cancelled => "cancelled",
        })
    }
}

impl SolverStatus {
    /// Statuses the frontend treats as success.
    pub fn is_converged(self) -> bool {
        matches!(self, SolverStatus::Optimal | SolverStatus::Acceptable)
    }
}

/// One structured error per `solve()` call; infeasibility surfaces here,
/// never as a panic.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("solver failed ({status}): {message}")]
pub struct SolverError {
    pub status: SolverStatus,
    pub message: String,
}

impl SolverError {
    pub fn new(status: SolverStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Umbrella error for every engine entry point.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error(transparent)]
    Solver(#[from] SolverError),
}

/// Previous metadata returned by a re-declaration, so host front-ends
/// can surface overwrite warnings to their users.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeOverwrite {
    /// Set when a differing unit was replaced.
    pub previous_unit: Option<Unit>,
    /// Set when a differing temporal type was replaced.
    pub previous_temporal: Option<TemporalType>,
}

impl TypeOverwrite {
    pub fn is_overwrite(&self) -> bool {
        self.previous_unit.is_some() || self.previous_temporal.is_some()
    }
}
