//! The user-facing surface: canvases, scopes, and `Var` handles.
//!
//! A `Canvas` owns one graph, one ledger, and one constraint set. Node
//! construction happens inside a canvas scope: a per-thread stack of
//! active canvases with RAII guards, so the pop is guaranteed on every
//! exit path and batch workers (which never enter a scope) observe no
//! ambient state. `Var` is a thin interned handle (a logical id plus a
//! reference to its canvas) and the combinator methods on it are the
//! only way formula nodes come into being, which is what keeps logical
//! ids monotone and edges pointing backwards.

use crate::batch::{self, BatchReport, Scenario};
use crate::compiler::{self, Program};
use crate::config::EngineConfig;
use crate::dirty::affected_instructions;
use crate::graph::ComputationGraph;
use crate::ledger::Ledger;
use crate::persist;
use crate::solver::{self, CancelToken};
use crate::trace;
use crate::validator::Validator;
use crate::vm;
use fathom_common::{
    BinaryOp, ComputeError, EngineError, GraphError, NodeId, TemporalType, TypeOverwrite, Unit,
};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, warn};

thread_local! {
    /// Stack of active canvases for this thread, innermost scope last.
    static ACTIVE_CANVASES: RefCell<Vec<Rc<RefCell<CanvasInner>>>> = const { RefCell::new(Vec::new()) };
}

#[derive(Debug)]
pub(crate) struct CanvasInner {
    graph: ComputationGraph,
    validator: Validator,
    config: EngineConfig,
    program: Option<Arc<Program>>,
    ledger: Option<Ledger>,
}

impl CanvasInner {
    fn new(graph: ComputationGraph, config: EngineConfig) -> Self {
        Self {
            graph,
            validator: Validator::new(),
            config,
            program: None,
            ledger: None,
        }
    }

    /// Reuse the cached program unless the structure epoch moved or a
    /// value mutation changed the horizon.
    fn ensure_compiled(&mut self) -> Result<Arc<Program>, EngineError> {
        if let Some(program) = &self.program
            && program.epoch == self.graph.structure_epoch()
            && program.horizon == self.graph.horizon()
        {
            return Ok(Arc::clone(program));
        }
        let program = Arc::new(compiler::compile(&self.graph)?);
        self.program = Some(Arc::clone(&program));
        self.ledger = None;
        Ok(program)
    }

    /// Compile if needed, then seed and execute everything. The ledger is
    /// returned by value so callers can keep borrowing it without
    /// fighting the option slot.
    fn full_compute(&mut self) -> Result<(Arc<Program>, Ledger), EngineError> {
        let program = self.ensure_compiled()?;
        let mut ledger = match self.ledger.take() {
            Some(l) if l.columns() == program.column_count() && l.horizon() == program.horizon => l,
            _ => Ledger::new(program.column_count(), program.horizon),
        };
        vm::seed(&program, &self.graph, &mut ledger)?;
        vm::run(&program, &mut ledger);
        Ok((program, ledger))
    }
}

/// A container for one graph + ledger + constraint set. Cloning yields
/// another handle onto the same model.
#[derive(Clone)]
pub struct Canvas {
    inner: Rc<RefCell<CanvasInner>>,
}

impl Default for Canvas {
    fn default() -> Self {
        Self::new()
    }
}

impl Canvas {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            inner: Rc::new(RefCell::new(CanvasInner::new(
                ComputationGraph::new(),
                config,
            ))),
        }
    }

    fn from_graph(graph: ComputationGraph, config: EngineConfig) -> Self {
        Self {
            inner: Rc::new(RefCell::new(CanvasInner::new(graph, config))),
        }
    }

    /// Push this canvas onto the thread's scope stack. The returned guard
    /// pops it again when dropped; re-entering the same canvas later
    /// appends to its graph.
    #[must_use = "dropping the scope immediately exits it"]
    pub fn enter(&self) -> CanvasScope {
        ACTIVE_CANVASES.with(|stack| stack.borrow_mut().push(Rc::clone(&self.inner)));
        CanvasScope {
            inner: Rc::clone(&self.inner),
        }
    }

    /// The innermost active canvas on this thread, if any.
    pub fn current() -> Option<Canvas> {
        ACTIVE_CANVASES.with(|stack| {
            stack.borrow().last().map(|inner| Canvas {
                inner: Rc::clone(inner),
            })
        })
    }

    /// Add a constant input node. Scalars broadcast across the horizon;
    /// vectors fix it.
    pub fn add_var(&self, value: impl IntoSeries, name: &str) -> Result<Var, EngineError> {
        let id = self
            .inner
            .borrow_mut()
            .graph
            .add_constant(value.into_series(), name)?;
        Ok(self.handle(id))
    }

    /// Declare an unknown to be determined by constraints.
    pub fn solver_var(&self, name: &str) -> Var {
        let id = self.inner.borrow_mut().graph.add_solver_variable(name);
        self.handle(id)
    }

    pub fn node_count(&self) -> usize {
        self.inner.borrow().graph.node_count()
    }

    /// Run unit and temporal-type inference plus declared-type
    /// verification over the whole graph. Results are cached until the
    /// graph's metadata changes.
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut borrow = self.inner.borrow_mut();
        let inner = &mut *borrow;
        inner.validator.validate(&inner.graph)?;
        Ok(())
    }

    /// Execute every instruction once; afterwards every reachable column
    /// is valid across the full horizon.
    pub fn compute_all(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.borrow_mut();
        let (_, ledger) = inner.full_compute()?;
        inner.ledger = Some(ledger);
        Ok(())
    }

    /// Re-execute only the instructions forward-reachable from the
    /// changed inputs. Untouched columns keep their prior values and
    /// stay valid. Falls back to a full compute when the cached program
    /// is stale or nothing has been computed yet.
    pub fn recompute(&self, changed: &[&Var]) -> Result<(), EngineError> {
        let ids = self.resolve_handles(changed)?;
        let mut inner = self.inner.borrow_mut();

        let fresh = match (&inner.program, &inner.ledger) {
            (Some(program), Some(_)) => {
                program.epoch == inner.graph.structure_epoch()
                    && program.horizon == inner.graph.horizon()
            }
            _ => false,
        };
        if !fresh {
            let (_, ledger) = inner.full_compute()?;
            inner.ledger = Some(ledger);
            return Ok(());
        }

        let program = inner.ensure_compiled()?;
        let mut ledger = match inner.ledger.take() {
            Some(l) => l,
            None => Ledger::new(program.column_count(), program.horizon),
        };
        let result = (|| -> Result<(), EngineError> {
            for &id in &ids {
                if inner.graph.is_constant(id) {
                    vm::seed_one(&program, &inner.graph, &mut ledger, id)?;
                }
            }
            let subset = affected_instructions(&inner.graph, &program, &ids);
            debug!(changed = ids.len(), dirty = subset.len(), "incremental recompute");
            vm::run_subset(&program, &mut ledger, &subset);
            Ok(())
        })();
        inner.ledger = Some(ledger);
        result
    }

    /// Solve the registered constraint system, then persist the solution
    /// onto the solver variables. The initial guess is strictly zero.
    pub fn solve(&self) -> Result<(), EngineError> {
        self.solve_inner(None)
    }

    /// As [`solve`](Self::solve), with a cooperative cancellation token
    /// checked at every residual evaluation.
    pub fn solve_with_cancel(&self, token: &CancelToken) -> Result<(), EngineError> {
        self.solve_inner(Some(token.clone()))
    }

    fn solve_inner(&self, cancel: Option<CancelToken>) -> Result<(), EngineError> {
        let mut inner = self.inner.borrow_mut();
        let (program, mut ledger) = inner.full_compute()?;
        let outcome =
            solver::solve_system(&inner.graph, &program, &mut ledger, &inner.config, cancel);
        inner.ledger = Some(ledger);
        for (var, series) in outcome? {
            inner.graph.store_solution(var, series);
        }
        Ok(())
    }

    /// Evaluate scenarios in parallel on cloned ledgers. Per-scenario
    /// failures are reported in the returned [`BatchReport`]; siblings
    /// continue.
    pub fn run_batch(
        &self,
        scenarios: &[Scenario],
        chunk_size: Option<usize>,
    ) -> Result<BatchReport, EngineError> {
        let mut inner = self.inner.borrow_mut();
        let (program, ledger) = inner.full_compute()?;
        let report = batch::run_batch(
            &inner.graph,
            &program,
            &ledger,
            &inner.config,
            scenarios,
            chunk_size,
        );
        inner.ledger = Some(ledger);
        Ok(report)
    }

    /// A node's computed series. Before any compute, constants (and
    /// solved solver variables) answer from their stored values.
    pub fn get_value(&self, var: &Var) -> Result<Vec<f64>, EngineError> {
        let id = self.resolve_handle(var)?;
        let inner = self.inner.borrow();
        if let (Some(program), Some(ledger)) = (&inner.program, &inner.ledger)
            && program.epoch == inner.graph.structure_epoch()
        {
            let phys = program.phys(id);
            if ledger.column_valid(phys) {
                return Ok(ledger.column(phys).to_vec());
            }
        }
        inner
            .graph
            .value(id)
            .map(<[f64]>::to_vec)
            .ok_or_else(|| ComputeError::NotComputed(id).into())
    }

    /// Render an audit trace of a node back to its inputs.
    pub fn trace(&self, var: &Var) -> Result<String, EngineError> {
        let id = self.resolve_handle(var)?;
        let inner = self.inner.borrow();
        // A stale program predates part of the graph; trace from stored
        // values instead of indexing columns that do not exist yet.
        let current = inner
            .program
            .as_deref()
            .filter(|p| p.epoch == inner.graph.structure_epoch());
        Ok(trace::render(
            &inner.graph,
            current,
            inner.ledger.as_ref(),
            id,
        ))
    }

    /// Snapshot the graph, metadata, constraints, and values, but never
    /// the compiled program, which is rebuilt on first use after loading.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EngineError> {
        let inner = self.inner.borrow();
        Ok(persist::to_bytes(&inner.graph)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Canvas, EngineError> {
        Self::from_bytes_with_config(bytes, EngineConfig::default())
    }

    pub fn from_bytes_with_config(
        bytes: &[u8],
        config: EngineConfig,
    ) -> Result<Canvas, EngineError> {
        let graph = persist::from_bytes(bytes)?;
        Ok(Self::from_graph(graph, config))
    }

    fn handle(&self, id: NodeId) -> Var {
        Var {
            inner: Rc::clone(&self.inner),
            id,
        }
    }

    /// Recover a handle from a logical id, e.g. after deserialization.
    pub fn var_by_id(&self, id: NodeId) -> Result<Var, EngineError> {
        if id.as_index() < self.inner.borrow().graph.node_count() {
            Ok(self.handle(id))
        } else {
            Err(GraphError::UnknownNode(id).into())
        }
    }

    fn resolve_handle(&self, var: &Var) -> Result<NodeId, GraphError> {
        if Rc::ptr_eq(&self.inner, &var.inner) {
            Ok(var.id)
        } else {
            Err(GraphError::ForeignNode(var.id))
        }
    }

    fn resolve_handles(&self, vars: &[&Var]) -> Result<Vec<NodeId>, GraphError> {
        vars.iter().map(|v| self.resolve_handle(v)).collect()
    }
}

/// RAII guard for a canvas scope; pops the scope stack on drop.
pub struct CanvasScope {
    inner: Rc<RefCell<CanvasInner>>,
}

impl Drop for CanvasScope {
    fn drop(&mut self) {
        ACTIVE_CANVASES.with(|stack| {
            let mut stack = stack.borrow_mut();
            // Scopes normally unwind LIFO; tolerate out-of-order drops by
            // removing the innermost matching entry.
            if let Some(pos) = stack.iter().rposition(|rc| Rc::ptr_eq(rc, &self.inner)) {
                stack.remove(pos);
            }
        });
    }
}

/// Create a constant on the innermost active canvas.
pub fn var(value: impl IntoSeries, name: &str) -> Result<Var, EngineError> {
    let canvas = Canvas::current().ok_or(GraphError::NoActiveCanvas)?;
    canvas.add_var(value, name)
}

/// A handle to one node of one canvas.
#[derive(Clone)]
pub struct Var {
    inner: Rc<RefCell<CanvasInner>>,
    id: NodeId,
}

impl Var {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> String {
        self.inner.borrow().graph.name(self.id).to_owned()
    }

    pub fn rename(&self, name: &str) -> Result<(), EngineError> {
        self.inner.borrow_mut().graph.rename(self.id, name)?;
        Ok(())
    }

    fn canvas(&self) -> Canvas {
        Canvas {
            inner: Rc::clone(&self.inner),
        }
    }

    fn binary(&self, op: BinaryOp, rhs: impl Operand) -> Result<Var, EngineError> {
        let rhs_id = rhs.resolve(&self.canvas())?;
        let mut inner = self.inner.borrow_mut();
        let name = format!(
            "({} {} {})",
            inner.graph.name(self.id),
            op.symbol(),
            inner.graph.name(rhs_id)
        );
        let id = inner.graph.add_binary(op, self.id, rhs_id, &name)?;
        drop(inner);
        Ok(self.sibling(id))
    }

    pub fn add(&self, rhs: impl Operand) -> Result<Var, EngineError> {
        self.binary(BinaryOp::Add, rhs)
    }

    pub fn sub(&self, rhs: impl Operand) -> Result<Var, EngineError> {
        self.binary(BinaryOp::Sub, rhs)
    }

    pub fn mul(&self, rhs: impl Operand) -> Result<Var, EngineError> {
        self.binary(BinaryOp::Mul, rhs)
    }

    pub fn div(&self, rhs: impl Operand) -> Result<Var, EngineError> {
        self.binary(BinaryOp::Div, rhs)
    }

    /// This node's value `lag` periods ago, reading `default` for the
    /// bootstrap periods.
    pub fn previous(&self, lag: usize, default: impl Operand) -> Result<Var, EngineError> {
        let default_id = default.resolve(&self.canvas())?;
        let mut inner = self.inner.borrow_mut();
        let name = format!("{}.prev(lag={lag})", inner.graph.name(self.id));
        let id = inner
            .graph
            .add_previous(self.id, default_id, lag, &name)?;
        drop(inner);
        Ok(self.sibling(id))
    }

    /// Register the constraint `self == rhs` for the solver.
    pub fn must_equal(&self, rhs: impl Operand) -> Result<(), EngineError> {
        let rhs_id = rhs.resolve(&self.canvas())?;
        self.inner
            .borrow_mut()
            .graph
            .add_constraint(self.id, rhs_id)?;
        Ok(())
    }

    /// Replace this constant's input series; the next `recompute` or
    /// `compute_all` picks it up.
    pub fn set(&self, value: impl IntoSeries) -> Result<(), EngineError> {
        self.inner
            .borrow_mut()
            .graph
            .set_value(self.id, value.into_series())?;
        Ok(())
    }

    /// Declare the expected type for static analysis. Overwriting an
    /// existing, different declaration is legal but caller-visible: the
    /// replaced values come back in the summary and a warning is logged.
    /// Any metadata change invalidates the validator cache.
    pub fn declare_type(
        &self,
        unit: Option<&str>,
        temporal: Option<TemporalType>,
    ) -> Result<TypeOverwrite, EngineError> {
        let mut borrow = self.inner.borrow_mut();
        let inner = &mut *borrow;
        let overwrite =
            inner
                .graph
                .set_metadata(self.id, unit.map(Unit::parse), temporal)?;
        inner.validator.invalidate();
        if let Some(old) = &overwrite.previous_unit {
            warn!(
                "Overwriting existing unit '{old}' with '{}' for Var '{}'.",
                unit.unwrap_or_default(),
                inner.graph.name(self.id)
            );
        }
        if let Some(old) = overwrite.previous_temporal {
            warn!(
                "Overwriting existing temporal_type '{old}' with '{}' for Var '{}'.",
                temporal.map(|t| t.to_string()).unwrap_or_default(),
                inner.graph.name(self.id)
            );
        }
        Ok(overwrite)
    }

    /// Builder form of [`declare_type`](Self::declare_type) for units.
    pub fn with_unit(self, unit: &str) -> Result<Var, EngineError> {
        self.declare_type(Some(unit), None)?;
        Ok(self)
    }

    /// Builder form of [`declare_type`](Self::declare_type) for temporal
    /// types.
    pub fn with_temporal(self, temporal: TemporalType) -> Result<Var, EngineError> {
        self.declare_type(None, Some(temporal))?;
        Ok(self)
    }

    /// This node's computed series.
    pub fn value(&self) -> Result<Vec<f64>, EngineError> {
        self.canvas().get_value(self)
    }

    /// The first period of the computed series; the whole series for
    /// scalar models with horizon 1.
    pub fn scalar(&self) -> Result<f64, EngineError> {
        Ok(self.value()?[0])
    }

    fn sibling(&self, id: NodeId) -> Var {
        Var {
            inner: Rc::clone(&self.inner),
            id,
        }
    }
}

impl fmt::Debug for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Var(name='{}', id={})", self.name(), self.id)
    }
}

impl From<&Var> for NodeId {
    fn from(var: &Var) -> NodeId {
        var.id
    }
}

/// Right-hand sides of combinators: an existing `Var` from the same
/// canvas, or a bare number interned as an anonymous constant.
pub trait Operand {
    fn resolve(self, canvas: &Canvas) -> Result<NodeId, EngineError>;
}

impl Operand for &Var {
    fn resolve(self, canvas: &Canvas) -> Result<NodeId, EngineError> {
        if Rc::ptr_eq(&canvas.inner, &self.inner) {
            Ok(self.id)
        } else {
            Err(GraphError::ForeignNode(self.id).into())
        }
    }
}

impl Operand for f64 {
    fn resolve(self, canvas: &Canvas) -> Result<NodeId, EngineError> {
        let name = format!("{self}");
        Ok(canvas
            .inner
            .borrow_mut()
            .graph
            .add_constant(vec![self], &name)?)
    }
}

/// Values accepted wherever a constant series is expected.
pub trait IntoSeries {
    fn into_series(self) -> Vec<f64>;
}

impl IntoSeries for f64 {
    fn into_series(self) -> Vec<f64> {
        vec![self]
    }
}

impl IntoSeries for Vec<f64> {
    fn into_series(self) -> Vec<f64> {
        self
    }
}

impl IntoSeries for &[f64] {
    fn into_series(self) -> Vec<f64> {
        self.to_vec()
    }
}

impl<const N: usize> IntoSeries for [f64; N] {
    fn into_series(self) -> Vec<f64> {
        self.to_vec()
    }
}
