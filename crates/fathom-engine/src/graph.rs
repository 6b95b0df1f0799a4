//! Node and edge registry.
//!
//! Storage is struct-of-arrays indexed by logical id: kind, name,
//! metadata, optional stored values, and forward dependents each live in
//! their own dense column. Edges are identified by [`NodeId`] on both
//! ends, never by reference, so constraint closure can express cycles
//! without creating ownership cycles.
//!
//! Structural cycle detection is deliberately deferred to `compile`:
//! constraints may be registered in any order, and the combinator layer
//! already guarantees that data edges point at earlier ids.

use fathom_common::{BinaryOp, GraphError, NodeId, NodeMeta, TemporalType, TypeOverwrite, Unit};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// What a node is, with its parent ids inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// User input; scalar (one period) or a vector of horizon length.
    Constant,
    /// Arithmetic over two parent columns.
    Binary {
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
    },
    /// Time-shifted view of `source`, reading `default` for the first
    /// `lag` periods.
    Previous {
        source: NodeId,
        default: NodeId,
        lag: usize,
    },
    /// Unknown determined by constraints rather than evaluation.
    SolverVariable,
}

/// Semantic classification of a parent edge. Topological order severs
/// `Temporal`; only the solver frontend reads `Constraint` edges.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Value,
    Temporal,
    DefaultValue,
    Constraint,
}

/// `value(lhs) − value(rhs) = 0` in every period, tagged against the
/// solver variable the pair defines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub var: NodeId,
    pub lhs: NodeId,
    pub rhs: NodeId,
}

pub type ParentList = SmallVec<[(NodeId, EdgeKind); 2]>;

/// The canvas's node registry. Parallel arrays indexed by logical id.
#[derive(Debug, Default, Clone)]
pub struct ComputationGraph {
    kinds: Vec<NodeKind>,
    names: Vec<String>,
    meta: Vec<NodeMeta>,
    /// Constants: declared input series. Solver variables: last solved
    /// series, populated by `solve`. Formulas: always `None`.
    values: Vec<Option<Vec<f64>>>,
    /// Forward data edges (Value, Temporal, DefaultValue) for dirty
    /// propagation. Constraint edges are kept separately.
    dependents: Vec<SmallVec<[NodeId; 4]>>,
    constraints: Vec<Constraint>,
    /// Bumped on every structural mutation; the compiler caches against it.
    structure_epoch: u64,
}

impl ComputationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.kinds.len()
    }

    pub fn structure_epoch(&self) -> u64 {
        self.structure_epoch
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    fn push_node(&mut self, kind: NodeKind, name: String, value: Option<Vec<f64>>) -> NodeId {
        let id = NodeId::new(self.kinds.len() as u32);
        for (parent, _) in parents_of(&kind) {
            // A node may feed both operand slots; one forward edge suffices.
            let deps = &mut self.dependents[parent.as_index()];
            if !deps.contains(&id) {
                deps.push(id);
            }
        }
        self.kinds.push(kind);
        self.names.push(name);
        self.meta.push(NodeMeta::default());
        self.values.push(value);
        self.dependents.push(SmallVec::new());
        self.structure_epoch += 1;
        id
    }

    pub fn add_constant(&mut self, values: Vec<f64>, name: &str) -> Result<NodeId, GraphError> {
        if values.is_empty() {
            return Err(GraphError::EmptyValue);
        }
        Ok(self.push_node(NodeKind::Constant, name.to_owned(), Some(values)))
    }

    pub fn add_binary(
        &mut self,
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
        name: &str,
    ) -> Result<NodeId, GraphError> {
        self.check_id(lhs)?;
        self.check_id(rhs)?;
        Ok(self.push_node(NodeKind::Binary { op, lhs, rhs }, name.to_owned(), None))
    }

    /// Invariant: every `Previous` carries exactly one `Temporal` and one
    /// `DefaultValue` edge, enforced here at construction.
    pub fn add_previous(
        &mut self,
        source: NodeId,
        default: NodeId,
        lag: usize,
        name: &str,
    ) -> Result<NodeId, GraphError> {
        self.check_id(source)?;
        self.check_id(default)?;
        if lag == 0 {
            return Err(GraphError::InvalidLag(lag));
        }
        Ok(self.push_node(
            NodeKind::Previous {
                source,
                default,
                lag,
            },
            name.to_owned(),
            None,
        ))
    }

    pub fn add_solver_variable(&mut self, name: &str) -> NodeId {
        self.push_node(NodeKind::SolverVariable, name.to_owned(), None)
    }

    /// Register `value(lhs) − value(rhs) = 0`. The defining solver
    /// variable is discovered by an ancestor scan from both sides; a
    /// constraint that reaches none is unsatisfiable by construction and
    /// rejected here.
    pub fn add_constraint(&mut self, lhs: NodeId, rhs: NodeId) -> Result<(), GraphError> {
        self.check_id(lhs)?;
        self.check_id(rhs)?;
        let var = self
            .solver_ancestors(&[lhs, rhs])
            .into_iter()
            .min()
            .ok_or(GraphError::ConstraintWithoutVariable)?;
        self.constraints.push(Constraint { var, lhs, rhs });
        self.structure_epoch += 1;
        Ok(())
    }

    /// Replace a constant's input series in place. Does not bump the
    /// structure epoch: value mutations re-seed, they never recompile.
    pub fn set_value(&mut self, id: NodeId, values: Vec<f64>) -> Result<(), GraphError> {
        self.check_id(id)?;
        if values.is_empty() {
            return Err(GraphError::EmptyValue);
        }
        match self.kinds[id.as_index()] {
            NodeKind::Constant => {
                self.values[id.as_index()] = Some(values);
                Ok(())
            }
            _ => Err(GraphError::NotAConstant(id)),
        }
    }

    /// Store a solved series on a solver variable so `get_value` and
    /// serialization observe the solution.
    pub(crate) fn store_solution(&mut self, id: NodeId, values: Vec<f64>) {
        debug_assert!(matches!(
            self.kinds[id.as_index()],
            NodeKind::SolverVariable
        ));
        self.values[id.as_index()] = Some(values);
    }

    /// Merge new metadata onto a node, returning whatever differing
    /// values were replaced so the caller can surface overwrite warnings.
    pub fn set_metadata(
        &mut self,
        id: NodeId,
        unit: Option<Unit>,
        temporal: Option<TemporalType>,
    ) -> Result<TypeOverwrite, GraphError> {
        self.check_id(id)?;
        let meta = &mut self.meta[id.as_index()];
        let mut overwrite = TypeOverwrite::default();
        if let Some(unit) = unit {
            if let Some(old) = meta.unit.take()
                && old != unit
            {
                overwrite.previous_unit = Some(old);
            }
            meta.unit = Some(unit);
        }
        if let Some(temporal) = temporal {
            if let Some(old) = meta.temporal.take()
                && old != temporal
            {
                overwrite.previous_temporal = Some(old);
            }
            meta.temporal = Some(temporal);
        }
        Ok(overwrite)
    }

    pub fn rename(&mut self, id: NodeId, name: &str) -> Result<(), GraphError> {
        self.check_id(id)?;
        self.names[id.as_index()] = name.to_owned();
        Ok(())
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.kinds[id.as_index()]
    }

    pub fn name(&self, id: NodeId) -> &str {
        &self.names[id.as_index()]
    }

    pub fn meta(&self, id: NodeId) -> &NodeMeta {
        &self.meta[id.as_index()]
    }

    pub fn value(&self, id: NodeId) -> Option<&[f64]> {
        self.values[id.as_index()].as_deref()
    }

    pub fn is_constant(&self, id: NodeId) -> bool {
        matches!(self.kinds[id.as_index()], NodeKind::Constant)
    }

    pub fn is_solver_variable(&self, id: NodeId) -> bool {
        matches!(self.kinds[id.as_index()], NodeKind::SolverVariable)
    }

    /// Data-edge parents of a node with their edge kinds.
    pub fn parents(&self, id: NodeId) -> ParentList {
        parents_of(&self.kinds[id.as_index()])
    }

    /// Forward data-edge dependents of a node.
    pub fn dependents(&self, id: NodeId) -> &[NodeId] {
        &self.dependents[id.as_index()]
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.kinds.len() as u32).map(NodeId::new)
    }

    /// Largest constant vector length: the model horizon H. Scalars
    /// broadcast, so a graph of pure scalars has H = 1.
    pub fn horizon(&self) -> usize {
        self.values
            .iter()
            .flatten()
            .map(Vec::len)
            .max()
            .unwrap_or(1)
            .max(1)
    }

    /// Solver variables reachable backwards from `roots` along data edges.
    pub fn solver_ancestors(&self, roots: &[NodeId]) -> Vec<NodeId> {
        let mut seen = vec![false; self.node_count()];
        let mut stack: Vec<NodeId> = roots.to_vec();
        let mut found = Vec::new();
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut seen[id.as_index()], true) {
                continue;
            }
            if self.is_solver_variable(id) {
                found.push(id);
            }
            for (parent, _) in self.parents(id) {
                stack.push(parent);
            }
        }
        found.sort_unstable();
        found
    }

    fn check_id(&self, id: NodeId) -> Result<(), GraphError> {
        if id.as_index() < self.kinds.len() {
            Ok(())
        } else {
            Err(GraphError::UnknownNode(id))
        }
    }
}

pub(crate) fn parents_of(kind: &NodeKind) -> ParentList {
    match *kind {
        NodeKind::Constant | NodeKind::SolverVariable => SmallVec::new(),
        NodeKind::Binary { lhs, rhs, .. } => {
            SmallVec::from_buf([(lhs, EdgeKind::Value), (rhs, EdgeKind::Value)])
        }
        NodeKind::Previous {
            source, default, ..
        } => SmallVec::from_buf([
            (source, EdgeKind::Temporal),
            (default, EdgeKind::DefaultValue),
        ]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(g: &mut ComputationGraph, v: f64, name: &str) -> NodeId {
        g.add_constant(vec![v], name).unwrap()
    }

    #[test]
    fn ids_are_monotonic_and_parents_precede_children() {
        let mut g = ComputationGraph::new();
        let a = constant(&mut g, 1.0, "a");
        let b = constant(&mut g, 2.0, "b");
        let c = g.add_binary(BinaryOp::Add, a, b, "(a + b)").unwrap();
        assert!(a < c && b < c);
        assert_eq!(g.dependents(a), &[c]);
        assert_eq!(g.dependents(b), &[c]);
    }

    #[test]
    fn previous_requires_positive_lag() {
        let mut g = ComputationGraph::new();
        let a = constant(&mut g, 1.0, "a");
        let d = constant(&mut g, 0.0, "d");
        assert_eq!(
            g.add_previous(a, d, 0, "a.prev"),
            Err(GraphError::InvalidLag(0))
        );
        assert!(g.add_previous(a, d, 1, "a.prev").is_ok());
    }

    #[test]
    fn constraint_without_solver_variable_is_rejected() {
        let mut g = ComputationGraph::new();
        let a = constant(&mut g, 1.0, "a");
        let b = constant(&mut g, 2.0, "b");
        assert_eq!(
            g.add_constraint(a, b),
            Err(GraphError::ConstraintWithoutVariable)
        );
    }

    #[test]
    fn constraint_tags_the_reachable_solver_variable() {
        let mut g = ComputationGraph::new();
        let x = g.add_solver_variable("x");
        let xx = g.add_binary(BinaryOp::Mul, x, x, "(x * x)").unwrap();
        let c = constant(&mut g, 20.0, "20");
        let rhs = g.add_binary(BinaryOp::Add, x, c, "(x + 20)").unwrap();
        g.add_constraint(xx, rhs).unwrap();
        assert_eq!(g.constraints()[0].var, x);
    }

    #[test]
    fn metadata_overwrite_reports_previous_values() {
        let mut g = ComputationGraph::new();
        let a = constant(&mut g, 1.0, "a");
        let none = g
            .set_metadata(a, Some(Unit::parse("USD")), Some(TemporalType::Flow))
            .unwrap();
        assert!(!none.is_overwrite());

        let over = g.set_metadata(a, Some(Unit::parse("EUR")), None).unwrap();
        assert_eq!(over.previous_unit, Some(Unit::parse("USD")));
        assert!(over.previous_temporal.is_none());
    }

    #[test]
    fn value_mutation_preserves_structure_epoch() {
        let mut g = ComputationGraph::new();
        let a = constant(&mut g, 1.0, "a");
        let before = g.structure_epoch();
        g.set_value(a, vec![5.0]).unwrap();
        assert_eq!(g.structure_epoch(), before);
    }

    #[test]
    fn horizon_is_longest_vector() {
        let mut g = ComputationGraph::new();
        g.add_constant(vec![1.0], "s").unwrap();
        g.add_constant(vec![1.0, 2.0, 3.0], "v").unwrap();
        assert_eq!(g.horizon(), 3);
    }
}
