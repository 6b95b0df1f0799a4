//! Canvas snapshots.
//!
//! The byte stream carries the graph (node kinds with parent ids,
//! names, metadata, stored values), the constraint list, and the
//! horizon. It deliberately never carries bytecode: a loaded canvas
//! recompiles on first use, so the physical layout is free to change
//! while logical ids stay stable. Rebuilding goes through the ordinary
//! graph constructors, which re-validates parent references and lags
//! and re-derives the forward edges and constraint tags.

use crate::graph::{ComputationGraph, Constraint, NodeKind};
use fathom_common::{GraphError, NodeMeta};
use serde::{Deserialize, Serialize};
use tracing::debug;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct NodeSnapshot {
    kind: NodeKind,
    name: String,
    meta: NodeMeta,
    value: Option<Vec<f64>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CanvasSnapshot {
    version: u32,
    horizon: usize,
    nodes: Vec<NodeSnapshot>,
    constraints: Vec<Constraint>,
}

pub(crate) fn to_bytes(graph: &ComputationGraph) -> Result<Vec<u8>, GraphError> {
    let snapshot = CanvasSnapshot {
        version: SNAPSHOT_VERSION,
        horizon: graph.horizon(),
        nodes: graph
            .ids()
            .map(|id| NodeSnapshot {
                kind: graph.kind(id).clone(),
                name: graph.name(id).to_owned(),
                meta: graph.meta(id).clone(),
                value: graph.value(id).map(<[f64]>::to_vec),
            })
            .collect(),
        // The constraint list ships with the snapshot; dropping it here
        // silently breaks every post-load solve.
        constraints: graph.constraints().to_vec(),
    };
    bincode::serialize(&snapshot).map_err(|e| GraphError::InvalidSnapshot(e.to_string()))
}

pub(crate) fn from_bytes(bytes: &[u8]) -> Result<ComputationGraph, GraphError> {
    let snapshot: CanvasSnapshot =
        bincode::deserialize(bytes).map_err(|e| GraphError::InvalidSnapshot(e.to_string()))?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(GraphError::InvalidSnapshot(format!(
            "unsupported snapshot version {}",
            snapshot.version
        )));
    }

    let mut graph = ComputationGraph::new();
    for node in snapshot.nodes {
        let id = match node.kind {
            NodeKind::Constant => {
                let values = node
                    .value
                    .ok_or_else(|| GraphError::InvalidSnapshot("constant without values".into()))?;
                graph
                    .add_constant(values, &node.name)
                    .map_err(invalid_snapshot)?
            }
            NodeKind::Binary { op, lhs, rhs } => graph
                .add_binary(op, lhs, rhs, &node.name)
                .map_err(invalid_snapshot)?,
            NodeKind::Previous {
                source,
                default,
                lag,
            } => graph
                .add_previous(source, default, lag, &node.name)
                .map_err(invalid_snapshot)?,
            NodeKind::SolverVariable => {
                let id = graph.add_solver_variable(&node.name);
                if let Some(values) = node.value {
                    graph.store_solution(id, values);
                }
                id
            }
        };
        if !node.meta.is_empty() {
            graph
                .set_metadata(id, node.meta.unit, node.meta.temporal)
                .map_err(invalid_snapshot)?;
        }
    }
    for constraint in &snapshot.constraints {
        graph
            .add_constraint(constraint.lhs, constraint.rhs)
            .map_err(invalid_snapshot)?;
    }

    debug!(
        nodes = graph.node_count(),
        constraints = graph.constraints().len(),
        "loaded canvas snapshot"
    );
    Ok(graph)
}

fn invalid_snapshot(err: GraphError) -> GraphError {
    GraphError::InvalidSnapshot(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fathom_common::{BinaryOp, TemporalType, Unit};

    #[test]
    fn round_trip_preserves_nodes_metadata_values_and_constraints() {
        let mut g = ComputationGraph::new();
        let c1 = g.add_constant(vec![10.0], "c1").unwrap();
        let x = g.add_solver_variable("x");
        let y = g.add_solver_variable("y");
        let rhs1 = g.add_binary(BinaryOp::Sub, c1, y, "(c1 - y)").unwrap();
        let c2 = g.add_constant(vec![2.0], "c2").unwrap();
        let rhs2 = g.add_binary(BinaryOp::Sub, x, c2, "(x - c2)").unwrap();
        g.add_constraint(x, rhs1).unwrap();
        g.add_constraint(y, rhs2).unwrap();
        g.set_metadata(c1, Some(Unit::parse("USD")), Some(TemporalType::Flow))
            .unwrap();

        let bytes = to_bytes(&g).unwrap();
        let loaded = from_bytes(&bytes).unwrap();

        assert_eq!(loaded.node_count(), g.node_count());
        assert_eq!(loaded.constraints(), g.constraints());
        assert_eq!(loaded.meta(c1), g.meta(c1));
        assert_eq!(loaded.value(c1), g.value(c1));
        assert_eq!(loaded.name(rhs1), "(c1 - y)");
    }

    #[test]
    fn truncated_streams_are_structured_errors() {
        let mut g = ComputationGraph::new();
        g.add_constant(vec![1.0], "a").unwrap();
        let bytes = to_bytes(&g).unwrap();
        let err = from_bytes(&bytes[..bytes.len() / 2]).unwrap_err();
        assert!(matches!(err, GraphError::InvalidSnapshot(_)));
    }

    #[test]
    fn solver_solutions_survive_the_round_trip() {
        let mut g = ComputationGraph::new();
        let x = g.add_solver_variable("x");
        let c = g.add_constant(vec![6.0], "6").unwrap();
        g.add_constraint(x, c).unwrap();
        g.store_solution(x, vec![6.0]);

        let loaded = from_bytes(&to_bytes(&g).unwrap()).unwrap();
        assert_eq!(loaded.value(x), Some(&[6.0][..]));
    }
}
