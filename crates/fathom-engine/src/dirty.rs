//! Forward reachability from changed inputs.
//!
//! Work is proportional to the affected subgraph, not the whole graph:
//! the walk touches only dependents of the changed set, and the result
//! is the subsequence of the global instruction order restricted to
//! that set. All three data edge kinds propagate; a mutated `Previous`
//! default must dirty the shift that reads it.

use crate::compiler::Program;
use crate::graph::ComputationGraph;
use fathom_common::NodeId;
use rustc_hash::FxHashSet;

/// Instruction indices (sorted ascending) that must re-execute after the
/// given logical ids changed. Changed constants re-seed separately; they
/// have no instruction of their own.
pub fn affected_instructions(
    graph: &ComputationGraph,
    program: &Program,
    changed: &[NodeId],
) -> Vec<u32> {
    let mut visited = FxHashSet::default();
    let mut stack: Vec<NodeId> = changed.to_vec();
    let mut instrs = Vec::new();

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        if let Some(instr) = program.instr_of[id.as_index()] {
            instrs.push(instr);
        }
        stack.extend_from_slice(graph.dependents(id));
    }

    instrs.sort_unstable();
    instrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use fathom_common::BinaryOp::*;

    #[test]
    fn only_the_reachable_cone_is_dirty() {
        // c = a + b, d = a * c, e = b * b
        let mut g = ComputationGraph::new();
        let a = g.add_constant(vec![10.0], "a").unwrap();
        let b = g.add_constant(vec![20.0], "b").unwrap();
        let c = g.add_binary(Add, a, b, "c").unwrap();
        let d = g.add_binary(Mul, a, c, "d").unwrap();
        let e = g.add_binary(Mul, b, b, "e").unwrap();
        let program = compile(&g).unwrap();

        let dirty = affected_instructions(&g, &program, &[a]);
        let expected: Vec<u32> = [c, d]
            .iter()
            .map(|id| program.instr_of[id.as_index()].unwrap())
            .collect();
        assert_eq!(dirty, expected);
        assert!(!dirty.contains(&program.instr_of[e.as_index()].unwrap()));
    }

    #[test]
    fn default_value_edges_propagate() {
        let mut g = ComputationGraph::new();
        let src = g.add_constant(vec![1.0, 2.0, 3.0], "src").unwrap();
        let dft = g.add_constant(vec![9.0], "dft").unwrap();
        let prev = g.add_previous(src, dft, 1, "prev").unwrap();
        let program = compile(&g).unwrap();

        let dirty = affected_instructions(&g, &program, &[dft]);
        assert_eq!(dirty, vec![program.instr_of[prev.as_index()].unwrap()]);
    }

    #[test]
    fn subset_preserves_global_order() {
        let mut g = ComputationGraph::new();
        let one = g.add_constant(vec![1.0], "1").unwrap();
        let mut curr = g.add_constant(vec![0.0], "acc").unwrap();
        let root = curr;
        for i in 0..50 {
            curr = g.add_binary(Add, curr, one, &format!("acc_{i}")).unwrap();
        }
        let program = compile(&g).unwrap();
        let dirty = affected_instructions(&g, &program, &[root]);
        assert_eq!(dirty.len(), 50);
        assert!(dirty.windows(2).all(|w| w[0] < w[1]));
    }
}
