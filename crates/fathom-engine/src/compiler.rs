//! Graph → bytecode lowering.
//!
//! The compiler severs `Temporal` edges (a lag read crosses a time
//! boundary and is always satisfied by the prior step), runs an
//! iterative Kahn sort over the remaining data edges, and lays columns
//! out constants-first so the VM walks the instruction stream forward
//! through a warm ledger. Constraint edges are invisible here; cyclic
//! systems closed by solver variables compile like any other graph.

use crate::graph::{ComputationGraph, EdgeKind, NodeKind};
use fathom_common::{BinaryOp, CompileError, NodeId};
use std::collections::VecDeque;
use tracing::debug;

/// One VM step over physical ledger columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instr {
    Binary {
        op: BinaryOp,
        lhs: u32,
        rhs: u32,
        out: u32,
    },
    /// `out[t] = source[t − lag]` for `t ≥ lag`, else `default[t]`.
    Shift {
        source: u32,
        default: u32,
        lag: u32,
        out: u32,
    },
}

/// Seeded (non-executed) column: a constant or a solver variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seed {
    pub phys: u32,
    pub node: NodeId,
}

/// Immutable compiled form of a graph. Shared read-only across the
/// batch runner's workers; rebuilt whenever the structure epoch moves.
#[derive(Debug, Clone)]
pub struct Program {
    pub horizon: usize,
    /// Logical id → physical ledger column. Total: orphans get columns too.
    pub phys_of: Vec<u32>,
    /// Seeded columns, in physical order.
    pub seeds: Vec<Seed>,
    /// Instructions in topological order.
    pub instrs: Vec<Instr>,
    /// Logical node computed by each instruction.
    pub instr_node: Vec<NodeId>,
    /// Logical id → index into `instrs` (formulas only).
    pub instr_of: Vec<Option<u32>>,
    /// Structure epoch this program was compiled against.
    pub epoch: u64,
}

impl Program {
    #[inline]
    pub fn phys(&self, id: NodeId) -> u32 {
        self.phys_of[id.as_index()]
    }

    pub fn column_count(&self) -> usize {
        self.phys_of.len()
    }
}

/// Deterministic lowering: identical graphs yield identical bytecode.
pub fn compile(graph: &ComputationGraph) -> Result<Program, CompileError> {
    let n = graph.node_count();
    let horizon = graph.horizon();

    // Kahn over Value + DefaultValue edges; Temporal edges are severed.
    let mut in_degree = vec![0u32; n];
    for id in graph.ids() {
        for (_, kind) in graph.parents(id) {
            if kind != EdgeKind::Temporal {
                in_degree[id.as_index()] += 1;
            }
        }
    }

    let mut queue: VecDeque<NodeId> = graph
        .ids()
        .filter(|id| in_degree[id.as_index()] == 0)
        .collect();
    let mut topo = Vec::with_capacity(n);
    while let Some(id) = queue.pop_front() {
        topo.push(id);
        for &dep in graph.dependents(id) {
            // Recover the edge kind from the dependent's parent list so a
            // node feeding both slots of a Previous is counted once.
            for (parent, kind) in graph.parents(dep) {
                if parent == id && kind != EdgeKind::Temporal {
                    in_degree[dep.as_index()] -= 1;
                    if in_degree[dep.as_index()] == 0 {
                        queue.push_back(dep);
                    }
                }
            }
        }
    }

    if topo.len() < n {
        let cycle: Vec<NodeId> = graph
            .ids()
            .filter(|id| in_degree[id.as_index()] > 0)
            .collect();
        return Err(CompileError::Cycle(cycle));
    }

    // Physical layout: seeded columns first (id order), then formulas in
    // topological order.
    let mut phys_of = vec![u32::MAX; n];
    let mut seeds = Vec::new();
    let mut next_phys = 0u32;
    for id in graph.ids() {
        if matches!(
            graph.kind(id),
            NodeKind::Constant | NodeKind::SolverVariable
        ) {
            phys_of[id.as_index()] = next_phys;
            seeds.push(Seed {
                phys: next_phys,
                node: id,
            });
            next_phys += 1;
        }
    }
    for &id in &topo {
        if phys_of[id.as_index()] == u32::MAX {
            phys_of[id.as_index()] = next_phys;
            next_phys += 1;
        }
    }

    let mut instrs = Vec::new();
    let mut instr_node = Vec::new();
    let mut instr_of = vec![None; n];
    for &id in &topo {
        let instr = match *graph.kind(id) {
            NodeKind::Constant | NodeKind::SolverVariable => continue,
            NodeKind::Binary { op, lhs, rhs } => Instr::Binary {
                op,
                lhs: phys_of[lhs.as_index()],
                rhs: phys_of[rhs.as_index()],
                out: phys_of[id.as_index()],
            },
            NodeKind::Previous {
                source,
                default,
                lag,
            } => Instr::Shift {
                source: phys_of[source.as_index()],
                default: phys_of[default.as_index()],
                lag: lag as u32,
                out: phys_of[id.as_index()],
            },
        };
        instr_of[id.as_index()] = Some(instrs.len() as u32);
        instrs.push(instr);
        instr_node.push(id);
    }

    debug!(
        nodes = n,
        instructions = instrs.len(),
        horizon,
        "compiled program"
    );

    Ok(Program {
        horizon,
        phys_of,
        seeds,
        instrs,
        instr_node,
        instr_of,
        epoch: graph.structure_epoch(),
    })
}
