//! Straight-line bytecode interpreter.
//!
//! One pass seeds constant and solver-variable columns, a second walks
//! the instruction stream. Arithmetic is per time step with IEEE-754
//! semantics throughout: `0/0` is `NaN`, `1/0` is `+Inf`, and neither
//! traps. Non-finite values are data, inspected later, never errors.

use crate::compiler::{Instr, Program};
use crate::graph::{ComputationGraph, NodeKind};
use crate::ledger::Ledger;
use fathom_common::{ComputeError, NodeId};

/// Seed every constant and solver-variable column.
///
/// Scalars broadcast across the horizon; a vector longer than one period
/// must match it exactly. Solver variables default to zero until a
/// solution has been stored.
pub fn seed(
    program: &Program,
    graph: &ComputationGraph,
    ledger: &mut Ledger,
) -> Result<(), ComputeError> {
    for seed in &program.seeds {
        seed_one(program, graph, ledger, seed.node)?;
    }
    Ok(())
}

/// Re-seed a single column after an input mutation or scenario override.
pub fn seed_one(
    program: &Program,
    graph: &ComputationGraph,
    ledger: &mut Ledger,
    node: NodeId,
) -> Result<(), ComputeError> {
    let phys = program.phys(node);
    match graph.value(node) {
        Some(series) => {
            if series.len() != 1 && series.len() != program.horizon {
                return Err(ComputeError::HorizonMismatch {
                    node,
                    len: series.len(),
                    horizon: program.horizon,
                });
            }
            ledger.write_column(phys, series);
        }
        None => {
            debug_assert!(matches!(graph.kind(node), NodeKind::SolverVariable));
            ledger.column_mut(phys).fill(0.0);
            ledger.mark_column_valid(phys);
        }
    }
    Ok(())
}

/// Execute every instruction once, in order.
pub fn run(program: &Program, ledger: &mut Ledger) {
    for instr in &program.instrs {
        exec(instr, ledger);
    }
}

/// Execute a sorted subsequence of the instruction stream, preserving
/// the global topological order. Untouched columns keep their values
/// and stay valid.
pub fn run_subset(program: &Program, ledger: &mut Ledger, indices: &[u32]) {
    debug_assert!(indices.windows(2).all(|w| w[0] < w[1]));
    for &i in indices {
        exec(&program.instrs[i as usize], ledger);
    }
}

#[inline]
fn exec(instr: &Instr, ledger: &mut Ledger) {
    let h = ledger.horizon();
    match *instr {
        Instr::Binary { op, lhs, rhs, out } => {
            let (a, b, o) = (
                lhs as usize * h,
                rhs as usize * h,
                out as usize * h,
            );
            let data = ledger.data_mut();
            for t in 0..h {
                data[o + t] = op.apply(data[a + t], data[b + t]);
            }
            ledger.mark_column_valid(out);
        }
        Instr::Shift {
            source,
            default,
            lag,
            out,
        } => {
            let lag = lag as usize;
            let (s, d, o) = (
                source as usize * h,
                default as usize * h,
                out as usize * h,
            );
            let data = ledger.data_mut();
            for t in 0..h {
                // lag > horizon degenerates to the default everywhere.
                data[o + t] = if t >= lag {
                    data[s + t - lag]
                } else {
                    data[d + t]
                };
            }
            ledger.mark_column_valid(out);
        }
    }
}
