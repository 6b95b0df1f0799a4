//! Audit-trace rendering: a pure formatter over graph + ledger.
//!
//! Walks a node back to its inputs and prints every intermediate series,
//! one period per bracket slot, three decimals. Non-finite values are
//! rendered explicitly (`NaN`, `+Inf`, `-Inf`); an audit that hides
//! them is worse than none. The walk is iterative, so
//! tracing the deep end of a long chain cannot exhaust the stack.

use crate::compiler::Program;
use crate::graph::{ComputationGraph, NodeKind};
use crate::ledger::Ledger;
use fathom_common::NodeId;
use rustc_hash::FxHashSet;
use std::fmt::Write;

pub(crate) fn render(
    graph: &ComputationGraph,
    program: Option<&Program>,
    ledger: Option<&Ledger>,
    root: NodeId,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "AUDIT TRACE: {}", graph.name(root));
    let _ = writeln!(out, "{}", "=".repeat(12 + graph.name(root).len()));

    let mut visited = FxHashSet::default();
    let mut stack = vec![(root, 0usize)];
    while let Some((id, depth)) = stack.pop() {
        let indent = "  ".repeat(depth);
        let name = graph.name(id);

        if !visited.insert(id) {
            let _ = writeln!(out, "{indent}{name} (see above)");
            continue;
        }

        let _ = writeln!(
            out,
            "{indent}{name} [{}] = {}",
            describe(graph, id),
            values_line(graph, program, ledger, id)
        );

        // Push parents in reverse so they print in declaration order.
        for (parent, _) in graph.parents(id).into_iter().rev() {
            stack.push((parent, depth + 1));
        }
    }
    out
}

fn describe(graph: &ComputationGraph, id: NodeId) -> &'static str {
    match graph.kind(id) {
        NodeKind::Constant => "constant",
        NodeKind::Binary { .. } => "formula",
        NodeKind::Previous { .. } => "previous",
        NodeKind::SolverVariable => "solver variable",
    }
}

fn values_line(
    graph: &ComputationGraph,
    program: Option<&Program>,
    ledger: Option<&Ledger>,
    id: NodeId,
) -> String {
    if let (Some(program), Some(ledger)) = (program, ledger) {
        let phys = program.phys(id);
        if ledger.column_valid(phys) {
            return format_series(ledger.column(phys));
        }
    }
    match graph.value(id) {
        Some(series) => format_series(series),
        None => "<not computed>".to_owned(),
    }
}

fn format_series(series: &[f64]) -> String {
    let cells: Vec<String> = series.iter().map(|&v| format_cell(v)).collect();
    format!("[{}]", cells.join(", "))
}

fn format_cell(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_owned()
    } else if v == f64::INFINITY {
        "+Inf".to_owned()
    } else if v == f64::NEG_INFINITY {
        "-Inf".to_owned()
    } else {
        format!("{v:.3}")
    }
}
