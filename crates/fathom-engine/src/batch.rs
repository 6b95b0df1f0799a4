//! Parallel scenario evaluation.
//!
//! Scenarios share the compiled program and graph read-only and each own
//! a cloned ledger, the isolation unit: no scenario can observe
//! another's writes. Work fans out over a rayon pool in chunks, which
//! bounds how many ledger clones are live at once. Workers receive all
//! scenario data explicitly and never touch the ambient canvas stack.

use crate::compiler::Program;
use crate::config::EngineConfig;
use crate::dirty::affected_instructions;
use crate::graph::ComputationGraph;
use crate::ledger::Ledger;
use crate::solver;
use crate::vm;
use fathom_common::{ComputeError, EngineError, GraphError, NodeId};
use rayon::prelude::*;
use std::sync::Arc;
use tracing::debug;

/// A named set of input overrides.
#[derive(Debug, Clone, Default)]
pub struct Scenario {
    pub name: String,
    overrides: Vec<(NodeId, Vec<f64>)>,
}

impl Scenario {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            overrides: Vec::new(),
        }
    }

    /// Override a constant input for this scenario. Accepts anything
    /// identifying a node (a `&Var` handle or a raw id).
    pub fn set(mut self, node: impl Into<NodeId>, values: impl crate::canvas::IntoSeries) -> Self {
        self.overrides.push((node.into(), values.into_series()));
        self
    }

    pub fn overrides(&self) -> &[(NodeId, Vec<f64>)] {
        &self.overrides
    }
}

/// Outcome of one scenario: its private ledger, or its private error.
#[derive(Debug)]
pub struct ScenarioRun {
    pub name: String,
    outcome: Result<Ledger, EngineError>,
}

impl ScenarioRun {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&EngineError> {
        self.outcome.as_ref().err()
    }
}

/// All scenario outcomes of one `run_batch` call, in submission order.
#[derive(Debug)]
pub struct BatchReport {
    program: Arc<Program>,
    runs: Vec<ScenarioRun>,
}

impl BatchReport {
    pub fn runs(&self) -> &[ScenarioRun] {
        &self.runs
    }

    pub fn run(&self, name: &str) -> Option<&ScenarioRun> {
        self.runs.iter().find(|r| r.name == name)
    }

    /// A node's series under the named scenario, or the scenario's error.
    /// `None` when the scenario or the node is unknown to this report.
    pub fn value(
        &self,
        name: &str,
        node: impl Into<NodeId>,
    ) -> Option<Result<Vec<f64>, EngineError>> {
        let node = node.into();
        if node.as_index() >= self.program.column_count() {
            return None;
        }
        let run = self.run(name)?;
        Some(match &run.outcome {
            Ok(ledger) => Ok(ledger.column(self.program.phys(node)).to_vec()),
            Err(err) => Err(err.clone()),
        })
    }
}

/// Evaluate every scenario against the fully computed base ledger.
pub(crate) fn run_batch(
    graph: &ComputationGraph,
    program: &Arc<Program>,
    base: &Ledger,
    config: &EngineConfig,
    scenarios: &[Scenario],
    chunk_size: Option<usize>,
) -> BatchReport {
    let chunk = chunk_size.unwrap_or(config.batch_chunk_size).max(1);
    debug!(
        scenarios = scenarios.len(),
        chunk, "starting batch evaluation"
    );

    let mut runs = Vec::with_capacity(scenarios.len());
    for window in scenarios.chunks(chunk) {
        runs.par_extend(window.par_iter().map(|scenario| ScenarioRun {
            name: scenario.name.clone(),
            outcome: run_one(graph, program, base, config, scenario),
        }));
    }

    BatchReport {
        program: Arc::clone(program),
        runs,
    }
}

fn run_one(
    graph: &ComputationGraph,
    program: &Program,
    base: &Ledger,
    config: &EngineConfig,
    scenario: &Scenario,
) -> Result<Ledger, EngineError> {
    let mut ledger = base.clone();

    let mut changed = Vec::with_capacity(scenario.overrides.len());
    for (node, series) in &scenario.overrides {
        if node.as_index() >= graph.node_count() {
            return Err(GraphError::UnknownNode(*node).into());
        }
        if !graph.is_constant(*node) {
            return Err(GraphError::NotAConstant(*node).into());
        }
        if series.len() != 1 && series.len() != program.horizon {
            return Err(ComputeError::HorizonMismatch {
                node: *node,
                len: series.len(),
                horizon: program.horizon,
            }
            .into());
        }
        ledger.write_column(program.phys(*node), series);
        changed.push(*node);
    }

    let subset = affected_instructions(graph, program, &changed);
    vm::run_subset(program, &mut ledger, &subset);

    if !graph.constraints().is_empty() {
        solver::solve_system(graph, program, &mut ledger, config, None)?;
    }

    Ok(ledger)
}
