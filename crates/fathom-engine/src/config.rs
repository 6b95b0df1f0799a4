use std::time::Duration;

/// Tunables for solving and batch execution.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Newton iteration budget per `solve()` call.
    pub max_solver_iterations: usize,
    /// Residual infinity-norm target for an `Optimal` result.
    pub solver_tolerance: f64,
    /// Looser norm under which a budget-exhausted solve still counts as
    /// `Acceptable`.
    pub solver_acceptable_tolerance: f64,
    /// Optional wall-clock deadline, checked at the residual oracle.
    pub solver_timeout: Option<Duration>,
    /// Scenarios submitted to the worker pool at once; bounds the number
    /// of concurrently live ledger clones.
    pub batch_chunk_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_solver_iterations: 100,
            solver_tolerance: 1e-9,
            solver_acceptable_tolerance: 1e-6,
            solver_timeout: None,
            batch_chunk_size: 256,
        }
    }
}

impl EngineConfig {
    #[inline]
    pub fn with_max_solver_iterations(mut self, iterations: usize) -> Self {
        self.max_solver_iterations = iterations;
        self
    }

    #[inline]
    pub fn with_solver_tolerance(mut self, tolerance: f64) -> Self {
        self.solver_tolerance = tolerance;
        self
    }

    #[inline]
    pub fn with_solver_timeout(mut self, timeout: Duration) -> Self {
        self.solver_timeout = Some(timeout);
        self
    }

    #[inline]
    pub fn with_batch_chunk_size(mut self, chunk_size: usize) -> Self {
        self.batch_chunk_size = chunk_size.max(1);
        self
    }
}
