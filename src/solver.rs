use crate::model::CostModel;
use crate::solution::{AssignedEdge, Assignment};
use std::time::{Duration, Instant};

/// Direction of optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Sense {
    #[default]
    Minimize,
    Maximize,
}

impl Sense {
    /// Multiplier turning objective values into minimization form.
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Sense::Minimize => 1.,
            Sense::Maximize => -1.,
        }
    }

    /// Returns true if `a` is strictly better than `b` by more than `tolerance`.
    #[inline]
    pub fn improves(self, a: f64, b: f64, tolerance: f64) -> bool {
        self.sign() * (b - a) > tolerance
    }
}

/// Limits and tolerances of a search.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SolverOptions {
    /// Wall-clock budget of a single solve.
    ///
    /// When it elapses the branch-and-bound returns its incumbent. `None`
    /// searches until the tree is exhausted (the default).
    pub time_budget: Option<Duration>,

    /// Maximum number of branch-and-bound nodes to expand.
    pub max_nodes: usize,

    /// Open nodes kept for best-bound ordering. Once reached, new children are
    /// explored depth-first until the queue drains below the limit.
    pub max_open_nodes: usize,

    /// Absolute tolerance for comparing objective values and bounds.
    pub tolerance: f64,
}

impl SolverOptions {
    pub const MAX_NODES: usize = 1_000_000;
    pub const MAX_OPEN_NODES: usize = 100_000;
    pub const TOLERANCE: f64 = 1e-9;

    /// Sets the time budget.
    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    /// Sets the node limit.
    pub fn with_max_nodes(mut self, n: usize) -> Self {
        self.max_nodes = n.max(1);
        self
    }

    /// Sets the open-node limit after which the search dives depth-first.
    pub fn with_max_open_nodes(mut self, n: usize) -> Self {
        self.max_open_nodes = n.max(1);
        self
    }

    /// Sets the comparison tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance.abs();
        self
    }
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            time_budget: None,
            max_nodes: Self::MAX_NODES,
            max_open_nodes: Self::MAX_OPEN_NODES,
            tolerance: Self::TOLERANCE,
        }
    }
}

/// Start time of a solve plus its optional budget.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    start: Instant,
    budget: Option<Duration>,
}

impl Deadline {
    pub(crate) fn start(budget: Option<Duration>) -> Deadline {
        Deadline {
            start: Instant::now(),
            budget,
        }
    }

    #[inline]
    pub(crate) fn expired(&self) -> bool {
        match self.budget {
            Some(budget) => self.start.elapsed() >= budget,
            None => false,
        }
    }

    #[inline]
    pub(crate) fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Collects `(demand, supply)` pairs into an assignment carrying the model's
/// quantities and original (not sense-adjusted) costs.
pub(crate) fn collect_assignment<It>(model: &CostModel, pairs: It) -> Assignment
where
    It: IntoIterator<Item = (usize, usize)>,
{
    Assignment::new(
        pairs
            .into_iter()
            .map(|(demand, supply)| AssignedEdge {
                demand,
                supply,
                quantity: model.quantity(demand, supply),
                cost: model.cost(demand, supply),
            })
            .collect(),
    )
}
