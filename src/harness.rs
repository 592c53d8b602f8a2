//! Side-by-side runs of the exact matcher and the branch-and-bound solver.

use crate::bnb::BranchAndBound;
use crate::constraints::ConstraintSet;
use crate::hungarian::HungarianSolver;
use crate::model::CostModel;
use crate::solution::{Solution, Status};
use crate::solver::{Sense, SolverOptions};
use anyhow::{ensure, Context};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// Both solutions of one scenario.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Comparison {
    pub exact: Solution,
    pub constrained: Solution,
    /// constrained wall time over exact wall time
    pub speedup_ratio: f64,
    /// constrained objective minus exact objective
    pub cost_delta: f64,
}

/// One day of a multi-period run.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Scenario {
    pub model: CostModel,
    pub constraints: ConstraintSet,
}

impl Scenario {
    pub fn new(model: CostModel, constraints: ConstraintSet) -> Scenario {
        Scenario { model, constraints }
    }
}

/// Per-day solutions in scenario order and their summed objective.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeriodReport {
    pub days: Vec<Solution>,
    pub total: f64,
}

/// Flat row of a size sweep.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BenchmarkRecord {
    pub size: usize,
    pub exact_cost: f64,
    pub exact_time: Duration,
    pub constrained_cost: f64,
    pub constrained_time: Duration,
    pub status: Status,
}

impl BenchmarkRecord {
    pub fn new(size: usize, comparison: &Comparison) -> BenchmarkRecord {
        BenchmarkRecord {
            size,
            exact_cost: comparison.exact.objective,
            exact_time: comparison.exact.wall_time,
            constrained_cost: comparison.constrained.objective,
            constrained_time: comparison.constrained.wall_time,
            status: comparison.constrained.status,
        }
    }
}

/// `size,exact_cost,exact_ms,constrained_cost,constrained_ms,status`
impl fmt::Display for BenchmarkRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{:.3},{},{:.3},{:?}",
            self.size,
            self.exact_cost,
            self.exact_time.as_secs_f64() * 1e3,
            self.constrained_cost,
            self.constrained_time.as_secs_f64() * 1e3,
            self.status
        )
    }
}

/// Ratio of two wall times; a zero exact time gives infinity unless both are
/// zero.
pub fn speedup_ratio(constrained: Duration, exact: Duration) -> f64 {
    let exact = exact.as_secs_f64();
    let constrained = constrained.as_secs_f64();
    if exact > 0. {
        constrained / exact
    } else if constrained > 0. {
        f64::INFINITY
    } else {
        1.
    }
}

#[derive(Debug, Clone, Default)]
pub struct BenchmarkHarness {
    options: SolverOptions,
    sense: Sense,
    exact: HungarianSolver<usize>,
    constrained: BranchAndBound,
}

impl BenchmarkHarness {
    pub fn new(options: SolverOptions, sense: Sense) -> BenchmarkHarness {
        BenchmarkHarness {
            constrained: BranchAndBound::new(options.clone()),
            exact: HungarianSolver::default(),
            options,
            sense,
        }
    }

    pub fn sense(&self) -> Sense {
        self.sense
    }

    /// Solves `model` with both solvers.
    ///
    /// Without `constraints` the branch-and-bound gets Degree(=1) on every
    /// entity and both objectives must agree; a mismatch is an error.
    pub fn compare(
        &mut self,
        model: &CostModel,
        constraints: Option<&ConstraintSet>,
    ) -> anyhow::Result<Comparison> {
        let exact = self
            .exact
            .solve(model, self.sense)
            .context("exact matcher failed")?;

        let one_to_one;
        let (constraints, cross_validate) = match constraints {
            Some(constraints) => (constraints, false),
            None => {
                one_to_one = ConstraintSet::one_to_one(model);
                (&one_to_one, true)
            }
        };
        let constrained = self
            .constrained
            .solve(model, constraints, self.sense)
            .context("branch-and-bound failed")?;

        let cost_delta = constrained.objective - exact.objective;
        if cross_validate {
            ensure!(
                constrained.status == Status::Optimal,
                "branch-and-bound stopped early ({:?}) on a one-to-one model",
                constrained.termination
            );
            ensure!(
                cost_delta.abs() <= self.options.tolerance * exact.objective.abs().max(1.),
                "cross-validation failed: exact {} vs constrained {}",
                exact.objective,
                constrained.objective
            );
        }
        let speedup_ratio = speedup_ratio(constrained.wall_time, exact.wall_time);
        debug!(
            "compare {}x{}: exact {} in {:?}, constrained {} in {:?} ({} nodes)",
            model.demand_count(),
            model.supply_count(),
            exact.objective,
            exact.wall_time,
            constrained.objective,
            constrained.wall_time,
            self.constrained.stats.nodes
        );
        Ok(Comparison {
            exact,
            constrained,
            speedup_ratio,
            cost_delta,
        })
    }

    /// Solves every scenario independently with the branch-and-bound and sums
    /// their objectives in scenario order.
    ///
    /// A day with no feasible assignment (proven, or none found within the
    /// budget) is an error.
    pub fn run_periods(&self, scenarios: &[Scenario]) -> anyhow::Result<PeriodReport> {
        let solve_day = |(day, scenario): (usize, &Scenario)| -> anyhow::Result<Solution> {
            let mut solver = BranchAndBound::new(self.options.clone());
            let solution = solver
                .solve(&scenario.model, &scenario.constraints, self.sense)
                .with_context(|| format!("day {}", day))?;
            ensure!(
                solution.status != Status::Infeasible,
                "day {}: no feasible assignment within the budget ({:?})",
                day,
                solution.termination
            );
            Ok(solution)
        };

        #[cfg(feature = "parallel")]
        let days: Vec<Solution> = scenarios
            .par_iter()
            .enumerate()
            .map(solve_day)
            .collect::<anyhow::Result<_>>()?;
        #[cfg(not(feature = "parallel"))]
        let days: Vec<Solution> = scenarios
            .iter()
            .enumerate()
            .map(solve_day)
            .collect::<anyhow::Result<_>>()?;

        let total = days.iter().fold(0., |acc, day| acc + day.objective);
        info!("{} periods, total objective {}", days.len(), total);
        Ok(PeriodReport { days, total })
    }
}
