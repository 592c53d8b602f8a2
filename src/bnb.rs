//! Branch-and-bound search for assignment problems with side constraints.
//!
//! Every node fixes some edges in or out of the assignment and may open or
//! close supplies. Its bound is the transportation relaxation of
//! [`crate::relaxation`] under those decisions: degree bounds are honoured
//! exactly, a capacity becomes a cap on the number of edges that can fit,
//! group thresholds and activation costs of undecided supplies are dropped.
//! When the relaxed plan happens to satisfy every constraint it is a candidate
//! incumbent; otherwise the most violated constraint selects the edge (or the
//! supply) to branch on.
//!
//! Nodes are expanded best-bound first. Once the open queue reaches
//! [`SolverOptions::max_open_nodes`] children are explored depth-first so that
//! memory stays bounded. The deadline is checked before every expansion.
//!
//! When several assignments reach the optimum, a second pass fixes edges in
//! `(demand, supply)` order and returns the one whose sorted pair list is
//! smallest.

use crate::constraints::{ConstraintSet, ConstraintView};
use crate::error::{AssignmentError, Result};
use crate::model::CostModel;
use crate::relaxation::{EdgeState, Relaxed, TransportRelaxation};
use crate::solution::{Solution, Status, Termination};
use crate::solver::{collect_assignment, Deadline, Sense, SolverOptions};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tracing::{debug, info, trace};

const NO_EDGE: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Edge { edge: usize, selected: bool },
    Supply { supply: usize, open: bool },
}

#[derive(Debug, Clone)]
struct Node {
    decisions: Vec<Decision>,
    // bound in minimization form
    bound: f64,
    relaxed: Relaxed,
    seq: u64,
}

// BinaryHeap pops the greatest node: lowest bound, then deepest, then oldest.
impl Ord for Node {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .bound
            .total_cmp(&self.bound)
            .then_with(|| self.decisions.len().cmp(&other.decisions.len()))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Node {}

/// Most violated constraint of a relaxed plan.
#[derive(Debug, Clone, Copy)]
enum Violation {
    Capacity { supply: usize },
    Group { group: usize },
}

/// Best feasible assignment found so far.
#[derive(Debug, Clone)]
struct Incumbent {
    // objective in minimization form
    value: f64,
    // edge indices, ascending
    selected: Vec<usize>,
    solution: Solution,
}

/// Outcome of a bounded search for a plan within a target value.
enum Lookup {
    Found(Vec<usize>),
    Missing,
    Stopped(Termination),
}

/// Counters of the last search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    /// expanded nodes
    pub nodes: usize,
    /// nodes discarded by bound or infeasibility
    pub pruned: usize,
    /// peak size of the open queue plus the dive stack
    pub max_open: usize,
    /// incumbent improvements
    pub incumbents: usize,
    /// expanded nodes when the first incumbent was found
    pub first_incumbent: Option<usize>,
}

/// Static data of one solve.
struct Problem<'a> {
    model: &'a CostModel,
    view: ConstraintView,
    sense: Sense,
    tolerance: f64,
    // usable edges in row-major order
    edges: Vec<(usize, usize)>,
    // edge costs in minimization form
    costs: Vec<f64>,
    quantities: Vec<f64>,
    // edge indices per supply, ascending demand
    supply_edges: Vec<Vec<usize>>,
    // (constraint index, edge indices, min); pairs on unusable edges dropped
    groups: Vec<(usize, Vec<usize>, usize)>,
}

impl<'a> Problem<'a> {
    fn new(
        model: &'a CostModel,
        constraints: &ConstraintSet,
        sense: Sense,
        tolerance: f64,
    ) -> Problem<'a> {
        let view = ConstraintView::new(model, constraints);
        let n = model.demand_count();
        let m = model.supply_count();
        let mut edges = Vec::new();
        let mut lookup = vec![NO_EDGE; n * m];
        let mut supply_edges = vec![Vec::new(); m];
        for e in model.edges() {
            if !view.available[e.supply] {
                continue;
            }
            lookup[e.demand * m + e.supply] = edges.len();
            supply_edges[e.supply].push(edges.len());
            edges.push((e.demand, e.supply));
        }
        let sign = sense.sign();
        let costs = edges.iter().map(|&(i, j)| sign * model.cost(i, j)).collect();
        let quantities = edges.iter().map(|&(i, j)| model.quantity(i, j)).collect();
        let groups = view
            .groups
            .iter()
            .map(|(index, pairs, min)| {
                let members = pairs
                    .iter()
                    .map(|&(i, j)| lookup[i * m + j])
                    .filter(|&e| e != NO_EDGE)
                    .collect();
                (*index, members, *min)
            })
            .collect();
        Problem {
            model,
            view,
            sense,
            tolerance,
            edges,
            costs,
            quantities,
            supply_edges,
            groups,
        }
    }

    /// Edge states implied by `decisions`, plus open/closed flags per supply.
    /// `None` if an edge is forced into a closed supply.
    fn states(&self, decisions: &[Decision]) -> Option<(Vec<EdgeState>, Vec<Option<bool>>)> {
        let mut states = vec![EdgeState::Free; self.edges.len()];
        let mut open = vec![None; self.model.supply_count()];
        for decision in decisions {
            match *decision {
                Decision::Edge { edge, selected } => {
                    states[edge] = if selected {
                        EdgeState::Forced
                    } else {
                        EdgeState::Forbidden
                    };
                }
                Decision::Supply { supply, open: flag } => open[supply] = Some(flag),
            }
        }
        for (supply, flag) in open.iter().enumerate() {
            if *flag != Some(false) {
                continue;
            }
            for &e in &self.supply_edges[supply] {
                if states[e] == EdgeState::Forced {
                    return None;
                }
                states[e] = EdgeState::Forbidden;
            }
        }
        Some((states, open))
    }

    /// Solves the relaxation under `decisions`, returning the node bound in
    /// minimization form.
    fn evaluate(
        &self,
        decisions: &[Decision],
        relaxation: &mut TransportRelaxation,
    ) -> Option<(f64, Relaxed)> {
        let (states, open) = self.states(decisions)?;

        for (_, members, min) in &self.groups {
            let reachable = members
                .iter()
                .filter(|&&e| states[e] != EdgeState::Forbidden)
                .count();
            if reachable < *min {
                return None;
            }
        }

        let mut supply_bounds = self.view.supply_bounds.clone();
        for (supply, bounds) in supply_bounds.iter_mut().enumerate() {
            if let Some(limit) = self.view.capacity[supply] {
                bounds.1 = bounds.1.min(self.fitting_edges(supply, limit, &states)?);
            }
        }

        let relaxed = relaxation.solve(
            &self.edges,
            &self.costs,
            &states,
            &self.view.demand_bounds,
            &supply_bounds,
            self.tolerance,
        )?;

        let mut bound = relaxed.cost;
        for (supply, flag) in open.iter().enumerate() {
            let forced = self.supply_edges[supply]
                .iter()
                .any(|&e| states[e] == EdgeState::Forced);
            if *flag == Some(true) || forced {
                bound += self.view.fixed_cost[supply];
            }
        }
        Some((bound, relaxed))
    }

    /// Upper bound on the number of edges of `supply` that fit into `limit`:
    /// all forced edges plus as many of the smallest free ones as possible.
    /// `None` if the forced edges alone exceed the limit.
    fn fitting_edges(&self, supply: usize, limit: f64, states: &[EdgeState]) -> Option<usize> {
        let mut load = 0.;
        let mut count = 0;
        let mut free = Vec::new();
        for &e in &self.supply_edges[supply] {
            match states[e] {
                EdgeState::Forced => {
                    load += self.quantities[e];
                    count += 1;
                }
                EdgeState::Free => free.push(self.quantities[e]),
                EdgeState::Forbidden => {}
            }
        }
        if load > limit + self.tolerance {
            return None;
        }
        free.sort_by(|a, b| a.total_cmp(b));
        for q in free {
            if load + q > limit + self.tolerance {
                break;
            }
            load += q;
            count += 1;
        }
        Some(count)
    }

    /// Constraint the relaxed plan violates the most, by relative excess.
    /// Capacities are looked at before groups, ties keep the first found.
    fn most_violated(&self, selected: &[usize]) -> Option<Violation> {
        let m = self.model.supply_count();
        let mut load = vec![0.; m];
        for &e in selected {
            load[self.edges[e].1] += self.quantities[e];
        }
        let capacities = (0..m).filter_map(|supply| {
            let limit = self.view.capacity[supply]?;
            if load[supply] > limit + self.tolerance {
                let degree = (load[supply] - limit) / limit.max(self.tolerance);
                Some((degree, Violation::Capacity { supply }))
            } else {
                None
            }
        });
        let groups = self
            .groups
            .iter()
            .enumerate()
            .filter_map(|(group, (_, members, min))| {
                let count = members
                    .iter()
                    .filter(|e| selected.binary_search(e).is_ok())
                    .count();
                if count < *min {
                    Some(((*min - count) as f64 / *min as f64, Violation::Group { group }))
                } else {
                    None
                }
            });
        capacities
            .chain(groups)
            .fold(None, |best: Option<(f64, Violation)>, candidate| match best {
                Some(b) if b.0 >= candidate.0 => Some(b),
                _ => Some(candidate),
            })
            .map(|(_, violation)| violation)
    }

    /// Degree bounds, capacities and group thresholds all hold for `selected`.
    fn satisfies(&self, selected: &[usize]) -> bool {
        let mut demand_degree = vec![0; self.model.demand_count()];
        let mut supply_degree = vec![0; self.model.supply_count()];
        for &e in selected {
            let (i, j) = self.edges[e];
            demand_degree[i] += 1;
            supply_degree[j] += 1;
        }
        let within = |degree: &[usize], bounds: &[(usize, usize)]| {
            degree
                .iter()
                .zip(bounds)
                .all(|(d, &(lower, upper))| lower <= *d && *d <= upper)
        };
        within(&demand_degree, &self.view.demand_bounds)
            && within(&supply_degree, &self.view.supply_bounds)
            && self.most_violated(selected).is_none()
    }

    /// Activation cost of the supplies used by `selected`, and those supplies.
    fn activation(&self, selected: &[usize]) -> (f64, Vec<usize>) {
        let mut used: Vec<usize> = selected.iter().map(|&e| self.edges[e].1).collect();
        used.sort_unstable();
        used.dedup();
        let cost = used.iter().map(|&j| self.view.fixed_cost[j]).sum();
        let activated = used.into_iter().filter(|&j| self.view.linked[j]).collect();
        (cost, activated)
    }

    /// Children of a node whose relaxed plan violates a constraint.
    fn branch_on_violation(&self, node: &Node, violation: Violation) -> Option<[Decision; 2]> {
        let (states, _) = self.states(&node.decisions)?;
        let free = |e: &usize| states[*e] == EdgeState::Free;
        match violation {
            Violation::Capacity { supply } => {
                // largest free quantity at the supply, lowest demand on ties
                let edge = node
                    .relaxed
                    .selected
                    .iter()
                    .copied()
                    .filter(|&e| self.edges[e].1 == supply)
                    .filter(free)
                    .fold(None, |best: Option<usize>, e| match best {
                        Some(b) if self.quantities[b] >= self.quantities[e] => Some(b),
                        _ => Some(e),
                    })?;
                Some([
                    Decision::Edge {
                        edge,
                        selected: false,
                    },
                    Decision::Edge {
                        edge,
                        selected: true,
                    },
                ])
            }
            Violation::Group { group } => {
                let (_, members, _) = &self.groups[group];
                let edge = members
                    .iter()
                    .copied()
                    .filter(free)
                    .find(|e| node.relaxed.selected.binary_search(e).is_err())?;
                Some([
                    Decision::Edge {
                        edge,
                        selected: true,
                    },
                    Decision::Edge {
                        edge,
                        selected: false,
                    },
                ])
            }
        }
    }

    /// Children splitting on the undecided used supply with the largest
    /// activation cost.
    fn branch_on_activation(&self, node: &Node) -> Option<[Decision; 2]> {
        let decided: Vec<usize> = node
            .decisions
            .iter()
            .filter_map(|d| match *d {
                Decision::Supply { supply, .. } => Some(supply),
                Decision::Edge { .. } => None,
            })
            .collect();
        let forced: Vec<usize> = node
            .decisions
            .iter()
            .filter_map(|d| match *d {
                Decision::Edge {
                    edge,
                    selected: true,
                } => Some(self.edges[edge].1),
                _ => None,
            })
            .collect();
        let (_, used) = self.activation(&node.relaxed.selected);
        let supply = used
            .into_iter()
            .filter(|j| !decided.contains(j) && !forced.contains(j))
            .filter(|&j| self.view.fixed_cost[j] > 0.)
            .fold(None, |best: Option<usize>, j| match best {
                Some(b) if self.view.fixed_cost[b] >= self.view.fixed_cost[j] => Some(b),
                _ => Some(j),
            })?;
        Some([
            Decision::Supply {
                supply,
                open: false,
            },
            Decision::Supply { supply, open: true },
        ])
    }

    /// Candidate solution of a plan satisfying every constraint, with its
    /// objective in minimization form.
    fn solution(&self, selected: &[usize]) -> (f64, Solution) {
        let assignment = collect_assignment(self.model, selected.iter().map(|&e| self.edges[e]));
        let (fixed, activated) = self.activation(selected);
        let objective = match self.sense {
            Sense::Minimize => assignment.total_cost() + fixed,
            Sense::Maximize => assignment.total_cost() - fixed,
        };
        let solution = Solution {
            assignment,
            objective,
            status: Status::Optimal,
            termination: Termination::Exhausted,
            bound: None,
            activated,
            wall_time: Default::default(),
        };
        (self.sense.sign() * objective, solution)
    }
}

/// Branch-and-bound solver for a [`CostModel`] under a [`ConstraintSet`].
#[derive(Debug, Clone, Default)]
pub struct BranchAndBound {
    options: SolverOptions,
    relaxation: TransportRelaxation,
    pub stats: SearchStats,
}

impl BranchAndBound {
    pub fn new(options: SolverOptions) -> Self {
        Self {
            options,
            relaxation: TransportRelaxation::new(),
            stats: SearchStats::default(),
        }
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    pub fn solve(
        &mut self,
        model: &CostModel,
        constraints: &ConstraintSet,
        sense: Sense,
    ) -> Result<Solution> {
        let deadline = Deadline::start(self.options.time_budget);
        constraints.validate(model)?;
        self.stats = SearchStats::default();
        let tolerance = self.options.tolerance;
        let problem = Problem::new(model, constraints, sense, tolerance);

        let mut seq = 0_u64;
        let mut open = BinaryHeap::new();
        let mut dive: Vec<Node> = Vec::new();
        let mut incumbent: Option<Incumbent> = None;
        let mut termination = Termination::Exhausted;

        match problem.evaluate(&[], &mut self.relaxation) {
            Some((bound, relaxed)) => open.push(Node {
                decisions: Vec::new(),
                bound,
                relaxed,
                seq,
            }),
            None => {
                return Err(AssignmentError::infeasible(
                    None,
                    "root relaxation has no feasible plan",
                ))
            }
        }

        loop {
            let node = match dive.pop().or_else(|| open.pop()) {
                Some(node) => node,
                None => break,
            };
            if deadline.expired() {
                termination = Termination::TimeoutExceeded;
                dive.push(node);
                break;
            }
            if self.stats.nodes >= self.options.max_nodes {
                termination = Termination::NodeLimit;
                dive.push(node);
                break;
            }
            self.stats.nodes += 1;

            if let Some(best) = &incumbent {
                if node.bound >= best.value - tolerance {
                    self.stats.pruned += 1;
                    continue;
                }
            }
            trace!(
                "node {}: depth {}, bound {}, selected {:?}",
                self.stats.nodes,
                node.decisions.len(),
                node.bound,
                node.relaxed.selected
            );

            let children = match problem.most_violated(&node.relaxed.selected) {
                Some(violation) => {
                    trace!("branching on {:?}", violation);
                    problem.branch_on_violation(&node, violation)
                }
                None => {
                    let (value, solution) = problem.solution(&node.relaxed.selected);
                    let improves = match &incumbent {
                        None => true,
                        Some(best) => {
                            value < best.value - tolerance
                                || (value <= best.value + tolerance
                                    && solution.assignment.precedes(&best.solution.assignment))
                        }
                    };
                    if improves {
                        debug!("incumbent {} at node {}", solution.objective, self.stats.nodes);
                        self.stats.incumbents += 1;
                        self.stats.first_incumbent.get_or_insert(self.stats.nodes);
                        incumbent = Some(Incumbent {
                            value,
                            selected: node.relaxed.selected.clone(),
                            solution,
                        });
                    }
                    if value <= node.bound + tolerance {
                        None
                    } else {
                        problem.branch_on_activation(&node)
                    }
                }
            };

            let children = match children {
                Some(children) => children,
                None => continue,
            };
            let mut evaluated = Vec::with_capacity(children.len());
            for decision in children {
                let mut decisions = node.decisions.clone();
                decisions.push(decision);
                let (bound, relaxed) = match problem.evaluate(&decisions, &mut self.relaxation) {
                    Some(result) => result,
                    None => {
                        self.stats.pruned += 1;
                        continue;
                    }
                };
                if let Some(best) = &incumbent {
                    if bound >= best.value - tolerance {
                        self.stats.pruned += 1;
                        continue;
                    }
                }
                seq += 1;
                evaluated.push(Node {
                    decisions,
                    bound,
                    relaxed,
                    seq,
                });
            }
            if open.len() >= self.options.max_open_nodes {
                // first child on top of the stack
                dive.extend(evaluated.into_iter().rev());
            } else {
                open.extend(evaluated);
            }
            self.stats.max_open = self.stats.max_open.max(open.len() + dive.len());
        }

        let wall_time = deadline.elapsed();
        let remaining = open
            .iter()
            .chain(dive.iter())
            .map(|node| node.bound)
            .fold(f64::INFINITY, f64::min);

        match (termination, incumbent) {
            (Termination::Exhausted, Some(best)) => {
                let (selected, stopped) =
                    self.smallest_optimum(&problem, best.selected, best.value, &deadline);
                let (_, mut solution) = problem.solution(&selected);
                solution.wall_time = deadline.elapsed();
                if let Some(stopped) = stopped {
                    solution.status = Status::Feasible;
                    solution.termination = stopped;
                    solution.bound = Some(sense.sign() * best.value);
                    info!(
                        "branch-and-bound stopped ({:?}) while ordering ties: objective {}",
                        stopped, solution.objective
                    );
                } else {
                    debug!(
                        "branch-and-bound: optimal {} after {} nodes ({} pruned)",
                        solution.objective, self.stats.nodes, self.stats.pruned
                    );
                }
                Ok(solution)
            }
            (Termination::Exhausted, None) => Err(AssignmentError::infeasible(
                None,
                format!(
                    "search tree exhausted after {} nodes without a feasible assignment",
                    self.stats.nodes
                ),
            )),
            (stopped, Some(best)) => {
                let mut solution = best.solution;
                let proven = remaining.min(best.value);
                solution.status = Status::Feasible;
                solution.termination = stopped;
                solution.bound = Some(sense.sign() * proven);
                solution.wall_time = wall_time;
                info!(
                    "branch-and-bound stopped ({:?}) after {} nodes: incumbent {}, bound {}",
                    stopped, self.stats.nodes, solution.objective, sense.sign() * proven
                );
                Ok(solution)
            }
            (stopped, None) => {
                info!(
                    "branch-and-bound stopped ({:?}) after {} nodes without an incumbent",
                    stopped, self.stats.nodes
                );
                let mut solution = Solution::budget_exhausted(stopped, wall_time);
                if remaining.is_finite() {
                    solution.bound = Some(sense.sign() * remaining);
                }
                Ok(solution)
            }
        }
    }

    /// Among the plans reaching the optimum `cap`, picks the one whose
    /// `(demand, supply)` list is smallest.
    ///
    /// Edges are fixed in ascending order. At each edge the plan made of the
    /// edges included so far wins outright if it reaches `cap`; otherwise the
    /// edge is included whenever some optimal plan under the fixed edges
    /// contains it. `witness` is such a plan at every step. Returns the
    /// termination reason if the budget ran out first.
    fn smallest_optimum(
        &mut self,
        problem: &Problem<'_>,
        mut witness: Vec<usize>,
        cap: f64,
        deadline: &Deadline,
    ) -> (Vec<usize>, Option<Termination>) {
        let tolerance = self.options.tolerance;
        let mut decisions = Vec::new();
        let mut prefix: Vec<usize> = Vec::new();
        for edge in 0..problem.edges.len() {
            if witness.last().map_or(true, |&last| last < edge) {
                break;
            }
            if problem.satisfies(&prefix) && problem.solution(&prefix).0 <= cap + tolerance {
                trace!("ties: prefix {:?} is optimal", prefix);
                witness = prefix;
                break;
            }
            let selected = if witness.binary_search(&edge).is_ok() {
                true
            } else {
                let mut trial = decisions.clone();
                trial.push(Decision::Edge {
                    edge,
                    selected: true,
                });
                match self.find_within(problem, trial, cap, deadline) {
                    Lookup::Found(plan) => {
                        witness = plan;
                        true
                    }
                    Lookup::Missing => false,
                    Lookup::Stopped(termination) => return (witness, Some(termination)),
                }
            };
            decisions.push(Decision::Edge { edge, selected });
            if selected {
                prefix.push(edge);
            }
        }
        (witness, None)
    }

    /// Depth-first search for any plan satisfying every constraint under
    /// `decisions` whose value (minimization form) is at most `cap`.
    fn find_within(
        &mut self,
        problem: &Problem<'_>,
        decisions: Vec<Decision>,
        cap: f64,
        deadline: &Deadline,
    ) -> Lookup {
        let tolerance = self.options.tolerance;
        let mut stack = Vec::new();
        match problem.evaluate(&decisions, &mut self.relaxation) {
            Some((bound, relaxed)) if bound <= cap + tolerance => stack.push(Node {
                decisions,
                bound,
                relaxed,
                seq: 0,
            }),
            _ => self.stats.pruned += 1,
        }

        while let Some(node) = stack.pop() {
            if deadline.expired() {
                return Lookup::Stopped(Termination::TimeoutExceeded);
            }
            if self.stats.nodes >= self.options.max_nodes {
                return Lookup::Stopped(Termination::NodeLimit);
            }
            self.stats.nodes += 1;

            let children = match problem.most_violated(&node.relaxed.selected) {
                Some(violation) => problem.branch_on_violation(&node, violation),
                None => {
                    let (value, _) = problem.solution(&node.relaxed.selected);
                    if value <= cap + tolerance {
                        return Lookup::Found(node.relaxed.selected);
                    }
                    if value <= node.bound + tolerance {
                        None
                    } else {
                        problem.branch_on_activation(&node)
                    }
                }
            };
            let children = match children {
                Some(children) => children,
                None => {
                    self.stats.pruned += 1;
                    continue;
                }
            };
            // first child on top of the stack
            for decision in children.into_iter().rev() {
                let mut decisions = node.decisions.clone();
                decisions.push(decision);
                match problem.evaluate(&decisions, &mut self.relaxation) {
                    Some((bound, relaxed)) if bound <= cap + tolerance => stack.push(Node {
                        decisions,
                        bound,
                        relaxed,
                        seq: 0,
                    }),
                    _ => self.stats.pruned += 1,
                }
            }
            self.stats.max_open = self.stats.max_open.max(stack.len());
        }
        Lookup::Missing
    }
}
