//! Transportation bound used by the branch-and-bound.
//!
//! Degree bounds become capacities of source and sink arcs, each usable edge a
//! unit arc. Lower bounds (degree minimums and edges forced into the
//! assignment) are modelled as separate arcs carrying a unit penalty, and path
//! lengths are compared lexicographically as `(penalty, cost)`. Successive
//! shortest augmenting paths therefore first saturate as many mandatory arcs as
//! possible and then minimize cost; the network is feasible iff every mandatory
//! arc ends up saturated.

use std::ops::{Add, Neg, Sub};
use tracing::trace;

/// Lexicographic arc length.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
struct Length {
    penalty: i64,
    cost: f64,
}

impl Length {
    const ZERO: Length = Length {
        penalty: 0,
        cost: 0.,
    };

    fn cost(cost: f64) -> Length {
        Length { penalty: 0, cost }
    }

    fn mandatory(cost: f64) -> Length {
        Length { penalty: -1, cost }
    }
}

impl Add for Length {
    type Output = Length;
    fn add(self, rhs: Length) -> Length {
        Length {
            penalty: self.penalty + rhs.penalty,
            cost: self.cost + rhs.cost,
        }
    }
}

impl Sub for Length {
    type Output = Length;
    fn sub(self, rhs: Length) -> Length {
        self + (-rhs)
    }
}

impl Neg for Length {
    type Output = Length;
    fn neg(self) -> Length {
        Length {
            penalty: -self.penalty,
            cost: -self.cost,
        }
    }
}

#[derive(Debug, Clone)]
struct Arc {
    to: usize,
    residual: i64,
    capacity: i64,
    length: Length,
    // model edge carried by the arc, usize::MAX for source and sink arcs
    edge: usize,
}

/// State of one model edge at a search node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EdgeState {
    Free,
    Forced,
    Forbidden,
}

/// Optimal transportation plan.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Relaxed {
    /// selected edge indices, ascending
    pub selected: Vec<usize>,
    /// sum of the selected edge costs
    pub cost: f64,
}

/// Reusable successive shortest path solver.
#[derive(Debug, Clone, Default)]
pub(crate) struct TransportRelaxation {
    arcs: Vec<Arc>,
    adjacency: Vec<Vec<usize>>,
    potential: Vec<Length>,
    dist: Vec<Option<Length>>,
    prev_arc: Vec<usize>,
    done: Vec<bool>,
    pub augmentations: u32,
}

impl TransportRelaxation {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn add_arc(&mut self, from: usize, to: usize, capacity: i64, length: Length, edge: usize) {
        if capacity <= 0 {
            return;
        }
        self.adjacency[from].push(self.arcs.len());
        self.arcs.push(Arc {
            to,
            residual: capacity,
            capacity,
            length,
            edge,
        });
        self.adjacency[to].push(self.arcs.len());
        self.arcs.push(Arc {
            to: from,
            residual: 0,
            capacity: 0,
            length: -length,
            edge,
        });
    }

    /// Adds the pair of source (or sink) arcs of one node: a mandatory arc of
    /// capacity `lower` and a free arc for the rest up to `upper`.
    fn add_bounded(&mut self, from: usize, to: usize, lower: usize, upper: usize) {
        self.add_arc(from, to, lower as i64, Length::mandatory(0.), usize::MAX);
        if upper > lower {
            self.add_arc(from, to, (upper - lower) as i64, Length::ZERO, usize::MAX);
        }
    }

    /// Solves the transportation problem.
    ///
    /// `edges[e] = (demand, supply)`, `costs[e]` is its cost in minimization
    /// form. Degree bounds are `(lower, upper)` per node. Returns `None` if the
    /// bounds and forced edges can't be met together.
    pub(crate) fn solve(
        &mut self,
        edges: &[(usize, usize)],
        costs: &[f64],
        states: &[EdgeState],
        demand_bounds: &[(usize, usize)],
        supply_bounds: &[(usize, usize)],
        tolerance: f64,
    ) -> Option<Relaxed> {
        let n = demand_bounds.len();
        let m = supply_bounds.len();
        let source = 0;
        let sink = n + m + 1;
        let num_nodes = n + m + 2;

        self.arcs.clear();
        self.adjacency.iter_mut().for_each(|a| a.clear());
        self.adjacency.resize_with(num_nodes, Vec::new);
        self.augmentations = 0;

        let mut required = 0_i64;
        for (i, &(lower, upper)) in demand_bounds.iter().enumerate() {
            if lower > upper {
                return None;
            }
            required += lower as i64;
            self.add_bounded(source, 1 + i, lower, upper);
        }
        for (e, (&(i, j), &state)) in edges.iter().zip(states).enumerate() {
            match state {
                EdgeState::Free => self.add_arc(1 + i, 1 + n + j, 1, Length::cost(costs[e]), e),
                EdgeState::Forced => {
                    required += 1;
                    self.add_arc(1 + i, 1 + n + j, 1, Length::mandatory(costs[e]), e)
                }
                EdgeState::Forbidden => {}
            }
        }
        for (j, &(lower, upper)) in supply_bounds.iter().enumerate() {
            if lower > upper {
                return None;
            }
            required += lower as i64;
            self.add_bounded(1 + n + j, sink, lower, upper);
        }

        self.init_potentials(num_nodes, source);

        loop {
            if !self.shortest_paths(num_nodes, source) {
                break;
            }
            let reduced = match self.dist[sink] {
                Some(d) => d,
                None => break,
            };
            let length = reduced + self.potential[sink] - self.potential[source];
            let improving = length.penalty < 0 || (length.penalty == 0 && length.cost < -tolerance);
            for v in 0..num_nodes {
                if let Some(d) = self.dist[v] {
                    self.potential[v] = self.potential[v] + d;
                }
            }
            if !improving {
                break;
            }
            self.augment(source, sink);
        }

        let mut penalty = 0_i64;
        let mut cost = 0.;
        let mut selected = Vec::new();
        for arc in self.arcs.iter().step_by(2) {
            let flow = arc.capacity - arc.residual;
            penalty += flow * arc.length.penalty;
            if arc.edge != usize::MAX && flow > 0 {
                selected.push(arc.edge);
                cost += costs[arc.edge];
            }
        }
        trace!(
            "relaxation: {} augmentations, penalty {}, required {}, cost {}",
            self.augmentations,
            penalty,
            required,
            cost
        );
        if -penalty != required {
            return None;
        }
        selected.sort_unstable();
        Some(Relaxed { selected, cost })
    }

    /// Bellman-Ford from the source; the initial network is acyclic but holds
    /// negative lengths.
    fn init_potentials(&mut self, num_nodes: usize, source: usize) {
        self.dist.clear();
        self.dist.resize(num_nodes, None);
        self.dist[source] = Some(Length::ZERO);
        for _ in 0..num_nodes {
            let mut changed = false;
            for u in 0..num_nodes {
                let du = match self.dist[u] {
                    Some(d) => d,
                    None => continue,
                };
                for &a in &self.adjacency[u] {
                    let arc = &self.arcs[a];
                    if arc.residual == 0 {
                        continue;
                    }
                    let candidate = du + arc.length;
                    if self.dist[arc.to].map_or(true, |d| candidate < d) {
                        self.dist[arc.to] = Some(candidate);
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }
        self.potential.clear();
        self.potential
            .extend(self.dist.iter().map(|d| d.unwrap_or(Length::ZERO)));
    }

    /// Dense Dijkstra on reduced lengths. Settles the unvisited node of
    /// smallest distance, lowest index first. Returns false when the sink is
    /// out of reach.
    fn shortest_paths(&mut self, num_nodes: usize, source: usize) -> bool {
        self.dist.clear();
        self.dist.resize(num_nodes, None);
        self.prev_arc.clear();
        self.prev_arc.resize(num_nodes, usize::MAX);
        self.done.clear();
        self.done.resize(num_nodes, false);
        self.dist[source] = Some(Length::ZERO);

        loop {
            let mut next: Option<(usize, Length)> = None;
            for v in 0..num_nodes {
                if self.done[v] {
                    continue;
                }
                if let Some(d) = self.dist[v] {
                    if next.map_or(true, |(_, best)| d < best) {
                        next = Some((v, d));
                    }
                }
            }
            let (u, du) = match next {
                Some(found) => found,
                None => break,
            };
            self.done[u] = true;
            for &a in &self.adjacency[u] {
                let arc = &self.arcs[a];
                if arc.residual == 0 || self.done[arc.to] {
                    continue;
                }
                let reduced = arc.length + self.potential[u] - self.potential[arc.to];
                let candidate = du + reduced;
                if self.dist[arc.to].map_or(true, |d| candidate < d) {
                    self.dist[arc.to] = Some(candidate);
                    self.prev_arc[arc.to] = a;
                }
            }
        }
        self.dist[num_nodes - 1].is_some()
    }

    fn augment(&mut self, source: usize, sink: usize) {
        let mut bottleneck = i64::MAX;
        let mut v = sink;
        while v != source {
            let a = self.prev_arc[v];
            bottleneck = bottleneck.min(self.arcs[a].residual);
            v = self.arcs[a ^ 1].to;
        }
        let mut v = sink;
        while v != source {
            let a = self.prev_arc[v];
            self.arcs[a].residual -= bottleneck;
            self.arcs[a ^ 1].residual += bottleneck;
            v = self.arcs[a ^ 1].to;
        }
        self.augmentations += 1;
    }
}
