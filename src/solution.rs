use num_traits::{AsPrimitive, FromPrimitive, NumAssign, PrimInt, Unsigned};
use std::fmt::{self, Debug, Display};
use std::time::Duration;

pub trait UnsignedInt:
    PrimInt
    + Unsigned
    + Display
    + Debug
    + AsPrimitive<usize>
    + AsPrimitive<f64>
    + FromPrimitive
    + NumAssign
{
}

impl<I> UnsignedInt for I where
    I: PrimInt
        + Unsigned
        + Display
        + Debug
        + AsPrimitive<usize>
        + AsPrimitive<f64>
        + FromPrimitive
        + NumAssign
{
}

/// Outcome class of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Status {
    /// The search proved the objective optimal.
    Optimal,
    /// A feasible assignment was found but the search stopped before proving
    /// optimality. Not a proof of anything beyond feasibility.
    Feasible,
    /// No feasible assignment was found before the budget ran out.
    ///
    /// Unlike [`crate::AssignmentError::Infeasible`] this proves nothing about
    /// the instance.
    Infeasible,
}

/// Why the solver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Termination {
    /// The algorithm ran to completion.
    Exhausted,
    /// The time budget elapsed.
    TimeoutExceeded,
    /// The node limit was reached.
    NodeLimit,
}

/// One selected edge of an assignment.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AssignedEdge {
    pub demand: usize,
    pub supply: usize,
    pub quantity: f64,
    pub cost: f64,
}

///
/// Selected edges, sorted by demand then supply index.
///
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Assignment {
    edges: Vec<AssignedEdge>,
}

impl Assignment {
    pub fn new(mut edges: Vec<AssignedEdge>) -> Assignment {
        edges.sort_by_key(|e| (e.demand, e.supply));
        Assignment { edges }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn edges(&self) -> impl Iterator<Item = &AssignedEdge> + '_ {
        self.edges.iter()
    }

    pub fn as_slice(&self) -> &[AssignedEdge] {
        &self.edges
    }

    /// Supplies serving `demand`, in ascending order.
    pub fn supplies_of(&self, demand: usize) -> impl Iterator<Item = usize> + '_ {
        self.edges
            .iter()
            .filter(move |e| e.demand == demand)
            .map(|e| e.supply)
    }

    /// Demands served by `supply`, in ascending order.
    pub fn demands_of(&self, supply: usize) -> impl Iterator<Item = usize> + '_ {
        self.edges
            .iter()
            .filter(move |e| e.supply == supply)
            .map(|e| e.demand)
    }

    /// Sum of quantities assigned to `supply`.
    pub fn load(&self, supply: usize) -> f64 {
        self.edges
            .iter()
            .filter(|e| e.supply == supply)
            .map(|e| e.quantity)
            .sum()
    }

    /// Sum of the selected edge costs.
    pub fn total_cost(&self) -> f64 {
        self.edges.iter().map(|e| e.cost).sum()
    }

    pub fn contains(&self, demand: usize, supply: usize) -> bool {
        self.edges
            .binary_search_by_key(&(demand, supply), |e| (e.demand, e.supply))
            .is_ok()
    }

    /// Returns true if no demand and no supply appears twice.
    pub fn is_injective(&self) -> bool {
        let mut demands: Vec<usize> = self.edges.iter().map(|e| e.demand).collect();
        let mut supplies: Vec<usize> = self.edges.iter().map(|e| e.supply).collect();
        demands.dedup();
        supplies.sort_unstable();
        supplies.dedup();
        demands.len() == self.edges.len() && supplies.len() == self.edges.len()
    }

    /// Lexicographic order on `(demand, supply)` pairs, used to break ties
    /// between assignments of equal objective.
    pub(crate) fn precedes(&self, other: &Assignment) -> bool {
        let lhs = self.edges.iter().map(|e| (e.demand, e.supply));
        let rhs = other.edges.iter().map(|e| (e.demand, e.supply));
        lhs.lt(rhs)
    }
}

///
/// Solution of an assignment problem
///
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Solution {
    pub assignment: Assignment,
    /// objective in the sense the problem was solved with, activation terms
    /// included; NaN when the budget ran out before any assignment was found
    /// ([`Status::Infeasible`])
    pub objective: f64,
    pub status: Status,
    pub termination: Termination,
    /// best proven bound on the objective when the search stopped early
    pub bound: Option<f64>,
    /// supplies with at least one selected edge that carry an activation link
    pub activated: Vec<usize>,
    pub wall_time: Duration,
}

impl Solution {
    /// Lazy sequence of `(demand, supply, quantity, cost)` per selected edge.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize, f64, f64)> + '_ {
        self.assignment
            .edges()
            .map(|e| (e.demand, e.supply, e.quantity, e.cost))
    }

    /// Same assignment, objective bits and status, wall time ignored.
    pub fn same_outcome(&self, other: &Solution) -> bool {
        self.assignment == other.assignment
            && self.objective.to_bits() == other.objective.to_bits()
            && self.status == other.status
            && self.activated == other.activated
    }

    pub(crate) fn budget_exhausted(termination: Termination, wall_time: Duration) -> Solution {
        Solution {
            assignment: Assignment::default(),
            objective: f64::NAN,
            status: Status::Infeasible,
            termination,
            bound: None,
            activated: Vec::new(),
            wall_time,
        }
    }
}

/// Exchange format: objective on the first line, then one
/// `demand,supply,cost` line per selected edge.
impl Display for Solution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.objective)?;
        for e in self.assignment.edges() {
            writeln!(f, "{},{},{}", e.demand, e.supply, e.cost)?;
        }
        Ok(())
    }
}
