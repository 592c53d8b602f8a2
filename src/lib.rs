//! Assignment of demands (jobs, customers) to supplies (workers, trucks).
//!
//! [`HungarianSolver`] finds an optimal one-to-one matching of a square
//! [`CostModel`]. [`BranchAndBound`] handles the variants expressed through a
//! [`ConstraintSet`]: degree bounds, minimum coverage of edge groups, supply
//! capacities and activation costs. [`BenchmarkHarness`] runs both on the same
//! scenario and cross-validates them.
//!
//! ```
//! use constrained_assignment::{BranchAndBound, ConstraintSet, CostModel, Sense};
//!
//! let model = CostModel::new(vec![vec![4., 1.], vec![2., 3.]])?;
//! let constraints = ConstraintSet::one_to_one(&model);
//! let solution = BranchAndBound::default().solve(&model, &constraints, Sense::Minimize)?;
//! assert_eq!(solution.objective, 3.);
//! assert_eq!(solution.to_string(), "3\n0,1,1\n1,0,2\n");
//! # Ok::<(), constrained_assignment::AssignmentError>(())
//! ```

pub mod bnb;
pub mod constraints;
pub mod error;
pub mod harness;
pub mod hungarian;
pub mod model;
mod relaxation;
pub mod solution;
pub mod solver;

pub use crate::bnb::{BranchAndBound, SearchStats};
pub use crate::constraints::{Constraint, ConstraintSet, Entity, Relation, Side};
pub use crate::error::AssignmentError;
pub use crate::harness::{BenchmarkHarness, BenchmarkRecord, Comparison, PeriodReport, Scenario};
pub use crate::hungarian::HungarianSolver;
pub use crate::model::{CostModel, CostModelBuilder, Edge};
pub use crate::solution::{AssignedEdge, Assignment, Solution, Status, Termination, UnsignedInt};
pub use crate::solver::{Sense, SolverOptions};
