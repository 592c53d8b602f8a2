use thiserror::Error;

/// Errors raised while building a model, declaring constraints or solving.
///
/// Running out of time budget is not an error: it is reported through
/// [`crate::solution::Termination`] on the returned solution.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AssignmentError {
    /// Malformed matrix dimensions.
    #[error("shape error: {0}")]
    Shape(String),

    /// A cost or quantity that the model can't accept.
    #[error("invalid edge ({demand}, {supply}): {reason}")]
    InvalidEdge {
        demand: usize,
        supply: usize,
        reason: String,
    },

    /// A constraint referencing a missing entity or carrying a bad bound.
    #[error("invalid constraint: {0}")]
    InvalidConstraint(String),

    /// No feasible solution exists.
    ///
    /// `constraint` is the index in the [`crate::constraints::ConstraintSet`]
    /// of the constraint proven unsatisfiable, when a single one is to blame.
    #[error("infeasible{}: {reason}", constraint_label(.constraint))]
    Infeasible {
        constraint: Option<usize>,
        reason: String,
    },
}

fn constraint_label(constraint: &Option<usize>) -> String {
    match constraint {
        Some(index) => format!(" (constraint #{})", index),
        None => String::new(),
    }
}

impl AssignmentError {
    pub(crate) fn shape(reason: impl Into<String>) -> Self {
        AssignmentError::Shape(reason.into())
    }

    pub(crate) fn invalid_edge(demand: usize, supply: usize, reason: impl Into<String>) -> Self {
        AssignmentError::InvalidEdge {
            demand,
            supply,
            reason: reason.into(),
        }
    }

    pub(crate) fn infeasible(constraint: Option<usize>, reason: impl Into<String>) -> Self {
        AssignmentError::Infeasible {
            constraint,
            reason: reason.into(),
        }
    }

    /// Returns `true` for [`AssignmentError::Infeasible`].
    pub fn is_infeasible(&self) -> bool {
        matches!(self, AssignmentError::Infeasible { .. })
    }
}

pub type Result<T> = std::result::Result<T, AssignmentError>;
