//! Declarative constraints over a [`CostModel`].
//!
//! A [`ConstraintSet`] is plain data: entries are checked against the model's
//! dimensions when added and statically screened by
//! [`ConstraintSet::validate`], but only the branch-and-bound solver evaluates
//! them.

use crate::error::{AssignmentError, Result};
use crate::model::CostModel;
use std::collections::BTreeSet;

/// Side of the bipartite graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Side {
    Demand,
    Supply,
}

/// A demand or supply node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Entity {
    Demand(usize),
    Supply(usize),
}

impl Entity {
    pub fn side(self) -> Side {
        match self {
            Entity::Demand(_) => Side::Demand,
            Entity::Supply(_) => Side::Supply,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Entity::Demand(i) | Entity::Supply(i) => i,
        }
    }
}

/// Bound on the number of selected edges incident to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Relation {
    AtMost(usize),
    Exactly(usize),
    AtLeast(usize),
}

impl Relation {
    /// `(lower, upper)` degree bounds; `upper` is `None` when unbounded.
    pub fn bounds(self) -> (usize, Option<usize>) {
        match self {
            Relation::AtMost(k) => (0, Some(k)),
            Relation::Exactly(k) => (k, Some(k)),
            Relation::AtLeast(k) => (k, None),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Constraint {
    Degree {
        entity: Entity,
        relation: Relation,
    },
    /// At least `min` of `pairs` must be selected.
    GroupThreshold {
        name: String,
        pairs: Vec<(usize, usize)>,
        min: usize,
    },
    /// Sum of assigned quantities at `supply` is at most `limit`.
    Capacity { supply: usize, limit: f64 },
    /// Edges of `supply` are usable only if `available`; using any of them
    /// incurs `fixed_cost` once.
    ActivationLink {
        supply: usize,
        available: bool,
        fixed_cost: f64,
    },
}

impl Constraint {
    pub fn degree(entity: Entity, relation: Relation) -> Constraint {
        Constraint::Degree { entity, relation }
    }

    pub fn group(name: impl Into<String>, pairs: Vec<(usize, usize)>, min: usize) -> Constraint {
        Constraint::GroupThreshold {
            name: name.into(),
            pairs,
            min,
        }
    }

    pub fn capacity(supply: usize, limit: f64) -> Constraint {
        Constraint::Capacity { supply, limit }
    }

    pub fn activation(supply: usize, fixed_cost: f64) -> Constraint {
        Constraint::ActivationLink {
            supply,
            available: true,
            fixed_cost,
        }
    }

    pub fn disabled(supply: usize) -> Constraint {
        Constraint::ActivationLink {
            supply,
            available: false,
            fixed_cost: 0.,
        }
    }
}

/// Ordered set of constraints declared against one model's dimensions.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConstraintSet {
    num_demands: usize,
    num_supplies: usize,
    constraints: Vec<Constraint>,
}

impl ConstraintSet {
    pub fn for_model(model: &CostModel) -> ConstraintSet {
        ConstraintSet {
            num_demands: model.demand_count(),
            num_supplies: model.supply_count(),
            constraints: Vec::new(),
        }
    }

    /// Degree(=1) on every demand and every supply.
    pub fn one_to_one(model: &CostModel) -> ConstraintSet {
        let mut set = ConstraintSet::for_model(model);
        set.degree_all(Side::Demand, Relation::Exactly(1));
        set.degree_all(Side::Supply, Relation::Exactly(1));
        set
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constraint> + '_ {
        self.constraints.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Constraint> {
        self.constraints.get(index)
    }

    pub fn demand_count(&self) -> usize {
        self.num_demands
    }

    pub fn supply_count(&self) -> usize {
        self.num_supplies
    }

    /// Adds a constraint and returns its index.
    pub fn add(&mut self, constraint: Constraint) -> Result<usize> {
        let constraint = self.checked(constraint)?;
        self.constraints.push(constraint);
        Ok(self.constraints.len() - 1)
    }

    /// Adds the same degree relation for every entity of `side`.
    pub fn degree_all(&mut self, side: Side, relation: Relation) -> &mut Self {
        let (count, entity): (usize, fn(usize) -> Entity) = match side {
            Side::Demand => (self.num_demands, Entity::Demand),
            Side::Supply => (self.num_supplies, Entity::Supply),
        };
        self.constraints
            .extend((0..count).map(|k| Constraint::degree(entity(k), relation)));
        self
    }

    /// Splits the diagonal into blocks of `block_size` demands by
    /// `block_size` supplies and requires `min` selected edges in each block.
    /// The last block is truncated to the model.
    pub fn block_groups(&mut self, block_size: usize, min: usize) -> Result<Vec<usize>> {
        if block_size == 0 {
            return Err(AssignmentError::InvalidConstraint(
                "block size must be positive".to_string(),
            ));
        }
        let span = self.num_demands.min(self.num_supplies);
        let mut indices = Vec::new();
        for start in (0..span).step_by(block_size) {
            let stop = (start + block_size).min(span);
            let pairs = (start..stop)
                .flat_map(|i| (start..stop).map(move |j| (i, j)))
                .collect();
            indices.push(self.add(Constraint::group(
                format!("block {}..{}", start, stop),
                pairs,
                min,
            ))?);
        }
        Ok(indices)
    }

    pub fn capacity_all(&mut self, limit: f64) -> Result<&mut Self> {
        for supply in 0..self.num_supplies {
            self.add(Constraint::capacity(supply, limit))?;
        }
        Ok(self)
    }

    pub fn activation_all(&mut self, fixed_cost: f64) -> Result<&mut Self> {
        for supply in 0..self.num_supplies {
            self.add(Constraint::activation(supply, fixed_cost))?;
        }
        Ok(self)
    }

    fn checked(&self, constraint: Constraint) -> Result<Constraint> {
        let check_supply = |supply: usize| {
            if supply < self.num_supplies {
                Ok(())
            } else {
                Err(AssignmentError::InvalidConstraint(format!(
                    "supply {} out of range 0..{}",
                    supply, self.num_supplies
                )))
            }
        };
        match constraint {
            Constraint::Degree { entity, .. } => {
                let limit = match entity.side() {
                    Side::Demand => self.num_demands,
                    Side::Supply => self.num_supplies,
                };
                if entity.index() >= limit {
                    return Err(AssignmentError::InvalidConstraint(format!(
                        "{:?} out of range 0..{}",
                        entity, limit
                    )));
                }
                Ok(constraint)
            }
            Constraint::GroupThreshold { name, pairs, min } => {
                if let Some((i, j)) = pairs
                    .iter()
                    .find(|(i, j)| *i >= self.num_demands || *j >= self.num_supplies)
                {
                    return Err(AssignmentError::InvalidConstraint(format!(
                        "group {:?} references edge ({}, {}) outside the model",
                        name, i, j
                    )));
                }
                let pairs: Vec<(usize, usize)> =
                    pairs.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
                Ok(Constraint::GroupThreshold { name, pairs, min })
            }
            Constraint::Capacity { supply, limit } => {
                check_supply(supply)?;
                if !limit.is_finite() || limit < 0. {
                    return Err(AssignmentError::InvalidConstraint(format!(
                        "capacity {} of supply {} must be finite and non-negative",
                        limit, supply
                    )));
                }
                Ok(constraint)
            }
            Constraint::ActivationLink {
                supply, fixed_cost, ..
            } => {
                check_supply(supply)?;
                if !fixed_cost.is_finite() || fixed_cost < 0. {
                    return Err(AssignmentError::InvalidConstraint(format!(
                        "activation cost {} of supply {} must be finite and non-negative",
                        fixed_cost, supply
                    )));
                }
                let duplicate = self.constraints.iter().any(|c| {
                    matches!(c, Constraint::ActivationLink { supply: s, .. } if *s == supply)
                });
                if duplicate {
                    return Err(AssignmentError::InvalidConstraint(format!(
                        "supply {} already has an activation link",
                        supply
                    )));
                }
                Ok(constraint)
            }
        }
    }

    /// Screens for constraints that no assignment can satisfy.
    ///
    /// Fails with [`AssignmentError::Infeasible`] naming the first offending
    /// constraint.
    pub fn validate(&self, model: &CostModel) -> Result<()> {
        if model.demand_count() != self.num_demands || model.supply_count() != self.num_supplies {
            return Err(AssignmentError::shape(format!(
                "constraints were declared for a {}x{} model, got {}x{}",
                self.num_demands,
                self.num_supplies,
                model.demand_count(),
                model.supply_count()
            )));
        }
        let view = ConstraintView::new(model, self);

        for (index, constraint) in self.constraints.iter().enumerate() {
            match constraint {
                Constraint::Degree { entity, relation } => {
                    let (lower, _) = relation.bounds();
                    let usable = match *entity {
                        Entity::Demand(i) => (0..self.num_supplies)
                            .filter(|&j| view.usable(model, i, j))
                            .count(),
                        Entity::Supply(j) => (0..self.num_demands)
                            .filter(|&i| view.usable(model, i, j))
                            .count(),
                    };
                    if lower > usable {
                        return Err(AssignmentError::infeasible(
                            Some(index),
                            format!(
                                "{:?} needs {} edges but only {} are usable",
                                entity, lower, usable
                            ),
                        ));
                    }
                    let bounds = match *entity {
                        Entity::Demand(i) => view.demand_bounds[i],
                        Entity::Supply(j) => view.supply_bounds[j],
                    };
                    if bounds.0 > bounds.1 {
                        return Err(AssignmentError::infeasible(
                            Some(index),
                            format!(
                                "{:?} has conflicting degree bounds {}..={}",
                                entity, bounds.0, bounds.1
                            ),
                        ));
                    }
                }
                Constraint::GroupThreshold { name, pairs, min } => {
                    let edges = pairs
                        .iter()
                        .filter(|(i, j)| view.usable(model, *i, *j))
                        .count();
                    if *min > edges {
                        return Err(AssignmentError::infeasible(
                            Some(index),
                            format!(
                                "group {:?} requires {} edges but has only {} feasible ones",
                                name, min, edges
                            ),
                        ));
                    }
                }
                Constraint::Capacity { .. } | Constraint::ActivationLink { .. } => {}
            }
        }
        Ok(())
    }
}

/// Per-entity aggregation of a [`ConstraintSet`] shared by validation and
/// the solvers.
#[derive(Debug, Clone)]
pub(crate) struct ConstraintView {
    /// intersected `(lower, upper)` degree bounds, upper clipped to the
    /// entity's feasible edge count
    pub demand_bounds: Vec<(usize, usize)>,
    pub supply_bounds: Vec<(usize, usize)>,
    /// tightest capacity per supply
    pub capacity: Vec<Option<f64>>,
    pub available: Vec<bool>,
    pub fixed_cost: Vec<f64>,
    /// supply carries an activation link
    pub linked: Vec<bool>,
    /// `(constraint index, pairs, min)` for every group
    pub groups: Vec<(usize, Vec<(usize, usize)>, usize)>,
}

impl ConstraintView {
    pub(crate) fn new(model: &CostModel, set: &ConstraintSet) -> ConstraintView {
        let n = model.demand_count();
        let m = model.supply_count();
        let mut demand_bounds: Vec<(usize, usize)> =
            (0..n).map(|i| (0, model.demand_edges(i).count())).collect();
        let mut supply_bounds: Vec<(usize, usize)> =
            (0..m).map(|j| (0, model.supply_edges(j).count())).collect();
        let mut capacity = vec![None; m];
        let mut available = vec![true; m];
        let mut fixed_cost = vec![0.; m];
        let mut linked = vec![false; m];
        let mut groups = Vec::new();

        for (index, constraint) in set.iter().enumerate() {
            match constraint {
                Constraint::Degree { entity, relation } => {
                    let (lower, upper) = relation.bounds();
                    let bounds = match *entity {
                        Entity::Demand(i) => &mut demand_bounds[i],
                        Entity::Supply(j) => &mut supply_bounds[j],
                    };
                    bounds.0 = bounds.0.max(lower);
                    if let Some(upper) = upper {
                        bounds.1 = bounds.1.min(upper);
                    }
                }
                Constraint::GroupThreshold { pairs, min, .. } => {
                    groups.push((index, pairs.clone(), *min));
                }
                Constraint::Capacity { supply, limit } => {
                    let current = capacity[*supply].get_or_insert(*limit);
                    *current = current.min(*limit);
                }
                Constraint::ActivationLink {
                    supply,
                    available: usable,
                    fixed_cost: cost,
                } => {
                    available[*supply] = *usable;
                    fixed_cost[*supply] = *cost;
                    linked[*supply] = true;
                }
            }
        }

        ConstraintView {
            demand_bounds,
            supply_bounds,
            capacity,
            available,
            fixed_cost,
            linked,
            groups,
        }
    }

    /// Edge is feasible in the model and its supply isn't disabled.
    #[inline]
    pub(crate) fn usable(&self, model: &CostModel, demand: usize, supply: usize) -> bool {
        self.available[supply] && model.feasible(demand, supply)
    }
}

#[cfg(test)]
mod tests {
    use super::{Constraint, ConstraintSet, Entity, Relation, Side};
    use crate::error::AssignmentError;
    use crate::model::CostModel;

    fn model(n: usize, m: usize) -> CostModel {
        CostModel::new(vec![vec![1.; m]; n]).unwrap()
    }

    #[test]
    fn test_add_checks_indices_and_bounds() {
        let model = model(2, 3);
        let mut set = ConstraintSet::for_model(&model);
        assert_eq!(
            set.add(Constraint::degree(Entity::Supply(2), Relation::AtMost(1))),
            Ok(0)
        );
        assert!(matches!(
            set.add(Constraint::degree(Entity::Demand(2), Relation::AtMost(1))),
            Err(AssignmentError::InvalidConstraint(_))
        ));
        assert!(set.add(Constraint::capacity(0, -1.)).is_err());
        assert!(set.add(Constraint::capacity(3, 1.)).is_err());
        assert!(set.add(Constraint::group("g", vec![(0, 3)], 1)).is_err());
        assert!(set.add(Constraint::activation(1, 5.)).is_ok());
        assert!(set.add(Constraint::disabled(1)).is_err());
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_group_pairs_are_deduplicated() {
        let model = model(2, 2);
        let mut set = ConstraintSet::for_model(&model);
        let idx = set
            .add(Constraint::group("g", vec![(1, 1), (0, 0), (1, 1)], 1))
            .unwrap();
        match set.get(idx) {
            Some(Constraint::GroupThreshold { pairs, .. }) => assert_eq!(pairs, &[(0, 0), (1, 1)]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_block_groups_partition_the_diagonal() {
        let model = model(10, 10);
        let mut set = ConstraintSet::for_model(&model);
        let blocks = set.block_groups(5, 2).unwrap();
        assert_eq!(blocks, [0, 1]);
        match set.get(1) {
            Some(Constraint::GroupThreshold { pairs, min, .. }) => {
                assert_eq!(pairs.len(), 25);
                assert_eq!(pairs[0], (5, 5));
                assert_eq!(*min, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(set.validate(&model).is_ok());
    }

    #[test]
    fn test_validate_rejects_oversized_group() {
        let model = model(10, 10);
        let mut set = ConstraintSet::for_model(&model);
        set.block_groups(5, 2).unwrap();
        set.add(Constraint::group("too many", (0..5).map(|i| (i, i)).collect(), 6))
            .unwrap();
        match set.validate(&model) {
            Err(AssignmentError::Infeasible { constraint, .. }) => assert_eq!(constraint, Some(2)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_validate_degree_conflicts() {
        let model = CostModel::with_mask(
            vec![vec![1., 1.], vec![1., 1.]],
            vec![vec![true, false], vec![true, false]],
        )
        .unwrap();
        let mut set = ConstraintSet::for_model(&model);
        set.degree_all(Side::Supply, Relation::AtLeast(1));
        // supply 1 has no feasible edge
        match set.validate(&model) {
            Err(AssignmentError::Infeasible { constraint, .. }) => assert_eq!(constraint, Some(1)),
            other => panic!("unexpected {:?}", other),
        }

        let model = model_full();
        let mut set = ConstraintSet::for_model(&model);
        set.add(Constraint::degree(Entity::Demand(0), Relation::AtLeast(2)))
            .unwrap();
        set.add(Constraint::degree(Entity::Demand(0), Relation::AtMost(1)))
            .unwrap();
        assert!(set.validate(&model).unwrap_err().is_infeasible());

        let mut set = ConstraintSet::for_model(&model);
        set.add(Constraint::disabled(0)).unwrap();
        set.add(Constraint::degree(Entity::Supply(0), Relation::Exactly(1)))
            .unwrap();
        assert!(set.validate(&model).unwrap_err().is_infeasible());
    }

    fn model_full() -> CostModel {
        model(2, 2)
    }
}
