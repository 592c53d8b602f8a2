use crate::error::{AssignmentError, Result};

/// A feasible edge of a [`CostModel`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Edge {
    pub demand: usize,
    pub supply: usize,
    pub cost: f64,
}

///
/// Immutable bipartite cost (or profit) matrix of `demand_count` rows and
/// `supply_count` columns.
///
/// Every edge carries a feasibility flag and a quantity. Quantities are what a
/// capacity constraint sums up; they default to `1.0`.
///
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CostModel {
    num_demands: usize,
    num_supplies: usize,
    // row-major storage
    costs: Vec<f64>,
    feasible: Vec<bool>,
    quantities: Vec<f64>,
}

impl CostModel {
    /// Model with every edge feasible.
    pub fn new(matrix: Vec<Vec<f64>>) -> Result<CostModel> {
        CostModel::builder(matrix).build()
    }

    /// Model where `mask[i][j] == false` marks edge `(i, j)` infeasible.
    pub fn with_mask(matrix: Vec<Vec<f64>>, mask: Vec<Vec<bool>>) -> Result<CostModel> {
        CostModel::builder(matrix).mask(mask).build()
    }

    pub fn builder(matrix: Vec<Vec<f64>>) -> CostModelBuilder {
        CostModelBuilder {
            matrix,
            mask: None,
            quantities: None,
            non_negative: false,
        }
    }

    /// Profit model for serving demands with per-edge quantities: the value of
    /// edge `(i, j)` is `unit_profit * quantities[i][j]` and the edge is
    /// feasible only when its quantity is positive.
    pub fn from_profit_per_unit(unit_profit: f64, quantities: Vec<Vec<f64>>) -> Result<CostModel> {
        let matrix = quantities
            .iter()
            .map(|row| row.iter().map(|q| unit_profit * q).collect())
            .collect();
        let mask = quantities
            .iter()
            .map(|row| row.iter().map(|q| *q > 0.).collect())
            .collect();
        CostModel::builder(matrix)
            .mask(mask)
            .quantities(quantities)
            .build()
    }

    #[inline]
    pub fn demand_count(&self) -> usize {
        self.num_demands
    }

    #[inline]
    pub fn supply_count(&self) -> usize {
        self.num_supplies
    }

    #[inline]
    pub fn is_square(&self) -> bool {
        self.num_demands == self.num_supplies
    }

    #[inline]
    fn offset(&self, demand: usize, supply: usize) -> usize {
        debug_assert!(demand < self.num_demands && supply < self.num_supplies);
        demand * self.num_supplies + supply
    }

    #[inline]
    pub fn cost(&self, demand: usize, supply: usize) -> f64 {
        self.costs[self.offset(demand, supply)]
    }

    #[inline]
    pub fn feasible(&self, demand: usize, supply: usize) -> bool {
        self.feasible[self.offset(demand, supply)]
    }

    #[inline]
    pub fn quantity(&self, demand: usize, supply: usize) -> f64 {
        self.quantities[self.offset(demand, supply)]
    }

    /// Feasible edges in row-major order.
    pub fn edges(&self) -> impl Iterator<Item = Edge> + '_ {
        (0..self.num_demands).flat_map(move |i| self.demand_edges(i))
    }

    /// Feasible edges leaving `demand`, by ascending supply index.
    pub fn demand_edges(&self, demand: usize) -> impl Iterator<Item = Edge> + '_ {
        (0..self.num_supplies)
            .filter(move |&j| self.feasible(demand, j))
            .map(move |j| Edge {
                demand,
                supply: j,
                cost: self.cost(demand, j),
            })
    }

    /// Feasible edges entering `supply`, by ascending demand index.
    pub fn supply_edges(&self, supply: usize) -> impl Iterator<Item = Edge> + '_ {
        (0..self.num_demands)
            .filter(move |&i| self.feasible(i, supply))
            .map(move |i| Edge {
                demand: i,
                supply,
                cost: self.cost(i, supply),
            })
    }

    pub fn num_of_arcs(&self) -> usize {
        self.feasible.iter().filter(|f| **f).count()
    }

    /// Largest absolute value over feasible edges.
    pub fn max_abs_cost(&self) -> f64 {
        self.edges().fold(0_f64, |acc, e| acc.max(e.cost.abs()))
    }
}

/// Validating constructor of [`CostModel`].
#[derive(Debug, Clone)]
pub struct CostModelBuilder {
    matrix: Vec<Vec<f64>>,
    mask: Option<Vec<Vec<bool>>>,
    quantities: Option<Vec<Vec<f64>>>,
    non_negative: bool,
}

impl CostModelBuilder {
    pub fn mask(mut self, mask: Vec<Vec<bool>>) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn quantities(mut self, quantities: Vec<Vec<f64>>) -> Self {
        self.quantities = Some(quantities);
        self
    }

    /// Reject negative costs on feasible edges.
    pub fn non_negative(mut self) -> Self {
        self.non_negative = true;
        self
    }

    pub fn build(self) -> Result<CostModel> {
        let num_demands = self.matrix.len();
        if num_demands == 0 {
            return Err(AssignmentError::shape("cost matrix has no rows"));
        }
        let num_supplies = self.matrix[0].len();
        if num_supplies == 0 {
            return Err(AssignmentError::shape("cost matrix has no columns"));
        }
        if let Some(i) = self.matrix.iter().position(|row| row.len() != num_supplies) {
            return Err(AssignmentError::shape(format!(
                "row {} has {} entries, expected {}",
                i,
                self.matrix[i].len(),
                num_supplies
            )));
        }
        check_shape("mask", self.mask.as_deref(), num_demands, num_supplies)?;
        check_shape("quantity", self.quantities.as_deref(), num_demands, num_supplies)?;

        let size = num_demands * num_supplies;
        let feasible: Vec<bool> = match self.mask {
            Some(mask) => mask.into_iter().flatten().collect(),
            None => vec![true; size],
        };
        let costs: Vec<f64> = self.matrix.into_iter().flatten().collect();
        let quantities: Vec<f64> = match self.quantities {
            Some(quantities) => quantities.into_iter().flatten().collect(),
            None => vec![1.; size],
        };

        for idx in 0..size {
            let (i, j) = (idx / num_supplies, idx % num_supplies);
            let q = quantities[idx];
            if !q.is_finite() || q < 0. {
                return Err(AssignmentError::invalid_edge(
                    i,
                    j,
                    format!("quantity {} must be finite and non-negative", q),
                ));
            }
            if !feasible[idx] {
                continue;
            }
            let c = costs[idx];
            if !c.is_finite() {
                return Err(AssignmentError::invalid_edge(
                    i,
                    j,
                    format!("cost {} is not finite", c),
                ));
            }
            if self.non_negative && c < 0. {
                return Err(AssignmentError::invalid_edge(
                    i,
                    j,
                    format!("cost {} is negative", c),
                ));
            }
        }

        Ok(CostModel {
            num_demands,
            num_supplies,
            costs,
            feasible,
            quantities,
        })
    }
}

fn check_shape<T>(what: &str, rows: Option<&[Vec<T>]>, num_rows: usize, num_cols: usize) -> Result<()> {
    if let Some(rows) = rows {
        if rows.len() != num_rows {
            return Err(AssignmentError::shape(format!(
                "{} matrix has {} rows, expected {}",
                what,
                rows.len(),
                num_rows
            )));
        }
        if let Some(i) = rows.iter().position(|row| row.len() != num_cols) {
            return Err(AssignmentError::shape(format!(
                "{} row {} has {} entries, expected {}",
                what,
                i,
                rows[i].len(),
                num_cols
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{CostModel, Edge};
    use crate::error::AssignmentError;

    #[test]
    fn test_ragged_rows_are_rejected() {
        let err = CostModel::new(vec![vec![1., 2.], vec![3.]]).unwrap_err();
        assert!(matches!(err, AssignmentError::Shape(_)));
        let err = CostModel::new(vec![]).unwrap_err();
        assert!(matches!(err, AssignmentError::Shape(_)));
    }

    #[test]
    fn test_mask_shape_must_match() {
        let err = CostModel::with_mask(vec![vec![1., 2.]], vec![vec![true]]).unwrap_err();
        assert!(matches!(err, AssignmentError::Shape(_)));
    }

    #[test]
    fn test_invalid_edges() {
        let err = CostModel::new(vec![vec![1., f64::NAN]]).unwrap_err();
        assert_eq!(
            err,
            AssignmentError::InvalidEdge {
                demand: 0,
                supply: 1,
                reason: "cost NaN is not finite".to_string()
            }
        );
        // infeasible edges may hold anything
        assert!(CostModel::with_mask(vec![vec![1., f64::NAN]], vec![vec![true, false]]).is_ok());

        let err = CostModel::builder(vec![vec![1., -2.]])
            .non_negative()
            .build()
            .unwrap_err();
        assert!(matches!(err, AssignmentError::InvalidEdge { demand: 0, supply: 1, .. }));

        let err = CostModel::builder(vec![vec![1.]])
            .quantities(vec![vec![-1.]])
            .build()
            .unwrap_err();
        assert!(matches!(err, AssignmentError::InvalidEdge { .. }));
    }

    #[test]
    fn test_edges_skip_infeasible() {
        let model = CostModel::with_mask(
            vec![vec![1., 2.], vec![3., 4.]],
            vec![vec![true, false], vec![true, true]],
        )
        .unwrap();
        let edges: Vec<Edge> = model.edges().collect();
        assert_eq!(edges.len(), 3);
        assert_eq!(
            edges[0],
            Edge {
                demand: 0,
                supply: 0,
                cost: 1.
            }
        );
        assert_eq!(model.supply_edges(1).count(), 1);
        assert_eq!(model.num_of_arcs(), 3);
        assert!(model.is_square());
        assert_eq!(model.max_abs_cost(), 4.);
    }

    #[test]
    fn test_profit_per_unit() {
        let model = CostModel::from_profit_per_unit(2.5, vec![vec![4., 0.], vec![0., 2.]]).unwrap();
        assert!(model.feasible(0, 0));
        assert!(!model.feasible(0, 1));
        assert_eq!(model.cost(0, 0), 10.);
        assert_eq!(model.quantity(1, 1), 2.);
        assert_eq!(model.supply_count(), 2);
    }
}
