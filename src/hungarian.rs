use crate::error::{AssignmentError, Result};
use crate::model::CostModel;
use crate::solution::{Solution, Status, Termination, UnsignedInt};
use crate::solver::{collect_assignment, Deadline, Sense};
use num_iter;
use tracing::{debug, trace};

/// Exact solver for the square assignment problem (Hungarian method)
/// Which finds a perfect matching of N demands -> N supplies of minimum (or maximum) total cost
///
/// The solver keeps a dual potential per demand (`u`) and per supply (`v`). Demands are inserted
/// one at a time: an alternating tree is grown from the new demand over tight edges
/// (`cost - u - v == 0`), potentials are lowered by the smallest boundary slack whenever the tree
/// can't be extended, and the matching is augmented once the tree reaches a free supply.
///
/// Index type `I` stores the matching, `I::max_value()` marks a free slot.
#[derive(Debug, Clone)]
pub struct HungarianSolver<I: UnsignedInt> {
    size: I,
    // potentials of demands
    u: Vec<f64>,
    // potentials of supplies, the extra last slot belongs to the virtual root supply
    v: Vec<f64>,
    // index j gives the demand matched to supply j
    supply_to_demand: Vec<I>,
    // previous supply on the alternating path to supply j
    way: Vec<I>,
    // smallest slack seen for supply j in the current tree
    min_slack: Vec<f64>,
    in_tree: Vec<bool>,
    // sense-adjusted costs, row-major, infinite on infeasible edges
    values: Vec<f64>,

    pub nits: u32,
}

impl<I: UnsignedInt> Default for HungarianSolver<I> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<I: UnsignedInt> HungarianSolver<I> {
    pub fn new(capacity: usize) -> Self {
        Self {
            size: I::zero(),
            u: Vec::with_capacity(capacity),
            v: Vec::with_capacity(capacity + 1),
            supply_to_demand: Vec::with_capacity(capacity + 1),
            way: Vec::with_capacity(capacity + 1),
            min_slack: Vec::with_capacity(capacity + 1),
            in_tree: Vec::with_capacity(capacity + 1),
            values: Vec::with_capacity(capacity * capacity),
            nits: 0,
        }
    }

    /// Potentials of demands after the last solve.
    ///
    /// For a maximizing solve they are the potentials of the negated costs.
    pub fn demand_potentials(&self) -> &[f64] {
        &self.u
    }

    /// Potentials of supplies after the last solve.
    pub fn supply_potentials(&self) -> &[f64] {
        let n: usize = self.size.as_();
        &self.v[..n.min(self.v.len())]
    }

    fn init_solve(&mut self, model: &CostModel, sense: Sense) -> Result<()> {
        if !model.is_square() {
            return Err(AssignmentError::shape(format!(
                "exact matching needs a square model, got {} demands and {} supplies",
                model.demand_count(),
                model.supply_count()
            )));
        }
        let n = model.demand_count();
        // one extra slot for the root plus the free marker
        let max_index: usize = I::max_value().as_();
        self.size = match I::from_usize(n) {
            Some(size) if n + 1 < max_index => size,
            _ => {
                return Err(AssignmentError::shape(format!(
                    "{} demands don't fit into the index type",
                    n
                )))
            }
        };

        let sign = sense.sign();
        self.values.clear();
        self.values.extend((0..n).flat_map(|i| {
            (0..n).map(move |j| {
                if model.feasible(i, j) {
                    sign * model.cost(i, j)
                } else {
                    f64::INFINITY
                }
            })
        }));

        self.u.clear();
        self.u.resize(n, 0.);
        self.v.clear();
        self.v.resize(n + 1, 0.);
        self.supply_to_demand.clear();
        self.supply_to_demand.resize(n + 1, I::max_value());
        self.way.clear();
        self.way.resize(n + 1, I::max_value());
        self.min_slack.clear();
        self.min_slack.resize(n + 1, f64::INFINITY);
        self.in_tree.clear();
        self.in_tree.resize(n + 1, false);
        self.nits = 0;
        Ok(())
    }

    pub fn solve(&mut self, model: &CostModel, sense: Sense) -> Result<Solution> {
        let deadline = Deadline::start(None);
        self.init_solve(model, sense)?;
        let n: usize = self.size.as_();
        let root = self.size;

        for demand in num_iter::range(I::zero(), self.size) {
            self.insert_demand(demand, root)?;
            trace!("demand {} inserted, u: {:?}", demand, self.u);
        }

        let assignment = collect_assignment(
            model,
            (0..n).map(|j| {
                let i: usize = self.supply_to_demand[j].as_();
                (i, j)
            }),
        );
        let objective = assignment.total_cost();
        debug!(
            "hungarian: size {}, potential updates {}, objective {}",
            n, self.nits, objective
        );
        Ok(Solution {
            assignment,
            objective,
            status: Status::Optimal,
            termination: Termination::Exhausted,
            bound: None,
            activated: Vec::new(),
            wall_time: deadline.elapsed(),
        })
    }

    /// Grows the alternating tree of `demand` and augments the matching along it.
    fn insert_demand(&mut self, demand: I, root: I) -> Result<()> {
        let n: usize = self.size.as_();
        let root_usize: usize = root.as_();
        self.supply_to_demand[root_usize] = demand;
        self.min_slack.iter_mut().for_each(|s| *s = f64::INFINITY);
        self.in_tree.iter_mut().for_each(|t| *t = false);

        let mut j0 = root;
        loop {
            let j0_usize: usize = j0.as_();
            self.in_tree[j0_usize] = true;
            let i0: usize = self.supply_to_demand[j0_usize].as_();
            let row = &self.values[i0 * n..(i0 + 1) * n];
            let mut delta = f64::INFINITY;
            let mut j1 = I::max_value();

            // lowest supply index wins ties on the slack
            for j in num_iter::range(I::zero(), self.size) {
                let j_usize: usize = j.as_();
                if self.in_tree[j_usize] {
                    continue;
                }
                let reduced = row[j_usize] - self.u[i0] - self.v[j_usize];
                if reduced < self.min_slack[j_usize] {
                    self.min_slack[j_usize] = reduced;
                    self.way[j_usize] = j0;
                }
                if self.min_slack[j_usize] < delta {
                    delta = self.min_slack[j_usize];
                    j1 = j;
                }
            }

            if j1 == I::max_value() {
                return Err(AssignmentError::infeasible(
                    None,
                    format!("feasibility mask admits no perfect matching covering demand {}", demand),
                ));
            }

            if delta != 0. {
                self.nits += 1;
            }
            for j in 0..=n {
                if self.in_tree[j] {
                    let i: usize = self.supply_to_demand[j].as_();
                    self.u[i] += delta;
                    self.v[j] -= delta;
                } else {
                    self.min_slack[j] -= delta;
                }
            }

            j0 = j1;
            let j0_usize: usize = j0.as_();
            if self.supply_to_demand[j0_usize] == I::max_value() {
                break;
            }
        }

        // flip the alternating path back to the root
        loop {
            let j0_usize: usize = j0.as_();
            let j1 = self.way[j0_usize];
            let j1_usize: usize = j1.as_();
            self.supply_to_demand[j0_usize] = self.supply_to_demand[j1_usize];
            j0 = j1;
            if j0 == root {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[generic_tests::define]
mod tests {
    use super::HungarianSolver;
    use crate::error::AssignmentError;
    use crate::model::CostModel;
    use crate::solution::{Status, UnsignedInt};
    use crate::solver::Sense;
    use rand::distributions::{Distribution, Uniform};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use reservoir_sampling::unweighted::core::r as reservoir_sample;

    fn init() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    fn golden() -> CostModel {
        CostModel::new(vec![
            vec![52., 89., 40., 77.],
            vec![96., 92., 76., 33.],
            vec![31., 71., 6., 20.],
            vec![93., 70., 63., 95.],
        ])
        .unwrap()
    }

    fn brute_force(model: &CostModel, sense: Sense) -> Option<f64> {
        fn permute(
            model: &CostModel,
            sense: Sense,
            row: usize,
            used: &mut Vec<bool>,
            acc: f64,
            best: &mut Option<f64>,
        ) {
            let n = model.demand_count();
            if row == n {
                if best.map_or(true, |b| sense.improves(acc, b, 1e-9)) {
                    *best = Some(acc);
                }
                return;
            }
            for j in 0..n {
                if !used[j] && model.feasible(row, j) {
                    used[j] = true;
                    permute(model, sense, row + 1, used, acc + model.cost(row, j), best);
                    used[j] = false;
                }
            }
        }
        let mut best = None;
        let mut used = vec![false; model.supply_count()];
        permute(model, sense, 0, &mut used, 0., &mut best);
        best
    }

    #[test]
    fn test_golden_minimum<I: UnsignedInt>() -> Result<(), AssignmentError> {
        init();
        let mut solver = HungarianSolver::<I>::new(4);
        let solution = solver.solve(&golden(), Sense::Minimize)?;
        assert_eq!(solution.status, Status::Optimal);
        assert_eq!(solution.objective, 161.);
        let pairs: Vec<_> = solution.edges().map(|(i, j, _, _)| (i, j)).collect();
        assert_eq!(pairs, [(0, 0), (1, 3), (2, 2), (3, 1)]);
        Ok(())
    }

    #[test]
    fn test_golden_maximum<I: UnsignedInt>() -> Result<(), AssignmentError> {
        let mut solver = HungarianSolver::<I>::new(4);
        let solution = solver.solve(&golden(), Sense::Maximize)?;
        assert_eq!(solution.objective, 317.);
        let pairs: Vec<_> = solution.edges().map(|(i, j, _, _)| (i, j)).collect();
        assert_eq!(pairs, [(0, 3), (1, 2), (2, 1), (3, 0)]);
        Ok(())
    }

    #[test]
    fn test_potentials_certify_optimality<I: UnsignedInt>() -> Result<(), AssignmentError> {
        let model = golden();
        let mut solver = HungarianSolver::<I>::new(4);
        let solution = solver.solve(&model, Sense::Minimize)?;
        let u = solver.demand_potentials().to_vec();
        let v = solver.supply_potentials().to_vec();
        for i in 0..4 {
            for j in 0..4 {
                assert!(model.cost(i, j) - u[i] - v[j] >= -1e-9);
            }
        }
        for (i, j, _, c) in solution.edges() {
            assert!((c - u[i] - v[j]).abs() < 1e-9);
        }
        let dual: f64 = u.iter().sum::<f64>() + v.iter().sum::<f64>();
        assert!((dual - solution.objective).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_random_dense_bijection<I: UnsignedInt>() -> Result<(), AssignmentError> {
        init();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let between = Uniform::from(0..100);
        let mut solver = HungarianSolver::<I>::new(8);
        for n in 1..=7 {
            let matrix: Vec<Vec<f64>> = (0..n)
                .map(|_| (0..n).map(|_| between.sample(&mut rng) as f64).collect())
                .collect();
            let model = CostModel::new(matrix).unwrap();
            let solution = solver.solve(&model, Sense::Minimize)?;
            assert_eq!(solution.assignment.len(), n);
            assert!(solution.assignment.is_injective());
            let sum: f64 = solution.edges().map(|(i, j, _, _)| model.cost(i, j)).sum();
            assert_eq!(sum, solution.objective);
            assert_eq!(Some(solution.objective), brute_force(&model, Sense::Minimize));
        }
        Ok(())
    }

    #[test]
    fn test_random_sparse_matches_brute_force<I: UnsignedInt>() -> Result<(), AssignmentError> {
        const NUM_ROWS: usize = 6;
        const ARCS_PER_PERSON: usize = 3;
        let mut val_rng = ChaCha8Rng::seed_from_u64(1);
        let mut filter_rng = ChaCha8Rng::seed_from_u64(2);
        let between = Uniform::from(-50.0..50.0);
        let mut solver = HungarianSolver::<I>::new(NUM_ROWS);

        for _ in 0..20 {
            let mut mask = vec![vec![false; NUM_ROWS]; NUM_ROWS];
            for (i, row) in mask.iter_mut().enumerate() {
                let mut j_samples = [0; ARCS_PER_PERSON];
                reservoir_sample(0..NUM_ROWS, &mut j_samples, &mut filter_rng);
                j_samples.iter().for_each(|j| row[*j] = true);
                // keep a perfect matching available
                row[i] = true;
            }
            let matrix: Vec<Vec<f64>> = (0..NUM_ROWS)
                .map(|_| (0..NUM_ROWS).map(|_| between.sample(&mut val_rng)).collect())
                .collect();
            let model = CostModel::with_mask(matrix, mask).unwrap();
            for sense in [Sense::Minimize, Sense::Maximize] {
                let solution = solver.solve(&model, sense)?;
                let expected = brute_force(&model, sense).unwrap();
                assert!((solution.objective - expected).abs() < 1e-9);
                assert!(solution.edges().all(|(i, j, _, _)| model.feasible(i, j)));
            }
        }
        Ok(())
    }

    #[test]
    fn test_no_perfect_matching<I: UnsignedInt>() {
        let model = CostModel::with_mask(
            vec![vec![1., 2., 3.], vec![4., 5., 6.], vec![7., 8., 9.]],
            vec![
                vec![true, false, false],
                vec![true, false, false],
                vec![true, true, true],
            ],
        )
        .unwrap();
        let mut solver = HungarianSolver::<I>::new(3);
        let err = solver.solve(&model, Sense::Minimize).unwrap_err();
        assert!(err.is_infeasible());
    }

    #[test]
    fn test_rectangular_is_shape_error<I: UnsignedInt>() {
        let model = CostModel::new(vec![vec![1., 2., 3.], vec![4., 5., 6.]]).unwrap();
        let mut solver = HungarianSolver::<I>::new(3);
        let err = solver.solve(&model, Sense::Minimize).unwrap_err();
        assert!(matches!(err, AssignmentError::Shape(_)));
    }

    #[test]
    fn test_ties_prefer_lowest_supply<I: UnsignedInt>() -> Result<(), AssignmentError> {
        let model = CostModel::new(vec![vec![1.; 3]; 3]).unwrap();
        let mut solver = HungarianSolver::<I>::new(3);
        let first = solver.solve(&model, Sense::Minimize)?;
        let second = solver.solve(&model, Sense::Minimize)?;
        assert!(first.same_outcome(&second));
        assert_eq!(first.objective, 3.);
        // demand 0 takes supply 0 first and is never displaced
        assert_eq!(first.assignment.supplies_of(0).collect::<Vec<_>>(), [0]);
        Ok(())
    }

    #[instantiate_tests(<u16>)]
    mod u16 {}

    #[instantiate_tests(<u32>)]
    mod u32 {}

    #[instantiate_tests(<usize>)]
    mod usize {}
}
