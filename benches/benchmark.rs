use constrained_assignment::{
    BranchAndBound, ConstraintSet, CostModel, HungarianSolver, Relation, Sense, Side,
    SolverOptions,
};
use criterion::BenchmarkId;
use criterion::Throughput;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, SamplingMode};
use rand::distributions::{Bernoulli, Distribution, Uniform};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::Beta;
use reservoir_sampling::unweighted::core::r as reservoir_sample;
use std::time::Duration;

fn gen_dense_input(seed: u64, size: usize, density: f64, min_value: f64, max_value: f64) -> CostModel {
    let mut val_rng = ChaCha8Rng::seed_from_u64(seed);
    let mut filter_rng = ChaCha8Rng::seed_from_u64(seed + 1);

    let between = Uniform::from(min_value..max_value);
    let num_of_arcs_fully_dense = (size as u32).pow(2);
    let target_elements_from_prng = ((num_of_arcs_fully_dense as f64) * density) as u32;
    let whether_to_add = Bernoulli::from_ratio(target_elements_from_prng, num_of_arcs_fully_dense)
        .expect("unexpected error");
    // a random permutation keeps a perfect matching available
    let mut ensured_i_to_j = (0..size).collect::<Vec<usize>>();
    ensured_i_to_j.as_mut_slice().shuffle(&mut filter_rng);

    let matrix = (0..size)
        .map(|_| (0..size).map(|_| between.sample(&mut val_rng)).collect())
        .collect();
    let mask = (0..size)
        .map(|i| {
            (0..size)
                .map(|j| whether_to_add.sample(&mut filter_rng) || ensured_i_to_j[i] == j)
                .collect()
        })
        .collect();
    CostModel::with_mask(matrix, mask).expect("valid random model")
}

/// Customers with sparse truck options; quantities follow a Beta(3, 3) spread.
fn gen_capacitated_input(
    seed: u64,
    num_of_customers: usize,
    num_of_trucks: usize,
    trucks_per_customer: usize,
) -> CostModel {
    let mut val_rng = ChaCha8Rng::seed_from_u64(seed);
    let mut filter_rng = ChaCha8Rng::seed_from_u64(seed + 1);
    let beta = Beta::new(3.0, 3.0).unwrap();

    let quantities = (0..num_of_customers)
        .map(|_| {
            let mut j_samples = vec![0; trucks_per_customer];
            reservoir_sample(0..num_of_trucks, j_samples.as_mut_slice(), &mut filter_rng);
            let mut row = vec![0.; num_of_trucks];
            for j in j_samples {
                row[j] = (20. * beta.sample(&mut val_rng) + 1.).floor();
            }
            row
        })
        .collect();
    CostModel::from_profit_per_unit(2.5, quantities).expect("valid random model")
}

fn bench_one_to_one_size(c: &mut Criterion, max_size: usize) {
    let mut group = c.benchmark_group("one_to_one_random");
    group.sample_size(10);
    group.sampling_mode(SamplingMode::Flat);

    for size in (4..=max_size).step_by(4) {
        let model = gen_dense_input(size as u64, size, 0.5, 500.0, 1000.0);
        let constraints = ConstraintSet::one_to_one(&model);
        group.throughput(Throughput::Elements(model.num_of_arcs() as u64));

        let exact = HungarianSolver::<u32>::new(size);
        group.bench_with_input(BenchmarkId::new("hungarian", size), &exact, |b, input| {
            b.iter_batched(
                || input.clone(),
                |mut solver| {
                    solver.solve(&model, Sense::Minimize).unwrap();
                },
                BatchSize::SmallInput,
            );
        });

        let options = SolverOptions::default().with_time_budget(Duration::from_secs(10));
        let constrained = BranchAndBound::new(options);
        group.bench_with_input(BenchmarkId::new("branch_and_bound", size), &constrained, |b, input| {
            b.iter_batched(
                || input.clone(),
                |mut solver| {
                    let solution = solver.solve(&model, &constraints, Sense::Minimize).unwrap();
                    if solution.bound.is_some() {
                        println!(
                            "not optimal: nodes {}, termination {:?}",
                            solver.stats.nodes, solution.termination
                        )
                    }
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_capacitated_num_of_customers(c: &mut Criterion, max_num_of_customers: usize) {
    let mut group = c.benchmark_group("capacitated_trucks");
    let num_of_trucks = 4;
    group.sample_size(10);
    group.sampling_mode(SamplingMode::Flat);

    for num_of_customers in (4..=max_num_of_customers).step_by(4) {
        let model = gen_capacitated_input(num_of_customers as u64, num_of_customers, num_of_trucks, 2);
        let mut constraints = ConstraintSet::for_model(&model);
        constraints.degree_all(Side::Demand, Relation::AtMost(1));
        constraints.capacity_all(40.).unwrap().activation_all(30.).unwrap();
        group.throughput(Throughput::Elements(model.num_of_arcs() as u64));

        let options = SolverOptions::default().with_time_budget(Duration::from_secs(10));
        let solver = BranchAndBound::new(options);
        let benchmark_id = BenchmarkId::new(
            "branch_and_bound",
            format!("num_of_customers {}, num_of_trucks {}", num_of_customers, num_of_trucks),
        );
        group.bench_with_input(benchmark_id, &solver, |b, input| {
            b.iter_batched(
                || input.clone(),
                |mut solver| {
                    let solution = solver.solve(&model, &constraints, Sense::Maximize).unwrap();
                    if solution.bound.is_some() {
                        println!(
                            "not optimal: nodes {}, pruned {}",
                            solver.stats.nodes, solver.stats.pruned
                        )
                    }
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_one_to_one_size_24(c: &mut Criterion) {
    bench_one_to_one_size(c, 24)
}

fn bench_capacitated_num_of_customers_16(c: &mut Criterion) {
    bench_capacitated_num_of_customers(c, 16)
}

criterion_group!(
    benches,
    bench_one_to_one_size_24,
    bench_capacitated_num_of_customers_16
);
criterion_main!(benches);
