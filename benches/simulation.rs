use std::sync::Arc;
use std::time::Instant;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use respond::{
    BatchConfig, BatchRunner, RateSet, RateSource, SimulationConfig, SimulationRunner, StrataAxis,
    StrataShape, StrataTensor, TimedTensorSeries, TransitionEngine,
};

/// Row-stochastic transition tensor along `axis` for states of `shape`.
fn transition(shape: StrataShape, axis: StrataAxis, seed: u64) -> StrataTensor {
    let n = shape.extent(axis);
    let mut state = seed;
    let blocks: Vec<StrataTensor> = (0..n)
        .map(|_| {
            let values = (0..shape.len())
                .map(|_| {
                    // xorshift64: fixed input across samples.
                    state ^= state << 13;
                    state ^= state >> 7;
                    state ^= state << 17;
                    0.05 + (state % 1000) as f64 / 1000.0
                })
                .collect();
            StrataTensor::from_vec(shape, values).unwrap()
        })
        .collect();
    let mut stacked = StrataTensor::stack_transition(&blocks, axis).unwrap();
    let target = shape.transition_along(axis);
    for i in 0..target.interventions {
        for b in 0..target.behaviors {
            for d in 0..target.demographics {
                let (cell, k) = match axis {
                    StrataAxis::Intervention => ((i % n, b, d), i / n),
                    StrataAxis::Behavior => ((i, b % n, d), b / n),
                    StrataAxis::Demographic => ((i, b, d % n), d / n),
                };
                let sum: f64 = (0..n)
                    .map(|dst| match axis {
                        StrataAxis::Intervention => blocks[k][(dst, cell.1, cell.2)],
                        StrataAxis::Behavior => blocks[k][(cell.0, dst, cell.2)],
                        StrataAxis::Demographic => blocks[k][(cell.0, cell.1, dst)],
                    })
                    .sum();
                stacked[(i, b, d)] /= sum;
            }
        }
    }
    stacked
}

/// A model with 9 interventions, 4 behavior states and 24 demographic combos.
fn bench_rates() -> Arc<dyn RateSource> {
    let shape = StrataShape::new(9, 4, 24);
    let rates = RateSet::builder()
        .initial_sample(StrataTensor::filled(shape, 100.0))
        .entering_samples(TimedTensorSeries::constant(StrataTensor::filled(shape, 1.0)))
        .behavior_transition_rates(transition(shape, StrataAxis::Behavior, 7))
        .intervention_transition_rates(TimedTensorSeries::constant(transition(
            shape,
            StrataAxis::Intervention,
            11,
        )))
        .intervention_init_rates(StrataTensor::identity_transition(shape, StrataAxis::Behavior))
        .overdose_rates(TimedTensorSeries::constant(StrataTensor::filled(shape, 0.002)))
        .fatal_overdose_rates(TimedTensorSeries::constant(StrataTensor::filled(shape, 0.1)))
        .mortality_rates(StrataTensor::filled(shape, 0.0002))
        .aging_interval(260)
        .age_group_shift(2)
        .build()
        .unwrap();
    Arc::new(rates)
}

fn bench_transition(c: &mut Criterion) {
    let rates = bench_rates();
    let state = rates.initial_sample().clone();
    let behavior = rates.behavior_transition_rates().clone();
    let intervention = rates.intervention_transition_rates(0).unwrap().clone();

    let mut group = c.benchmark_group("transition");
    group.throughput(Throughput::Elements(state.shape().len() as u64));
    group.bench_function("behavior_axis", |b| {
        let engine = TransitionEngine::new(rates.intervention_init_rates());
        b.iter(|| {
            engine
                .multiply_along_axis(&state, &behavior, StrataAxis::Behavior)
                .unwrap()
        });
    });
    group.bench_function("intervention_axis", |b| {
        let engine = TransitionEngine::new(rates.intervention_init_rates());
        b.iter(|| {
            engine
                .multiply_along_axis(&state, &intervention, StrataAxis::Intervention)
                .unwrap()
        });
    });
    group.finish();
}

fn bench_single_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("simulation");
    group.throughput(Throughput::Elements(1));

    group.bench_function("run_10_years", |b| {
        b.iter_custom(|iters| {
            let rates = bench_rates();
            let config = SimulationConfig::from_rates(rates.as_ref(), 520);

            let start = Instant::now();
            for _ in 0..iters {
                // Runner construction is part of the measured work.
                let mut runner = SimulationRunner::new(Arc::clone(&rates), config).unwrap();
                runner.run().unwrap();
            }
            start.elapsed()
        });
    });
    group.finish();
}

fn bench_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch");
    group.throughput(Throughput::Elements(8));
    group.sample_size(10);

    group.bench_function("eight_scenarios_four_workers", |b| {
        b.iter_custom(|iters| {
            // Fresh pool per sample, but exclude thread startup from timing.
            let batch = BatchRunner::new(BatchConfig {
                workers: 4,
                queue_capacity: 16,
            })
            .unwrap();
            let rates = bench_rates();
            let config = SimulationConfig::from_rates(rates.as_ref(), 104);

            let start = Instant::now();
            for _ in 0..iters {
                let histories = batch
                    .run_all((0..8).map(|_| (Arc::clone(&rates), config)))
                    .unwrap();
                assert_eq!(histories.len(), 8);
            }
            start.elapsed()
        });
    });
    group.finish();
}

criterion_group!(simulation, bench_transition, bench_single_run, bench_batch);
criterion_main!(simulation);
