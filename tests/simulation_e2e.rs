use std::sync::Arc;

use approx::assert_abs_diff_eq;

use respond::{
    AgingSchedule, HistorySeries, RateSet, RateSetBuilder, RateSource, RunState, SimulationConfig,
    SimulationRunner, StrataAxis, StrataShape, StrataTensor, TimedTensorSeries, TransitionEngine,
};

fn nested(rows: &[Vec<Vec<f64>>]) -> StrataTensor {
    StrataTensor::from_nested(rows).unwrap()
}

fn regression_builder() -> RateSetBuilder {
    let shape = StrataShape::new(2, 2, 2);
    let behavior_block = vec![
        vec![0.85, 0.9],
        vec![0.15, 0.1],
        vec![0.1, 0.2],
        vec![0.9, 0.8],
    ];
    let intervention = nested(&[
        vec![vec![0.8, 0.2], vec![0.9, 0.1]],
        vec![vec![0.8, 0.2], vec![0.9, 0.1]],
        vec![vec![0.05, 0.95], vec![0.15, 0.85]],
        vec![vec![0.05, 0.95], vec![0.15, 0.85]],
    ]);
    let init_block = vec![
        vec![0.256_506, 0.102_857],
        vec![0.743_494, 0.897_143],
        vec![1.0, 1.0],
        vec![0.0, 0.0],
    ];

    RateSet::builder()
        .initial_sample(StrataTensor::filled(shape, 1.0))
        .entering_samples(TimedTensorSeries::constant(StrataTensor::filled(shape, 1.0)))
        .behavior_transition_rates(nested(&[behavior_block.clone(), behavior_block]))
        .intervention_transition_rates(TimedTensorSeries::constant(intervention))
        .intervention_init_rates(nested(&[init_block.clone(), init_block]))
        .overdose_rates(TimedTensorSeries::constant(StrataTensor::filled(shape, 0.25)))
        .fatal_overdose_rates(TimedTensorSeries::constant(StrataTensor::zeros(shape)))
        .mortality_rates(StrataTensor::filled(shape, 0.01))
        .aging_interval(260)
}

fn regression_runner(duration: u32) -> SimulationRunner {
    let rates = regression_builder().age_group_shift(1).build().unwrap();
    SimulationRunner::with_dimensions(Arc::new(rates), duration, 2, 2, 2, 260, 1).unwrap()
}

fn assert_state(actual: &StrataTensor, expected: &[Vec<Vec<f64>>]) {
    let expected = nested(expected);
    assert_eq!(actual.shape(), expected.shape());
    for i in 0..2 {
        for b in 0..2 {
            for d in 0..2 {
                assert_abs_diff_eq!(actual[(i, b, d)], expected[(i, b, d)], epsilon = 1e-5);
            }
        }
    }
}

#[test]
fn regression_fixture_one_step() {
    let mut runner = regression_runner(1);
    runner.run().unwrap();
    assert_eq!(runner.run_state(), RunState::Completed);

    let history = runner.history();
    assert_eq!(history.all_timesteps(), vec![0, 1]);
    let state = history.at(1).unwrap();
    assert_abs_diff_eq!(state[(0, 0, 0)], 1.84077, epsilon = 1e-5);
    assert_abs_diff_eq!(state[(1, 1, 1)], 1.9055, epsilon = 1e-5);
    assert_state(
        state,
        &[
            vec![vec![1.84077, 2.16312], vec![1.94103, 2.03448]],
            vec![vec![2.35114, 2.2921], vec![1.43066, 1.9055]],
        ],
    );
}

#[test]
fn regression_fixture_three_steps() {
    let mut runner = regression_runner(3);
    runner.run().unwrap();
    let history = runner.history();
    assert_state(
        history.at(2).unwrap(),
        &[
            vec![vec![2.5841, 3.25968], vec![2.85186, 3.26194]],
            vec![vec![3.4414, 3.67511], vec![1.99455, 2.84651]],
        ],
    );
    assert_state(
        history.at(3).unwrap(),
        &[
            vec![vec![3.26877, 4.39218], vec![3.71778, 4.57904]],
            vec![vec![4.46667, 5.15593], vec![2.51988, 3.81529]],
        ],
    );
}

#[test]
fn regression_fixture_records_every_series() {
    let mut runner = regression_runner(1);
    runner.run().unwrap();
    let history = runner.history();

    for which in HistorySeries::ALL {
        assert_eq!(history.series(which).all_timesteps(), vec![0, 1], "{which}");
    }
    assert_eq!(history.overdose_history().exact(0).unwrap().sum(), 0.0);

    let admissions = history.intervention_admission_history().exact(1).unwrap();
    let overdoses = history.overdose_history().exact(1).unwrap();
    let fatal = history.fatal_overdose_history().exact(1).unwrap();
    let deaths = history.mortality_history().exact(1).unwrap();
    let state = history.at(1).unwrap();

    assert_abs_diff_eq!(overdoses.sum(), 0.25 * admissions.sum(), epsilon = 1e-12);
    assert_eq!(fatal.sum(), 0.0);
    assert_abs_diff_eq!(deaths.sum(), 0.01 * admissions.sum(), epsilon = 1e-12);
    assert_abs_diff_eq!(state.sum(), admissions.sum() - deaths.sum(), epsilon = 1e-12);
}

#[test]
fn admission_history_is_the_intervention_transition_result() {
    let runner = regression_runner(1);
    let rates = regression_builder().build().unwrap();
    let engine = TransitionEngine::new(rates.intervention_init_rates());

    let entered = rates.initial_sample().add(rates.entering_samples(0).unwrap()).unwrap();
    let behavior = engine
        .multiply_along_axis(&entered, rates.behavior_transition_rates(), StrataAxis::Behavior)
        .unwrap();
    let expected = engine
        .multiply_along_axis(
            &behavior,
            rates.intervention_transition_rates(0).unwrap(),
            StrataAxis::Intervention,
        )
        .unwrap();

    let step = runner.step(0, rates.initial_sample()).unwrap();
    assert_eq!(step.admissions, expected);
    assert_eq!(step.after_entry, entered);
}

#[test]
fn state_shape_is_preserved() {
    let mut runner = regression_runner(12);
    runner.run().unwrap();
    let history = runner.history();
    for t in history.all_timesteps() {
        assert_eq!(history.at(t).unwrap().shape(), StrataShape::new(2, 2, 2));
    }
}

#[test]
fn repeated_runs_are_bit_identical() {
    let mut runner = regression_runner(30);
    runner.run().unwrap();
    let first = runner.history().fingerprint();
    runner.run().unwrap();
    assert_eq!(runner.history().fingerprint(), first);

    let mut other = regression_runner(30);
    other.run().unwrap();
    assert_eq!(other.history(), runner.history());
}

#[test]
fn single_cell_model_runs() {
    let shape = StrataShape::new(1, 1, 1);
    let rates = RateSet::builder()
        .initial_sample(StrataTensor::filled(shape, 100.0))
        .entering_samples(TimedTensorSeries::constant(StrataTensor::zeros(shape)))
        .behavior_transition_rates(StrataTensor::filled(shape, 1.0))
        .intervention_transition_rates(TimedTensorSeries::constant(StrataTensor::filled(
            shape, 1.0,
        )))
        .intervention_init_rates(StrataTensor::filled(shape, 1.0))
        .overdose_rates(TimedTensorSeries::constant(StrataTensor::filled(shape, 0.1)))
        .fatal_overdose_rates(TimedTensorSeries::constant(StrataTensor::filled(shape, 0.5)))
        .mortality_rates(StrataTensor::filled(shape, 0.0))
        .build()
        .unwrap();
    let mut runner = SimulationRunner::new(Arc::new(rates), SimulationConfig::new(2)).unwrap();
    runner.run().unwrap();

    // Each week 10% overdose and half of those are fatal.
    assert_abs_diff_eq!(runner.history().at(1).unwrap().sum(), 95.0, epsilon = 1e-12);
    assert_abs_diff_eq!(runner.history().at(2).unwrap().sum(), 90.25, epsilon = 1e-12);
    assert_abs_diff_eq!(
        runner.history().fatal_overdose_history().exact(2).unwrap().sum(),
        4.75,
        epsilon = 1e-12
    );
}

#[test]
fn background_mortality_skips_fatal_overdoses() {
    let shape = StrataShape::new(1, 1, 1);
    let rates = RateSet::builder()
        .initial_sample(StrataTensor::filled(shape, 100.0))
        .entering_samples(TimedTensorSeries::constant(StrataTensor::zeros(shape)))
        .behavior_transition_rates(StrataTensor::filled(shape, 1.0))
        .intervention_transition_rates(TimedTensorSeries::constant(StrataTensor::filled(
            shape, 1.0,
        )))
        .intervention_init_rates(StrataTensor::filled(shape, 1.0))
        .overdose_rates(TimedTensorSeries::constant(StrataTensor::filled(shape, 0.1)))
        .fatal_overdose_rates(TimedTensorSeries::constant(StrataTensor::filled(shape, 0.5)))
        .mortality_rates(StrataTensor::filled(shape, 0.1))
        .build()
        .unwrap();
    let mut runner = SimulationRunner::new(Arc::new(rates), SimulationConfig::new(1)).unwrap();
    runner.run().unwrap();
    let history = runner.history();

    assert_abs_diff_eq!(history.overdose_history().exact(1).unwrap().sum(), 10.0, epsilon = 1e-12);
    assert_abs_diff_eq!(
        history.fatal_overdose_history().exact(1).unwrap().sum(),
        5.0,
        epsilon = 1e-12
    );
    // 10% of the 95 who survived their overdose.
    assert_abs_diff_eq!(history.mortality_history().exact(1).unwrap().sum(), 9.5, epsilon = 1e-12);
    assert_abs_diff_eq!(history.at(1).unwrap().sum(), 85.5, epsilon = 1e-12);
}

fn aging_rates(shift: usize) -> RateSet {
    let shape = StrataShape::new(1, 1, 2);
    RateSet::builder()
        .initial_sample(StrataTensor::from_vec(shape, vec![10.0, 3.0]).unwrap())
        .entering_samples(TimedTensorSeries::constant(StrataTensor::zeros(shape)))
        .behavior_transition_rates(StrataTensor::identity_transition(shape, StrataAxis::Behavior))
        .intervention_transition_rates(TimedTensorSeries::constant(
            StrataTensor::identity_transition(shape, StrataAxis::Intervention),
        ))
        .intervention_init_rates(StrataTensor::identity_transition(shape, StrataAxis::Behavior))
        .overdose_rates(TimedTensorSeries::constant(StrataTensor::zeros(shape)))
        .fatal_overdose_rates(TimedTensorSeries::constant(StrataTensor::zeros(shape)))
        .mortality_rates(StrataTensor::zeros(shape))
        .aging_interval(4)
        .age_group_shift(shift)
        .build()
        .unwrap()
}

#[test]
fn aging_moves_one_slot_and_drops_the_oldest() {
    let mut runner = SimulationRunner::from_rates(Arc::new(aging_rates(1)), 4).unwrap();
    runner.run().unwrap();
    let history = runner.history();

    // First event fires while stepping from t = floor(4 / 2) = 2.
    for t in 0..=2 {
        let state = history.at(t).unwrap();
        assert_eq!((state[(0, 0, 0)], state[(0, 0, 1)]), (10.0, 3.0), "t = {t}");
    }
    let aged = history.at(3).unwrap();
    assert_eq!(aged[(0, 0, 0)], 0.0);
    assert_eq!(aged[(0, 0, 1)], 10.0);
    assert_eq!(history.at(4).unwrap(), aged);
}

#[test]
fn aging_can_be_disabled() {
    let config = SimulationConfig::new(8).with_aging(AgingSchedule::disabled());
    let mut runner = SimulationRunner::new(Arc::new(aging_rates(1)), config).unwrap();
    runner.run().unwrap();
    assert_eq!(runner.history().at(8).unwrap().sum(), 13.0);
}

#[test]
fn time_varying_rates_switch_at_change_times() {
    let shape = StrataShape::new(1, 1, 1);
    let overdoses = TimedTensorSeries::from_change_times(
        respond::ChangeTimeConvention::EffectiveFrom,
        [
            (0, StrataTensor::zeros(shape)),
            (2, StrataTensor::filled(shape, 0.5)),
        ],
    )
    .unwrap();
    let rates = RateSet::builder()
        .initial_sample(StrataTensor::filled(shape, 8.0))
        .entering_samples(TimedTensorSeries::constant(StrataTensor::zeros(shape)))
        .behavior_transition_rates(StrataTensor::filled(shape, 1.0))
        .intervention_transition_rates(TimedTensorSeries::constant(StrataTensor::filled(
            shape, 1.0,
        )))
        .intervention_init_rates(StrataTensor::filled(shape, 1.0))
        .overdose_rates(overdoses)
        .fatal_overdose_rates(TimedTensorSeries::constant(StrataTensor::filled(shape, 1.0)))
        .mortality_rates(StrataTensor::zeros(shape))
        .build()
        .unwrap();
    let mut runner = SimulationRunner::new(Arc::new(rates), SimulationConfig::new(4)).unwrap();
    runner.run().unwrap();
    let totals: Vec<f64> = runner
        .history()
        .state_history()
        .totals_by_timestep()
        .into_iter()
        .map(|(_, total)| total)
        .collect();
    assert_eq!(totals, vec![8.0, 8.0, 8.0, 4.0, 2.0]);
}

#[test]
fn identity_initiation_matches_plain_intervention_transition() {
    let shape = StrataShape::new(2, 2, 1);
    let state = StrataTensor::from_vec(shape, vec![3.0, 1.0, 2.0, 5.0]).unwrap();
    let transition = StrataTensor::from_vec(
        shape.transition_along(StrataAxis::Intervention),
        vec![0.7, 0.6, 0.3, 0.4, 0.2, 0.1, 0.8, 0.9],
    )
    .unwrap();
    let identity = StrataTensor::identity_transition(shape, StrataAxis::Behavior);
    let out = TransitionEngine::new(&identity)
        .multiply_along_axis(&state, &transition, StrataAxis::Intervention)
        .unwrap();

    // Without reallocation, behavior states never mix.
    assert_abs_diff_eq!(out[(0, 0, 0)], 3.0 * 0.7 + 2.0 * 0.2, epsilon = 1e-12);
    assert_abs_diff_eq!(out[(1, 0, 0)], 3.0 * 0.3 + 2.0 * 0.8, epsilon = 1e-12);
    assert_abs_diff_eq!(out[(0, 1, 0)], 1.0 * 0.6 + 5.0 * 0.1, epsilon = 1e-12);
    assert_abs_diff_eq!(out[(1, 1, 0)], 1.0 * 0.4 + 5.0 * 0.9, epsilon = 1e-12);
}
