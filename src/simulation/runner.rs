//! The per-timestep pipeline.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::engine::TransitionEngine;
use crate::error::{RespondResult, ShapeError};
use crate::rates::RateSource;
use crate::simulation::config::{AgingSchedule, SimulationConfig};
use crate::simulation::history::{History, StepRecord};
use crate::tensor::{StrataAxis, StrataShape, StrataTensor};

/// Lifecycle of a [`SimulationRunner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// `run` has not been called, or the last run failed.
    NotStarted,
    /// Computing the state for `timestep + 1`.
    Running {
        /// Timestep being stepped from.
        timestep: u32,
    },
    /// The history covers `0..=duration`.
    Completed,
}

/// Runs the weekly pipeline over a rate source and accumulates a [`History`].
///
/// Each step, in order: aging (when scheduled), entering cohort (clamped at
/// zero), behavior transition, intervention transition with initiation
/// reallocation, overdoses, fatal overdoses, background mortality.
pub struct SimulationRunner {
    rates: Arc<dyn RateSource>,
    config: SimulationConfig,
    run_state: RunState,
    history: History,
}

impl fmt::Debug for SimulationRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationRunner")
            .field("shape", &self.rates.shape())
            .field("config", &self.config)
            .field("run_state", &self.run_state)
            .finish_non_exhaustive()
    }
}

impl SimulationRunner {
    /// Creates a runner after checking `config` and every rate tensor the
    /// run will read against the state shape.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an invalid config, a shape error for
    /// any inconsistent tensor, or a data error for an empty series.
    pub fn new(rates: Arc<dyn RateSource>, config: SimulationConfig) -> RespondResult<Self> {
        config.validate()?;
        check_rates(rates.as_ref(), config.duration)?;
        Ok(Self {
            rates,
            config,
            run_state: RunState::NotStarted,
            history: History::default(),
        })
    }

    /// Creates a runner from explicit dimensions and aging parameters.
    ///
    /// Aging is enabled when both `aging_interval` and `age_group_shift` are
    /// positive.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::Mismatch`] if the dimensions disagree with the
    /// rate source, or any error from [`SimulationRunner::new`].
    pub fn with_dimensions(
        rates: Arc<dyn RateSource>,
        duration: u32,
        num_interventions: usize,
        num_behavior_states: usize,
        num_demographic_combos: usize,
        aging_interval: u32,
        age_group_shift: usize,
    ) -> RespondResult<Self> {
        let expected =
            StrataShape::new(num_interventions, num_behavior_states, num_demographic_combos);
        if rates.shape() != expected {
            return Err(ShapeError::Mismatch {
                context: "runner dimensions".to_string(),
                expected,
                actual: rates.shape(),
            }
            .into());
        }
        let config = SimulationConfig::new(duration)
            .with_aging(AgingSchedule::from_parts(aging_interval, age_group_shift));
        Self::new(rates, config)
    }

    /// Creates a runner using the aging parameters carried by `rates`.
    ///
    /// # Errors
    ///
    /// See [`SimulationRunner::new`].
    pub fn from_rates(rates: Arc<dyn RateSource>, duration: u32) -> RespondResult<Self> {
        let config = SimulationConfig::from_rates(rates.as_ref(), duration);
        Self::new(rates, config)
    }

    /// Run configuration.
    #[must_use]
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn run_state(&self) -> RunState {
        self.run_state
    }

    /// Shape of the population state.
    #[must_use]
    pub fn shape(&self) -> StrataShape {
        self.rates.shape()
    }

    /// The accumulated history. Empty until a run completes.
    #[must_use]
    pub const fn history(&self) -> &History {
        &self.history
    }

    /// Consumes the runner, returning its history.
    #[must_use]
    pub fn into_history(self) -> History {
        self.history
    }

    /// Runs every timestep and replaces the history.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a step. The partial history is
    /// discarded and the runner returns to [`RunState::NotStarted`].
    pub fn run(&mut self) -> RespondResult<()> {
        info!(
            target: "respond::runner",
            duration = self.config.duration,
            shape = %self.rates.shape(),
            aging = self.config.aging.is_active(),
            "simulation started"
        );
        let started = Instant::now();

        match self.execute() {
            Ok(history) => {
                self.history = history;
                self.run_state = RunState::Completed;
                info!(
                    target: "respond::runner",
                    timesteps = self.history.all_timesteps().len(),
                    elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
                    "simulation finished"
                );
                Ok(())
            }
            Err(err) => {
                self.history = History::default();
                self.run_state = RunState::NotStarted;
                Err(err)
            }
        }
    }

    fn execute(&mut self) -> RespondResult<History> {
        let mut state = self.rates.initial_sample().clone();
        let mut history = History::starting_from(&state);
        for timestep in 0..self.config.duration {
            self.run_state = RunState::Running { timestep };
            let record = self.step(timestep, &state)?;
            state = record.state.clone();
            history.record(timestep + 1, record)?;
        }
        Ok(history)
    }

    /// Computes one step from `state` at `timestep`, without recording it.
    ///
    /// # Errors
    ///
    /// Returns a shape error if `state` does not match the rate tensors, or a
    /// data error if a series lookup fails.
    pub fn step(&self, timestep: u32, state: &StrataTensor) -> RespondResult<StepRecord> {
        let rates = self.rates.as_ref();
        let engine = TransitionEngine::new(rates.intervention_init_rates());
        let aging = self.config.aging;

        let aged;
        let current = if aging.fires_at(timestep) {
            debug!(
                target: "respond::runner",
                timestep,
                shift = aging.age_group_shift,
                "aging event"
            );
            aged = TransitionEngine::age(state, aging.age_group_shift);
            &aged
        } else {
            state
        };

        let after_entry = current.add(rates.entering_samples(timestep)?)?.clamp_min(0.0);
        let after_behavior = engine.multiply_along_axis(
            &after_entry,
            rates.behavior_transition_rates(),
            StrataAxis::Behavior,
        )?;
        let admissions = engine.multiply_along_axis(
            &after_behavior,
            rates.intervention_transition_rates(timestep)?,
            StrataAxis::Intervention,
        )?;
        let overdoses = rates.overdose_rates(timestep)?.mul(&admissions)?;
        let fatal_overdoses = rates.fatal_overdose_rates(timestep)?.mul(&overdoses)?;
        let mortalities = rates.mortality_rates().mul(&admissions.sub(&fatal_overdoses)?)?;
        let next = admissions.sub(&mortalities.add(&fatal_overdoses)?)?;

        debug!(
            target: "respond::runner",
            timestep,
            after_entry = after_entry.sum(),
            after_behavior = after_behavior.sum(),
            after_intervention = admissions.sum(),
            overdoses = overdoses.sum(),
            deaths = mortalities.sum() + fatal_overdoses.sum(),
            population = next.sum(),
            "step complete"
        );

        Ok(StepRecord {
            after_entry,
            admissions,
            overdoses,
            fatal_overdoses,
            mortalities,
            state: next,
        })
    }
}

fn check_rates(rates: &dyn RateSource, duration: u32) -> RespondResult<()> {
    let state = rates.shape();
    for axis in StrataAxis::ALL {
        if state.extent(axis) == 0 {
            return Err(ShapeError::EmptyAxis { axis }.into());
        }
    }

    expect_shape("initial_sample", rates.initial_sample(), state)?;
    expect_shape(
        "behavior_transition_rates",
        rates.behavior_transition_rates(),
        state.transition_along(StrataAxis::Behavior),
    )?;
    expect_shape(
        "intervention_init_rates",
        rates.intervention_init_rates(),
        state.transition_along(StrataAxis::Behavior),
    )?;
    expect_shape("mortality_rates", rates.mortality_rates(), state)?;

    let intervention = state.transition_along(StrataAxis::Intervention);
    for timestep in 0..duration {
        expect_shape("entering_samples", rates.entering_samples(timestep)?, state)?;
        expect_shape(
            "intervention_transition_rates",
            rates.intervention_transition_rates(timestep)?,
            intervention,
        )?;
        expect_shape("overdose_rates", rates.overdose_rates(timestep)?, state)?;
        expect_shape("fatal_overdose_rates", rates.fatal_overdose_rates(timestep)?, state)?;
    }
    Ok(())
}

fn expect_shape(name: &str, tensor: &StrataTensor, shape: StrataShape) -> Result<(), ShapeError> {
    if tensor.shape() == shape {
        Ok(())
    } else {
        Err(ShapeError::Mismatch {
            context: name.to_string(),
            expected: shape,
            actual: tensor.shape(),
        })
    }
}
