//! # RESPOND - Weekly compartmental simulation of opioid use disorder
//!
//! RESPOND steps a population stratified by intervention, behavior state, and
//! demographic combo through a Markov-style compartmental model: entering
//! cohorts, behavior transitions, intervention transitions with initiation
//! reallocation, overdoses, background mortality, and periodic aging.
//!
//! ## Core Concepts
//!
//! - **StrataTensor**: a dense `[intervention, behavior, demographic]` array of
//!   population counts or probabilities
//! - **TimedTensorSeries**: rates as step functions over weekly timesteps
//! - **RateSet**: every rate tensor one run consumes, read through [`RateSource`]
//! - **SimulationRunner**: the per-timestep pipeline, producing a **History**
//! - **OutcomeCalculator**: costs, utilities, and life years from a history
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use respond::{RateSet, SimulationConfig, SimulationRunner};
//!
//! let rates = RateSet::from_json_str(&scenario_json)?;
//! let mut runner = SimulationRunner::new(Arc::new(rates), SimulationConfig::new(520))?;
//! runner.run()?;
//! let population_at_one_year = runner.history().at(52)?.sum();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Data model
pub mod error;
pub mod series;
pub mod strata;
pub mod tensor;

// Inputs and the numerical core
pub mod engine;
pub mod rates;
pub mod simulation;

// Consumers of a finished run
pub mod batch;
pub mod outcomes;

// Re-export primary types at crate root for convenience
pub use error::{
    BatchError, DataError, RespondError, RespondResult, ShapeError, ValidationError,
};
pub use series::{ChangeTimeConvention, TimedTensorSeries};
pub use strata::{DemographicDimension, Intervention, InterventionKind, StrataLayout};
pub use tensor::{StrataAxis, StrataShape, StrataTensor};

pub use engine::TransitionEngine;
pub use rates::{CostSource, RateSet, RateSetBuilder, RateSource, RowDeviation, UtilitySource};
pub use simulation::{
    AgingSchedule, History, HistorySeries, RunState, SimulationConfig, SimulationRunner,
    StepRecord,
};

pub use batch::{BatchConfig, BatchRunner, RunHandle, ScenarioId};
pub use outcomes::{
    CostBreakdown, CostTable, CostTables, Discounting, OutcomeCalculator, OutcomeConfig, Totals,
    UtilityCombination, UtilityTable,
};
