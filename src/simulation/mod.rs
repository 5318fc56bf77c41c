//! Simulation runs.
//!
//! A [`SimulationRunner`] steps a population through the weekly pipeline and
//! records a [`History`]. Runs are single-threaded and deterministic; run
//! independent scenarios concurrently with [`crate::batch::BatchRunner`].

mod config;
mod history;
mod runner;

pub use config::{AgingSchedule, SimulationConfig};
pub use history::{History, HistorySeries, StepRecord};
pub use runner::{RunState, SimulationRunner};
