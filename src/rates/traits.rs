//! Read contracts for the data the simulation consumes.
//!
//! Each loader role is one trait. The engine depends only on [`RateSource`];
//! the outcome calculator depends only on [`CostSource`] and
//! [`UtilitySource`]. Concrete loaders (files, databases, in-memory fixtures)
//! implement these traits and are injected as trait objects.

use crate::error::DataError;
use crate::outcomes::{CostTable, UtilityTable};
use crate::tensor::{StrataShape, StrataTensor};

/// Every rate tensor the transition engine reads.
///
/// Implementations must return identical tensors for identical calls: the
/// simulation is deterministic only if its inputs are.
pub trait RateSource: Send + Sync {
    /// Shape of the population state, `[I, B, D]`.
    fn shape(&self) -> StrataShape;

    /// Population at timestep 0.
    fn initial_sample(&self) -> &StrataTensor;

    /// Population entering the model at `timestep`.
    fn entering_samples(&self, timestep: u32) -> Result<&StrataTensor, DataError>;

    /// Static behavior transition tensor, `[I, B², D]`.
    fn behavior_transition_rates(&self) -> &StrataTensor;

    /// Intervention transition tensor in effect at `timestep`, `[I², B, D]`.
    fn intervention_transition_rates(&self, timestep: u32) -> Result<&StrataTensor, DataError>;

    /// Behavior reallocation applied on entering a new intervention, `[I, B², D]`.
    fn intervention_init_rates(&self) -> &StrataTensor;

    /// Overdose probability in effect at `timestep`, `[I, B, D]`.
    fn overdose_rates(&self, timestep: u32) -> Result<&StrataTensor, DataError>;

    /// Fatal-overdose-given-overdose probability at `timestep`, `[I, B, D]`.
    fn fatal_overdose_rates(&self, timestep: u32) -> Result<&StrataTensor, DataError>;

    /// Static background mortality probability, `[I, B, D]`.
    fn mortality_rates(&self) -> &StrataTensor;

    /// Timesteps between aging events.
    fn aging_interval(&self) -> u32;

    /// Demographic slots shifted per aging event.
    fn age_group_shift(&self) -> usize;

    /// Number of intervention states.
    fn num_interventions(&self) -> usize {
        self.shape().interventions
    }

    /// Number of behavior states.
    fn num_behavior_states(&self) -> usize {
        self.shape().behaviors
    }

    /// Number of demographic combos.
    fn num_demographic_combos(&self) -> usize {
        self.shape().demographics
    }
}

/// Cost inputs, one table per perspective (e.g. healthcare sector, societal).
pub trait CostSource: Send + Sync {
    /// Perspective names, in reporting order.
    fn perspectives(&self) -> Vec<String>;

    /// Cost table for `perspective`, if one exists.
    fn cost_table(&self, perspective: &str) -> Option<&CostTable>;

    /// Annual discount rate.
    fn discount_rate(&self) -> f64;
}

/// Health-state utility inputs.
pub trait UtilitySource: Send + Sync {
    /// Utility tensors for the population state.
    fn utility_table(&self) -> &UtilityTable;

    /// Annual discount rate.
    fn discount_rate(&self) -> f64;
}
