//! Rate inputs for the simulation.
//!
//! - [`RateSet`]: the in-memory bundle of every rate tensor, built with
//!   [`RateSetBuilder`]
//! - [`RateSource`], [`CostSource`], [`UtilitySource`]: the read contracts
//!   loaders implement

mod set;
mod traits;

pub use set::{RateSet, RateSetBuilder, RowDeviation};
pub use traits::{CostSource, RateSource, UtilitySource};
