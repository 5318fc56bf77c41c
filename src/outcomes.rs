//! Cost, utility, and life-year outcomes computed from a finished [`History`].
//!
//! Every outcome is a linear transform of the recorded series: person-weeks
//! in each stratum are weighted by a per-stratum cost or utility, overdose
//! events by a per-event cost, and optionally discounted by timestep.

use serde::{Deserialize, Serialize};

use crate::error::{RespondResult, ShapeError, ValidationError};
use crate::rates::{CostSource, UtilitySource};
use crate::series::TimedTensorSeries;
use crate::simulation::History;
use crate::tensor::{StrataShape, StrataTensor};

/// Timesteps per year.
pub const WEEKS_PER_YEAR: f64 = 52.0;

/// Discounting formula for weekly timesteps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Discounting {
    /// `1 / (1 + r / 52)^t`.
    #[default]
    Discrete,
    /// `exp(-r * t / 52)`.
    Continuous,
}

impl Discounting {
    /// Factor applied to values recorded at `timestep` for annual rate `rate`.
    #[must_use]
    pub fn factor(self, rate: f64, timestep: u32) -> f64 {
        let t = f64::from(timestep);
        match self {
            Self::Discrete => (1.0 + rate / WEEKS_PER_YEAR).powf(t).recip(),
            Self::Continuous => (-rate * t / WEEKS_PER_YEAR).exp(),
        }
    }
}

/// How the three utility tensors combine into one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UtilityCombination {
    /// Elementwise minimum.
    Min,
    /// Elementwise product.
    #[default]
    Multiply,
}

/// Outcome calculation settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeConfig {
    /// Annual discount rate for life years.
    pub discount_rate: f64,
    /// Discounting formula for every outcome.
    pub discounting: Discounting,
    /// Utility combination rule.
    pub utility_combination: UtilityCombination,
}

impl Default for OutcomeConfig {
    fn default() -> Self {
        Self {
            discount_rate: 0.03,
            discounting: Discounting::Discrete,
            utility_combination: UtilityCombination::Multiply,
        }
    }
}

impl OutcomeConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::NegativeValue`] for a negative discount
    /// rate and [`ValidationError::InvalidConfig`] for a non-finite one.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.discount_rate.is_finite() {
            return Err(ValidationError::InvalidConfig {
                reason: "discount_rate must be finite".to_string(),
            });
        }
        if self.discount_rate < 0.0 {
            return Err(ValidationError::NegativeValue {
                name: "discount_rate".to_string(),
            });
        }
        Ok(())
    }
}

/// Weekly costs for one perspective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostTable {
    /// Healthcare utilization cost per person-week, `[I, B, D]`.
    pub healthcare_utilization: StrataTensor,
    /// Pharmaceutical cost per person-week, `[I, B, D]`.
    pub pharmaceutical: StrataTensor,
    /// Treatment utilization cost per person-week, `[I, B, D]`.
    pub treatment_utilization: StrataTensor,
    /// Cost per non-fatal overdose.
    pub non_fatal_overdose: f64,
    /// Cost per fatal overdose.
    pub fatal_overdose: f64,
}

impl CostTable {
    /// Checks tensor shapes against `shape` and that no cost is negative.
    ///
    /// # Errors
    ///
    /// Returns a shape or validation error naming the offending component.
    pub fn validate(&self, shape: StrataShape) -> RespondResult<()> {
        for (name, tensor) in [
            ("healthcare_utilization", &self.healthcare_utilization),
            ("pharmaceutical", &self.pharmaceutical),
            ("treatment_utilization", &self.treatment_utilization),
        ] {
            if tensor.shape() != shape {
                return Err(ShapeError::Mismatch {
                    context: format!("{name} cost"),
                    expected: shape,
                    actual: tensor.shape(),
                }
                .into());
            }
            if tensor.iter().any(|v| *v < 0.0) {
                return Err(ValidationError::NegativeValue {
                    name: name.to_string(),
                }
                .into());
            }
        }
        for (name, value) in [
            ("non_fatal_overdose", self.non_fatal_overdose),
            ("fatal_overdose", self.fatal_overdose),
        ] {
            if value < 0.0 {
                return Err(ValidationError::NegativeValue {
                    name: name.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }
}

/// Cost tables keyed by perspective, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostTables {
    discount_rate: f64,
    perspectives: Vec<(String, CostTable)>,
}

impl CostTables {
    /// No perspectives yet.
    #[must_use]
    pub fn new(discount_rate: f64) -> Self {
        Self {
            discount_rate,
            perspectives: Vec::new(),
        }
    }

    /// Adds or replaces the table for `perspective`.
    #[must_use]
    pub fn with_perspective(mut self, perspective: impl Into<String>, table: CostTable) -> Self {
        let perspective = perspective.into();
        if let Some(slot) = self.perspectives.iter_mut().find(|(p, _)| *p == perspective) {
            slot.1 = table;
        } else {
            self.perspectives.push((perspective, table));
        }
        self
    }
}

impl CostSource for CostTables {
    fn perspectives(&self) -> Vec<String> {
        self.perspectives.iter().map(|(p, _)| p.clone()).collect()
    }

    fn cost_table(&self, perspective: &str) -> Option<&CostTable> {
        self.perspectives
            .iter()
            .find(|(p, _)| p == perspective)
            .map(|(_, table)| table)
    }

    fn discount_rate(&self) -> f64 {
        self.discount_rate
    }
}

/// Health-state utilities, each `[I, B, D]` with values in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilityTable {
    /// Background utility by demographic.
    pub background: StrataTensor,
    /// Utility of each behavior state.
    pub behavior: StrataTensor,
    /// Utility of each intervention setting.
    pub setting: StrataTensor,
    /// Annual discount rate.
    #[serde(default)]
    pub discount_rate: f64,
}

impl UtilityTable {
    /// Creates a table with no discounting.
    #[must_use]
    pub fn new(background: StrataTensor, behavior: StrataTensor, setting: StrataTensor) -> Self {
        Self {
            background,
            behavior,
            setting,
            discount_rate: 0.0,
        }
    }

    /// Sets the annual discount rate.
    #[must_use]
    pub fn with_discount_rate(mut self, rate: f64) -> Self {
        self.discount_rate = rate;
        self
    }

    /// Combines the three tensors into one.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::Mismatch`] if the tensors differ in shape.
    pub fn combined(&self, combination: UtilityCombination) -> Result<StrataTensor, ShapeError> {
        match combination {
            UtilityCombination::Min => self.background.min(&self.behavior)?.min(&self.setting),
            UtilityCombination::Multiply => self.background.mul(&self.behavior)?.mul(&self.setting),
        }
    }
}

impl UtilitySource for UtilityTable {
    fn utility_table(&self) -> &UtilityTable {
        self
    }

    fn discount_rate(&self) -> f64 {
        self.discount_rate
    }
}

/// Per-timestep costs for one perspective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    /// Perspective name.
    pub perspective: String,
    /// State × healthcare utilization cost.
    pub healthcare_utilization: TimedTensorSeries,
    /// State × pharmaceutical cost.
    pub pharmaceutical: TimedTensorSeries,
    /// State × treatment utilization cost.
    pub treatment_utilization: TimedTensorSeries,
    /// Overdoses × non-fatal overdose cost.
    pub non_fatal_overdose: TimedTensorSeries,
    /// Fatal overdoses × fatal overdose cost.
    pub fatal_overdose: TimedTensorSeries,
}

impl CostBreakdown {
    fn components(&self) -> [&TimedTensorSeries; 5] {
        [
            &self.healthcare_utilization,
            &self.pharmaceutical,
            &self.treatment_utilization,
            &self.non_fatal_overdose,
            &self.fatal_overdose,
        ]
    }

    /// Sum of every component over all timesteps and strata.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.components().into_iter().map(series_total).sum()
    }
}

/// Aggregate outcomes for one perspective.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    /// Undiscounted cost.
    pub base_costs: f64,
    /// Discounted cost.
    pub discounted_costs: f64,
    /// Undiscounted life years.
    pub base_life_years: f64,
    /// Discounted life years.
    pub discounted_life_years: f64,
    /// Undiscounted utility-weighted person-weeks.
    pub base_utility: f64,
    /// Discounted utility-weighted person-weeks.
    pub discounted_utility: f64,
}

/// Computes outcomes from a history.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutcomeCalculator {
    config: OutcomeConfig,
}

impl OutcomeCalculator {
    /// Creates a calculator.
    ///
    /// # Errors
    ///
    /// Returns any error from [`OutcomeConfig::validate`].
    pub fn new(config: OutcomeConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Settings in use.
    #[must_use]
    pub const fn config(&self) -> &OutcomeConfig {
        &self.config
    }

    /// Per-timestep costs for `perspective`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownPerspective`] if `costs` has no such
    /// table, or a shape error if the table does not match the history.
    pub fn costs(
        &self,
        history: &History,
        costs: &dyn CostSource,
        perspective: &str,
        discount: bool,
    ) -> RespondResult<CostBreakdown> {
        let table = costs
            .cost_table(perspective)
            .ok_or_else(|| ValidationError::UnknownPerspective {
                perspective: perspective.to_string(),
            })?;
        if let Some(shape) = history.state_history().shape() {
            table.validate(shape)?;
        }
        let rate = if discount { Some(costs.discount_rate()) } else { None };
        let state = history.state_history();
        Ok(CostBreakdown {
            perspective: perspective.to_string(),
            healthcare_utilization: self.weighted(state, &table.healthcare_utilization, rate)?,
            pharmaceutical: self.weighted(state, &table.pharmaceutical, rate)?,
            treatment_utilization: self.weighted(state, &table.treatment_utilization, rate)?,
            non_fatal_overdose: self.scaled(
                history.overdose_history(),
                table.non_fatal_overdose,
                rate,
            ),
            fatal_overdose: self.scaled(
                history.fatal_overdose_history(),
                table.fatal_overdose,
                rate,
            ),
        })
    }

    /// Per-timestep utility-weighted population.
    ///
    /// # Errors
    ///
    /// Returns a shape error if the utility tensors do not match the history.
    pub fn utilities(
        &self,
        history: &History,
        utilities: &dyn UtilitySource,
        discount: bool,
    ) -> RespondResult<TimedTensorSeries> {
        let combined = utilities
            .utility_table()
            .combined(self.config.utility_combination)?;
        let rate = if discount { Some(utilities.discount_rate()) } else { None };
        self.weighted(history.state_history(), &combined, rate)
    }

    /// Person-weeks over the whole run, in years.
    #[must_use]
    pub fn life_years(&self, history: &History, discount: bool) -> f64 {
        let rate = if discount { Some(self.config.discount_rate) } else { None };
        history
            .state_history()
            .iter()
            .map(|(t, state)| state.sum() * self.factor(rate, t))
            .sum::<f64>()
            / WEEKS_PER_YEAR
    }

    /// Totals for every perspective of `costs`, in perspective order.
    ///
    /// # Errors
    ///
    /// Returns the first cost or utility error.
    pub fn totals(
        &self,
        history: &History,
        costs: &dyn CostSource,
        utilities: &dyn UtilitySource,
    ) -> RespondResult<Vec<(String, Totals)>> {
        let base_utility = series_total(&self.utilities(history, utilities, false)?);
        let discounted_utility = series_total(&self.utilities(history, utilities, true)?);
        let base_life_years = self.life_years(history, false);
        let discounted_life_years = self.life_years(history, true);

        costs
            .perspectives()
            .into_iter()
            .map(|perspective| {
                let totals = Totals {
                    base_costs: self.costs(history, costs, &perspective, false)?.total(),
                    discounted_costs: self.costs(history, costs, &perspective, true)?.total(),
                    base_life_years,
                    discounted_life_years,
                    base_utility,
                    discounted_utility,
                };
                Ok((perspective, totals))
            })
            .collect()
    }

    fn factor(&self, rate: Option<f64>, timestep: u32) -> f64 {
        rate.map_or(1.0, |r| self.config.discounting.factor(r, timestep))
    }

    fn weighted(
        &self,
        series: &TimedTensorSeries,
        weights: &StrataTensor,
        rate: Option<f64>,
    ) -> RespondResult<TimedTensorSeries> {
        let mut out = TimedTensorSeries::with_convention(series.convention());
        for (t, tensor) in series.iter() {
            out.insert(t, tensor.mul(weights)?.scale(self.factor(rate, t)))?;
        }
        Ok(out)
    }

    fn scaled(
        &self,
        series: &TimedTensorSeries,
        value: f64,
        rate: Option<f64>,
    ) -> TimedTensorSeries {
        series.map_tensors(|t, tensor| tensor.scale(value * self.factor(rate, t)))
    }
}

fn series_total(series: &TimedTensorSeries) -> f64 {
    series.tensors().map(StrataTensor::sum).sum()
}
