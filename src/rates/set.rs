//! The in-memory rate bundle and its builder.

use ndarray::Axis;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{DataError, RespondError, RespondResult, ShapeError, ValidationError};
use crate::rates::traits::RateSource;
use crate::series::TimedTensorSeries;
use crate::strata::StrataLayout;
use crate::tensor::{StrataAxis, StrataShape, StrataTensor};

/// Every rate tensor one simulation consumes.
///
/// A `RateSet` is built once (through [`RateSetBuilder`] or
/// [`RateSet::from_json_str`]) and never mutated afterwards. The runner reads
/// it through the [`RateSource`] contract.
///
/// Both construction paths apply the layout rules: initial-sample rows of
/// post-treatment interventions are zeroed, and a missing age-group shift
/// falls back to [`StrataLayout::age_group_shift`].
///
/// Series default to [`ChangeTimeConvention::EffectiveFrom`]. Change-time
/// lists converted from the legacy input files name the last week a value
/// applies and must be loaded with [`ChangeTimeConvention::EffectiveUntil`].
///
/// [`ChangeTimeConvention::EffectiveFrom`]:
///     crate::series::ChangeTimeConvention::EffectiveFrom
/// [`ChangeTimeConvention::EffectiveUntil`]:
///     crate::series::ChangeTimeConvention::EffectiveUntil
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    layout: Option<StrataLayout>,
    initial_sample: StrataTensor,
    entering_samples: TimedTensorSeries,
    behavior_transition_rates: StrataTensor,
    intervention_transition_rates: TimedTensorSeries,
    intervention_init_rates: StrataTensor,
    overdose_rates: TimedTensorSeries,
    fatal_overdose_rates: TimedTensorSeries,
    mortality_rates: StrataTensor,
    #[serde(default)]
    aging_interval: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    age_group_shift: Option<usize>,
}

/// A transition row whose probabilities do not sum to one.
#[derive(Debug, Clone, PartialEq)]
pub struct RowDeviation {
    /// Name of the offending tensor.
    pub tensor: &'static str,
    /// Cell in state coordinates; the transition axis holds the source state.
    pub cell: (usize, usize, usize),
    /// Actual row sum.
    pub sum: f64,
}

impl RateSet {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> RateSetBuilder {
        RateSetBuilder::new()
    }

    /// Names of the strata, when the set was built with a layout.
    #[must_use]
    pub fn layout(&self) -> Option<&StrataLayout> {
        self.layout.as_ref()
    }

    /// Change-time series of entering samples.
    #[must_use]
    pub fn entering_samples_series(&self) -> &TimedTensorSeries {
        &self.entering_samples
    }

    /// Change-time series of intervention transitions.
    #[must_use]
    pub fn intervention_transition_series(&self) -> &TimedTensorSeries {
        &self.intervention_transition_rates
    }

    /// Change-time series of overdose probabilities.
    #[must_use]
    pub fn overdose_series(&self) -> &TimedTensorSeries {
        &self.overdose_rates
    }

    /// Change-time series of fatal-overdose probabilities.
    #[must_use]
    pub fn fatal_overdose_series(&self) -> &TimedTensorSeries {
        &self.fatal_overdose_rates
    }

    /// Checks every tensor against the state shape, every series for
    /// entries, and every probability tensor for values in `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns [`RespondError::Shape`] for a shape mismatch,
    /// [`RespondError::Data`] for an empty series, and
    /// [`RespondError::Validation`] for out-of-range values.
    pub fn validate(&self) -> RespondResult<()> {
        self.validate_shapes()?;

        if let Some(layout) = &self.layout {
            layout.validate()?;
            if layout.shape() != self.shape() {
                return Err(ShapeError::Mismatch {
                    context: "strata layout".to_string(),
                    expected: layout.shape(),
                    actual: self.shape(),
                }
                .into());
            }
        }

        if self.initial_sample.iter().any(|v| *v < 0.0 || v.is_nan()) {
            return Err(ValidationError::NegativeValue {
                name: "initial_sample".to_string(),
            }
            .into());
        }

        check_probabilities("behavior_transition_rates", &self.behavior_transition_rates)?;
        check_probabilities("intervention_init_rates", &self.intervention_init_rates)?;
        check_probabilities("mortality_rates", &self.mortality_rates)?;
        for tensor in self.intervention_transition_rates.tensors() {
            check_probabilities("intervention_transition_rates", tensor)?;
        }
        for tensor in self.overdose_rates.tensors() {
            check_probabilities("overdose_rates", tensor)?;
        }
        for tensor in self.fatal_overdose_rates.tensors() {
            check_probabilities("fatal_overdose_rates", tensor)?;
        }
        Ok(())
    }

    /// Zeroes initial-sample rows of post-treatment interventions. Nobody
    /// starts a run in a post-treatment state.
    fn apply_layout_rules(&mut self) {
        let Some(layout) = &self.layout else {
            return;
        };
        let state = self.initial_sample.shape();
        for index in layout.post_treatment_indices() {
            if index >= state.interventions {
                continue;
            }
            let population = self.initial_sample.slab(StrataAxis::Intervention, index).sum();
            if population == 0.0 {
                continue;
            }
            warn!(
                target: "respond::rates",
                intervention = %layout.interventions[index].name,
                population,
                "zeroing initial sample for post-treatment intervention"
            );
            for b in 0..state.behaviors {
                for d in 0..state.demographics {
                    self.initial_sample[(index, b, d)] = 0.0;
                }
            }
        }
    }

    fn validate_shapes(&self) -> RespondResult<()> {
        let state = self.initial_sample.shape();
        for axis in StrataAxis::ALL {
            if state.extent(axis) == 0 {
                return Err(ShapeError::EmptyAxis { axis }.into());
            }
        }

        expect_shape(
            "behavior_transition_rates",
            &self.behavior_transition_rates,
            state.transition_along(StrataAxis::Behavior),
        )?;
        expect_shape(
            "intervention_init_rates",
            &self.intervention_init_rates,
            state.transition_along(StrataAxis::Behavior),
        )?;
        expect_shape("mortality_rates", &self.mortality_rates, state)?;

        let series: [(&str, &TimedTensorSeries, StrataShape); 4] = [
            ("entering_samples", &self.entering_samples, state),
            (
                "intervention_transition_rates",
                &self.intervention_transition_rates,
                state.transition_along(StrataAxis::Intervention),
            ),
            ("overdose_rates", &self.overdose_rates, state),
            ("fatal_overdose_rates", &self.fatal_overdose_rates, state),
        ];
        for (name, series, expected) in series {
            if series.is_empty() {
                return Err(DataError::EmptySeries {
                    name: name.to_string(),
                }
                .into());
            }
            for tensor in series.tensors() {
                expect_shape(name, tensor, expected)?;
            }
        }
        Ok(())
    }

    /// Reports transition rows that do not sum to one within `tolerance`.
    ///
    /// Covers the behavior transitions, every intervention transition entry,
    /// and the initiation reallocation.
    ///
    /// # Errors
    ///
    /// Returns an error if the tensor shapes are inconsistent (see
    /// [`RateSet::validate`]).
    pub fn check_row_stochastic(&self, tolerance: f64) -> RespondResult<Vec<RowDeviation>> {
        self.validate_shapes()?;
        let shape = self.shape();
        let mut deviations = Vec::new();
        row_deviations(
            "behavior_transition_rates",
            &self.behavior_transition_rates,
            StrataAxis::Behavior,
            shape.behaviors,
            tolerance,
            &mut deviations,
        );
        row_deviations(
            "intervention_init_rates",
            &self.intervention_init_rates,
            StrataAxis::Behavior,
            shape.behaviors,
            tolerance,
            &mut deviations,
        );
        for tensor in self.intervention_transition_rates.tensors() {
            row_deviations(
                "intervention_transition_rates",
                tensor,
                StrataAxis::Intervention,
                shape.interventions,
                tolerance,
                &mut deviations,
            );
        }
        Ok(deviations)
    }

    /// Parses and validates a rate set from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidScenario`] for malformed JSON, or any
    /// error from [`RateSet::validate`].
    pub fn from_json_str(json: &str) -> RespondResult<Self> {
        let mut rates: Self =
            serde_json::from_str(json).map_err(|e| ValidationError::InvalidScenario {
                reason: e.to_string(),
            })?;
        rates.apply_layout_rules();
        rates.validate()?;
        Ok(rates)
    }

    /// Serializes the rate set to JSON.
    ///
    /// # Errors
    ///
    /// Returns [`RespondError::Internal`] if serialization fails.
    pub fn to_json_string(&self) -> RespondResult<String> {
        serde_json::to_string(self)
            .map_err(|e| RespondError::internal(format!("failed to serialize rate set: {e}")))
    }
}

impl RateSource for RateSet {
    fn shape(&self) -> StrataShape {
        self.initial_sample.shape()
    }

    fn initial_sample(&self) -> &StrataTensor {
        &self.initial_sample
    }

    fn entering_samples(&self, timestep: u32) -> Result<&StrataTensor, DataError> {
        lookup("entering_samples", &self.entering_samples, timestep)
    }

    fn behavior_transition_rates(&self) -> &StrataTensor {
        &self.behavior_transition_rates
    }

    fn intervention_transition_rates(&self, timestep: u32) -> Result<&StrataTensor, DataError> {
        lookup(
            "intervention_transition_rates",
            &self.intervention_transition_rates,
            timestep,
        )
    }

    fn intervention_init_rates(&self) -> &StrataTensor {
        &self.intervention_init_rates
    }

    fn overdose_rates(&self, timestep: u32) -> Result<&StrataTensor, DataError> {
        lookup("overdose_rates", &self.overdose_rates, timestep)
    }

    fn fatal_overdose_rates(&self, timestep: u32) -> Result<&StrataTensor, DataError> {
        lookup("fatal_overdose_rates", &self.fatal_overdose_rates, timestep)
    }

    fn mortality_rates(&self) -> &StrataTensor {
        &self.mortality_rates
    }

    fn aging_interval(&self) -> u32 {
        self.aging_interval
    }

    fn age_group_shift(&self) -> usize {
        self.age_group_shift
            .or_else(|| self.layout.as_ref().map(StrataLayout::age_group_shift))
            .unwrap_or(0)
    }
}

fn lookup<'a>(
    name: &str,
    series: &'a TimedTensorSeries,
    timestep: u32,
) -> Result<&'a StrataTensor, DataError> {
    series.at(timestep).map_err(|e| match e {
        DataError::EmptySeries { .. } => DataError::EmptySeries {
            name: name.to_string(),
        },
        other => other,
    })
}

fn expect_shape(
    name: &str,
    tensor: &StrataTensor,
    expected: StrataShape,
) -> Result<(), ShapeError> {
    if tensor.shape() == expected {
        Ok(())
    } else {
        Err(ShapeError::Mismatch {
            context: name.to_string(),
            expected,
            actual: tensor.shape(),
        })
    }
}

fn check_probabilities(name: &str, tensor: &StrataTensor) -> Result<(), ValidationError> {
    match tensor.iter().find(|v| !(0.0..=1.0).contains(*v)) {
        Some(value) => Err(ValidationError::ProbabilityOutOfRange {
            name: name.to_string(),
            value: *value,
        }),
        None => Ok(()),
    }
}

fn row_deviations(
    name: &'static str,
    tensor: &StrataTensor,
    axis: StrataAxis,
    n: usize,
    tolerance: f64,
    out: &mut Vec<RowDeviation>,
) {
    for source in 0..n {
        let block = tensor.block(axis, source * n, n);
        let sums = block.view().sum_axis(Axis(axis.position()));
        for ((a, b), &sum) in sums.indexed_iter() {
            if (sum - 1.0).abs() > tolerance {
                let cell = match axis {
                    StrataAxis::Intervention => (source, a, b),
                    StrataAxis::Behavior => (a, source, b),
                    StrataAxis::Demographic => (a, b, source),
                };
                out.push(RowDeviation {
                    tensor: name,
                    cell,
                    sum,
                });
            }
        }
    }
}

/// Builder for [`RateSet`].
///
/// ```
/// use respond::{RateSet, RateSource, StrataAxis, StrataShape, StrataTensor, TimedTensorSeries};
///
/// let shape = StrataShape::new(1, 1, 1);
/// let rates = RateSet::builder()
///     .initial_sample(StrataTensor::filled(shape, 10.0))
///     .entering_samples(TimedTensorSeries::constant(StrataTensor::zeros(shape)))
///     .behavior_transition_rates(StrataTensor::identity_transition(shape, StrataAxis::Behavior))
///     .intervention_transition_rates(TimedTensorSeries::constant(
///         StrataTensor::identity_transition(shape, StrataAxis::Intervention),
///     ))
///     .intervention_init_rates(StrataTensor::identity_transition(shape, StrataAxis::Behavior))
///     .overdose_rates(TimedTensorSeries::constant(StrataTensor::zeros(shape)))
///     .fatal_overdose_rates(TimedTensorSeries::constant(StrataTensor::zeros(shape)))
///     .mortality_rates(StrataTensor::zeros(shape))
///     .build()
///     .unwrap();
/// assert_eq!(rates.initial_sample().sum(), 10.0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RateSetBuilder {
    layout: Option<StrataLayout>,
    initial_sample: Option<StrataTensor>,
    entering_samples: Option<TimedTensorSeries>,
    behavior_transition_rates: Option<StrataTensor>,
    intervention_transition_rates: Option<TimedTensorSeries>,
    intervention_init_rates: Option<StrataTensor>,
    overdose_rates: Option<TimedTensorSeries>,
    fatal_overdose_rates: Option<TimedTensorSeries>,
    mortality_rates: Option<StrataTensor>,
    aging_interval: Option<u32>,
    age_group_shift: Option<usize>,
}

impl RateSetBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Names the strata. Enables post-treatment row zeroing and supplies the
    /// default aging shift.
    #[must_use]
    pub fn layout(mut self, layout: StrataLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Population at timestep 0.
    #[must_use]
    pub fn initial_sample(mut self, tensor: StrataTensor) -> Self {
        self.initial_sample = Some(tensor);
        self
    }

    /// Entering cohorts by change time.
    #[must_use]
    pub fn entering_samples(mut self, series: TimedTensorSeries) -> Self {
        self.entering_samples = Some(series);
        self
    }

    /// Static behavior transitions, `[I, B², D]`.
    #[must_use]
    pub fn behavior_transition_rates(mut self, tensor: StrataTensor) -> Self {
        self.behavior_transition_rates = Some(tensor);
        self
    }

    /// Intervention transitions by change time, `[I², B, D]`.
    #[must_use]
    pub fn intervention_transition_rates(mut self, series: TimedTensorSeries) -> Self {
        self.intervention_transition_rates = Some(series);
        self
    }

    /// Initiation reallocation, `[I, B², D]`.
    #[must_use]
    pub fn intervention_init_rates(mut self, tensor: StrataTensor) -> Self {
        self.intervention_init_rates = Some(tensor);
        self
    }

    /// Overdose probabilities by change time.
    #[must_use]
    pub fn overdose_rates(mut self, series: TimedTensorSeries) -> Self {
        self.overdose_rates = Some(series);
        self
    }

    /// Fatal-overdose probabilities by change time.
    #[must_use]
    pub fn fatal_overdose_rates(mut self, series: TimedTensorSeries) -> Self {
        self.fatal_overdose_rates = Some(series);
        self
    }

    /// Static background mortality.
    #[must_use]
    pub fn mortality_rates(mut self, tensor: StrataTensor) -> Self {
        self.mortality_rates = Some(tensor);
        self
    }

    /// Timesteps between aging events. Defaults to 0 (no aging).
    #[must_use]
    pub fn aging_interval(mut self, interval: u32) -> Self {
        self.aging_interval = Some(interval);
        self
    }

    /// Demographic slots shifted per aging event. Defaults to the layout's
    /// [`StrataLayout::age_group_shift`], or 0 without a layout.
    #[must_use]
    pub fn age_group_shift(mut self, shift: usize) -> Self {
        self.age_group_shift = Some(shift);
        self
    }

    /// Background mortality adjusted by a standardized mortality ratio:
    /// `1 - exp(ln(1 - background) * smr)`, elementwise.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::Mismatch`] if the tensors differ in shape.
    pub fn mortality_from_smr(
        background: &StrataTensor,
        smr: &StrataTensor,
    ) -> Result<StrataTensor, ShapeError> {
        let log_survival = background.map(|p| (1.0 - p).ln());
        Ok(log_survival.mul(smr)?.map(|v| 1.0 - v.exp()))
    }

    /// Validates and assembles the rate set.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MissingField`] for an unset tensor, or any
    /// error from [`RateSet::validate`].
    pub fn build(self) -> RespondResult<RateSet> {
        let mut rates = RateSet {
            initial_sample: required(self.initial_sample, "initial_sample")?,
            entering_samples: required(self.entering_samples, "entering_samples")?,
            behavior_transition_rates: required(
                self.behavior_transition_rates,
                "behavior_transition_rates",
            )?,
            intervention_transition_rates: required(
                self.intervention_transition_rates,
                "intervention_transition_rates",
            )?,
            intervention_init_rates: required(
                self.intervention_init_rates,
                "intervention_init_rates",
            )?,
            overdose_rates: required(self.overdose_rates, "overdose_rates")?,
            fatal_overdose_rates: required(self.fatal_overdose_rates, "fatal_overdose_rates")?,
            mortality_rates: required(self.mortality_rates, "mortality_rates")?,
            aging_interval: self.aging_interval.unwrap_or(0),
            age_group_shift: self.age_group_shift,
            layout: self.layout,
        };
        rates.apply_layout_rules();
        rates.validate()?;
        Ok(rates)
    }
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, ValidationError> {
    value.ok_or_else(|| ValidationError::MissingField {
        field: field.to_string(),
    })
}
