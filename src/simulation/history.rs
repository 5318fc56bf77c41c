//! Time-indexed simulation output.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DataError, RespondResult};
use crate::series::{ChangeTimeConvention, TimedTensorSeries};
use crate::tensor::StrataTensor;

/// One of the five series a [`History`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistorySeries {
    /// Population at the start of each timestep.
    State,
    /// Overdoses during the preceding step.
    Overdose,
    /// Fatal overdoses during the preceding step.
    FatalOverdose,
    /// Background deaths during the preceding step.
    Mortality,
    /// Population after the intervention transition of the preceding step.
    InterventionAdmission,
}

impl HistorySeries {
    /// All series in recording order.
    pub const ALL: [Self; 5] = [
        Self::State,
        Self::Overdose,
        Self::FatalOverdose,
        Self::Mortality,
        Self::InterventionAdmission,
    ];

    /// Stable snake_case name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::State => "state",
            Self::Overdose => "overdose",
            Self::FatalOverdose => "fatal_overdose",
            Self::Mortality => "mortality",
            Self::InterventionAdmission => "intervention_admission",
        }
    }
}

impl fmt::Display for HistorySeries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Every tensor computed by one simulation step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    /// State after aging and the entering cohort, clamped at zero.
    pub after_entry: StrataTensor,
    /// State after the behavior and intervention transitions.
    pub admissions: StrataTensor,
    /// Overdoses.
    pub overdoses: StrataTensor,
    /// Fatal overdoses.
    pub fatal_overdoses: StrataTensor,
    /// Background deaths.
    pub mortalities: StrataTensor,
    /// State entering the next timestep.
    pub state: StrataTensor,
}

/// Output of a simulation run: five series keyed `0..=duration`.
///
/// Timestep 0 holds the initial sample in the state series and zeros in
/// the others. A `History` is append-only while the runner owns it and
/// read-only once handed out. Every series uses
/// [`ChangeTimeConvention::Exact`]: a lookup past the last recorded
/// timestep is an error, never the last value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    state: TimedTensorSeries,
    overdose: TimedTensorSeries,
    fatal_overdose: TimedTensorSeries,
    mortality: TimedTensorSeries,
    intervention_admission: TimedTensorSeries,
}

impl History {
    /// A history holding only timestep 0.
    #[must_use]
    pub fn starting_from(initial_sample: &StrataTensor) -> Self {
        let zeros = StrataTensor::zeros(initial_sample.shape());
        let at_start = |tensor| TimedTensorSeries::single(ChangeTimeConvention::Exact, 0, tensor);
        Self {
            state: at_start(initial_sample.clone()),
            overdose: at_start(zeros.clone()),
            fatal_overdose: at_start(zeros.clone()),
            mortality: at_start(zeros.clone()),
            intervention_admission: at_start(zeros),
        }
    }

    pub(crate) fn record(&mut self, timestep: u32, step: StepRecord) -> RespondResult<()> {
        self.intervention_admission.insert(timestep, step.admissions)?;
        self.overdose.insert(timestep, step.overdoses)?;
        self.fatal_overdose.insert(timestep, step.fatal_overdoses)?;
        self.mortality.insert(timestep, step.mortalities)?;
        self.state.insert(timestep, step.state)
    }

    /// The requested series.
    #[must_use]
    pub const fn series(&self, which: HistorySeries) -> &TimedTensorSeries {
        match which {
            HistorySeries::State => &self.state,
            HistorySeries::Overdose => &self.overdose,
            HistorySeries::FatalOverdose => &self.fatal_overdose,
            HistorySeries::Mortality => &self.mortality,
            HistorySeries::InterventionAdmission => &self.intervention_admission,
        }
    }

    /// Population series. Keyed exactly `0..=duration`.
    #[must_use]
    pub const fn state_history(&self) -> &TimedTensorSeries {
        &self.state
    }

    /// Overdose series. Keyed exactly `0..=duration`.
    #[must_use]
    pub const fn overdose_history(&self) -> &TimedTensorSeries {
        &self.overdose
    }

    /// Fatal-overdose series. Keyed exactly `0..=duration`.
    #[must_use]
    pub const fn fatal_overdose_history(&self) -> &TimedTensorSeries {
        &self.fatal_overdose
    }

    /// Background mortality series. Keyed exactly `0..=duration`.
    #[must_use]
    pub const fn mortality_history(&self) -> &TimedTensorSeries {
        &self.mortality
    }

    /// Intervention admission series. Keyed exactly `0..=duration`.
    #[must_use]
    pub const fn intervention_admission_history(&self) -> &TimedTensorSeries {
        &self.intervention_admission
    }

    /// Population at exactly `timestep`.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::MissingTimestep`] if the run did not reach
    /// `timestep`.
    pub fn at(&self, timestep: u32) -> Result<&StrataTensor, DataError> {
        self.state.exact(timestep)
    }

    /// Recorded timesteps in ascending order.
    #[must_use]
    pub fn all_timesteps(&self) -> Vec<u32> {
        self.state.all_timesteps()
    }

    /// True before a run has recorded anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    /// Digest of every recorded value. Two histories share a fingerprint
    /// only if every series is bit-identical.
    #[must_use]
    pub fn fingerprint(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        for which in HistorySeries::ALL {
            hasher.update(which.name().as_bytes());
            for (timestep, tensor) in self.series(which).iter() {
                hasher.update(&timestep.to_le_bytes());
                tensor.hash_into(&mut hasher);
            }
        }
        hasher.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::StrataShape;

    fn step(value: f64) -> StepRecord {
        let t = StrataTensor::filled(StrataShape::new(1, 1, 2), value);
        StepRecord {
            after_entry: t.clone(),
            admissions: t.clone(),
            overdoses: t.scale(0.5),
            fatal_overdoses: t.scale(0.25),
            mortalities: t.scale(0.125),
            state: t,
        }
    }

    #[test]
    fn default_history_is_empty() {
        let history = History::default();
        assert!(history.is_empty());
        assert!(history.all_timesteps().is_empty());
        assert!(history.at(0).is_err());
    }

    #[test]
    fn starts_with_initial_sample_and_zeros() {
        let initial = StrataTensor::filled(StrataShape::new(1, 1, 2), 3.0);
        let history = History::starting_from(&initial);
        assert_eq!(history.at(0).unwrap(), &initial);
        for which in [
            HistorySeries::Overdose,
            HistorySeries::FatalOverdose,
            HistorySeries::Mortality,
            HistorySeries::InterventionAdmission,
        ] {
            assert_eq!(history.series(which).exact(0).unwrap().sum(), 0.0);
        }
    }

    #[test]
    fn record_appends_every_series() {
        let mut history = History::starting_from(&StrataTensor::zeros(StrataShape::new(1, 1, 2)));
        history.record(1, step(2.0)).unwrap();
        assert_eq!(history.all_timesteps(), vec![0, 1]);
        assert_eq!(history.overdose_history().exact(1).unwrap().sum(), 2.0);
        assert_eq!(history.mortality_history().exact(1).unwrap().sum(), 0.5);
        assert!(matches!(
            history.at(2),
            Err(DataError::MissingTimestep { timestep: 2 })
        ));
    }

    #[test]
    fn series_lookups_past_the_run_fail() {
        let mut history = History::starting_from(&StrataTensor::zeros(StrataShape::new(1, 1, 2)));
        history.record(1, step(2.0)).unwrap();
        for which in HistorySeries::ALL {
            assert_eq!(
                history.series(which).at(999),
                Err(DataError::MissingTimestep { timestep: 999 })
            );
        }
        assert_eq!(history.overdose_history().at(1).unwrap().sum(), 2.0);
    }

    #[test]
    fn record_rejects_a_timestep_twice() {
        let mut history = History::starting_from(&StrataTensor::zeros(StrataShape::new(1, 1, 2)));
        history.record(1, step(2.0)).unwrap();
        let err = history.record(1, step(3.0)).unwrap_err();
        assert!(err.is_data());
        assert_eq!(history.at(1).unwrap().sum(), 4.0);
    }

    #[test]
    fn fingerprint_tracks_values() {
        let base = History::starting_from(&StrataTensor::zeros(StrataShape::new(1, 1, 2)));
        let mut a = base.clone();
        let mut b = base.clone();
        a.record(1, step(1.0)).unwrap();
        b.record(1, step(1.0)).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut c = base;
        c.record(1, step(1.0 + 1e-12)).unwrap();
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
