//! Timestep-keyed tensor series.
//!
//! Rates are step functions over weekly timesteps: a value is stored once per
//! change time and holds until the next one. [`TimedTensorSeries::at`] returns
//! the value in effect at a timestep; [`TimedTensorSeries::exact`] returns only
//! values recorded at exactly that key. Simulation output uses
//! [`ChangeTimeConvention::Exact`], so its `at` never falls back.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{DataError, RespondResult, ShapeError};
use crate::tensor::{StrataShape, StrataTensor};

/// How a change-time key relates to the timesteps it governs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeTimeConvention {
    /// A key is the first timestep its value applies to. Lookups take the
    /// largest key `<= t`; timesteps before the first key use the first entry.
    #[default]
    EffectiveFrom,
    /// A key is the last timestep its value applies to. Lookups take the
    /// smallest key `>= t`; timesteps after the last key use the last entry.
    ///
    /// Change-time lists exported by the legacy loaders follow this rule.
    EffectiveUntil,
    /// A key applies only to its own timestep. Used for recorded output.
    Exact,
}

/// Ordered mapping `timestep -> StrataTensor`.
///
/// All entries share one shape, also when deserialized. Each key is inserted
/// once; a second insert at the same key is rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SeriesDocument")]
pub struct TimedTensorSeries {
    convention: ChangeTimeConvention,
    entries: BTreeMap<u32, StrataTensor>,
}

#[derive(Deserialize)]
struct SeriesDocument {
    #[serde(default)]
    convention: ChangeTimeConvention,
    entries: BTreeMap<u32, StrataTensor>,
}

impl TryFrom<SeriesDocument> for TimedTensorSeries {
    type Error = ShapeError;

    fn try_from(doc: SeriesDocument) -> Result<Self, Self::Error> {
        let mut tensors = doc.entries.iter();
        if let Some((_, first)) = tensors.next() {
            for (timestep, tensor) in tensors {
                first.ensure_same_shape(tensor, &format!("series entry at timestep {timestep}"))?;
            }
        }
        Ok(Self {
            convention: doc.convention,
            entries: doc.entries,
        })
    }
}

impl TimedTensorSeries {
    /// Empty series using the default convention.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty series using `convention`.
    #[must_use]
    pub fn with_convention(convention: ChangeTimeConvention) -> Self {
        Self {
            convention,
            entries: BTreeMap::new(),
        }
    }

    /// Series holding one tensor for every timestep.
    #[must_use]
    pub fn constant(tensor: StrataTensor) -> Self {
        Self::single(ChangeTimeConvention::EffectiveFrom, 0, tensor)
    }

    /// Series holding one entry at `timestep`.
    #[must_use]
    pub fn single(convention: ChangeTimeConvention, timestep: u32, tensor: StrataTensor) -> Self {
        let mut series = Self::with_convention(convention);
        series.entries.insert(timestep, tensor);
        series
    }

    /// Series built from `(change_time, tensor)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::Mismatch`] if the tensors do not share a shape,
    /// or [`DataError::DuplicateTimestep`] if a change time repeats.
    pub fn from_change_times(
        convention: ChangeTimeConvention,
        entries: impl IntoIterator<Item = (u32, StrataTensor)>,
    ) -> RespondResult<Self> {
        let mut series = Self::with_convention(convention);
        for (timestep, tensor) in entries {
            series.insert(timestep, tensor)?;
        }
        Ok(series)
    }

    /// Lookup convention of this series.
    #[must_use]
    pub const fn convention(&self) -> ChangeTimeConvention {
        self.convention
    }

    /// Records `tensor` at `timestep`.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::DuplicateTimestep`] if `timestep` already holds a
    /// value, or [`ShapeError::Mismatch`] if `tensor` does not match the shape
    /// of the entries already stored.
    pub fn insert(&mut self, timestep: u32, tensor: StrataTensor) -> RespondResult<()> {
        if self.entries.contains_key(&timestep) {
            return Err(DataError::DuplicateTimestep { timestep }.into());
        }
        if let Some(existing) = self.entries.values().next() {
            existing.ensure_same_shape(&tensor, &format!("series entry at timestep {timestep}"))?;
        }
        self.entries.insert(timestep, tensor);
        Ok(())
    }

    /// The tensor in effect at `timestep`.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::EmptySeries`] if the series has no entries, or
    /// [`DataError::MissingTimestep`] for an [`ChangeTimeConvention::Exact`]
    /// series without an entry at `timestep`.
    pub fn at(&self, timestep: u32) -> Result<&StrataTensor, DataError> {
        if self.entries.is_empty() {
            return Err(DataError::EmptySeries {
                name: "timed tensor series".to_string(),
            });
        }
        let found = match self.convention {
            ChangeTimeConvention::EffectiveFrom => self
                .entries
                .range(..=timestep)
                .next_back()
                .or_else(|| self.entries.iter().next()),
            ChangeTimeConvention::EffectiveUntil => self
                .entries
                .range(timestep..)
                .next()
                .or_else(|| self.entries.iter().next_back()),
            ChangeTimeConvention::Exact => return self.exact(timestep),
        };
        found
            .map(|(_, tensor)| tensor)
            .ok_or(DataError::MissingTimestep { timestep })
    }

    /// The tensor recorded at exactly `timestep`.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::MissingTimestep`] if nothing was recorded there.
    pub fn exact(&self, timestep: u32) -> Result<&StrataTensor, DataError> {
        self.entries
            .get(&timestep)
            .ok_or(DataError::MissingTimestep { timestep })
    }

    /// Stored keys in ascending order.
    #[must_use]
    pub fn all_timesteps(&self) -> Vec<u32> {
        self.entries.keys().copied().collect()
    }

    /// Iterates over `(timestep, tensor)` in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &StrataTensor)> {
        self.entries.iter().map(|(t, m)| (*t, m))
    }

    /// Stored tensors in ascending key order.
    pub fn tensors(&self) -> impl Iterator<Item = &StrataTensor> {
        self.entries.values()
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Shape shared by all entries, or `None` for an empty series.
    #[must_use]
    pub fn shape(&self) -> Option<StrataShape> {
        self.entries.values().next().map(StrataTensor::shape)
    }

    /// Elementwise sum of all stored tensors, or `None` for an empty series.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::Mismatch`] if the entries do not share a shape.
    pub fn sum_over_time(&self) -> Result<Option<StrataTensor>, ShapeError> {
        let mut values = self.entries.values();
        let Some(first) = values.next() else {
            return Ok(None);
        };
        values
            .try_fold(first.clone(), |acc, m| acc.add(m))
            .map(Some)
    }

    /// Total population (sum over all cells) per stored timestep.
    #[must_use]
    pub fn totals_by_timestep(&self) -> Vec<(u32, f64)> {
        self.iter().map(|(t, m)| (t, m.sum())).collect()
    }

    /// Applies `f` to every entry, keeping keys and convention.
    #[must_use]
    pub fn map_tensors(&self, f: impl Fn(u32, &StrataTensor) -> StrataTensor) -> Self {
        Self {
            convention: self.convention,
            entries: self.entries.iter().map(|(t, m)| (*t, f(*t, m))).collect(),
        }
    }
}
