//! Run configuration.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::rates::RateSource;

/// Periodic aging along the demographic axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AgingSchedule {
    /// Whether aging events fire at all.
    pub enabled: bool,
    /// Timesteps between aging events.
    pub interval: u32,
    /// Demographic slots shifted per event.
    pub age_group_shift: usize,
}

impl AgingSchedule {
    /// No aging.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            interval: 0,
            age_group_shift: 0,
        }
    }

    /// Aging every `interval` timesteps by `age_group_shift` slots.
    #[must_use]
    pub const fn every(interval: u32, age_group_shift: usize) -> Self {
        Self {
            enabled: true,
            interval,
            age_group_shift,
        }
    }

    /// Aging enabled whenever both parameters are positive.
    #[must_use]
    pub const fn from_parts(interval: u32, age_group_shift: usize) -> Self {
        Self {
            enabled: interval > 0 && age_group_shift > 0,
            interval,
            age_group_shift,
        }
    }

    /// True when aging events can fire.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.enabled && self.interval > 0 && self.age_group_shift > 0
    }

    /// True when an aging event fires before computing timestep `t + 1`.
    ///
    /// Events are half-cycle corrected: they fire when
    /// `(t - floor(interval / 2)) mod interval == 0`, so the first event
    /// happens at `t = floor(interval / 2)`.
    #[must_use]
    pub fn fires_at(&self, timestep: u32) -> bool {
        if !self.is_active() {
            return false;
        }
        let interval = i64::from(self.interval);
        (i64::from(timestep) - interval / 2).rem_euclid(interval) == 0
    }
}

/// Parameters of one simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of weekly timesteps to compute. The history holds
    /// `duration + 1` entries per series.
    pub duration: u32,
    /// Aging schedule.
    #[serde(default)]
    pub aging: AgingSchedule,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            duration: 52,
            aging: AgingSchedule::disabled(),
        }
    }
}

impl SimulationConfig {
    /// A run of `duration` timesteps without aging.
    #[must_use]
    pub const fn new(duration: u32) -> Self {
        Self {
            duration,
            aging: AgingSchedule::disabled(),
        }
    }

    /// Sets the aging schedule.
    #[must_use]
    pub const fn with_aging(mut self, aging: AgingSchedule) -> Self {
        self.aging = aging;
        self
    }

    /// A run of `duration` timesteps using the aging parameters carried by
    /// `rates`.
    #[must_use]
    pub fn from_rates(rates: &dyn RateSource, duration: u32) -> Self {
        Self {
            duration,
            aging: AgingSchedule::from_parts(rates.aging_interval(), rates.age_group_shift()),
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidConfig`] if aging is enabled with a
    /// zero interval.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.aging.enabled && self.aging.interval == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "aging interval must be > 0 when aging is enabled".to_string(),
            });
        }
        Ok(())
    }
}
