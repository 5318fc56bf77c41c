//! Error types for the RESPOND simulation core.
//!
//! All errors are strongly typed using thiserror, one enum per failure
//! family. None of them are recoverable inside a run: the simulation is an
//! all-or-nothing deterministic computation.

use thiserror::Error;

use crate::tensor::{StrataAxis, StrataShape};

/// Shape and dimension mismatches between tensors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error(
        "Transition tensor has extent {actual} along the {axis} axis, \
         expected {expected} (state extent squared)"
    )]
    AxisExtent {
        axis: StrataAxis,
        expected: usize,
        actual: usize,
    },

    #[error("Shape mismatch in {context}: expected {expected}, got {actual}")]
    Mismatch {
        context: String,
        expected: StrataShape,
        actual: StrataShape,
    },

    #[error("The {axis} axis has zero extent")]
    EmptyAxis {
        axis: StrataAxis,
    },

    #[error("Cannot build a tensor of shape {shape} from {len} values")]
    ValueCount {
        shape: StrataShape,
        len: usize,
    },
}

/// Missing or empty rate and history data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataError {
    #[error("Series '{name}' has no entries")]
    EmptySeries {
        name: String,
    },

    #[error("No entry recorded at timestep {timestep}")]
    MissingTimestep {
        timestep: u32,
    },

    #[error("An entry is already recorded at timestep {timestep}")]
    DuplicateTimestep {
        timestep: u32,
    },
}

/// Validation errors for configuration and builder input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },

    #[error("'{name}' contains negative values")]
    NegativeValue {
        name: String,
    },

    #[error("'{name}' contains probability {value} outside [0.0, 1.0]")]
    ProbabilityOutOfRange {
        name: String,
        value: f64,
    },

    #[error("Unknown cost perspective '{perspective}'")]
    UnknownPerspective {
        perspective: String,
    },

    #[error("Invalid scenario document: {reason}")]
    InvalidScenario {
        reason: String,
    },
}

/// Errors from the scenario worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("Scenario queue is full (capacity {capacity})")]
    QueueFull {
        capacity: usize,
    },

    #[error("Scenario worker pool disconnected")]
    Disconnected,

    #[error("Timed out after {duration_ms}ms waiting for scenario result")]
    Timeout {
        duration_ms: u64,
    },
}

/// Top-level error type for the simulation core.
#[derive(Debug, Error)]
pub enum RespondError {
    #[error("Shape error: {0}")]
    Shape(#[from] ShapeError),

    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl RespondError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a shape error.
    #[must_use]
    pub const fn is_shape(&self) -> bool {
        matches!(self, Self::Shape(_))
    }

    /// Returns true if this is a data error.
    #[must_use]
    pub const fn is_data(&self) -> bool {
        matches!(self, Self::Data(_))
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a batch error.
    #[must_use]
    pub const fn is_batch(&self) -> bool {
        matches!(self, Self::Batch(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

/// Result type alias for simulation operations.
pub type RespondResult<T> = Result<T, RespondError>;
