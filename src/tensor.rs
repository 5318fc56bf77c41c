//! Dense strata tensors.
//!
//! A [`StrataTensor`] is a rank-3 array indexed by
//! `(intervention, behavior state, demographic combo)`. The same type carries
//! population counts, elementwise probabilities, and transition matrices. A
//! transition matrix "along an axis" has that axis's extent squared: block `i`
//! (offset `i * n`, extent `n`) holds the rates out of source state `i`.

use std::fmt;
use std::ops::{Index, IndexMut};

use ndarray::{concatenate, Array3, ArrayView3, Axis, Slice, Zip};
use serde::{Deserialize, Serialize};

use crate::error::ShapeError;

/// Axis selector for a strata tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrataAxis {
    /// Treatment / intervention state.
    Intervention,
    /// Opioid use disorder behavior state.
    Behavior,
    /// Flattened demographic combination.
    Demographic,
}

impl StrataAxis {
    /// All axes in storage order.
    pub const ALL: [Self; 3] = [Self::Intervention, Self::Behavior, Self::Demographic];

    /// Storage position of this axis.
    #[must_use]
    pub const fn position(self) -> usize {
        match self {
            Self::Intervention => 0,
            Self::Behavior => 1,
            Self::Demographic => 2,
        }
    }

    const fn nd(self) -> Axis {
        Axis(self.position())
    }
}

impl fmt::Display for StrataAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Intervention => "intervention",
            Self::Behavior => "behavior",
            Self::Demographic => "demographic",
        };
        f.write_str(name)
    }
}

/// Extents of a strata tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrataShape {
    /// Number of intervention states (or its square for intervention transitions).
    pub interventions: usize,
    /// Number of behavior states (or its square for behavior transitions).
    pub behaviors: usize,
    /// Number of demographic combos.
    pub demographics: usize,
}

impl StrataShape {
    /// Creates a shape from its three extents.
    #[must_use]
    pub const fn new(interventions: usize, behaviors: usize, demographics: usize) -> Self {
        Self {
            interventions,
            behaviors,
            demographics,
        }
    }

    /// Extent along `axis`.
    #[must_use]
    pub const fn extent(&self, axis: StrataAxis) -> usize {
        match axis {
            StrataAxis::Intervention => self.interventions,
            StrataAxis::Behavior => self.behaviors,
            StrataAxis::Demographic => self.demographics,
        }
    }

    /// Returns a copy with `axis` set to `extent`.
    #[must_use]
    pub const fn with_extent(mut self, axis: StrataAxis, extent: usize) -> Self {
        match axis {
            StrataAxis::Intervention => self.interventions = extent,
            StrataAxis::Behavior => self.behaviors = extent,
            StrataAxis::Demographic => self.demographics = extent,
        }
        self
    }

    /// Shape of a transition tensor along `axis` for a state of this shape.
    #[must_use]
    pub const fn transition_along(self, axis: StrataAxis) -> Self {
        let n = self.extent(axis);
        self.with_extent(axis, n * n)
    }

    /// Total number of cells.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.interventions * self.behaviors * self.demographics
    }

    /// True when any extent is zero.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    const fn dims(self) -> (usize, usize, usize) {
        (self.interventions, self.behaviors, self.demographics)
    }
}

impl fmt::Display for StrataShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}]", self.interventions, self.behaviors, self.demographics)
    }
}

/// Rank-3 `f64` tensor over `(intervention, behavior, demographic)`.
///
/// Every arithmetic operation returns a new tensor; nothing is shared between
/// values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrataTensor {
    data: Array3<f64>,
}

impl StrataTensor {
    /// All-zero tensor.
    #[must_use]
    pub fn zeros(shape: StrataShape) -> Self {
        Self {
            data: Array3::zeros(shape.dims()),
        }
    }

    /// Tensor with every cell set to `value`.
    #[must_use]
    pub fn filled(shape: StrataShape, value: f64) -> Self {
        Self {
            data: Array3::from_elem(shape.dims(), value),
        }
    }

    /// Wraps an existing ndarray.
    #[must_use]
    pub fn from_array(data: Array3<f64>) -> Self {
        Self { data }
    }

    /// Builds a tensor from values in `(intervention, behavior, demographic)`
    /// row-major order.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::ValueCount`] if `values.len() != shape.len()`.
    pub fn from_vec(shape: StrataShape, values: Vec<f64>) -> Result<Self, ShapeError> {
        let len = values.len();
        Array3::from_shape_vec(shape.dims(), values)
            .map(Self::from_array)
            .map_err(|_| ShapeError::ValueCount { shape, len })
    }

    /// Builds a tensor from nested rows: `rows[i][b][d]`.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::ValueCount`] if the rows are ragged.
    pub fn from_nested(rows: &[Vec<Vec<f64>>]) -> Result<Self, ShapeError> {
        let interventions = rows.len();
        let behaviors = rows.first().map_or(0, Vec::len);
        let demographics = rows
            .first()
            .and_then(|r| r.first())
            .map_or(0, Vec::len);
        let shape = StrataShape::new(interventions, behaviors, demographics);
        let values: Vec<f64> = rows.iter().flatten().flatten().copied().collect();
        let ragged = rows
            .iter()
            .any(|r| r.len() != behaviors || r.iter().any(|c| c.len() != demographics));
        if ragged {
            return Err(ShapeError::ValueCount {
                shape,
                len: values.len(),
            });
        }
        Self::from_vec(shape, values)
    }

    /// Shape of this tensor.
    #[must_use]
    pub fn shape(&self) -> StrataShape {
        let (i, b, d) = self.data.dim();
        StrataShape::new(i, b, d)
    }

    /// Read-only view of the underlying array.
    #[must_use]
    pub fn view(&self) -> ArrayView3<'_, f64> {
        self.data.view()
    }

    /// Consumes the tensor, returning the underlying array.
    #[must_use]
    pub fn into_array(self) -> Array3<f64> {
        self.data
    }

    /// Iterates over all values in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.data.iter()
    }

    /// Sum of all cells.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.data.sum()
    }

    /// Smallest cell value, or `None` for an empty tensor.
    #[must_use]
    pub fn min_value(&self) -> Option<f64> {
        self.data.iter().copied().reduce(f64::min)
    }

    /// Largest cell value, or `None` for an empty tensor.
    #[must_use]
    pub fn max_value(&self) -> Option<f64> {
        self.data.iter().copied().reduce(f64::max)
    }

    /// Largest absolute elementwise difference to `other`.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::Mismatch`] if the shapes differ.
    pub fn max_abs_diff(&self, other: &Self) -> Result<f64, ShapeError> {
        self.ensure_same_shape(other, "max_abs_diff")?;
        Ok(Zip::from(&self.data)
            .and(&other.data)
            .fold(0.0_f64, |acc, a, b| acc.max((a - b).abs())))
    }

    /// Checks that `other` has the same shape.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::Mismatch`] naming `context` if the shapes differ.
    pub fn ensure_same_shape(&self, other: &Self, context: &str) -> Result<(), ShapeError> {
        if self.shape() == other.shape() {
            Ok(())
        } else {
            Err(ShapeError::Mismatch {
                context: context.to_string(),
                expected: self.shape(),
                actual: other.shape(),
            })
        }
    }

    fn zip_with(
        &self,
        other: &Self,
        context: &str,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<Self, ShapeError> {
        self.ensure_same_shape(other, context)?;
        let data = Zip::from(&self.data)
            .and(&other.data)
            .map_collect(|&a, &b| f(a, b));
        Ok(Self { data })
    }

    /// Elementwise sum.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::Mismatch`] if the shapes differ.
    pub fn add(&self, other: &Self) -> Result<Self, ShapeError> {
        self.zip_with(other, "add", |a, b| a + b)
    }

    /// Elementwise difference.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::Mismatch`] if the shapes differ.
    pub fn sub(&self, other: &Self) -> Result<Self, ShapeError> {
        self.zip_with(other, "sub", |a, b| a - b)
    }

    /// Elementwise (Hadamard) product.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::Mismatch`] if the shapes differ.
    pub fn mul(&self, other: &Self) -> Result<Self, ShapeError> {
        self.zip_with(other, "mul", |a, b| a * b)
    }

    /// Elementwise minimum.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::Mismatch`] if the shapes differ.
    pub fn min(&self, other: &Self) -> Result<Self, ShapeError> {
        self.zip_with(other, "min", f64::min)
    }

    /// Multiplies every cell by `factor`.
    #[must_use]
    pub fn scale(&self, factor: f64) -> Self {
        Self {
            data: &self.data * factor,
        }
    }

    /// Floors every cell at `floor`.
    #[must_use]
    pub fn clamp_min(&self, floor: f64) -> Self {
        Self {
            data: self.data.mapv(|v| v.max(floor)),
        }
    }

    /// Applies `f` to every cell.
    #[must_use]
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            data: self.data.mapv(f),
        }
    }

    /// The single slab at `index` along `axis` (that axis reduced to extent 1).
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds for `axis`.
    #[must_use]
    pub fn slab(&self, axis: StrataAxis, index: usize) -> Self {
        Self::from_array(
            self.data
                .slice_axis(axis.nd(), Slice::from(index..=index))
                .to_owned(),
        )
    }

    /// Replicates an extent-1 tensor `extent` times along `axis`.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::AxisExtent`] if the tensor's extent along `axis`
    /// is not 1.
    pub fn broadcast_along(&self, axis: StrataAxis, extent: usize) -> Result<Self, ShapeError> {
        let target = self.shape().with_extent(axis, extent);
        let view = self.data.broadcast(target.dims()).ok_or(ShapeError::AxisExtent {
            axis,
            expected: 1,
            actual: self.shape().extent(axis),
        })?;
        Ok(Self::from_array(view.to_owned()))
    }

    /// The `len`-long block starting at `offset` along `axis`.
    ///
    /// # Panics
    ///
    /// Panics if the block runs past the end of `axis`.
    #[must_use]
    pub fn block(&self, axis: StrataAxis, offset: usize, len: usize) -> Self {
        Self::from_array(
            self.data
                .slice_axis(axis.nd(), Slice::from(offset..offset + len))
                .to_owned(),
        )
    }

    /// Adds `slab` (extent 1 along `axis`) into index `index` along `axis`.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::Mismatch`] if `slab` does not match this tensor's
    /// shape with `axis` reduced to 1.
    pub fn add_into_slab(
        &mut self,
        axis: StrataAxis,
        index: usize,
        slab: &Self,
    ) -> Result<(), ShapeError> {
        let expected = self.shape().with_extent(axis, 1);
        if slab.shape() != expected {
            return Err(ShapeError::Mismatch {
                context: format!("{axis} slab {index}"),
                expected,
                actual: slab.shape(),
            });
        }
        let mut target = self.data.slice_axis_mut(axis.nd(), Slice::from(index..=index));
        target += &slab.data;
        Ok(())
    }

    /// Moves every slot `k` along `axis` to `k + shift`, dropping slots pushed
    /// past the end and zeroing the first `shift` slots.
    #[must_use]
    pub fn shift_along(&self, axis: StrataAxis, shift: usize) -> Self {
        let extent = self.shape().extent(axis);
        let mut out = Self::zeros(self.shape());
        if shift >= extent {
            return out;
        }
        let kept = self.data.slice_axis(axis.nd(), Slice::from(0..extent - shift));
        out.data
            .slice_axis_mut(axis.nd(), Slice::from(shift..extent))
            .assign(&kept);
        out
    }

    /// Stacks per-source blocks into a transition tensor along `axis`.
    ///
    /// `blocks[i]` holds the rates out of source state `i`; every block must
    /// have the same shape and `blocks.len()` must equal that shape's extent
    /// along `axis`.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError`] if there are no blocks, the shapes differ, or the
    /// block count does not match the axis extent.
    pub fn stack_transition(blocks: &[Self], axis: StrataAxis) -> Result<Self, ShapeError> {
        let first = blocks.first().ok_or(ShapeError::EmptyAxis { axis })?;
        let n = first.shape().extent(axis);
        if blocks.len() != n {
            return Err(ShapeError::AxisExtent {
                axis,
                expected: n * n,
                actual: blocks.len() * n,
            });
        }
        for block in blocks {
            first.ensure_same_shape(block, "stack_transition")?;
        }
        let views: Vec<_> = blocks.iter().map(|b| b.data.view()).collect();
        let data = concatenate(axis.nd(), &views).map_err(|_| ShapeError::AxisExtent {
            axis,
            expected: n * n,
            actual: blocks.len() * n,
        })?;
        Ok(Self::from_array(data))
    }

    /// Identity transition along `axis` for states of `shape`: every source
    /// state keeps all of its population.
    #[must_use]
    pub fn identity_transition(shape: StrataShape, axis: StrataAxis) -> Self {
        let n = shape.extent(axis);
        let mut out = Self::zeros(shape.transition_along(axis));
        for i in 0..n {
            out.data
                .index_axis_mut(axis.nd(), i * n + i)
                .fill(1.0);
        }
        out
    }

    /// Feeds every value's bit pattern into `hasher`, in row-major order.
    pub fn hash_into(&self, hasher: &mut blake3::Hasher) {
        let shape = self.shape();
        for extent in [shape.interventions, shape.behaviors, shape.demographics] {
            hasher.update(&(extent as u64).to_le_bytes());
        }
        for value in &self.data {
            hasher.update(&value.to_bits().to_le_bytes());
        }
    }
}

impl Index<(usize, usize, usize)> for StrataTensor {
    type Output = f64;

    fn index(&self, index: (usize, usize, usize)) -> &f64 {
        &self.data[[index.0, index.1, index.2]]
    }
}

impl IndexMut<(usize, usize, usize)> for StrataTensor {
    fn index_mut(&mut self, index: (usize, usize, usize)) -> &mut f64 {
        &mut self.data[[index.0, index.1, index.2]]
    }
}

impl From<Array3<f64>> for StrataTensor {
    fn from(data: Array3<f64>) -> Self {
        Self::from_array(data)
    }
}
