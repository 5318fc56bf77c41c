//! Transition engine: the numerical core of one simulation step.
//!
//! [`TransitionEngine::multiply_along_axis`] applies a transition tensor to a
//! state along one axis. A transition along an axis of extent `n` stores `n`
//! stacked blocks of extent `n`; block `i` holds the rates out of source state
//! `i`. On the intervention axis every moved block is routed through the
//! initiation reallocation before it is accumulated.

use crate::error::ShapeError;
use crate::tensor::{StrataAxis, StrataShape, StrataTensor};

/// Applies transitions, initiation reallocation, and aging to state tensors.
///
/// The engine borrows the initiation rates `[I, B², D]` for the lifetime of a
/// run. All operations are pure: they return new tensors.
#[derive(Debug, Clone, Copy)]
pub struct TransitionEngine<'a> {
    init_rates: &'a StrataTensor,
}

impl<'a> TransitionEngine<'a> {
    /// Creates an engine that reallocates behavior states on intervention
    /// change according to `init_rates`.
    #[must_use]
    pub const fn new(init_rates: &'a StrataTensor) -> Self {
        Self { init_rates }
    }

    /// Initiation rates in use.
    #[must_use]
    pub const fn init_rates(&self) -> &'a StrataTensor {
        self.init_rates
    }

    /// Moves population along `axis` according to `transition`.
    ///
    /// For each source index `i`, the state slab at `i` is broadcast across
    /// all destinations and multiplied by block `i` of the transition. The
    /// blocks are summed; on [`StrataAxis::Intervention`] each block first
    /// passes through [`TransitionEngine::apply_initiation`].
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::EmptyAxis`] if the state has zero extent along
    /// `axis`, [`ShapeError::AxisExtent`] if the transition's extent along
    /// `axis` is not the state's extent squared, and [`ShapeError::Mismatch`]
    /// if the other two axes differ.
    pub fn multiply_along_axis(
        &self,
        state: &StrataTensor,
        transition: &StrataTensor,
        axis: StrataAxis,
    ) -> Result<StrataTensor, ShapeError> {
        let shape = state.shape();
        let n = shape.extent(axis);
        if n == 0 {
            return Err(ShapeError::EmptyAxis { axis });
        }
        check_transition_shape(shape, transition, axis, "transition")?;

        let mut out = StrataTensor::zeros(shape);
        for source in 0..n {
            let moved = state
                .slab(axis, source)
                .broadcast_along(axis, n)?
                .mul(&transition.block(axis, source * n, n))?;
            let arrived = if axis == StrataAxis::Intervention {
                self.apply_initiation(&moved, source)?
            } else {
                moved
            };
            out = out.add(&arrived)?;
        }
        Ok(out)
    }

    /// Reallocates behavior states of population moved out of intervention
    /// `source`.
    ///
    /// `product` is the population leaving `source`, already split by
    /// destination intervention. Population staying in `source` passes
    /// through unchanged. Population arriving in any other intervention `j`
    /// is redistributed: each source behavior `k` is spread over every
    /// destination behavior by row `k` of `init_rates` at intervention `j`.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError`] if the initiation rates are not
    /// `[I, B², D]` for a product of shape `[I, B, D]`.
    pub fn apply_initiation(
        &self,
        product: &StrataTensor,
        source: usize,
    ) -> Result<StrataTensor, ShapeError> {
        let shape = product.shape();
        check_transition_shape(
            shape,
            self.init_rates,
            StrataAxis::Behavior,
            "intervention_init_rates",
        )?;
        let behaviors = shape.behaviors;

        let mut out = StrataTensor::zeros(shape);
        for dest in 0..shape.interventions {
            let arriving = product.slab(StrataAxis::Intervention, dest);
            if dest == source {
                out.add_into_slab(StrataAxis::Intervention, dest, &arriving)?;
                continue;
            }
            let rates = self.init_rates.slab(StrataAxis::Intervention, dest);
            let mut reallocated = StrataTensor::zeros(arriving.shape());
            for from in 0..behaviors {
                let spread = arriving
                    .slab(StrataAxis::Behavior, from)
                    .broadcast_along(StrataAxis::Behavior, behaviors)?
                    .mul(&rates.block(StrataAxis::Behavior, from * behaviors, behaviors))?;
                reallocated = reallocated.add(&spread)?;
            }
            out.add_into_slab(StrataAxis::Intervention, dest, &reallocated)?;
        }
        Ok(out)
    }

    /// Shifts population `shift` slots up the demographic axis. The first
    /// `shift` slots become empty; population pushed past the last slot
    /// leaves the model.
    #[must_use]
    pub fn age(state: &StrataTensor, shift: usize) -> StrataTensor {
        state.shift_along(StrataAxis::Demographic, shift)
    }
}

fn check_transition_shape(
    state: StrataShape,
    transition: &StrataTensor,
    axis: StrataAxis,
    context: &str,
) -> Result<(), ShapeError> {
    let expected = state.transition_along(axis);
    let actual = transition.shape();
    if actual.extent(axis) != expected.extent(axis) {
        return Err(ShapeError::AxisExtent {
            axis,
            expected: expected.extent(axis),
            actual: actual.extent(axis),
        });
    }
    if actual != expected {
        return Err(ShapeError::Mismatch {
            context: context.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}
