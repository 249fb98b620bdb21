use crate::{graph::operation::OperationError, tensor::DenseTensor};

use super::{utils::Placement, OptimiserState};

#[derive(Clone, Debug)]
pub struct WeightDecayParams<T> {
    pub inner: T,
    pub placement: Placement,
    pub decay: f32,
}

impl<T: Default> Default for WeightDecayParams<T> {
    fn default() -> Self {
        Self { inner: T::default(), placement: Placement::Before, decay: 0.01 }
    }
}

pub struct WeightDecay<S> {
    inner: S,
    placement: Placement,
    decay: f32,
}

impl<S: OptimiserState> OptimiserState for WeightDecay<S> {
    type Params = WeightDecayParams<S::Params>;

    fn new(size: usize, params: Self::Params) -> Self {
        Self { inner: S::new(size, params.inner), placement: params.placement, decay: params.decay }
    }

    fn update(
        &mut self,
        weights: &mut DenseTensor,
        grads: &mut DenseTensor,
        learning_rate: f32,
    ) -> Result<(), OperationError> {
        match self.placement {
            Placement::Before => {
                let factor = 1.0 - self.decay * learning_rate;
                weights.values_mut().iter_mut().for_each(|w| *w *= factor);
            }
            Placement::Gradient => {
                for (g, &w) in grads.values_mut().iter_mut().zip(weights.values()) {
                    *g += self.decay * w;
                }
            }
        }

        self.inner.update(weights, grads, learning_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        optimiser::{Adam, AdamParams},
        Shape,
    };

    fn step(placement: Placement) -> f32 {
        let mut weights = DenseTensor::from_slice(Shape::from([1]), &[2.0]);
        let mut grads = DenseTensor::from_slice(Shape::from([1]), &[0.0]);
        let params = WeightDecayParams { inner: AdamParams::default(), placement, decay: 0.1 };
        let mut opt = WeightDecay::<Adam>::new(1, params);

        opt.update(&mut weights, &mut grads, 0.5).unwrap();
        weights.values()[0]
    }

    #[test]
    fn decoupled_decay_scales_weights() {
        assert!((step(Placement::Before) - 1.9).abs() < 1e-6);
    }

    #[test]
    fn gradient_decay_goes_through_adam() {
        // the decayed gradient is positive, so the first Adam step is a full learning rate
        assert!((step(Placement::Gradient) - 1.5).abs() < 1e-5);
    }
}
