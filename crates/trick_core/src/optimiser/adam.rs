use crate::{graph::operation::OperationError, tensor::DenseTensor};

use super::OptimiserState;

#[derive(Clone, Copy, Debug)]
pub struct AdamParams {
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
}

impl Default for AdamParams {
    fn default() -> Self {
        Self { beta1: 0.9, beta2: 0.999, epsilon: 1e-8 }
    }
}

/// Adam with bias-corrected moment estimates.
pub struct Adam {
    momentum: Vec<f32>,
    velocity: Vec<f32>,
    step: i32,
    params: AdamParams,
}

impl OptimiserState for Adam {
    type Params = AdamParams;

    fn new(size: usize, params: Self::Params) -> Self {
        Self { momentum: vec![0.0; size], velocity: vec![0.0; size], step: 0, params }
    }

    fn update(
        &mut self,
        weights: &mut DenseTensor,
        grads: &mut DenseTensor,
        learning_rate: f32,
    ) -> Result<(), OperationError> {
        if weights.size() != self.momentum.len() || grads.size() != weights.size() {
            return Err(OperationError::MismatchedInputs {
                op: "Adam",
                lhs: weights.shape().clone(),
                rhs: grads.shape().clone(),
            });
        }

        let AdamParams { beta1, beta2, epsilon } = self.params;

        self.step += 1;
        let correction1 = 1.0 - beta1.powi(self.step);
        let correction2 = 1.0 - beta2.powi(self.step);

        let params = weights.values_mut().iter_mut().zip(grads.values());
        for ((p, &g), (m, v)) in params.zip(self.momentum.iter_mut().zip(self.velocity.iter_mut())) {
            *m = beta1 * *m + (1.0 - beta1) * g;
            *v = beta2 * *v + (1.0 - beta2) * g * g;

            let m_hat = *m / correction1;
            let v_hat = *v / correction2;

            *p -= learning_rate * m_hat / (v_hat.sqrt() + epsilon);
        }

        Ok(())
    }
}
