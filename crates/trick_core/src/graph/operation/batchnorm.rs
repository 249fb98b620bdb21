use crate::{
    tensor::{DenseTensor, Tensor},
    Shape,
};

use super::{expect_dim, expect_rank, values_and_grad, OperationError};

const OP: &str = "BatchNorm";

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BatchNormDescription {
    pub epsilon: f32,
    pub momentum: f32,
}

impl Default for BatchNormDescription {
    fn default() -> Self {
        Self { epsilon: 1e-5, momentum: 0.1 }
    }
}

/// `[N, C, L]` or `[N, C]`, normalised per channel across `N` and `L`.
#[derive(Clone, Copy)]
struct Dims {
    batch: usize,
    channels: usize,
    len: usize,
}

impl Dims {
    fn count(&self) -> usize {
        self.batch * self.len
    }

    fn channel_of(&self, idx: usize) -> usize {
        (idx / self.len) % self.channels
    }
}

fn dims(input: &DenseTensor) -> Result<Dims, OperationError> {
    let shape = input.shape();
    let invalid = || OperationError::InvalidInputShape { op: OP, shape: shape.clone() };

    let dims = match *shape.dims() {
        [batch, channels] => Dims { batch, channels, len: 1 },
        [batch, channels, len] => Dims { batch, channels, len },
        _ => return Err(invalid()),
    };

    if dims.count() == 0 {
        return Err(invalid());
    }

    Ok(dims)
}

fn check_params(input: &DenseTensor, params: &[&DenseTensor], running: &DenseTensor) -> Result<(), OperationError> {
    for param in params {
        expect_rank(OP, param, 1)?;
        expect_dim(OP, input, 1, param, 0)?;
    }

    expect_rank(OP, running, 2)?;
    expect_dim(OP, input, 1, running, 1)?;

    if running.shape().dim(0) != 2 {
        return Err(OperationError::InvalidInputShape { op: OP, shape: running.shape().clone() });
    }

    Ok(())
}

/// Inputs are `x`, scale, shift and the running statistics `[2, C]`
/// (row 0 mean, row 1 variance).
pub fn forward(
    desc: &BatchNormDescription,
    training: bool,
    inputs: &[&Tensor],
    output: &mut Tensor,
) -> Result<(), OperationError> {
    let (input, gamma, beta, running) = (&inputs[0].values, &inputs[1].values, &inputs[2].values, &inputs[3].values);

    let d = dims(input)?;
    check_params(input, &[gamma, beta], running)?;

    let x = input.values();
    let (mean, var) = if training {
        let mut mean = vec![0.0; d.channels];
        let mut var = vec![0.0; d.channels];

        for (i, &val) in x.iter().enumerate() {
            mean[d.channel_of(i)] += val;
        }

        mean.iter_mut().for_each(|m| *m /= d.count() as f32);

        for (i, &val) in x.iter().enumerate() {
            let c = d.channel_of(i);
            var[c] += (val - mean[c]).powi(2);
        }

        var.iter_mut().for_each(|v| *v /= d.count() as f32);

        (mean, var)
    } else {
        let stats = running.values();
        (stats[..d.channels].to_vec(), stats[d.channels..].to_vec())
    };

    let inv_std = var.iter().map(|v| 1.0 / (v + desc.epsilon).sqrt()).collect::<Vec<_>>();
    let xhat = x.iter().enumerate().map(|(i, &val)| (val - mean[d.channel_of(i)]) * inv_std[d.channel_of(i)]);
    let xhat = xhat.collect::<Vec<_>>();

    output.values.reshape_if_needed(input.shape());

    let (g, b) = (gamma.values(), beta.values());
    for (i, (out, &xh)) in output.values.values_mut().iter_mut().zip(xhat.iter()).enumerate() {
        let c = d.channel_of(i);
        *out = g[c] * xh + b[c];
    }

    output.internal_mut("xhat").load_from_slice(input.shape(), &xhat);
    output.internal_mut("inv_std").load_from_slice(&Shape::from([d.channels]), &inv_std);

    if training {
        let stats = [mean, var].concat();
        output.internal_mut("batch_stats").load_from_slice(&Shape::from([2, d.channels]), &stats);
    }

    Ok(())
}

pub fn backward(
    training: bool,
    output: &Tensor,
    output_grad: &DenseTensor,
    inputs: &mut [&mut Tensor],
) -> Result<(), OperationError> {
    let xhat = output.get_internal("xhat").ok_or(OperationError::MissingInternalBuffer { op: OP, id: "xhat" })?;
    let inv_std =
        output.get_internal("inv_std").ok_or(OperationError::MissingInternalBuffer { op: OP, id: "inv_std" })?;

    let d = dims(xhat)?;

    if output_grad.shape() != xhat.shape() {
        return Err(OperationError::MismatchedInputs {
            op: OP,
            lhs: output_grad.shape().clone(),
            rhs: xhat.shape().clone(),
        });
    }

    let (dy, xh, inv_std) = (output_grad.values(), xhat.values(), inv_std.values());

    let mut sum_dy = vec![0.0; d.channels];
    let mut sum_dy_xhat = vec![0.0; d.channels];

    for (i, (&g, &x)) in dy.iter().zip(xh.iter()).enumerate() {
        let c = d.channel_of(i);
        sum_dy[c] += g;
        sum_dy_xhat[c] += g * x;
    }

    let (input, rest) = inputs.split_at_mut(1);
    let (gamma, rest) = rest.split_at_mut(1);
    let (input, gamma, beta) = (&mut *input[0], &mut *gamma[0], &mut *rest[0]);

    if let Some((_, grad)) = values_and_grad(gamma) {
        grad.values_mut().iter_mut().zip(sum_dy_xhat.iter()).for_each(|(g, s)| *g += s);
    }

    if let Some((_, grad)) = values_and_grad(beta) {
        grad.values_mut().iter_mut().zip(sum_dy.iter()).for_each(|(g, s)| *g += s);
    }

    if let Some((_, grad)) = values_and_grad(input) {
        let scale = gamma.values.values();
        let m = d.count() as f32;

        for (i, dx) in grad.values_mut().iter_mut().enumerate() {
            let c = d.channel_of(i);
            let k = scale[c] * inv_std[c];

            *dx += if training { k / m * (m * dy[i] - sum_dy[c] - xh[i] * sum_dy_xhat[c]) } else { k * dy[i] };
        }
    }

    Ok(())
}

/// Exponential moving average of the batch statistics, with the variance
/// tracked unbiased.
pub fn update_running_stats(
    desc: &BatchNormDescription,
    output: &Tensor,
    running: &mut Tensor,
) -> Result<(), OperationError> {
    let Some(batch) = output.get_internal("batch_stats") else {
        return Ok(());
    };

    let xhat = output.get_internal("xhat").ok_or(OperationError::MissingInternalBuffer { op: OP, id: "xhat" })?;
    let d = dims(xhat)?;

    if running.values.shape() != batch.shape() {
        return Err(OperationError::MismatchedInputs {
            op: OP,
            lhs: running.values.shape().clone(),
            rhs: batch.shape().clone(),
        });
    }

    let count = d.count() as f32;
    let unbias = if d.count() > 1 { count / (count - 1.0) } else { 1.0 };
    let stats = running.values.values_mut();
    let (mean, var) = batch.values().split_at(d.channels);

    for c in 0..d.channels {
        stats[c] = (1.0 - desc.momentum) * stats[c] + desc.momentum * mean[c];
        stats[d.channels + c] = (1.0 - desc.momentum) * stats[d.channels + c] + desc.momentum * var[c] * unbias;
    }

    Ok(())
}
