use rand::Rng;

use crate::{
    tensor::{DenseTensor, Tensor},
    ExecutionContext,
};

use super::{values_and_grad, OperationError};

fn active(rate: f32, training: bool) -> bool {
    training && rate > 0.0
}

pub fn forward(
    rate: f32,
    ctx: &mut ExecutionContext,
    inputs: &[&Tensor],
    output: &mut Tensor,
) -> Result<(), OperationError> {
    let input = &inputs[0].values;

    if !active(rate, ctx.training()) {
        input.copy_into(&mut output.values);
        return Ok(());
    }

    let keep = if rate < 1.0 { 1.0 / (1.0 - rate) } else { 0.0 };
    let rng = ctx.rng();
    let mask = (0..input.size()).map(|_| if rng.gen::<f32>() < rate { 0.0 } else { keep }).collect::<Vec<_>>();

    output.values.reshape_if_needed(input.shape());

    for ((out, &x), &m) in output.values.values_mut().iter_mut().zip(input.values()).zip(mask.iter()) {
        *out = x * m;
    }

    output.internal_mut("mask").load_from_slice(input.shape(), &mask);

    Ok(())
}

pub fn backward(
    rate: f32,
    training: bool,
    output: &Tensor,
    output_grad: &DenseTensor,
    inputs: &mut [&mut Tensor],
) -> Result<(), OperationError> {
    let Some((_, grad)) = values_and_grad(inputs[0]) else {
        return Ok(());
    };

    let dy = output_grad.values();

    if active(rate, training) {
        let mask =
            output.get_internal("mask").ok_or(OperationError::MissingInternalBuffer { op: "Dropout", id: "mask" })?;

        for ((g, &d), &m) in grad.values_mut().iter_mut().zip(dy).zip(mask.values()) {
            *g += d * m;
        }
    } else {
        grad.values_mut().iter_mut().zip(dy).for_each(|(g, &d)| *g += d);
    }

    Ok(())
}
