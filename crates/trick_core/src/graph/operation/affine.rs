use crate::{
    tensor::{DenseTensor, Tensor},
    Shape,
};

use super::{expect_dim, expect_rank, values_and_grad, OperationError};

const OP: &str = "Affine";

fn dims(
    input: &DenseTensor,
    weights: &DenseTensor,
    bias: &DenseTensor,
) -> Result<(usize, usize, usize), OperationError> {
    expect_rank(OP, input, 2)?;
    expect_rank(OP, weights, 2)?;
    expect_rank(OP, bias, 1)?;
    expect_dim(OP, input, 1, weights, 1)?;
    expect_dim(OP, weights, 0, bias, 0)?;

    Ok((input.shape().dim(0), weights.shape().dim(1), weights.shape().dim(0)))
}

pub fn forward(inputs: &[&Tensor], output: &mut Tensor) -> Result<(), OperationError> {
    let (input, weights, bias) = (&inputs[0].values, &inputs[1].values, &inputs[2].values);
    let (batch, cols, rows) = dims(input, weights, bias)?;

    output.values.reshape_if_needed(&Shape::from([batch, rows]));

    let (x, w, b) = (input.values(), weights.values(), bias.values());

    for (xrow, orow) in x.chunks_exact(cols).zip(output.values.values_mut().chunks_exact_mut(rows)) {
        for ((out, wrow), &bias) in orow.iter_mut().zip(w.chunks_exact(cols)).zip(b) {
            *out = bias + wrow.iter().zip(xrow).map(|(a, b)| a * b).sum::<f32>();
        }
    }

    Ok(())
}

pub fn backward(output_grad: &DenseTensor, inputs: &mut [&mut Tensor]) -> Result<(), OperationError> {
    let (input, rest) = inputs.split_at_mut(1);
    let (weights, bias) = rest.split_at_mut(1);
    let (input, weights, bias) = (&mut *input[0], &mut *weights[0], &mut *bias[0]);

    let (batch, cols, rows) = dims(&input.values, &weights.values, &bias.values)?;

    if output_grad.shape() != &Shape::from([batch, rows]) {
        return Err(OperationError::InvalidInputShape { op: OP, shape: output_grad.shape().clone() });
    }

    let dy = output_grad.values();

    if let Some((_, grad)) = values_and_grad(bias) {
        for dyrow in dy.chunks_exact(rows) {
            grad.values_mut().iter_mut().zip(dyrow).for_each(|(g, d)| *g += d);
        }
    }

    if let Some((_, grad)) = values_and_grad(weights) {
        let x = input.values.values();

        for (xrow, dyrow) in x.chunks_exact(cols).zip(dy.chunks_exact(rows)) {
            for (grow, &d) in grad.values_mut().chunks_exact_mut(cols).zip(dyrow) {
                grow.iter_mut().zip(xrow).for_each(|(g, &x)| *g += d * x);
            }
        }
    }

    if let Some((_, grad)) = values_and_grad(input) {
        let w = weights.values.values();

        for (dxrow, dyrow) in grad.values_mut().chunks_exact_mut(cols).zip(dy.chunks_exact(rows)) {
            for (wrow, &d) in w.chunks_exact(cols).zip(dyrow) {
                dxrow.iter_mut().zip(wrow).for_each(|(g, &w)| *g += d * w);
            }
        }
    }

    Ok(())
}
