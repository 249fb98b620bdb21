use crate::tensor::{DenseTensor, Tensor};

use super::{values_and_grad, OperationError};

const OP: &str = "MeanLastAxis";

fn last(input: &DenseTensor) -> Result<usize, OperationError> {
    let shape = input.shape();

    if shape.rank() > 1 && shape.last() > 0 {
        Ok(shape.last())
    } else {
        Err(OperationError::InvalidInputShape { op: OP, shape: shape.clone() })
    }
}

pub fn forward(inputs: &[&Tensor], output: &mut Tensor) -> Result<(), OperationError> {
    let input = &inputs[0].values;
    let len = last(input)?;

    output.values.reshape_if_needed(&input.shape().without_last());

    for (out, row) in output.values.values_mut().iter_mut().zip(input.values().chunks_exact(len)) {
        *out = row.iter().sum::<f32>() / len as f32;
    }

    Ok(())
}

pub fn backward(output_grad: &DenseTensor, inputs: &mut [&mut Tensor]) -> Result<(), OperationError> {
    if let Some((values, grad)) = values_and_grad(inputs[0]) {
        let len = last(values)?;

        if output_grad.size() * len != values.size() {
            return Err(OperationError::InvalidInputShape { op: OP, shape: output_grad.shape().clone() });
        }

        for (row, &d) in grad.values_mut().chunks_exact_mut(len).zip(output_grad.values()) {
            row.iter_mut().for_each(|g| *g += d / len as f32);
        }
    }

    Ok(())
}
