use crate::tensor::{DenseTensor, Tensor};

use super::{values_and_grad, OperationError};

pub fn forward(inputs: &[&Tensor], output: &mut Tensor) -> Result<(), OperationError> {
    let input = &inputs[0].values;
    output.values.reshape_if_needed(input.shape());

    for (out, &x) in output.values.values_mut().iter_mut().zip(input.values()) {
        *out = x.max(0.0);
    }

    Ok(())
}

pub fn backward(output: &Tensor, output_grad: &DenseTensor, inputs: &mut [&mut Tensor]) -> Result<(), OperationError> {
    if let Some((_, grad)) = values_and_grad(inputs[0]) {
        let (activated, dy) = (output.values.values(), output_grad.values());

        for ((g, &out), &d) in grad.values_mut().iter_mut().zip(activated).zip(dy) {
            if out > 0.0 {
                *g += d;
            }
        }
    }

    Ok(())
}
