use crate::{
    tensor::{DenseTensor, Tensor},
    Shape,
};

use super::{expect_rank, values_and_grad, OperationError};

const OP: &str = "SoftmaxCrossEntropyLoss";

fn check(logits: &DenseTensor, targets: &DenseTensor) -> Result<(usize, usize), OperationError> {
    expect_rank(OP, logits, 2)?;

    if logits.shape() != targets.shape() || logits.size() == 0 {
        return Err(OperationError::MismatchedInputs {
            op: OP,
            lhs: logits.shape().clone(),
            rhs: targets.shape().clone(),
        });
    }

    Ok((logits.shape().dim(0), logits.shape().dim(1)))
}

/// Softmaxes each row of the logits and averages the crossentropy with the
/// target rows over the batch, giving a single value.
pub fn forward(inputs: &[&Tensor], output: &mut Tensor) -> Result<(), OperationError> {
    let (logits, targets) = (&inputs[0].values, &inputs[1].values);
    let (rows, cols) = check(logits, targets)?;

    let mut softmaxed = vec![0.0; rows * cols];
    let mut total = 0.0;

    let rows_iter = logits.values().chunks_exact(cols).zip(targets.values().chunks_exact(cols));

    for ((row, target), smax) in rows_iter.zip(softmaxed.chunks_exact_mut(cols)) {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let sum = row.iter().map(|x| (x - max).exp()).sum::<f32>();
        let log_sum = sum.ln();

        for ((s, &x), &t) in smax.iter_mut().zip(row).zip(target) {
            let log_p = x - max - log_sum;
            *s = log_p.exp();
            total -= t * log_p;
        }
    }

    output.values.load_from_slice(&Shape::from([1]), &[total / rows as f32]);
    output.internal_mut("softmaxed").load_from_slice(logits.shape(), &softmaxed);

    Ok(())
}

pub fn backward(output: &Tensor, output_grad: &DenseTensor, inputs: &mut [&mut Tensor]) -> Result<(), OperationError> {
    let softmaxed =
        output.get_internal("softmaxed").ok_or(OperationError::MissingInternalBuffer { op: OP, id: "softmaxed" })?;

    let (logits, targets) = inputs.split_at_mut(1);
    let (logits, targets) = (&mut *logits[0], &*targets[0]);

    let (rows, _) = check(softmaxed, &targets.values)?;
    let scale = output_grad.values()[0] / rows as f32;

    if let Some((_, grad)) = values_and_grad(logits) {
        for ((g, &s), &t) in grad.values_mut().iter_mut().zip(softmaxed.values()).zip(targets.values.values()) {
            *g += scale * (s - t);
        }
    }

    Ok(())
}
