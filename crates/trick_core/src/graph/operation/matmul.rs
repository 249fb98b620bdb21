use crate::tensor::{DenseTensor, Tensor};

use super::{expect_dim, expect_rank, values_and_grad, OperationError};

const OP: &str = "MatmulLastAxis";

fn dims(input: &DenseTensor, matrix: &DenseTensor) -> Result<(usize, usize), OperationError> {
    expect_rank(OP, matrix, 2)?;

    if input.shape().rank() == 0 {
        return Err(OperationError::InvalidInputShape { op: OP, shape: input.shape().clone() });
    }

    expect_dim(OP, input, input.shape().rank() - 1, matrix, 0)?;

    Ok((matrix.shape().dim(0), matrix.shape().dim(1)))
}

pub fn forward(inputs: &[&Tensor], output: &mut Tensor) -> Result<(), OperationError> {
    let (input, matrix) = (&inputs[0].values, &inputs[1].values);
    let (rows, cols) = dims(input, matrix)?;

    output.values.reshape_if_needed(&input.shape().with_last(cols));

    let m = matrix.values();

    for (xrow, orow) in input.values().chunks_exact(rows).zip(output.values.values_mut().chunks_exact_mut(cols)) {
        orow.iter_mut().for_each(|o| *o = 0.0);

        for (&x, mrow) in xrow.iter().zip(m.chunks_exact(cols)) {
            if x != 0.0 {
                orow.iter_mut().zip(mrow).for_each(|(o, &w)| *o += x * w);
            }
        }
    }

    Ok(())
}

pub fn backward(output_grad: &DenseTensor, inputs: &mut [&mut Tensor]) -> Result<(), OperationError> {
    let (input, matrix) = inputs.split_at_mut(1);
    let (input, matrix) = (&mut *input[0], &mut *matrix[0]);

    let (rows, cols) = dims(&input.values, &matrix.values)?;

    if output_grad.shape() != &input.values.shape().with_last(cols) {
        return Err(OperationError::InvalidInputShape { op: OP, shape: output_grad.shape().clone() });
    }

    let dy = output_grad.values();

    if let Some((_, grad)) = values_and_grad(matrix) {
        let x = input.values.values();

        for (xrow, dyrow) in x.chunks_exact(rows).zip(dy.chunks_exact(cols)) {
            for (grow, &x) in grad.values_mut().chunks_exact_mut(cols).zip(xrow) {
                grow.iter_mut().zip(dyrow).for_each(|(g, &d)| *g += x * d);
            }
        }
    }

    if let Some((_, grad)) = values_and_grad(input) {
        let m = matrix.values.values();

        for (dxrow, dyrow) in grad.values_mut().chunks_exact_mut(rows).zip(dy.chunks_exact(cols)) {
            for (g, mrow) in dxrow.iter_mut().zip(m.chunks_exact(cols)) {
                *g += mrow.iter().zip(dyrow).map(|(a, b)| a * b).sum::<f32>();
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Shape;

    #[test]
    fn matmul_last_axis() {
        let mut input = Tensor::new(false);
        let mut matrix = Tensor::new(false);
        let mut output = Tensor::new(false);

        input.values.load_from_slice(&Shape::from([1, 2, 3]), &[1.0, 0.0, 2.0, 0.0, 1.0, 0.0]);
        matrix.values.load_from_slice(&Shape::from([3, 2]), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        forward(&[&input, &matrix], &mut output).unwrap();

        assert_eq!(output.shape(), &Shape::from([1, 2, 2]));
        assert_eq!(output.values.values(), &[11.0, 14.0, 3.0, 4.0]);
    }
}
