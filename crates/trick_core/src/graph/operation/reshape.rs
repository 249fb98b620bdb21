use crate::{
    tensor::{DenseTensor, Tensor},
    Shape,
};

use super::{values_and_grad, OperationError};

fn check_perm(perm: &[usize], shape: &Shape) -> Result<(), OperationError> {
    let mut seen = vec![false; perm.len()];
    let valid = perm.len() == shape.rank()
        && perm.iter().all(|&axis| axis < seen.len() && !std::mem::replace(&mut seen[axis], true));

    if valid {
        Ok(())
    } else {
        Err(OperationError::InvalidInputShape { op: "Permute", shape: shape.clone() })
    }
}

/// For each output position in row-major order, the index it reads from
/// in the input.
fn permuted_indices(perm: &[usize], shape: &Shape) -> Vec<usize> {
    let out_shape = shape.permute(perm);
    let in_strides = shape.strides();
    let strides = perm.iter().map(|&axis| in_strides[axis]).collect::<Vec<_>>();

    let mut indices = Vec::with_capacity(shape.size());
    let mut pos = vec![0; out_shape.rank()];

    for _ in 0..out_shape.size() {
        indices.push(pos.iter().zip(strides.iter()).map(|(p, s)| p * s).sum());

        for axis in (0..pos.len()).rev() {
            pos[axis] += 1;

            if pos[axis] < out_shape.dim(axis) {
                break;
            }

            pos[axis] = 0;
        }
    }

    indices
}

pub fn permute_forward(perm: &[usize], inputs: &[&Tensor], output: &mut Tensor) -> Result<(), OperationError> {
    let input = &inputs[0].values;
    check_perm(perm, input.shape())?;

    output.values.reshape_if_needed(&input.shape().permute(perm));

    let x = input.values();
    for (out, idx) in output.values.values_mut().iter_mut().zip(permuted_indices(perm, input.shape())) {
        *out = x[idx];
    }

    Ok(())
}

pub fn permute_backward(
    perm: &[usize],
    output_grad: &DenseTensor,
    inputs: &mut [&mut Tensor],
) -> Result<(), OperationError> {
    if let Some((values, grad)) = values_and_grad(inputs[0]) {
        check_perm(perm, values.shape())?;

        if output_grad.shape() != &values.shape().permute(perm) {
            return Err(OperationError::InvalidInputShape { op: "Permute", shape: output_grad.shape().clone() });
        }

        let dx = grad.values_mut();
        for (&d, idx) in output_grad.values().iter().zip(permuted_indices(perm, values.shape())) {
            dx[idx] += d;
        }
    }

    Ok(())
}

pub fn merge_forward(axis: usize, inputs: &[&Tensor], output: &mut Tensor) -> Result<(), OperationError> {
    let input = &inputs[0].values;
    let dims = input.shape().dims();

    if axis + 1 >= dims.len() {
        return Err(OperationError::InvalidInputShape { op: "MergeAxes", shape: input.shape().clone() });
    }

    let mut merged = dims[..axis].to_vec();
    merged.push(dims[axis] * dims[axis + 1]);
    merged.extend_from_slice(&dims[axis + 2..]);

    output.values.load_from_slice(&Shape::new(&merged), input.values());

    Ok(())
}

pub fn split_forward(axis: usize, inner: usize, inputs: &[&Tensor], output: &mut Tensor) -> Result<(), OperationError> {
    let input = &inputs[0].values;
    let dims = input.shape().dims();

    if axis >= dims.len() || inner == 0 || dims[axis] % inner != 0 {
        return Err(OperationError::InvalidInputShape { op: "SplitAxis", shape: input.shape().clone() });
    }

    let mut split = dims[..axis].to_vec();
    split.extend_from_slice(&[dims[axis] / inner, inner]);
    split.extend_from_slice(&dims[axis + 1..]);

    output.values.load_from_slice(&Shape::new(&split), input.values());

    Ok(())
}

/// Backward pass of any operation that only relabels the shape.
pub fn copy_backward(output_grad: &DenseTensor, inputs: &mut [&mut Tensor]) -> Result<(), OperationError> {
    if let Some((values, grad)) = values_and_grad(inputs[0]) {
        if output_grad.size() != values.size() {
            return Err(OperationError::MismatchedInputs {
                op: "Reshape",
                lhs: values.shape().clone(),
                rhs: output_grad.shape().clone(),
            });
        }

        grad.values_mut().iter_mut().zip(output_grad.values()).for_each(|(g, d)| *g += d);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permute_matches_transpose() {
        let mut input = Tensor::new(false);
        let mut output = Tensor::new(false);

        input.values.load_from_slice(&Shape::from([2, 3]), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        permute_forward(&[1, 0], &[&input], &mut output).unwrap();

        assert_eq!(output.shape(), &Shape::from([3, 2]));
        assert_eq!(output.values.values(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn permute_rank_four() {
        let shape = Shape::from([2, 3, 4, 5]);
        let perm = [0, 3, 1, 2];
        let indices = permuted_indices(&perm, &shape);

        // output [n, v, c, t] reads input [n, c, t, v]
        let (n, v, c, t) = (1, 4, 2, 3);
        let out_idx = ((n * 5 + v) * 3 + c) * 4 + t;
        assert_eq!(indices[out_idx], ((n * 3 + c) * 4 + t) * 5 + v);
    }

    #[test]
    fn invalid_permutations() {
        let shape = Shape::from([2, 3]);
        assert!(check_perm(&[0, 0], &shape).is_err());
        assert!(check_perm(&[0, 2], &shape).is_err());
        assert!(check_perm(&[0], &shape).is_err());
        assert!(check_perm(&[1, 0], &shape).is_ok());
    }

    #[test]
    fn split_then_merge() {
        let mut input = Tensor::new(false);
        let mut split = Tensor::new(false);
        let mut merged = Tensor::new(false);

        input.values.load_from_slice(&Shape::from([6, 2]), &[0.0; 12]);

        split_forward(0, 3, &[&input], &mut split).unwrap();
        assert_eq!(split.shape(), &Shape::from([2, 3, 2]));

        merge_forward(0, &[&split], &mut merged).unwrap();
        assert_eq!(merged.shape(), &Shape::from([6, 2]));

        assert!(split_forward(0, 4, &[&input], &mut split).is_err());
    }
}
