mod activate;
mod affine;
mod batchnorm;
mod conv;
mod dropout;
mod loss;
mod matmul;
mod reduce;
mod reshape;

pub use batchnorm::BatchNormDescription;
pub use conv::ConvDescription;

use crate::{
    tensor::{DenseTensor, Tensor},
    ExecutionContext, Shape,
};

/// All supported operations between tensors.
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    /// Affine transform `[N, in] -> [N, out]` with weights `[out, in]` and bias `[out]`
    Affine,
    /// Batch normalisation of `[N, C, L]` (or `[N, C]`) with scale, shift and running statistics
    BatchNorm(BatchNormDescription),
    /// 1D convolution of `[N, C_in, L]` with filters `[C_out, C_in, K]` and bias `[C_out]`
    Conv1d(ConvDescription),
    /// Randomly zero a fraction of values while training, rescaling the rest
    Dropout(f32),
    /// Multiply along the last axis by a matrix: `out[.., j] = sum_i x[.., i] * m[i, j]`
    MatmulLastAxis,
    /// Average over the last axis
    MeanLastAxis,
    /// Merge axis `i` and `i + 1`
    MergeAxes(usize),
    /// Reorder axes, axis `i` of the output is axis `perm[i]` of the input
    Permute(Vec<usize>),
    ReLU,
    /// Mean softmax crossentropy of logits `[N, K]` against one-hot targets `[N, K]`
    SoftmaxCrossEntropyLoss,
    /// Split `axis` into `(dim / inner, inner)`
    SplitAxis { axis: usize, inner: usize },
}

#[derive(Debug)]
pub enum OperationError {
    InvalidInputShape { op: &'static str, shape: Shape },
    MismatchedInputs { op: &'static str, lhs: Shape, rhs: Shape },
    MissingInternalBuffer { op: &'static str, id: &'static str },
    MissingOutputGradient,
}

impl std::fmt::Display for OperationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInputShape { op, shape } => write!(f, "{op}: invalid input shape {shape}"),
            Self::MismatchedInputs { op, lhs, rhs } => write!(f, "{op}: incompatible inputs {lhs} and {rhs}"),
            Self::MissingInternalBuffer { op, id } => write!(f, "{op}: missing internal buffer '{id}'"),
            Self::MissingOutputGradient => write!(f, "Backward pass reached a node without a gradient"),
        }
    }
}

impl std::error::Error for OperationError {}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Affine => "Affine",
            Operation::BatchNorm(_) => "BatchNorm",
            Operation::Conv1d(_) => "Conv1d",
            Operation::Dropout(_) => "Dropout",
            Operation::MatmulLastAxis => "MatmulLastAxis",
            Operation::MeanLastAxis => "MeanLastAxis",
            Operation::MergeAxes(_) => "MergeAxes",
            Operation::Permute(_) => "Permute",
            Operation::ReLU => "ReLU",
            Operation::SoftmaxCrossEntropyLoss => "SoftmaxCrossEntropyLoss",
            Operation::SplitAxis { .. } => "SplitAxis",
        }
    }

    pub fn num_inputs(&self) -> usize {
        match self {
            Operation::Affine | Operation::Conv1d(_) => 3,
            Operation::BatchNorm(_) => 4,
            Operation::MatmulLastAxis | Operation::SoftmaxCrossEntropyLoss => 2,
            Operation::Dropout(_)
            | Operation::MeanLastAxis
            | Operation::MergeAxes(_)
            | Operation::Permute(_)
            | Operation::ReLU
            | Operation::SplitAxis { .. } => 1,
        }
    }

    pub fn forward(
        &self,
        ctx: &mut ExecutionContext,
        inputs: &[&Tensor],
        output: &mut Tensor,
    ) -> Result<(), OperationError> {
        match self {
            Operation::Affine => affine::forward(inputs, output),
            Operation::BatchNorm(desc) => batchnorm::forward(desc, ctx.training(), inputs, output),
            Operation::Conv1d(desc) => conv::forward(desc, inputs, output),
            Operation::Dropout(rate) => dropout::forward(*rate, ctx, inputs, output),
            Operation::MatmulLastAxis => matmul::forward(inputs, output),
            Operation::MeanLastAxis => reduce::forward(inputs, output),
            Operation::MergeAxes(axis) => reshape::merge_forward(*axis, inputs, output),
            Operation::Permute(perm) => reshape::permute_forward(perm, inputs, output),
            Operation::ReLU => activate::forward(inputs, output),
            Operation::SoftmaxCrossEntropyLoss => loss::forward(inputs, output),
            Operation::SplitAxis { axis, inner } => reshape::split_forward(*axis, *inner, inputs, output),
        }
    }

    pub fn backward(
        &self,
        ctx: &ExecutionContext,
        output: &Tensor,
        inputs: &mut [&mut Tensor],
    ) -> Result<(), OperationError> {
        let output_grad = output.gradients.as_ref().ok_or(OperationError::MissingOutputGradient)?;

        match self {
            Operation::Affine => affine::backward(output_grad, inputs),
            Operation::BatchNorm(_) => batchnorm::backward(ctx.training(), output, output_grad, inputs),
            Operation::Conv1d(desc) => conv::backward(desc, output_grad, inputs),
            Operation::Dropout(rate) => dropout::backward(*rate, ctx.training(), output, output_grad, inputs),
            Operation::MatmulLastAxis => matmul::backward(output_grad, inputs),
            Operation::MeanLastAxis => reduce::backward(output_grad, inputs),
            Operation::MergeAxes(_) | Operation::SplitAxis { .. } => reshape::copy_backward(output_grad, inputs),
            Operation::Permute(perm) => reshape::permute_backward(perm, output_grad, inputs),
            Operation::ReLU => activate::backward(output, output_grad, inputs),
            Operation::SoftmaxCrossEntropyLoss => loss::backward(output, output_grad, inputs),
        }
    }

    /// Folds the batch statistics of the last training forward pass into the
    /// running statistics, does nothing for other operations.
    pub fn update_running_stats(&self, output: &Tensor, running: &mut Tensor) -> Result<(), OperationError> {
        match self {
            Operation::BatchNorm(desc) => batchnorm::update_running_stats(desc, output, running),
            _ => Ok(()),
        }
    }
}

/// The values of `tensor` along with its gradient buffer, shaped to match,
/// if it requires a gradient.
pub(crate) fn values_and_grad(tensor: &mut Tensor) -> Option<(&DenseTensor, &mut DenseTensor)> {
    let Tensor { values, gradients, .. } = tensor;

    gradients.as_mut().map(|grad| {
        grad.reshape_if_needed(values.shape());
        (&*values, grad)
    })
}

pub(crate) fn expect_rank(op: &'static str, tensor: &DenseTensor, rank: usize) -> Result<(), OperationError> {
    if tensor.shape().rank() == rank {
        Ok(())
    } else {
        Err(OperationError::InvalidInputShape { op, shape: tensor.shape().clone() })
    }
}

pub(crate) fn expect_dim(
    op: &'static str,
    lhs: &DenseTensor,
    lhs_axis: usize,
    rhs: &DenseTensor,
    rhs_axis: usize,
) -> Result<(), OperationError> {
    if lhs.shape().dim(lhs_axis) == rhs.shape().dim(rhs_axis) {
        Ok(())
    } else {
        Err(OperationError::MismatchedInputs { op, lhs: lhs.shape().clone(), rhs: rhs.shape().clone() })
    }
}
