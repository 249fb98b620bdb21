use crate::{
    tensor::{DenseTensor, Tensor},
    Shape,
};

use super::{expect_dim, expect_rank, values_and_grad, OperationError};

const OP: &str = "Conv1d";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConvDescription {
    pub kernel: usize,
    pub dilation: usize,
    pub pad_left: usize,
    pub pad_right: usize,
}

impl ConvDescription {
    /// Equal padding on both sides, preserves length for odd kernels.
    pub fn same(kernel: usize, dilation: usize) -> Self {
        let pad = dilation * (kernel - 1) / 2;
        Self { kernel, dilation, pad_left: pad, pad_right: pad }
    }

    /// All padding on the left, so each output only sees the current and
    /// previous frames and length is preserved.
    pub fn causal(kernel: usize, dilation: usize) -> Self {
        Self { kernel, dilation, pad_left: dilation * (kernel - 1), pad_right: 0 }
    }

    pub fn output_len(&self, len: usize) -> Option<usize> {
        (len + self.pad_left + self.pad_right).checked_sub(self.dilation * (self.kernel - 1)).filter(|&x| x > 0)
    }
}

struct Dims {
    batch: usize,
    in_channels: usize,
    out_channels: usize,
    len: usize,
    out_len: usize,
}

fn dims(
    desc: &ConvDescription,
    input: &DenseTensor,
    filters: &DenseTensor,
    bias: &DenseTensor,
) -> Result<Dims, OperationError> {
    expect_rank(OP, input, 3)?;
    expect_rank(OP, filters, 3)?;
    expect_rank(OP, bias, 1)?;
    expect_dim(OP, input, 1, filters, 1)?;
    expect_dim(OP, filters, 0, bias, 0)?;

    if filters.shape().dim(2) != desc.kernel {
        return Err(OperationError::InvalidInputShape { op: OP, shape: filters.shape().clone() });
    }

    let len = input.shape().dim(2);
    let out_len =
        desc.output_len(len).ok_or_else(|| OperationError::InvalidInputShape { op: OP, shape: input.shape().clone() })?;

    Ok(Dims {
        batch: input.shape().dim(0),
        in_channels: input.shape().dim(1),
        out_channels: filters.shape().dim(0),
        len,
        out_len,
    })
}

/// Range of output positions `t` for which `t + offset` lands inside the input.
fn valid_range(offset: isize, len: usize, out_len: usize) -> std::ops::Range<usize> {
    let start = (-offset).max(0) as usize;
    let end = (len as isize - offset).clamp(0, out_len as isize) as usize;
    start..end.max(start)
}

pub fn forward(desc: &ConvDescription, inputs: &[&Tensor], output: &mut Tensor) -> Result<(), OperationError> {
    let (input, filters, bias) = (&inputs[0].values, &inputs[1].values, &inputs[2].values);
    let d = dims(desc, input, filters, bias)?;

    output.values.reshape_if_needed(&Shape::from([d.batch, d.out_channels, d.out_len]));

    let (x, w, b) = (input.values(), filters.values(), bias.values());
    let out = output.values.values_mut();

    for n in 0..d.batch {
        for co in 0..d.out_channels {
            let orow = &mut out[(n * d.out_channels + co) * d.out_len..][..d.out_len];
            orow.iter_mut().for_each(|o| *o = b[co]);

            for ci in 0..d.in_channels {
                let xrow = &x[(n * d.in_channels + ci) * d.len..][..d.len];
                let wrow = &w[(co * d.in_channels + ci) * desc.kernel..][..desc.kernel];

                for (k, &wk) in wrow.iter().enumerate() {
                    let offset = (k * desc.dilation) as isize - desc.pad_left as isize;

                    for t in valid_range(offset, d.len, d.out_len) {
                        orow[t] += wk * xrow[(t as isize + offset) as usize];
                    }
                }
            }
        }
    }

    Ok(())
}

pub fn backward(
    desc: &ConvDescription,
    output_grad: &DenseTensor,
    inputs: &mut [&mut Tensor],
) -> Result<(), OperationError> {
    let (input, rest) = inputs.split_at_mut(1);
    let (filters, bias) = rest.split_at_mut(1);
    let (input, filters, bias) = (&mut *input[0], &mut *filters[0], &mut *bias[0]);

    let d = dims(desc, &input.values, &filters.values, &bias.values)?;
    let dy = output_grad.values();

    if output_grad.size() != d.batch * d.out_channels * d.out_len {
        return Err(OperationError::InvalidInputShape { op: OP, shape: output_grad.shape().clone() });
    }

    let row = |n: usize, co: usize| &dy[(n * d.out_channels + co) * d.out_len..][..d.out_len];

    if let Some((_, grad)) = values_and_grad(bias) {
        let db = grad.values_mut();

        for n in 0..d.batch {
            for (co, g) in db.iter_mut().enumerate() {
                *g += row(n, co).iter().sum::<f32>();
            }
        }
    }

    if let Some((_, grad)) = values_and_grad(filters) {
        let x = input.values.values();
        let dw = grad.values_mut();

        for n in 0..d.batch {
            for co in 0..d.out_channels {
                let dyrow = row(n, co);

                for ci in 0..d.in_channels {
                    let xrow = &x[(n * d.in_channels + ci) * d.len..][..d.len];
                    let dwrow = &mut dw[(co * d.in_channels + ci) * desc.kernel..][..desc.kernel];

                    for (k, g) in dwrow.iter_mut().enumerate() {
                        let offset = (k * desc.dilation) as isize - desc.pad_left as isize;

                        for t in valid_range(offset, d.len, d.out_len) {
                            *g += dyrow[t] * xrow[(t as isize + offset) as usize];
                        }
                    }
                }
            }
        }
    }

    if let Some((_, grad)) = values_and_grad(input) {
        let w = filters.values.values();
        let dx = grad.values_mut();

        for n in 0..d.batch {
            for co in 0..d.out_channels {
                let dyrow = row(n, co);

                for ci in 0..d.in_channels {
                    let dxrow = &mut dx[(n * d.in_channels + ci) * d.len..][..d.len];
                    let wrow = &w[(co * d.in_channels + ci) * desc.kernel..][..desc.kernel];

                    for (k, &wk) in wrow.iter().enumerate() {
                        let offset = (k * desc.dilation) as isize - desc.pad_left as isize;

                        for t in valid_range(offset, d.len, d.out_len) {
                            dxrow[(t as isize + offset) as usize] += wk * dyrow[t];
                        }
                    }
                }
            }
        }
    }

    Ok(())
}
