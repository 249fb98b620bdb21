use trick_core::{
    graph::{
        builder::GraphBuilderError,
        operation::{ConvDescription, Operation},
        GraphError,
    },
    onnx::{Dim, ExportSettings},
    ExecutionContext, Shape,
};

use crate::{
    catalog::NUM_CLASSES,
    dataset::features::FEATURE_DIM,
    loader::{HostTensor, INPUTS},
};

use super::{ModelBuilder, Network, TrickModel};

const KERNEL: usize = 3;
const CHANNELS: usize = 64;
const NUM_BLOCKS: usize = 3;

/// How the axes of a `[batch, _, _]` feature tensor are ordered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequenceLayout {
    /// `[batch, frames, features]`, the layout the network consumes.
    FrameMajor,
    /// `[batch, features, frames]`.
    FeatureMajor,
}

impl SequenceLayout {
    /// Rearranges a rank 3 tensor in this layout into frame-major order.
    pub fn to_frame_major(self, shape: &Shape, values: &[f32]) -> Option<HostTensor> {
        if shape.rank() != 3 || shape.size() != values.len() {
            return None;
        }

        match self {
            Self::FrameMajor => Some(HostTensor { shape: shape.clone(), vals: values.to_vec() }),
            Self::FeatureMajor => {
                let (batch, features, frames) = (shape.dim(0), shape.dim(1), shape.dim(2));
                let mut vals = vec![0.0; values.len()];

                for b in 0..batch {
                    let src = &values[b * features * frames..(b + 1) * features * frames];
                    let dst = &mut vals[b * features * frames..(b + 1) * features * frames];

                    for f in 0..features {
                        for t in 0..frames {
                            dst[t * features + f] = src[f * frames + t];
                        }
                    }
                }

                Some(HostTensor { shape: Shape::from([batch, frames, features]), vals })
            }
        }
    }
}

/// Temporal convolutional classifier over `[batch, frames, 128]`.
///
/// Three blocks of causal dilated convolution, batch norm, ReLU and dropout,
/// with dilation doubling per block so the sequence length is preserved.
#[derive(Clone, Debug)]
pub struct Tcn {
    pub dropout: f32,
}

impl Default for Tcn {
    fn default() -> Self {
        Self { dropout: 0.2 }
    }
}

impl TrickModel for Tcn {
    fn name(&self) -> &'static str {
        "TCN"
    }

    fn build(&self, ctx: ExecutionContext) -> Result<Network, GraphBuilderError> {
        let mut b = ModelBuilder::new()?;

        let mut x = b.op(Operation::Permute(vec![0, 2, 1]), &[b.input])?;
        let mut width = FEATURE_DIM;

        for i in 0..NUM_BLOCKS {
            let desc = ConvDescription::causal(KERNEL, 1 << i);

            x = b.conv1d(&format!("blocks.{i}.conv"), x, width, CHANNELS, desc)?;
            x = b.batch_norm(&format!("blocks.{i}.bn"), x, CHANNELS)?;
            x = b.op(Operation::ReLU, &[x])?;
            x = b.op(Operation::Dropout(self.dropout), &[x])?;

            width = CHANNELS;
        }

        let x = b.op(Operation::MeanLastAxis, &[x])?;
        let logits = b.linear("fc", x, CHANNELS, NUM_CLASSES)?;

        b.finish(logits, ctx)
    }

    fn export_settings(&self, example_input: &[usize]) -> Option<ExportSettings> {
        Some(ExportSettings {
            graph_name: "trick-tcn".to_string(),
            input_name: "features".to_string(),
            input_dims: vec![Dim::symbolic("batch_size"), Dim::symbolic("sequence_length"), Dim::Fixed(FEATURE_DIM)],
            output_name: "logits".to_string(),
            output_dims: vec![Dim::symbolic("batch_size"), Dim::Fixed(NUM_CLASSES)],
            example_input: example_input.to_vec(),
        })
    }
}

impl Tcn {
    /// Evaluation mode logits for a batch given in either layout.
    pub fn logits(
        network: &mut Network,
        layout: SequenceLayout,
        shape: &Shape,
        values: &[f32],
    ) -> Result<Vec<f32>, GraphError> {
        let input = layout.to_frame_major(shape, values).ok_or_else(|| GraphError::InvalidData {
            id: INPUTS.to_string(),
            shape: shape.clone(),
            values: values.len(),
        })?;

        network.logits(&input.shape, &input.vals)
    }
}
