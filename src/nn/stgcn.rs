use trick_core::{
    graph::{
        builder::GraphBuilderError,
        operation::{ConvDescription, Operation},
    },
    ExecutionContext, Shape,
};

use crate::{catalog::NUM_CLASSES, dataset::skeleton::KEYPOINT_CHANNELS};

use super::{ModelBuilder, Network, SkeletonGraph, TrickModel};

const TEMPORAL_KERNEL: usize = 9;
const TEMPORAL_CHANNELS: usize = 64;
const SPATIAL_CHANNELS: usize = 128;

/// Spatio-temporal graph convolutional classifier over `[batch, 3, frames, keypoints]`.
///
/// Each keypoint's sequence is convolved over time on its own, features are
/// then propagated along the skeleton edges, mixed by a 1x1 convolution and
/// pooled over time and keypoints before the final linear layer.
#[derive(Clone, Debug)]
pub struct Stgcn {
    pub skeleton: SkeletonGraph,
    pub dropout: f32,
}

impl Default for Stgcn {
    fn default() -> Self {
        Self { skeleton: SkeletonGraph::default(), dropout: 0.5 }
    }
}

impl TrickModel for Stgcn {
    fn name(&self) -> &'static str {
        "ST-GCN"
    }

    fn build(&self, ctx: ExecutionContext) -> Result<Network, GraphBuilderError> {
        let nodes = self.skeleton.num_nodes();
        let temporal = ConvDescription::same(TEMPORAL_KERNEL, 1);

        let mut b = ModelBuilder::new()?;
        let adjacency = self.skeleton.adjacency();
        let adjacency = b.builder.create_constant("adjacency", Shape::from([nodes, nodes]), &adjacency)?;

        // [B, C, T, V] -> [B * V, C, T]
        let x = b.op(Operation::Permute(vec![0, 3, 1, 2]), &[b.input])?;
        let x = b.op(Operation::MergeAxes(0), &[x])?;

        let x = b.conv1d("temporal_conv1", x, KEYPOINT_CHANNELS, TEMPORAL_CHANNELS, temporal)?;
        let x = b.op(Operation::ReLU, &[x])?;
        let x = b.op(Operation::Dropout(self.dropout), &[x])?;

        let x = b.conv1d("temporal_conv2", x, TEMPORAL_CHANNELS, TEMPORAL_CHANNELS, temporal)?;
        let x = b.op(Operation::ReLU, &[x])?;

        // [B * V, C, T] -> [B, C, T, V]
        let x = b.op(Operation::SplitAxis { axis: 0, inner: nodes }, &[x])?;
        let x = b.op(Operation::Permute(vec![0, 2, 3, 1]), &[x])?;

        let x = b.op(Operation::MatmulLastAxis, &[x, adjacency])?;

        // 1x1 convolution over every (frame, keypoint) pair
        let x = b.op(Operation::MergeAxes(2), &[x])?;
        let x = b.conv1d("spatial_conv", x, TEMPORAL_CHANNELS, SPATIAL_CHANNELS, ConvDescription::same(1, 1))?;

        let x = b.op(Operation::MeanLastAxis, &[x])?;
        let logits = b.linear("fc", x, SPATIAL_CHANNELS, NUM_CLASSES)?;

        b.finish(logits, ctx)
    }
}
