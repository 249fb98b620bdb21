pub mod skeleton_graph;
pub mod stgcn;
pub mod tcn;

pub use skeleton_graph::SkeletonGraph;
pub use stgcn::Stgcn;
pub use tcn::{SequenceLayout, Tcn};

use trick_core::{
    graph::{
        builder::{GraphBuilder, GraphBuilderError, Node, WeightInit},
        operation::{BatchNormDescription, ConvDescription, Operation},
        Graph, GraphError,
    },
    onnx::ExportSettings,
    optimiser::utils,
    ExecutionContext, Shape,
};

use crate::{
    catalog::NUM_CLASSES,
    loader::{INPUTS, TARGETS},
};

/// A classifier that can be built into a training graph.
pub trait TrickModel {
    fn name(&self) -> &'static str;

    /// The graph takes [`INPUTS`] and one-hot [`TARGETS`] and its root is the
    /// mean softmax crossentropy loss of the returned logits.
    fn build(&self, ctx: ExecutionContext) -> Result<Network, GraphBuilderError>;

    /// Models that can be exported return the declared input and output of
    /// the exported graph, traced with `example_input`.
    fn export_settings(&self, _example_input: &[usize]) -> Option<ExportSettings> {
        None
    }
}

pub struct Network {
    pub graph: Graph,
    pub input: Node,
    pub logits: Node,
}

impl Network {
    /// Evaluation mode logits `[batch, 13]` for one input batch.
    pub fn logits(&mut self, shape: &Shape, values: &[f32]) -> Result<Vec<f32>, GraphError> {
        eval_logits(&mut self.graph, self.logits, shape, values)
    }

    pub fn save(&self, path: &str) -> std::io::Result<()> {
        utils::write_graph_to_file(&self.graph, path)
    }

    pub fn load(&mut self, path: &str) -> std::io::Result<()> {
        utils::load_graph_from_file(&mut self.graph, path)
    }
}

/// Runs the graph up to `logits` with dropout off and batch norm using its
/// running statistics, then restores the previous mode.
pub fn eval_logits(graph: &mut Graph, logits: Node, shape: &Shape, values: &[f32]) -> Result<Vec<f32>, GraphError> {
    let was_training = graph.training();

    graph.set_training(false);
    let result = graph
        .store_input(INPUTS, shape, values)
        .and_then(|()| graph.forward_to(logits))
        .map(|()| graph.get_node(logits).values.values().to_vec());
    graph.set_training(was_training);

    result
}

/// Wraps a builder with the inputs every model shares.
pub(crate) struct ModelBuilder {
    pub builder: GraphBuilder,
    pub input: Node,
    targets: Node,
}

impl ModelBuilder {
    pub fn new() -> Result<Self, GraphBuilderError> {
        let mut builder = GraphBuilder::default();
        let input = builder.create_input(INPUTS)?;
        let targets = builder.create_input(TARGETS)?;

        Ok(Self { builder, input, targets })
    }

    pub fn op(&mut self, operation: Operation, inputs: &[Node]) -> Result<Node, GraphBuilderError> {
        self.builder.create_result_of_operation(operation, inputs)
    }

    /// Filters `[out, in, kernel]` and bias `[out]`, uniform in `±1/sqrt(in * kernel)`.
    pub fn conv1d(
        &mut self,
        id: &str,
        x: Node,
        in_channels: usize,
        out_channels: usize,
        desc: ConvDescription,
    ) -> Result<Node, GraphBuilderError> {
        let init = fan_in_init(in_channels * desc.kernel);
        let shape = Shape::from([out_channels, in_channels, desc.kernel]);
        let w = self.builder.create_weights(&format!("{id}.weight"), shape, init)?;
        let b = self.builder.create_weights(&format!("{id}.bias"), Shape::from([out_channels]), init)?;

        self.op(Operation::Conv1d(desc), &[x, w, b])
    }

    pub fn linear(&mut self, id: &str, x: Node, inputs: usize, outputs: usize) -> Result<Node, GraphBuilderError> {
        let init = fan_in_init(inputs);
        let w = self.builder.create_weights(&format!("{id}.weight"), Shape::from([outputs, inputs]), init)?;
        let b = self.builder.create_weights(&format!("{id}.bias"), Shape::from([outputs]), init)?;

        self.op(Operation::Affine, &[x, w, b])
    }

    /// Scale 1, shift 0, running mean 0 and running variance 1.
    pub fn batch_norm(&mut self, id: &str, x: Node, channels: usize) -> Result<Node, GraphBuilderError> {
        let shape = Shape::from([channels]);
        let scale = self.builder.create_weights(&format!("{id}.weight"), shape.clone(), WeightInit::Constant(1.0))?;
        let shift = self.builder.create_weights(&format!("{id}.bias"), shape, WeightInit::Constant(0.0))?;

        let mut running = vec![0.0; 2 * channels];
        running[channels..].fill(1.0);
        let running = self.builder.create_state(&format!("{id}.running"), Shape::from([2, channels]), &running)?;

        self.op(Operation::BatchNorm(BatchNormDescription::default()), &[x, scale, shift, running])
    }

    /// Attaches the loss to `logits` and compiles the graph.
    pub fn finish(mut self, logits: Node, ctx: ExecutionContext) -> Result<Network, GraphBuilderError> {
        let targets = self.targets;
        self.op(Operation::SoftmaxCrossEntropyLoss, &[logits, targets])?;
        let graph = self.builder.build(ctx)?;

        Ok(Network { graph, input: self.input, logits })
    }
}

fn fan_in_init(fan_in: usize) -> WeightInit {
    WeightInit::Uniform(1.0 / (fan_in as f32).sqrt())
}

/// Index of the largest logit in each row, the first one on ties.
pub fn argmax_rows(logits: &[f32]) -> Vec<usize> {
    logits
        .chunks_exact(NUM_CLASSES)
        .map(|row| {
            row.iter().enumerate().fold(0, |best, (idx, &val)| if val > row[best] { idx } else { best })
        })
        .collect()
}
