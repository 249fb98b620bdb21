pub mod builder;
pub mod operation;


use std::{
    cell::{Ref, RefCell},
    collections::HashMap,
};

use builder::{GraphBuilderError, Node, NodeKind};
use operation::{Operation, OperationError};

use crate::{tensor::Tensor, ExecutionContext, Shape};

#[derive(Debug)]
pub enum GraphError {
    Builder(GraphBuilderError),
    Operation(OperationError),
    UnknownId(String),
    WrongKind { id: String, expected: NodeKind, found: NodeKind },
    InvalidData { id: String, shape: Shape, values: usize },
    NonScalarOutput(Shape),
}

impl std::fmt::Display for GraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Builder(err) => write!(f, "{err}"),
            Self::Operation(err) => write!(f, "{err}"),
            Self::UnknownId(id) => write!(f, "No node with ID '{id}'"),
            Self::WrongKind { id, expected, found } => write!(f, "'{id}' is {found:?}, expected {expected:?}"),
            Self::InvalidData { id, shape, values } => write!(f, "'{id}': shape {shape} does not hold {values} values"),
            Self::NonScalarOutput(shape) => write!(f, "Graph output has shape {shape}, expected a single value"),
        }
    }
}

impl std::error::Error for GraphError {}

impl From<GraphBuilderError> for GraphError {
    fn from(value: GraphBuilderError) -> Self {
        Self::Builder(value)
    }
}

impl From<OperationError> for GraphError {
    fn from(value: OperationError) -> Self {
        Self::Operation(value)
    }
}

pub struct OperationPayload {
    pub(crate) operation: Operation,
    pub(crate) inputs: Vec<Node>,
    pub(crate) output: Node,
}

impl OperationPayload {
    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn inputs(&self) -> &[Node] {
        &self.inputs
    }

    pub fn output(&self) -> Node {
        self.output
    }
}

pub struct Graph {
    nodes: Vec<RefCell<Tensor>>,
    ids: Vec<Option<String>>,
    kinds: Vec<NodeKind>,
    by_id: HashMap<String, Node>,
    root: Node,
    queue: Vec<OperationPayload>,
    ctx: ExecutionContext,
}

impl Graph {
    /// Runs every operation and returns the value of the output node.
    pub fn forward(&mut self) -> Result<f32, GraphError> {
        self.execute_fwd(self.root)?;

        let root = self.nodes[self.root.0].borrow();

        if root.values.size() != 1 {
            return Err(GraphError::NonScalarOutput(root.shape().clone()));
        }

        Ok(root.values.values()[0])
    }

    /// Runs operations up to and including the one that produces `node`,
    /// inputs only needed further on may be left empty.
    pub fn forward_to(&mut self, node: Node) -> Result<(), GraphError> {
        self.execute_fwd(node)
    }

    fn execute_fwd(&mut self, until: Node) -> Result<(), GraphError> {
        for OperationPayload { operation, inputs, output } in &self.queue {
            if *output > until {
                break;
            }

            {
                let inputs = inputs.iter().map(|node| self.nodes[node.0].borrow()).collect::<Vec<_>>();
                let inputs = inputs.iter().map(|ref_cell| &**ref_cell).collect::<Vec<_>>();
                let mut output = self.nodes[output.0].borrow_mut();

                operation.forward(&mut self.ctx, &inputs, &mut output)?;
            }

            if self.ctx.training() && matches!(operation, Operation::BatchNorm(_)) {
                let output = self.nodes[output.0].borrow();
                let mut running = self.nodes[inputs[3].0].borrow_mut();
                operation.update_running_stats(&output, &mut running)?;
            }
        }

        Ok(())
    }

    /// Backpropagates from the output node, accumulating into the gradients
    /// of the weights. Gradients of intermediate nodes are reset first.
    pub fn backward(&mut self) -> Result<(), GraphError> {
        for (node, kind) in self.nodes.iter_mut().zip(self.kinds.iter()) {
            if *kind == NodeKind::Intermediate {
                let Tensor { values, gradients, .. } = node.get_mut();

                if let Some(grad) = gradients.as_mut() {
                    grad.reshape_if_needed(values.shape());
                    grad.set_zero();
                }
            }
        }

        if let Some(grad) = self.nodes[self.root.0].get_mut().gradients.as_mut() {
            grad.set_to(1.0);
        }

        for OperationPayload { operation, inputs, output } in self.queue.iter().rev() {
            let output = self.nodes[output.0].borrow();
            let mut inputs = inputs.iter().map(|node| self.nodes[node.0].borrow_mut()).collect::<Vec<_>>();
            let mut inputs = inputs.iter_mut().map(|ref_cell| &mut **ref_cell).collect::<Vec<_>>();

            operation.backward(&self.ctx, &output, &mut inputs)?;
        }

        Ok(())
    }

    pub fn zero_grads(&mut self) {
        for node in &mut self.nodes {
            node.get_mut().zero_grad();
        }
    }

    pub fn training(&self) -> bool {
        self.ctx.training()
    }

    pub fn set_training(&mut self, training: bool) {
        self.ctx.set_training(training);
    }

    fn lookup(&self, id: &str, expected: NodeKind) -> Result<Node, GraphError> {
        let node = *self.by_id.get(id).ok_or_else(|| GraphError::UnknownId(id.to_string()))?;
        let found = self.kinds[node.0];

        if found == expected {
            Ok(node)
        } else {
            Err(GraphError::WrongKind { id: id.to_string(), expected, found })
        }
    }

    fn load_values(&mut self, id: &str, kind: NodeKind, shape: &Shape, values: &[f32]) -> Result<(), GraphError> {
        let node = self.lookup(id, kind)?;

        if shape.size() != values.len() {
            return Err(GraphError::InvalidData { id: id.to_string(), shape: shape.clone(), values: values.len() });
        }

        self.nodes[node.0].get_mut().values.load_from_slice(shape, values);

        Ok(())
    }

    pub fn store_input(&mut self, id: &str, shape: &Shape, values: &[f32]) -> Result<(), GraphError> {
        self.load_values(id, NodeKind::Input, shape, values)
    }

    /// Overwrites persistent values (weights or state), which must keep
    /// their shape.
    pub fn load_persistent(&mut self, id: &str, values: &[f32]) -> Result<(), GraphError> {
        let node = *self.by_id.get(id).ok_or_else(|| GraphError::UnknownId(id.to_string()))?;
        let kind = self.kinds[node.0];

        if !matches!(kind, NodeKind::Weights | NodeKind::State) {
            return Err(GraphError::WrongKind { id: id.to_string(), expected: NodeKind::Weights, found: kind });
        }

        let shape = self.nodes[node.0].borrow().shape().clone();
        self.load_values(id, kind, &shape, values)
    }

    fn ids_of(&self, kind: NodeKind) -> Vec<String> {
        let mut ids = self
            .by_id
            .iter()
            .filter(|(_, node)| self.kinds[node.0] == kind)
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>();

        ids.sort();
        ids
    }

    pub fn weight_ids(&self) -> Vec<String> {
        self.ids_of(NodeKind::Weights)
    }

    pub fn state_ids(&self) -> Vec<String> {
        self.ids_of(NodeKind::State)
    }

    pub fn get_weights(&self, id: &str) -> Result<Ref<'_, Tensor>, GraphError> {
        Ok(self.nodes[self.lookup(id, NodeKind::Weights)?.0].borrow())
    }

    pub fn get_weights_mut(&mut self, id: &str) -> Result<&mut Tensor, GraphError> {
        let node = self.lookup(id, NodeKind::Weights)?;
        Ok(self.nodes[node.0].get_mut())
    }

    pub fn get_state(&self, id: &str) -> Result<Ref<'_, Tensor>, GraphError> {
        Ok(self.nodes[self.lookup(id, NodeKind::State)?.0].borrow())
    }

    pub fn get_node(&self, node: Node) -> Ref<'_, Tensor> {
        self.nodes[node.0].borrow()
    }

    pub fn node(&self, id: &str) -> Option<Node> {
        self.by_id.get(id).copied()
    }

    pub fn node_id(&self, node: Node) -> Option<&str> {
        self.ids.get(node.0).and_then(|id| id.as_deref())
    }

    pub fn node_kind(&self, node: Node) -> NodeKind {
        self.kinds[node.0]
    }

    pub fn root(&self) -> Node {
        self.root
    }

    pub fn operations(&self) -> impl Iterator<Item = &OperationPayload> {
        self.queue.iter()
    }

    pub fn get_num_params(&self) -> usize {
        self.nodes
            .iter()
            .zip(self.kinds.iter())
            .filter(|(_, kind)| **kind == NodeKind::Weights)
            .map(|(node, _)| node.borrow().values.size())
            .sum()
    }
}
