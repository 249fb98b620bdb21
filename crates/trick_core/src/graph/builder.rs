use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
};

use super::{operation::Operation, Graph, OperationPayload};
use crate::{rng, tensor::Tensor, ExecutionContext, Shape};

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Node(pub(crate) usize);

impl Node {
    pub fn idx(&self) -> usize {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// Fed with data before every forward pass.
    Input,
    /// Trainable, updated by the optimiser.
    Weights,
    /// Persistent but not trainable, e.g. batch norm running statistics.
    State,
    /// Fixed at construction.
    Constant,
    /// Produced by an operation.
    Intermediate,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum WeightInit {
    /// Uniform in `[-bound, bound]`.
    Uniform(f32),
    Constant(f32),
}

pub(crate) struct NodeData {
    id: Option<String>,
    kind: NodeKind,
    values: Option<(Shape, Vec<f32>)>,
    init: Option<WeightInit>,
    parent: Option<(Operation, Vec<Node>)>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum GraphBuilderError {
    DuplicateId(String),
    UnknownNode(Node),
    WrongNumberOfInputs { op: &'static str, expected: usize, found: usize },
    AliasedInputs { op: &'static str },
    MismatchedConstant { id: String, shape: Shape, values: usize },
    NoSingleOutput(usize),
    OutputIsNotAnOperation,
}

impl std::fmt::Display for GraphBuilderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateId(id) => write!(f, "ID '{id}' is used more than once"),
            Self::UnknownNode(node) => write!(f, "Node {} does not exist", node.0),
            Self::WrongNumberOfInputs { op, expected, found } => {
                write!(f, "{op} takes {expected} inputs, {found} were given")
            }
            Self::AliasedInputs { op } => write!(f, "{op} would alias nodes on backprop"),
            Self::MismatchedConstant { id, shape, values } => write!(f, "'{id}' has shape {shape} but {values} values"),
            Self::NoSingleOutput(count) => write!(f, "Graph must have a single output, found {count}"),
            Self::OutputIsNotAnOperation => write!(f, "Graph output must be the result of an operation"),
        }
    }
}

impl std::error::Error for GraphBuilderError {}

/// Records the nodes and operations of a graph. Shapes of intermediate
/// nodes are only known once inputs are provided, so batch size and
/// sequence length may change between forward passes.
#[derive(Default)]
pub struct GraphBuilder {
    nodes: Vec<NodeData>,
    roots: HashSet<Node>,
    ids: HashSet<String>,
}

impl GraphBuilder {
    fn create_node(&mut self, data: NodeData) -> Result<Node, GraphBuilderError> {
        if let Some(id) = data.id.as_ref() {
            if !self.ids.insert(id.to_string()) {
                return Err(GraphBuilderError::DuplicateId(id.to_string()));
            }
        }

        let node = Node(self.nodes.len());

        if let Some((_, parents)) = &data.parent {
            for parent in parents {
                self.roots.remove(parent);
            }
        }

        self.nodes.push(data);
        self.roots.insert(node);

        Ok(node)
    }

    fn create_leaf(
        &mut self,
        id: &str,
        kind: NodeKind,
        values: Option<(Shape, Vec<f32>)>,
        init: Option<WeightInit>,
    ) -> Result<Node, GraphBuilderError> {
        if let Some((shape, vals)) = &values {
            if shape.size() != vals.len() {
                return Err(GraphBuilderError::MismatchedConstant {
                    id: id.to_string(),
                    shape: shape.clone(),
                    values: vals.len(),
                });
            }
        }

        self.create_node(NodeData { id: Some(id.to_string()), kind, values, init, parent: None })
    }

    pub fn create_input(&mut self, id: &str) -> Result<Node, GraphBuilderError> {
        self.create_leaf(id, NodeKind::Input, None, None)
    }

    pub fn create_weights(&mut self, id: &str, shape: Shape, init: WeightInit) -> Result<Node, GraphBuilderError> {
        let size = shape.size();
        self.create_leaf(id, NodeKind::Weights, Some((shape, vec![0.0; size])), Some(init))
    }

    pub fn create_state(&mut self, id: &str, shape: Shape, values: &[f32]) -> Result<Node, GraphBuilderError> {
        self.create_leaf(id, NodeKind::State, Some((shape, values.to_vec())), None)
    }

    pub fn create_constant(&mut self, id: &str, shape: Shape, values: &[f32]) -> Result<Node, GraphBuilderError> {
        self.create_leaf(id, NodeKind::Constant, Some((shape, values.to_vec())), None)
    }

    pub fn create_result_of_operation(
        &mut self,
        operation: Operation,
        inputs: &[Node],
    ) -> Result<Node, GraphBuilderError> {
        let op = operation.name();

        if inputs.len() != operation.num_inputs() {
            return Err(GraphBuilderError::WrongNumberOfInputs {
                op,
                expected: operation.num_inputs(),
                found: inputs.len(),
            });
        }

        if let Some(&node) = inputs.iter().find(|node| node.0 >= self.nodes.len()) {
            return Err(GraphBuilderError::UnknownNode(node));
        }

        let mut set = HashSet::new();
        if !inputs.iter().all(|node| set.insert(node)) {
            return Err(GraphBuilderError::AliasedInputs { op });
        }

        let data = NodeData {
            id: None,
            kind: NodeKind::Intermediate,
            values: None,
            init: None,
            parent: Some((operation, inputs.to_vec())),
        };

        self.create_node(data)
    }

    /// The only node not consumed by any operation. Unused leaf nodes
    /// count as outputs too.
    pub fn root(&self) -> Result<Node, GraphBuilderError> {
        if self.roots.len() != 1 {
            return Err(GraphBuilderError::NoSingleOutput(self.roots.len()));
        }

        let root = self.roots.iter().copied().next().ok_or(GraphBuilderError::NoSingleOutput(0))?;

        if self.nodes[root.0].parent.is_none() {
            return Err(GraphBuilderError::OutputIsNotAnOperation);
        }

        Ok(root)
    }

    /// Initialises all weights with the context's generator and compiles
    /// the operations into a queue that runs in order of creation.
    pub fn build(self, mut ctx: ExecutionContext) -> Result<Graph, GraphBuilderError> {
        let root = self.root()?;

        let mut nodes = Vec::with_capacity(self.nodes.len());
        let mut ids = Vec::with_capacity(self.nodes.len());
        let mut kinds = Vec::with_capacity(self.nodes.len());
        let mut by_id = HashMap::new();
        let mut queue = Vec::new();

        for (idx, data) in self.nodes.into_iter().enumerate() {
            let node = Node(idx);
            let requires_grad = matches!(data.kind, NodeKind::Weights | NodeKind::Intermediate);
            let mut tensor = Tensor::new(requires_grad);

            if let Some((shape, mut values)) = data.values {
                match data.init {
                    Some(WeightInit::Uniform(bound)) => {
                        values = rng::uniform_f32(ctx.rng(), shape.size(), bound);
                    }
                    Some(WeightInit::Constant(val)) => values.iter_mut().for_each(|x| *x = val),
                    None => {}
                }

                tensor.values.load_from_slice(&shape, &values);

                if let Some(grad) = tensor.gradients.as_mut() {
                    grad.reshape_if_needed(&shape);
                }
            }

            if let Some(id) = &data.id {
                by_id.insert(id.clone(), node);
            }

            if let Some((operation, inputs)) = data.parent {
                queue.push(OperationPayload { operation, inputs, output: node });
            }

            nodes.push(RefCell::new(tensor));
            ids.push(data.id);
            kinds.push(data.kind);
        }

        Ok(Graph { nodes, ids, kinds, by_id, root, queue, ctx })
    }
}
