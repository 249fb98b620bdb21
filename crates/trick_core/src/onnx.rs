pub mod proto;

use std::collections::HashMap;

use proto::ProtoWriter;

use crate::{
    graph::{
        builder::{Node, NodeKind},
        operation::Operation,
        Graph, GraphError,
    },
    Shape,
};

pub const IR_VERSION: i64 = 6;
pub const OPSET_VERSION: i64 = 11;

const FLOAT: i64 = 1;

mod field {
    pub const MODEL_IR_VERSION: u32 = 1;
    pub const MODEL_PRODUCER: u32 = 2;
    pub const MODEL_GRAPH: u32 = 7;
    pub const MODEL_OPSET: u32 = 8;

    pub const OPSET_DOMAIN: u32 = 1;
    pub const OPSET_VERSION: u32 = 2;

    pub const GRAPH_NODE: u32 = 1;
    pub const GRAPH_NAME: u32 = 2;
    pub const GRAPH_INITIALIZER: u32 = 5;
    pub const GRAPH_INPUT: u32 = 11;
    pub const GRAPH_OUTPUT: u32 = 12;

    pub const NODE_INPUT: u32 = 1;
    pub const NODE_OUTPUT: u32 = 2;
    pub const NODE_NAME: u32 = 3;
    pub const NODE_OP_TYPE: u32 = 4;
    pub const NODE_ATTRIBUTE: u32 = 5;

    pub const ATTR_NAME: u32 = 1;
    pub const ATTR_F: u32 = 2;
    pub const ATTR_I: u32 = 3;
    pub const ATTR_INTS: u32 = 8;
    pub const ATTR_TYPE: u32 = 20;

    pub const TENSOR_DIMS: u32 = 1;
    pub const TENSOR_DATA_TYPE: u32 = 2;
    pub const TENSOR_NAME: u32 = 8;
    pub const TENSOR_RAW_DATA: u32 = 9;

    pub const VALUE_INFO_NAME: u32 = 1;
    pub const VALUE_INFO_TYPE: u32 = 2;
    pub const TYPE_TENSOR: u32 = 1;
    pub const TENSOR_TYPE_ELEM: u32 = 1;
    pub const TENSOR_TYPE_SHAPE: u32 = 2;
    pub const SHAPE_DIM: u32 = 1;
    pub const DIM_VALUE: u32 = 1;
    pub const DIM_PARAM: u32 = 2;
}

/// A declared axis of a graph input or output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dim {
    Fixed(usize),
    Symbolic(String),
}

impl Dim {
    pub fn symbolic(name: &str) -> Self {
        Self::Symbolic(name.to_string())
    }
}

#[derive(Clone, Debug)]
pub struct ExportSettings {
    pub graph_name: String,
    pub input_name: String,
    pub input_dims: Vec<Dim>,
    pub output_name: String,
    pub output_dims: Vec<Dim>,
    /// Concrete input used to trace shapes, must agree with `input_dims`.
    pub example_input: Vec<usize>,
}

#[derive(Debug)]
pub enum ExportError {
    Graph(GraphError),
    InvalidExampleShape { declared: Vec<Dim>, example: Vec<usize> },
    OutputShape { declared: Vec<Dim>, traced: Shape },
    Unsupported(&'static str),
    NotAnInput(Node),
    Io(std::io::Error),
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Graph(err) => write!(f, "{err}"),
            Self::InvalidExampleShape { declared, example } => {
                write!(f, "Example input {example:?} does not match declared dims {declared:?}")
            }
            Self::OutputShape { declared, traced } => {
                write!(f, "Traced output {traced} does not match declared dims {declared:?}")
            }
            Self::Unsupported(op) => write!(f, "{op} cannot be exported"),
            Self::NotAnInput(node) => write!(f, "Node {} is not a graph input", node.idx()),
            Self::Io(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ExportError {}

impl From<GraphError> for ExportError {
    fn from(value: GraphError) -> Self {
        Self::Graph(value)
    }
}

impl From<std::io::Error> for ExportError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Fixed axes must match exactly, symbolic axes must be non-zero.
pub fn validate_example(declared: &[Dim], example: &[usize]) -> bool {
    declared.len() == example.len()
        && declared.iter().zip(example).all(|(dim, &size)| match dim {
            Dim::Fixed(fixed) => *fixed == size,
            Dim::Symbolic(_) => size > 0,
        })
}

fn matches_trace(declared: &[Dim], traced: &Shape) -> bool {
    declared.len() == traced.rank()
        && declared.iter().zip(traced.dims()).all(|(dim, &size)| match dim {
            Dim::Fixed(fixed) => *fixed == size,
            Dim::Symbolic(_) => true,
        })
}

enum Attribute {
    Float(f32),
    Int(i64),
    Ints(Vec<i64>),
}

struct OnnxNode {
    op_type: &'static str,
    inputs: Vec<String>,
    output: String,
    attributes: Vec<(&'static str, Attribute)>,
}

struct Initializer {
    name: String,
    dims: Vec<usize>,
    values: Vec<f32>,
}

/// Serialises the part of `graph` that computes `output` from `input`
/// into an ONNX model. The graph is traced once in evaluation mode with a
/// zeroed example input, so dropout is dropped and batch norm uses its
/// running statistics. The training mode of the graph is restored after.
pub fn export_graph(
    graph: &mut Graph,
    input: Node,
    output: Node,
    settings: &ExportSettings,
) -> Result<Vec<u8>, ExportError> {
    if !validate_example(&settings.input_dims, &settings.example_input) {
        return Err(ExportError::InvalidExampleShape {
            declared: settings.input_dims.clone(),
            example: settings.example_input.clone(),
        });
    }

    let input_id = match (graph.node_kind(input), graph.node_id(input)) {
        (NodeKind::Input, Some(id)) => id.to_string(),
        _ => return Err(ExportError::NotAnInput(input)),
    };

    let example = Shape::new(&settings.example_input);
    let was_training = graph.training();

    graph.set_training(false);
    graph.store_input(&input_id, &example, &vec![0.0; example.size()])?;
    let traced = graph.forward_to(output).map(|_| graph.get_node(output).shape().clone());
    graph.set_training(was_training);
    let traced = traced?;

    if !matches_trace(&settings.output_dims, &traced) {
        return Err(ExportError::OutputShape { declared: settings.output_dims.clone(), traced });
    }

    let (nodes, initializers) = collect(graph, input, output, settings)?;

    let mut model = ProtoWriter::default();
    model.int64(field::MODEL_IR_VERSION, IR_VERSION);
    model.string(field::MODEL_PRODUCER, env!("CARGO_PKG_NAME"));
    model.message(field::MODEL_OPSET, |w| {
        w.string(field::OPSET_DOMAIN, "");
        w.int64(field::OPSET_VERSION, OPSET_VERSION);
    });
    model.message(field::MODEL_GRAPH, |w| {
        for node in &nodes {
            w.message(field::GRAPH_NODE, |w| write_node(w, node));
        }

        w.string(field::GRAPH_NAME, &settings.graph_name);

        for init in &initializers {
            w.message(field::GRAPH_INITIALIZER, |w| write_initializer(w, init));
        }

        w.message(field::GRAPH_INPUT, |w| write_value_info(w, &settings.input_name, &settings.input_dims));
        w.message(field::GRAPH_OUTPUT, |w| write_value_info(w, &settings.output_name, &settings.output_dims));
    });

    Ok(model.into_bytes())
}

pub fn export_graph_to_file(
    graph: &mut Graph,
    input: Node,
    output: Node,
    settings: &ExportSettings,
    path: &str,
) -> Result<(), ExportError> {
    let bytes = export_graph(graph, input, output, settings)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

fn ints(vals: &[usize]) -> Attribute {
    Attribute::Ints(vals.iter().map(|&x| x as i64).collect())
}

fn tensor_name(graph: &Graph, node: Node) -> String {
    graph.node_id(node).map_or_else(|| format!("node_{}", node.idx()), str::to_string)
}

/// Names a weight or constant, adding it as an initialiser the first time.
fn leaf_name(
    graph: &Graph,
    node: Node,
    names: &mut HashMap<Node, String>,
    initializers: &mut Vec<Initializer>,
) -> String {
    if let Some(name) = names.get(&node) {
        return name.clone();
    }

    let name = tensor_name(graph, node);
    let tensor = graph.get_node(node);
    initializers.push(Initializer {
        name: name.clone(),
        dims: tensor.shape().dims().to_vec(),
        values: tensor.values.values().to_vec(),
    });

    names.insert(node, name.clone());
    name
}

/// Walks the operations that lead to `output`, naming every tensor and
/// collecting persistent values as initialisers.
fn collect(
    graph: &Graph,
    input: Node,
    output: Node,
    settings: &ExportSettings,
) -> Result<(Vec<OnnxNode>, Vec<Initializer>), ExportError> {
    let mut names = HashMap::new();
    names.insert(input, settings.input_name.clone());

    let mut nodes = Vec::new();
    let mut initializers = Vec::new();

    for payload in graph.operations() {
        let out = payload.output();

        if out > output {
            break;
        }

        let inputs = payload.inputs();
        let out_name = if out == output {
            settings.output_name.clone()
        } else {
            format!("{}_{}", payload.operation().name(), out.idx())
        };

        let mut input_names = Vec::new();
        for &node in inputs {
            let name = match graph.node_kind(node) {
                NodeKind::Intermediate | NodeKind::Input => names.get(&node).cloned(),
                NodeKind::Weights | NodeKind::Constant => Some(leaf_name(graph, node, &mut names, &mut initializers)),
                NodeKind::State => None,
            };

            input_names.push(name);
        }

        let input = |idx: usize| input_names[idx].clone().ok_or(ExportError::Unsupported(payload.operation().name()));

        let node = match payload.operation() {
            Operation::Dropout(_) => {
                names.insert(out, input(0)?);
                continue;
            }
            Operation::Permute(perm) => OnnxNode {
                op_type: "Transpose",
                inputs: vec![input(0)?],
                output: out_name.clone(),
                attributes: vec![("perm", ints(perm))],
            },
            Operation::Conv1d(desc) => OnnxNode {
                op_type: "Conv",
                inputs: vec![input(0)?, input(1)?, input(2)?],
                output: out_name.clone(),
                attributes: vec![
                    ("dilations", ints(&[desc.dilation])),
                    ("kernel_shape", ints(&[desc.kernel])),
                    ("pads", ints(&[desc.pad_left, desc.pad_right])),
                    ("strides", ints(&[1])),
                ],
            },
            Operation::BatchNorm(desc) => {
                let running = inputs[3];
                let base = tensor_name(graph, running);
                let tensor = graph.get_node(running);
                let channels = tensor.shape().last();
                let (mean, var) = tensor.values.values().split_at(channels);

                let (mean_name, var_name) = (format!("{base}.mean"), format!("{base}.var"));
                initializers.push(Initializer { name: mean_name.clone(), dims: vec![channels], values: mean.to_vec() });
                initializers.push(Initializer { name: var_name.clone(), dims: vec![channels], values: var.to_vec() });

                OnnxNode {
                    op_type: "BatchNormalization",
                    inputs: vec![input(0)?, input(1)?, input(2)?, mean_name, var_name],
                    output: out_name.clone(),
                    attributes: vec![
                        ("epsilon", Attribute::Float(desc.epsilon)),
                        ("momentum", Attribute::Float(1.0 - desc.momentum)),
                    ],
                }
            }
            Operation::ReLU => {
                OnnxNode { op_type: "Relu", inputs: vec![input(0)?], output: out_name.clone(), attributes: Vec::new() }
            }
            Operation::MeanLastAxis => OnnxNode {
                op_type: "ReduceMean",
                inputs: vec![input(0)?],
                output: out_name.clone(),
                attributes: vec![("axes", Attribute::Ints(vec![-1])), ("keepdims", Attribute::Int(0))],
            },
            Operation::Affine => OnnxNode {
                op_type: "Gemm",
                inputs: vec![input(0)?, input(1)?, input(2)?],
                output: out_name.clone(),
                attributes: vec![("transB", Attribute::Int(1))],
            },
            Operation::MatmulLastAxis => OnnxNode {
                op_type: "MatMul",
                inputs: vec![input(0)?, input(1)?],
                output: out_name.clone(),
                attributes: Vec::new(),
            },
            op @ (Operation::MergeAxes(_) | Operation::SplitAxis { .. } | Operation::SoftmaxCrossEntropyLoss) => {
                return Err(ExportError::Unsupported(op.name()))
            }
        };

        names.insert(out, out_name);
        nodes.push(node);
    }

    if names.get(&output) != Some(&settings.output_name) {
        return Err(ExportError::Unsupported("Graph output"));
    }

    Ok((nodes, initializers))
}

fn write_node(w: &mut ProtoWriter, node: &OnnxNode) {
    for input in &node.inputs {
        w.string(field::NODE_INPUT, input);
    }

    w.string(field::NODE_OUTPUT, &node.output);
    w.string(field::NODE_NAME, &format!("{}_{}", node.op_type, node.output));
    w.string(field::NODE_OP_TYPE, node.op_type);

    for (name, attr) in &node.attributes {
        w.message(field::NODE_ATTRIBUTE, |w| {
            w.string(field::ATTR_NAME, name);

            match attr {
                Attribute::Float(val) => {
                    w.float(field::ATTR_F, *val);
                    w.int64(field::ATTR_TYPE, 1);
                }
                Attribute::Int(val) => {
                    w.int64(field::ATTR_I, *val);
                    w.int64(field::ATTR_TYPE, 2);
                }
                Attribute::Ints(vals) => {
                    for &val in vals {
                        w.int64(field::ATTR_INTS, val);
                    }

                    w.int64(field::ATTR_TYPE, 7);
                }
            }
        });
    }
}

fn write_initializer(w: &mut ProtoWriter, init: &Initializer) {
    for &dim in &init.dims {
        w.int64(field::TENSOR_DIMS, dim as i64);
    }

    w.int64(field::TENSOR_DATA_TYPE, FLOAT);
    w.string(field::TENSOR_NAME, &init.name);

    let raw = init.values.iter().flat_map(|x| x.to_le_bytes()).collect::<Vec<_>>();
    w.bytes(field::TENSOR_RAW_DATA, &raw);
}

fn write_value_info(w: &mut ProtoWriter, name: &str, dims: &[Dim]) {
    w.string(field::VALUE_INFO_NAME, name);
    w.message(field::VALUE_INFO_TYPE, |w| {
        w.message(field::TYPE_TENSOR, |w| {
            w.int64(field::TENSOR_TYPE_ELEM, FLOAT);
            w.message(field::TENSOR_TYPE_SHAPE, |w| {
                for dim in dims {
                    w.message(field::SHAPE_DIM, |w| match dim {
                        Dim::Fixed(size) => w.int64(field::DIM_VALUE, *size as i64),
                        Dim::Symbolic(param) => w.string(field::DIM_PARAM, param),
                    });
                }
            });
        });
    });
}

#[cfg(test)]
mod tests {
    use super::{proto::decode_fields, *};
    use crate::{
        graph::{
            builder::{GraphBuilder, WeightInit},
            operation::{BatchNormDescription, ConvDescription},
        },
        ExecutionContext,
    };

    fn op(builder: &mut GraphBuilder, operation: Operation, inputs: &[Node]) -> Node {
        builder.create_result_of_operation(operation, inputs).unwrap()
    }

    fn small_graph() -> (Graph, Node, Node) {
        let mut builder = GraphBuilder::default();
        let x = builder.create_input("x").unwrap();
        let w = builder.create_weights("conv.w", Shape::from([4, 3, 3]), WeightInit::Uniform(0.5)).unwrap();
        let b = builder.create_weights("conv.b", Shape::from([4]), WeightInit::Uniform(0.5)).unwrap();
        let gamma = builder.create_weights("bn.gamma", Shape::from([4]), WeightInit::Constant(1.0)).unwrap();
        let beta = builder.create_weights("bn.beta", Shape::from([4]), WeightInit::Constant(0.0)).unwrap();
        let stats = [0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        let running = builder.create_state("bn.running", Shape::from([2, 4]), &stats).unwrap();
        let fc_w = builder.create_weights("fc.w", Shape::from([2, 4]), WeightInit::Uniform(0.5)).unwrap();
        let fc_b = builder.create_weights("fc.b", Shape::from([2]), WeightInit::Uniform(0.5)).unwrap();
        let targets = builder.create_input("targets").unwrap();

        let t = op(&mut builder, Operation::Permute(vec![0, 2, 1]), &[x]);
        let c = op(&mut builder, Operation::Conv1d(ConvDescription::causal(3, 2)), &[t, w, b]);
        let bn = Operation::BatchNorm(BatchNormDescription::default());
        let n = op(&mut builder, bn, &[c, gamma, beta, running]);
        let r = op(&mut builder, Operation::ReLU, &[n]);
        let d = op(&mut builder, Operation::Dropout(0.2), &[r]);
        let m = op(&mut builder, Operation::MeanLastAxis, &[d]);
        let logits = op(&mut builder, Operation::Affine, &[m, fc_w, fc_b]);
        op(&mut builder, Operation::SoftmaxCrossEntropyLoss, &[logits, targets]);

        (builder.build(ExecutionContext::default()).unwrap(), x, logits)
    }

    fn settings() -> ExportSettings {
        ExportSettings {
            graph_name: "test".to_string(),
            input_name: "features".to_string(),
            input_dims: vec![Dim::symbolic("batch_size"), Dim::symbolic("sequence_length"), Dim::Fixed(3)],
            output_name: "logits".to_string(),
            output_dims: vec![Dim::symbolic("batch_size"), Dim::Fixed(2)],
            example_input: vec![1, 10, 3],
        }
    }

    fn field<'a>(fields: &[(u32, proto::WireValue<'a>)], id: u32) -> Vec<proto::WireValue<'a>> {
        fields.iter().filter(|(field, _)| *field == id).map(|(_, value)| *value).collect()
    }

    #[test]
    fn exported_model_structure() {
        let (mut graph, x, logits) = small_graph();
        let bytes = export_graph(&mut graph, x, logits, &settings()).unwrap();
        assert!(graph.training());

        let model = decode_fields(&bytes).unwrap();
        assert_eq!(field(&model, 1)[0].as_int(), Some(IR_VERSION));

        let opset = decode_fields(field(&model, 8)[0].as_bytes().unwrap()).unwrap();
        assert_eq!(field(&opset, 2)[0].as_int(), Some(OPSET_VERSION));

        let graph_fields = decode_fields(field(&model, 7)[0].as_bytes().unwrap()).unwrap();

        let op_types = field(&graph_fields, 1)
            .iter()
            .map(|node| {
                let node = decode_fields(node.as_bytes().unwrap()).unwrap();
                field(&node, 4)[0].as_str().unwrap().to_string()
            })
            .collect::<Vec<_>>();

        assert_eq!(op_types, ["Transpose", "Conv", "BatchNormalization", "Relu", "ReduceMean", "Gemm"]);

        // conv weights and bias, bn scale, shift, mean and variance, fc weights and bias
        assert_eq!(field(&graph_fields, 5).len(), 8);

        let input = decode_fields(field(&graph_fields, 11)[0].as_bytes().unwrap()).unwrap();
        assert_eq!(field(&input, 1)[0].as_str(), Some("features"));

        let tensor_type = decode_fields(field(&input, 2)[0].as_bytes().unwrap()).unwrap();
        let tensor = decode_fields(field(&tensor_type, 1)[0].as_bytes().unwrap()).unwrap();
        let shape = decode_fields(field(&tensor, 2)[0].as_bytes().unwrap()).unwrap();
        let dims = field(&shape, 1)
            .iter()
            .map(|dim| decode_fields(dim.as_bytes().unwrap()).unwrap()[0])
            .collect::<Vec<_>>();

        assert_eq!(dims[0].1.as_str(), Some("batch_size"));
        assert_eq!(dims[1].1.as_str(), Some("sequence_length"));
        assert_eq!(dims[2].1.as_int(), Some(3));

        let output = decode_fields(field(&graph_fields, 12)[0].as_bytes().unwrap()).unwrap();
        assert_eq!(field(&output, 1)[0].as_str(), Some("logits"));
    }

    #[test]
    fn example_shape_is_validated() {
        let (mut graph, x, logits) = small_graph();

        let mut wrong_features = settings();
        wrong_features.example_input = vec![1, 10, 4];
        assert!(matches!(
            export_graph(&mut graph, x, logits, &wrong_features),
            Err(ExportError::InvalidExampleShape { .. })
        ));

        let mut empty_sequence = settings();
        empty_sequence.example_input = vec![1, 0, 3];
        assert!(export_graph(&mut graph, x, logits, &empty_sequence).is_err());

        let mut wrong_output = settings();
        wrong_output.output_dims = vec![Dim::symbolic("batch_size"), Dim::Fixed(5)];
        assert!(matches!(export_graph(&mut graph, x, logits, &wrong_output), Err(ExportError::OutputShape { .. })));
    }

    #[test]
    fn validate_example_dims() {
        let dims = [Dim::symbolic("batch_size"), Dim::Fixed(128)];
        assert!(validate_example(&dims, &[4, 128]));
        assert!(!validate_example(&dims, &[0, 128]));
        assert!(!validate_example(&dims, &[4, 127]));
        assert!(!validate_example(&dims, &[4, 128, 1]));
    }
}
