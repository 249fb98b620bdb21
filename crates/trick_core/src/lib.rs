/// Execution mode and random state shared by every operation in a graph.
pub mod context;
/// Contains the raw graph construction and execution API.
pub mod graph;
/// Coloured terminal output used while training.
pub mod logger;
/// Serialises a built graph into an ONNX model.
pub mod onnx;
/// Contains the `Optimiser` struct and `OptimiserState` trait,
/// as well as the provided Adam based optimisers.
pub mod optimiser;
pub mod rng;
pub mod shape;
pub mod tensor;

pub use context::ExecutionContext;
pub use shape::Shape;
