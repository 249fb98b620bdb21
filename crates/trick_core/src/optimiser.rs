mod adam;
mod decay;
pub mod utils;

use std::collections::HashMap;

pub use adam::{Adam, AdamParams};
pub use decay::{WeightDecay, WeightDecayParams};
pub use utils::Placement;

use crate::{
    graph::{operation::OperationError, Graph, GraphError},
    tensor::{DenseTensor, Tensor},
};

/// Adam with decay applied to the weights directly before each step.
pub type AdamW = WeightDecay<Adam>;

/// Optimiser state held for a single weight tensor.
pub trait OptimiserState: Sized {
    type Params: Clone + std::fmt::Debug + Default;

    fn new(size: usize, params: Self::Params) -> Self;

    fn update(
        &mut self,
        weights: &mut DenseTensor,
        grads: &mut DenseTensor,
        learning_rate: f32,
    ) -> Result<(), OperationError>;
}

pub struct Optimiser<S: OptimiserState> {
    pub graph: Graph,
    pub state: HashMap<String, S>,
}

impl<S: OptimiserState> Optimiser<S> {
    pub fn new(graph: Graph, params: S::Params) -> Result<Self, GraphError> {
        let mut state = HashMap::new();

        for id in graph.weight_ids() {
            let size = graph.get_weights(&id)?.values.size();
            state.insert(id, S::new(size, params.clone()));
        }

        Ok(Self { graph, state })
    }

    /// Applies one step to every weight, using the gradients from the
    /// latest backward pass.
    pub fn update(&mut self, learning_rate: f32) -> Result<(), GraphError> {
        for id in self.graph.weight_ids() {
            let Tensor { values, gradients, .. } = self.graph.get_weights_mut(&id)?;
            let single = self.state.get_mut(&id).ok_or_else(|| GraphError::UnknownId(id.clone()))?;

            if let Some(grads) = gradients.as_mut() {
                single.update(values, grads, learning_rate)?;
            }
        }

        Ok(())
    }

    /// Writes weights and persistent state of the graph to a single file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        utils::write_graph_to_file(&self.graph, path)
    }
}
