use trick_core::{
    logger::ansi,
    optimiser::{AdamParams, Placement, WeightDecayParams},
};

/// How weight decay is combined with Adam.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptimiserKind {
    /// Decoupled decay, weights are shrunk before each step.
    AdamW,
    /// Decay added to the gradient before the Adam moments.
    AdamL2,
}

impl OptimiserKind {
    pub fn params(self, weight_decay: f32) -> WeightDecayParams<AdamParams> {
        let placement = match self {
            Self::AdamW => Placement::Before,
            Self::AdamL2 => Placement::Gradient,
        };

        WeightDecayParams { inner: AdamParams::default(), placement, decay: weight_decay }
    }
}

#[derive(Clone, Debug)]
pub struct ExportConfig {
    pub path: String,
    /// Concrete input shape the export is traced with.
    pub example_input: Vec<usize>,
}

#[derive(Clone, Debug)]
pub struct TrainingConfig {
    pub dataset_path: String,
    pub train_split: String,
    pub val_split: String,
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f32,
    pub weight_decay: f32,
    /// Overwritten whenever validation accuracy improves.
    pub checkpoint_path: String,
    pub export: Option<ExportConfig>,
    pub seed: u64,
    pub optimiser: OptimiserKind,
}

impl TrainingConfig {
    pub fn display(&self) {
        println!("Dataset                : {}", ansi(&self.dataset_path, "32;1"));
        println!("Splits                 : {} / {}", ansi(&self.train_split, 31), ansi(&self.val_split, 31));
        println!("Batch Size             : {}", ansi(self.batch_size, 31));
        println!("Epochs                 : {}", ansi(self.epochs, 31));
        println!("Optimiser              : {}", ansi(format!("{:?}", self.optimiser), 31));
        println!("Learning Rate          : {}", ansi(self.learning_rate, 31));
        println!("Weight Decay           : {}", ansi(self.weight_decay, 31));
        println!("Seed                   : {}", ansi(self.seed, 31));
        println!("Checkpoint             : {}", ansi(&self.checkpoint_path, "32;1"));

        if let Some(export) = &self.export {
            println!("Export                 : {}", ansi(&export.path, "32;1"));
            println!("Export Input           : {}", ansi(format!("{:?}", export.example_input), 31));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decay_placement() {
        let adamw = OptimiserKind::AdamW.params(1e-4);
        assert_eq!(adamw.placement, Placement::Before);
        assert_eq!(adamw.decay, 1e-4);

        let l2 = OptimiserKind::AdamL2.params(0.5);
        assert_eq!(l2.placement, Placement::Gradient);
        assert_eq!(l2.inner.beta1, 0.9);
        assert_eq!(l2.inner.beta2, 0.999);
        assert_eq!(l2.inner.epsilon, 1e-8);
    }
}
