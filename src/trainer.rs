pub mod settings;

pub use settings::{ExportConfig, OptimiserKind, TrainingConfig};

use std::{path::Path, time::Instant};

use rand::{rngs::StdRng, SeedableRng};
use trick_core::{
    graph::{
        builder::{GraphBuilderError, Node},
        GraphError,
    },
    logger::{self, ansi, EpochReport},
    onnx::{self, ExportError, ExportSettings},
    optimiser::{AdamW, Optimiser, OptimiserState},
    ExecutionContext,
};

use crate::{
    dataset::{Dataset, DatasetError},
    loader::{DataLoader, DataLoadingError, PreparedBatch},
    nn::{self, Network, TrickModel},
};

const PROGRESS_INTERVAL: usize = 16;

#[derive(Debug)]
pub enum TrainerError {
    Dataset(DatasetError),
    DataLoading(DataLoadingError),
    Graph(GraphError),
    Builder(GraphBuilderError),
    Export(ExportError),
    Io(std::io::Error),
    EmptySplit(String),
    ZeroBatchSize,
}

impl std::fmt::Display for TrainerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dataset(err) => write!(f, "{err}"),
            Self::DataLoading(err) => write!(f, "{err}"),
            Self::Graph(err) => write!(f, "{err}"),
            Self::Builder(err) => write!(f, "Failed to build model: {err}"),
            Self::Export(err) => write!(f, "Failed to export model: {err}"),
            Self::Io(err) => write!(f, "{err}"),
            Self::EmptySplit(split) => write!(f, "Split '{split}' has no samples"),
            Self::ZeroBatchSize => write!(f, "Batch size must be at least 1"),
        }
    }
}

impl std::error::Error for TrainerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Dataset(err) => Some(err),
            Self::DataLoading(err) => Some(err),
            Self::Graph(err) => Some(err),
            Self::Builder(err) => Some(err),
            Self::Export(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::EmptySplit(_) | Self::ZeroBatchSize => None,
        }
    }
}

impl From<DatasetError> for TrainerError {
    fn from(value: DatasetError) -> Self {
        Self::Dataset(value)
    }
}

impl From<DataLoadingError> for TrainerError {
    fn from(value: DataLoadingError) -> Self {
        Self::DataLoading(value)
    }
}

impl From<GraphError> for TrainerError {
    fn from(value: GraphError) -> Self {
        Self::Graph(value)
    }
}

impl From<GraphBuilderError> for TrainerError {
    fn from(value: GraphBuilderError) -> Self {
        Self::Builder(value)
    }
}

impl From<ExportError> for TrainerError {
    fn from(value: ExportError) -> Self {
        Self::Export(value)
    }
}

impl From<std::io::Error> for TrainerError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EpochStats {
    /// Mean of the per-batch mean losses.
    pub loss: f32,
    pub accuracy: f32,
    pub samples: usize,
}

#[derive(Clone, Debug, Default)]
pub struct TrainingSummary {
    pub best_accuracy: f32,
    /// Training and validation stats of every epoch.
    pub history: Vec<(EpochStats, EpochStats)>,
}

#[derive(Default)]
struct Accumulator {
    loss: f32,
    batches: usize,
    correct: usize,
    samples: usize,
}

impl Accumulator {
    fn finish(self) -> EpochStats {
        let loss = if self.batches == 0 { 0.0 } else { self.loss / self.batches as f32 };
        let accuracy = if self.samples == 0 { 0.0 } else { self.correct as f32 / self.samples as f32 };

        EpochStats { loss, accuracy, samples: self.samples }
    }
}

pub struct Trainer<S: OptimiserState> {
    pub optimiser: Optimiser<S>,
    pub input: Node,
    pub logits: Node,
    rng: StdRng,
}

impl<S: OptimiserState> Trainer<S> {
    pub fn new(network: Network, params: S::Params, seed: u64) -> Result<Self, GraphError> {
        let Network { graph, input, logits } = network;
        let optimiser = Optimiser::new(graph, params)?;

        Ok(Self { optimiser, input, logits, rng: StdRng::seed_from_u64(seed) })
    }

    fn load_batch(&mut self, batch: &PreparedBatch) -> Result<(), GraphError> {
        for (id, input) in &batch.inputs {
            self.optimiser.graph.store_input(id, &input.shape, &input.vals)?;
        }

        Ok(())
    }

    fn count_correct(&self, batch: &PreparedBatch) -> usize {
        let logits = self.optimiser.graph.get_node(self.logits);
        let predictions = nn::argmax_rows(logits.values.values());

        predictions.iter().zip(&batch.labels).filter(|(pred, label)| pred == label).count()
    }

    /// One pass over the shuffled training split with an optimiser step per batch.
    pub fn train_epoch<D: Dataset>(
        &mut self,
        loader: &DataLoader<D>,
        learning_rate: f32,
        epoch: usize,
    ) -> Result<EpochStats, TrainerError> {
        let mut acc = Accumulator::default();
        let batches = loader.num_batches();
        let timer = Instant::now();

        self.optimiser.graph.set_training(true);

        for (finished, batch) in loader.batches(&mut self.rng).enumerate() {
            let batch = batch?;
            self.load_batch(&batch)?;

            self.optimiser.graph.zero_grads();
            let loss = self.optimiser.graph.forward()?;
            self.optimiser.graph.backward()?;
            self.optimiser.update(learning_rate)?;

            acc.loss += loss;
            acc.batches += 1;
            acc.correct += self.count_correct(&batch);
            acc.samples += batch.batch_size;

            if (finished + 1) % PROGRESS_INTERVAL == 0 {
                logger::report_batch_progress(epoch, batches, finished + 1, &timer, acc.samples);
            }
        }

        Ok(acc.finish())
    }

    /// Loss and accuracy in evaluation mode, the parameters are left untouched.
    pub fn validate<D: Dataset>(&mut self, loader: &DataLoader<D>) -> Result<EpochStats, TrainerError> {
        let was_training = self.optimiser.graph.training();

        self.optimiser.graph.set_training(false);
        let result = self.evaluate(loader);
        self.optimiser.graph.set_training(was_training);

        result.map(Accumulator::finish)
    }

    fn evaluate<D: Dataset>(&mut self, loader: &DataLoader<D>) -> Result<Accumulator, TrainerError> {
        let mut acc = Accumulator::default();

        for batch in loader.batches(&mut self.rng) {
            let batch = batch?;
            self.load_batch(&batch)?;

            acc.loss += self.optimiser.graph.forward()?;
            acc.batches += 1;
            acc.correct += self.count_correct(&batch);
            acc.samples += batch.batch_size;
        }

        Ok(acc)
    }

    /// Writes weights and running statistics, creating parent directories.
    pub fn save_checkpoint(&self, path: &str) -> Result<(), TrainerError> {
        create_parent_dir(path)?;
        self.optimiser.write_to_file(path)?;
        Ok(())
    }

    pub fn export(&mut self, settings: &ExportSettings, path: &str) -> Result<(), TrainerError> {
        create_parent_dir(path)?;
        onnx::export_graph_to_file(&mut self.optimiser.graph, self.input, self.logits, settings, path)?;
        Ok(())
    }

    /// Trains for `config.epochs` epochs, checkpointing (and exporting, if
    /// `export` is given) whenever validation accuracy strictly improves.
    pub fn fit<D: Dataset, V: Dataset>(
        &mut self,
        train: &D,
        val: &V,
        config: &TrainingConfig,
        export: Option<&(ExportSettings, String)>,
    ) -> Result<TrainingSummary, TrainerError> {
        if config.batch_size == 0 {
            return Err(TrainerError::ZeroBatchSize);
        }

        let train_loader = DataLoader::new(train, config.batch_size, true);
        let val_loader = DataLoader::new(val, config.batch_size, false);

        let mut summary = TrainingSummary::default();
        let timer = Instant::now();

        for epoch in 1..=config.epochs {
            let epoch_timer = Instant::now();

            let train_stats = self.train_epoch(&train_loader, config.learning_rate, epoch)?;
            let val_stats = self.validate(&val_loader)?;

            logger::report_epoch_finished(&EpochReport {
                epoch,
                train_loss: train_stats.loss,
                train_accuracy: train_stats.accuracy,
                val_loss: val_stats.loss,
                val_accuracy: val_stats.accuracy,
                epoch_time: epoch_timer.elapsed().as_secs_f32(),
                total_time: timer.elapsed().as_secs_f32(),
            });

            if val_stats.accuracy > summary.best_accuracy {
                summary.best_accuracy = val_stats.accuracy;
                self.save_checkpoint(&config.checkpoint_path)?;
                logger::report_new_best(val_stats.accuracy, &config.checkpoint_path);

                if let Some((settings, path)) = export {
                    self.export(settings, path)?;
                    println!("Exported model to {}", ansi(path, logger::NUM_CS));
                }
            }

            summary.history.push((train_stats, val_stats));

            if epoch < config.epochs {
                logger::report_time_left(epoch, config.epochs, timer.elapsed().as_secs_f32());
            }
        }

        let (hours, minutes, seconds) = logger::seconds_to_hms(timer.elapsed().as_secs() as u32);
        println!(
            "Training finished in {}h {}m {}s, best val acc {}",
            ansi(hours, logger::NUM_CS),
            ansi(minutes, logger::NUM_CS),
            ansi(seconds, logger::NUM_CS),
            ansi(format!("{:.4}", summary.best_accuracy), 32),
        );

        Ok(summary)
    }
}

fn create_parent_dir(path: &str) -> std::io::Result<()> {
    match Path::new(path).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir),
        _ => Ok(()),
    }
}

/// Builds `model`, trains it on the two splits and returns the summary.
pub fn run<M: TrickModel, D: Dataset, V: Dataset>(
    model: &M,
    train: &D,
    val: &V,
    config: &TrainingConfig,
) -> Result<TrainingSummary, TrainerError> {
    if train.is_empty() {
        return Err(TrainerError::EmptySplit(config.train_split.clone()));
    }

    if config.batch_size == 0 {
        return Err(TrainerError::ZeroBatchSize);
    }

    let export = match &config.export {
        Some(export) => {
            let settings = model.export_settings(&export.example_input);
            let settings = settings.ok_or(ExportError::Unsupported(model.name()))?;

            if !onnx::validate_example(&settings.input_dims, &settings.example_input) {
                return Err(ExportError::InvalidExampleShape {
                    declared: settings.input_dims,
                    example: settings.example_input,
                }
                .into());
            }

            Some((settings, export.path.clone()))
        }
        None => None,
    };

    let network = model.build(ExecutionContext::seeded(config.seed))?;

    println!("{}", ansi("Beginning Training", "34;1"));
    println!("Model                  : {}", ansi(model.name(), "32;1"));
    println!("Parameters             : {}", ansi(network.graph.get_num_params(), 31));
    println!("Train Samples          : {}", ansi(train.len(), 31));
    println!("Val Samples            : {}", ansi(val.len(), 31));
    config.display();

    let mut trainer = Trainer::<AdamW>::new(network, config.optimiser.params(config.weight_decay), config.seed)?;
    trainer.fit(train, val, config, export.as_ref())
}
