//! Trains skateboard trick classifiers: an ST-GCN over keypoint sequences
//! and a TCN over per-frame feature vectors.

pub mod catalog;
pub mod dataset;
pub mod loader;
pub mod nn;
pub mod trainer;

pub use catalog::{TrickLabel, NUM_CLASSES, TRICKS};
pub use trainer::{run, ExportConfig, OptimiserKind, Trainer, TrainerError, TrainingConfig, TrainingSummary};
pub use trick_core::logger;
