use anyhow::Context;
use trick_trainer::{
    dataset::{features::FEATURE_DIM, FeatureDataset},
    nn::Tcn,
    trainer::{self, ExportConfig, OptimiserKind, TrainingConfig},
};

const DATASET_PATH: &str = "data/train_features.json";
const CHECKPOINT_PATH: &str = "models/tcn_best.pth";
const EXPORT_PATH: &str = "models/trick-tcn.onnx";

fn main() -> anyhow::Result<()> {
    let config = TrainingConfig {
        dataset_path: DATASET_PATH.to_string(),
        train_split: "train".to_string(),
        val_split: "val".to_string(),
        batch_size: 64,
        epochs: 30,
        learning_rate: 1e-3,
        weight_decay: 1e-4,
        checkpoint_path: CHECKPOINT_PATH.to_string(),
        export: Some(ExportConfig { path: EXPORT_PATH.to_string(), example_input: vec![1, 150, FEATURE_DIM] }),
        seed: 42,
        optimiser: OptimiserKind::AdamL2,
    };

    let train = FeatureDataset::from_file(&config.dataset_path, &config.train_split)
        .with_context(|| format!("Failed to load training split from {}", config.dataset_path))?;
    let val = FeatureDataset::from_file(&config.dataset_path, &config.val_split)
        .with_context(|| format!("Failed to load validation split from {}", config.dataset_path))?;

    trainer::run(&Tcn::default(), &train, &val, &config).context("Training failed")?;

    Ok(())
}
