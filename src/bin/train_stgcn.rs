use anyhow::Context;
use trick_trainer::{
    dataset::SkeletonDataset,
    nn::Stgcn,
    trainer::{self, OptimiserKind, TrainingConfig},
};

const DATASET_PATH: &str = "data/train_sequences.json";
const CHECKPOINT_PATH: &str = "models/stgcn_best.pth";

fn main() -> anyhow::Result<()> {
    let config = TrainingConfig {
        dataset_path: DATASET_PATH.to_string(),
        train_split: "train".to_string(),
        val_split: "val".to_string(),
        batch_size: 32,
        epochs: 50,
        learning_rate: 3e-4,
        weight_decay: 1e-4,
        checkpoint_path: CHECKPOINT_PATH.to_string(),
        export: None,
        seed: 42,
        optimiser: OptimiserKind::AdamW,
    };

    let train = SkeletonDataset::from_file(&config.dataset_path, &config.train_split)
        .with_context(|| format!("Failed to load training split from {}", config.dataset_path))?;
    let val = SkeletonDataset::from_file(&config.dataset_path, &config.val_split)
        .with_context(|| format!("Failed to load validation split from {}", config.dataset_path))?;

    trainer::run(&Stgcn::default(), &train, &val, &config).context("Training failed")?;

    Ok(())
}
