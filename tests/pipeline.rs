use std::path::Path;

use serde_json::json;
use trick_core::{
    onnx::{self, proto::decode_fields, proto::WireValue},
    ExecutionContext, Shape,
};
use trick_trainer::{
    dataset::{
        features::FEATURE_DIM,
        skeleton::{KEYPOINT_CHANNELS, NUM_KEYPOINTS},
        Dataset, FeatureDataset, SkeletonDataset,
    },
    loader::{DataLoader, INPUTS, TARGETS},
    nn::{SequenceLayout, Stgcn, Tcn, TrickModel},
    trainer::{self, ExportConfig, OptimiserKind, TrainerError, TrainingConfig},
    NUM_CLASSES,
};

fn skeleton_frames(frames: usize, seed: usize) -> Vec<Vec<Vec<f32>>> {
    (0..frames)
        .map(|t| {
            (0..NUM_KEYPOINTS)
                .map(|v| {
                    let x = ((t * 31 + v * 7 + seed * 13) % 29) as f32 * 0.1;
                    let y = ((t * 17 + v * 11 + seed * 5) % 23) as f32 * 0.2;
                    vec![x, y, 0.9]
                })
                .collect()
        })
        .collect()
}

fn feature_frames(frames: usize, seed: usize) -> Vec<Vec<f32>> {
    (0..frames).map(|t| (0..FEATURE_DIM).map(|d| ((t * 3 + d * 5 + seed) % 19) as f32 * 0.25).collect()).collect()
}

fn write_json(dir: &Path, name: &str, value: serde_json::Value) -> String {
    let path = dir.join(name);
    std::fs::write(&path, value.to_string()).unwrap();
    path.to_str().unwrap().to_string()
}

fn config(dataset_path: String, checkpoint_path: String, optimiser: OptimiserKind) -> TrainingConfig {
    TrainingConfig {
        dataset_path,
        train_split: "train".to_string(),
        val_split: "val".to_string(),
        batch_size: 2,
        epochs: 1,
        learning_rate: 1e-3,
        weight_decay: 1e-4,
        checkpoint_path,
        export: None,
        seed: 7,
        optimiser,
    }
}

#[test]
fn skeleton_pipeline_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let records = json!([
        { "split": "train", "label": "ollie", "session_id": "a", "skeletons": skeleton_frames(6, 0) },
        { "split": "train", "label": "kickflip", "skeletons": skeleton_frames(6, 1) },
        { "split": "val", "label": "ollie", "skeletons": skeleton_frames(6, 2) },
        { "split": "val", "label": "not-a-trick", "skeletons": skeleton_frames(6, 3) },
    ]);

    let dataset_path = write_json(dir.path(), "sequences.json", records);
    let checkpoint = dir.path().join("models").join("stgcn_best.pth");
    let config = config(dataset_path, checkpoint.to_str().unwrap().to_string(), OptimiserKind::AdamW);

    let train = SkeletonDataset::from_file(&config.dataset_path, &config.train_split).unwrap();
    let val = SkeletonDataset::from_file(&config.dataset_path, &config.val_split).unwrap();
    assert_eq!((train.len(), val.len()), (2, 2));
    assert_eq!(val.get(1).unwrap().label.class_index(), 12);

    let summary = trainer::run(&Stgcn::default(), &train, &val, &config).unwrap();

    assert_eq!(summary.history.len(), 1);
    let (train_stats, val_stats) = summary.history[0];
    assert_eq!(train_stats.samples, 2);
    assert_eq!(val_stats.samples, 2);
    assert!(train_stats.loss.is_finite() && val_stats.loss.is_finite());
    assert_eq!(summary.best_accuracy, val_stats.accuracy);
    assert_eq!(checkpoint.exists(), summary.best_accuracy > 0.0);
}

#[test]
fn feature_pipeline_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let records = json!([
        { "split": "train", "label": "heelflip", "features": feature_frames(8, 0) },
        { "split": "train", "label": "50-50", "features": feature_frames(8, 1) },
        { "split": "val", "label": "heelflip", "features": feature_frames(8, 2) },
        { "split": "val", "label": "50-50", "features": feature_frames(8, 3) },
    ]);

    let dataset_path = write_json(dir.path(), "features.json", records);
    let checkpoint = dir.path().join("tcn_best.pth");
    let export = dir.path().join("out").join("trick-tcn.onnx");

    let mut config = config(dataset_path, checkpoint.to_str().unwrap().to_string(), OptimiserKind::AdamL2);
    config.epochs = 2;
    config.export = Some(ExportConfig { path: export.to_str().unwrap().to_string(), example_input: vec![1, 150, 128] });

    let train = FeatureDataset::from_file(&config.dataset_path, &config.train_split).unwrap();
    let val = FeatureDataset::from_file(&config.dataset_path, &config.val_split).unwrap();

    let summary = trainer::run(&Tcn::default(), &train, &val, &config).unwrap();

    assert_eq!(summary.history.len(), 2);
    assert_eq!(checkpoint.exists(), summary.best_accuracy > 0.0);
    assert_eq!(export.exists(), summary.best_accuracy > 0.0);
}

#[test]
fn empty_splits() {
    let dir = tempfile::tempdir().unwrap();
    let records = json!([
        { "split": "train", "label": "ollie", "features": feature_frames(4, 0) },
        { "split": "train", "label": "nollie", "features": feature_frames(4, 1) },
    ]);

    let dataset_path = write_json(dir.path(), "features.json", records);
    let checkpoint = dir.path().join("tcn_best.pth");
    let config = config(dataset_path, checkpoint.to_str().unwrap().to_string(), OptimiserKind::AdamL2);

    let train = FeatureDataset::from_file(&config.dataset_path, "train").unwrap();
    let val = FeatureDataset::from_file(&config.dataset_path, "val").unwrap();
    assert!(val.is_empty());

    let summary = trainer::run(&Tcn::default(), &train, &val, &config).unwrap();
    assert_eq!(summary.best_accuracy, 0.0);
    assert!(!checkpoint.exists());

    let err = trainer::run(&Tcn::default(), &val, &train, &config).unwrap_err();
    assert!(matches!(err, TrainerError::EmptySplit(split) if split == "train"));
}

#[test]
fn unsupported_export_is_rejected_before_training() {
    let dir = tempfile::tempdir().unwrap();
    let records = json!([{ "split": "train", "label": "ollie", "skeletons": skeleton_frames(3, 0) }]);

    let dataset_path = write_json(dir.path(), "sequences.json", records);
    let checkpoint = dir.path().join("x.pth").to_str().unwrap().to_string();
    let mut config = config(dataset_path, checkpoint, OptimiserKind::AdamW);
    config.export = Some(ExportConfig { path: "unused.onnx".to_string(), example_input: vec![1, 3, 4, 33] });

    let train = SkeletonDataset::from_file(&config.dataset_path, "train").unwrap();
    let err = trainer::run(&Stgcn::default(), &train, &train, &config).unwrap_err();
    assert!(matches!(err, TrainerError::Export(_)));

    config.export = Some(ExportConfig { path: "unused.onnx".to_string(), example_input: vec![1, 150, 64] });
    let records = json!([{ "split": "train", "label": "ollie", "features": feature_frames(3, 0) }]).to_string();
    let features = FeatureDataset::from_json(&records, "train").unwrap();

    let err = trainer::run(&Tcn::default(), &features, &features, &config).unwrap_err();
    assert!(matches!(err, TrainerError::Export(onnx::ExportError::InvalidExampleShape { .. })));
    assert!(!Path::new(&config.checkpoint_path).exists());
}

#[test]
fn model_outputs_have_one_row_per_sample() {
    let mut stgcn = Stgcn::default().build(ExecutionContext::seeded(3)).unwrap();
    let shape = Shape::from([4, KEYPOINT_CHANNELS, 10, NUM_KEYPOINTS]);
    let logits = stgcn.logits(&shape, &vec![0.5; shape.size()]).unwrap();
    assert_eq!(logits.len(), 4 * NUM_CLASSES);
    assert_eq!(stgcn.graph.get_node(stgcn.logits).shape(), &Shape::from([4, NUM_CLASSES]));

    let mut tcn = Tcn::default().build(ExecutionContext::seeded(3)).unwrap();

    for (layout, shape) in [
        (SequenceLayout::FrameMajor, Shape::from([3, 20, FEATURE_DIM])),
        (SequenceLayout::FeatureMajor, Shape::from([3, FEATURE_DIM, 20])),
    ] {
        let logits = Tcn::logits(&mut tcn, layout, &shape, &vec![0.1; shape.size()]).unwrap();
        assert_eq!(logits.len(), 3 * NUM_CLASSES);
        assert_eq!(tcn.graph.get_node(tcn.logits).shape(), &Shape::from([3, NUM_CLASSES]));
    }
}

#[test]
fn checkpoint_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tcn.pth");
    let path = path.to_str().unwrap();

    let records = json!([
        { "split": "train", "label": "ollie", "features": feature_frames(5, 0) },
        { "split": "train", "label": "360-back", "features": feature_frames(5, 4) },
    ])
    .to_string();
    let train = FeatureDataset::from_json(&records, "train").unwrap();
    let batch = DataLoader::new(&train, 2, false).prepare(&[0, 1]).unwrap();

    let mut network = Tcn::default().build(ExecutionContext::seeded(11)).unwrap();

    // a training forward pass moves the running statistics away from their defaults
    for id in [INPUTS, TARGETS] {
        let input = batch.input(id).unwrap();
        network.graph.store_input(id, &input.shape, &input.vals).unwrap();
    }
    network.graph.forward().unwrap();
    assert!(network.graph.get_state("blocks.0.bn.running").unwrap().values.values()[0] != 0.0);

    network.save(path).unwrap();

    let mut reloaded = Tcn::default().build(ExecutionContext::seeded(12)).unwrap();
    let inputs = batch.input(INPUTS).unwrap();
    assert_ne!(
        network.logits(&inputs.shape, &inputs.vals).unwrap(),
        reloaded.logits(&inputs.shape, &inputs.vals).unwrap()
    );

    reloaded.load(path).unwrap();
    assert_eq!(
        network.logits(&inputs.shape, &inputs.vals).unwrap(),
        reloaded.logits(&inputs.shape, &inputs.vals).unwrap()
    );
}

fn fields<'a>(fields: &[(u32, WireValue<'a>)], id: u32) -> Vec<WireValue<'a>> {
    fields.iter().filter(|(field, _)| *field == id).map(|(_, value)| *value).collect()
}

fn message<'a>(value: &WireValue<'a>) -> Vec<(u32, WireValue<'a>)> {
    decode_fields(value.as_bytes().unwrap()).unwrap()
}

#[test]
fn onnx_export_declares_dynamic_axes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trick-tcn.onnx");

    let model = Tcn::default();
    let settings = model.export_settings(&[1, 150, FEATURE_DIM]).unwrap();
    let mut network = model.build(ExecutionContext::seeded(5)).unwrap();

    onnx::export_graph_to_file(&mut network.graph, network.input, network.logits, &settings, path.to_str().unwrap())
        .unwrap();
    assert!(network.graph.training());

    let bytes = std::fs::read(&path).unwrap();
    let model = decode_fields(&bytes).unwrap();
    let graph = message(&fields(&model, 7)[0]);

    let op_types = fields(&graph, 1)
        .iter()
        .map(|node| fields(&message(node), 4)[0].as_str().unwrap().to_string())
        .collect::<Vec<_>>();

    assert_eq!(op_types.first().map(String::as_str), Some("Transpose"));
    assert_eq!(op_types.iter().filter(|op| *op == "Conv").count(), 3);
    assert_eq!(op_types.iter().filter(|op| *op == "BatchNormalization").count(), 3);
    assert_eq!(op_types.last().map(String::as_str), Some("Gemm"));
    assert!(!op_types.iter().any(|op| op == "Dropout"));

    let input = message(&fields(&graph, 11)[0]);
    assert_eq!(fields(&input, 1)[0].as_str(), Some("features"));

    let tensor = message(&fields(&message(&fields(&input, 2)[0]), 1)[0]);
    let dims = fields(&message(&fields(&tensor, 2)[0]), 1).iter().map(|dim| message(dim)[0].1).collect::<Vec<_>>();

    assert_eq!(dims[0].as_str(), Some("batch_size"));
    assert_eq!(dims[1].as_str(), Some("sequence_length"));
    assert_eq!(dims[2].as_int(), Some(128));

    let output = message(&fields(&graph, 12)[0]);
    assert_eq!(fields(&output, 1)[0].as_str(), Some("logits"));
}
