use serde::Deserialize;
use trick_core::Shape;

use crate::catalog::TrickLabel;

use super::{check_index, load_split, malformed, required, Dataset, DatasetError, Record, Sample};

pub const FEATURE_DIM: usize = 128;

const STD_EPSILON: f64 = 1e-8;

#[derive(Debug, Deserialize)]
struct FeatureRecord {
    split: Option<String>,
    label: Option<String>,
    features: Option<Vec<Vec<f32>>>,
}

impl Record for FeatureRecord {
    fn split(&self) -> Option<&str> {
        self.split.as_deref()
    }
}

/// Per-frame feature vectors of one split, normalised and laid out as `[frames, 128]`.
pub struct FeatureDataset {
    records: Vec<FeatureRecord>,
}

impl FeatureDataset {
    pub fn from_file(path: &str, split: &str) -> Result<Self, DatasetError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json, split)
    }

    pub fn from_json(json: &str, split: &str) -> Result<Self, DatasetError> {
        Ok(Self { records: load_split(json, split)? })
    }
}

impl Dataset for FeatureDataset {
    fn len(&self) -> usize {
        self.records.len()
    }

    fn get(&self, index: usize) -> Result<Sample, DatasetError> {
        check_index(index, self.records.len())?;

        let record = &self.records[index];
        let label = required(record.label.as_deref(), index, "label")?;
        let frames = required(record.features.as_ref(), index, "features")?;

        let mut flat = Vec::with_capacity(frames.len() * FEATURE_DIM);

        for (t, frame) in frames.iter().enumerate() {
            if frame.len() != FEATURE_DIM {
                return Err(malformed(index, format!("frame {t} has {} features", frame.len())));
            }

            flat.extend_from_slice(frame);
        }

        normalise_features(&mut flat);

        Ok(Sample {
            shape: Shape::from([frames.len(), FEATURE_DIM]),
            values: flat,
            label: TrickLabel::from(label),
            session_id: None,
        })
    }
}

/// Z-scores each of the 128 dimensions of a `[frames, 128]` sequence over time.
pub fn normalise_features(data: &mut [f32]) {
    let frames = data.len() / FEATURE_DIM;

    if frames == 0 {
        return;
    }

    for dim in 0..FEATURE_DIM {
        let column = || data.iter().skip(dim).step_by(FEATURE_DIM).map(|&x| f64::from(x));
        let mean = column().sum::<f64>() / frames as f64;
        let std = (column().map(|x| (x - mean).powi(2)).sum::<f64>() / frames as f64).sqrt();

        for x in data.iter_mut().skip(dim).step_by(FEATURE_DIM) {
            *x = ((f64::from(*x) - mean) / (std + STD_EPSILON)) as f32;
        }
    }
}
