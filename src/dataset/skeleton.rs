use serde::Deserialize;
use trick_core::Shape;

use crate::catalog::TrickLabel;

use super::{check_index, load_split, malformed, required, Dataset, DatasetError, Record, Sample};

pub const NUM_KEYPOINTS: usize = 33;
pub const KEYPOINT_CHANNELS: usize = 3;
pub const HIP: usize = 1;

#[derive(Debug, Deserialize)]
struct SkeletonRecord {
    split: Option<String>,
    label: Option<String>,
    session_id: Option<String>,
    skeletons: Option<Vec<Vec<Vec<f32>>>>,
}

impl Record for SkeletonRecord {
    fn split(&self) -> Option<&str> {
        self.split.as_deref()
    }
}

/// Keypoint sequences of one split, normalised and laid out as `[3, frames, 33]`.
pub struct SkeletonDataset {
    records: Vec<SkeletonRecord>,
}

impl SkeletonDataset {
    pub fn from_file(path: &str, split: &str) -> Result<Self, DatasetError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json, split)
    }

    pub fn from_json(json: &str, split: &str) -> Result<Self, DatasetError> {
        Ok(Self { records: load_split(json, split)? })
    }
}

impl Dataset for SkeletonDataset {
    fn len(&self) -> usize {
        self.records.len()
    }

    fn get(&self, index: usize) -> Result<Sample, DatasetError> {
        check_index(index, self.records.len())?;

        let record = &self.records[index];
        let label = required(record.label.as_deref(), index, "label")?;
        let frames = required(record.skeletons.as_ref(), index, "skeletons")?;

        let mut flat = Vec::with_capacity(frames.len() * NUM_KEYPOINTS * KEYPOINT_CHANNELS);

        for (t, frame) in frames.iter().enumerate() {
            if frame.len() != NUM_KEYPOINTS {
                return Err(malformed(index, format!("frame {t} has {} keypoints", frame.len())));
            }

            for (v, keypoint) in frame.iter().enumerate() {
                if keypoint.len() != KEYPOINT_CHANNELS {
                    return Err(malformed(index, format!("keypoint {v} of frame {t} has {} values", keypoint.len())));
                }

                flat.extend_from_slice(keypoint);
            }
        }

        normalise_skeletons(&mut flat);

        Ok(Sample {
            shape: Shape::from([KEYPOINT_CHANNELS, frames.len(), NUM_KEYPOINTS]),
            values: channels_first(&flat, frames.len()),
            label: TrickLabel::from(label),
            session_id: Some(record.session_id.clone().unwrap_or_default()),
        })
    }
}

/// Centres a `[frames, 33, 3]` sequence on the mean hip position and scales x/y
/// by their joint population standard deviation. Confidence is left as is.
pub fn normalise_skeletons(data: &mut [f32]) {
    let stride = NUM_KEYPOINTS * KEYPOINT_CHANNELS;
    let frames = data.len() / stride;

    if frames == 0 {
        return;
    }

    let (mut hip_x, mut hip_y) = (0.0f64, 0.0f64);

    for frame in data.chunks_exact(stride) {
        hip_x += f64::from(frame[HIP * KEYPOINT_CHANNELS]);
        hip_y += f64::from(frame[HIP * KEYPOINT_CHANNELS + 1]);
    }

    hip_x /= frames as f64;
    hip_y /= frames as f64;

    let coords = || data.chunks_exact(KEYPOINT_CHANNELS).flat_map(|kp| [f64::from(kp[0]), f64::from(kp[1])]);
    let count = (frames * NUM_KEYPOINTS * 2) as f64;
    let mean = coords().sum::<f64>() / count;
    let var = coords().map(|c| (c - mean).powi(2)).sum::<f64>() / count;
    let scale = var.sqrt();

    if scale <= 0.0 {
        return;
    }

    for keypoint in data.chunks_exact_mut(KEYPOINT_CHANNELS) {
        keypoint[0] = ((f64::from(keypoint[0]) - hip_x) / scale) as f32;
        keypoint[1] = ((f64::from(keypoint[1]) - hip_y) / scale) as f32;
    }
}

/// `[frames, 33, 3]` -> `[3, frames, 33]`.
fn channels_first(data: &[f32], frames: usize) -> Vec<f32> {
    let mut out = vec![0.0; data.len()];

    for t in 0..frames {
        for v in 0..NUM_KEYPOINTS {
            for c in 0..KEYPOINT_CHANNELS {
                out[(c * frames + t) * NUM_KEYPOINTS + v] = data[(t * NUM_KEYPOINTS + v) * KEYPOINT_CHANNELS + c];
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(offset: f32) -> Vec<Vec<f32>> {
        (0..NUM_KEYPOINTS).map(|v| vec![offset + v as f32, 2.0 * v as f32 - offset, 0.5]).collect()
    }

    fn json(records: &[(&str, &str, Option<&str>, Vec<Vec<Vec<f32>>>)]) -> String {
        let values = records
            .iter()
            .map(|(split, label, session, skeletons)| {
                let mut obj = serde_json::json!({ "split": split, "label": label, "skeletons": skeletons });
                if let Some(session) = session {
                    obj["session_id"] = serde_json::json!(session);
                }
                obj
            })
            .collect::<Vec<_>>();

        serde_json::to_string(&values).unwrap()
    }

    #[test]
    fn empty_sequence_is_unchanged() {
        let mut data: Vec<f32> = Vec::new();
        normalise_skeletons(&mut data);
        assert!(data.is_empty());
    }

    #[test]
    fn normalised_coordinates_are_hip_centred_and_unit_scale() {
        let mut data = [frame(0.0), frame(3.0), frame(-1.0)].concat().concat();
        let original = data.clone();

        normalise_skeletons(&mut data);

        let hip = |d: &[f32], c: usize| {
            d.chunks_exact(NUM_KEYPOINTS * 3).map(|f| f[HIP * 3 + c]).sum::<f32>() / 3.0
        };
        assert!(hip(&data, 0).abs() < 1e-5);
        assert!(hip(&data, 1).abs() < 1e-5);

        let coords = original.chunks_exact(3).flat_map(|kp| [kp[0], kp[1]]).collect::<Vec<_>>();
        let mean = coords.iter().sum::<f32>() / coords.len() as f32;
        let scale = (coords.iter().map(|c| (c - mean).powi(2)).sum::<f32>() / coords.len() as f32).sqrt();
        let (hip_x, hip_y) = (hip(&original, 0), hip(&original, 1));

        for (new, old) in data.chunks_exact(3).zip(original.chunks_exact(3)) {
            assert!((new[0] - (old[0] - hip_x) / scale).abs() < 1e-4);
            assert!((new[1] - (old[1] - hip_y) / scale).abs() < 1e-4);
            assert_eq!(new[2], old[2]);
        }

        let x = data.chunks_exact(3).map(|kp| kp[0]).collect::<Vec<_>>();
        let x_mean = x.iter().sum::<f32>() / x.len() as f32;
        let x_std = (x.iter().map(|c| (c - x_mean).powi(2)).sum::<f32>() / x.len() as f32).sqrt();
        let orig_x = original.chunks_exact(3).map(|kp| kp[0]).collect::<Vec<_>>();
        let orig_mean = orig_x.iter().sum::<f32>() / orig_x.len() as f32;
        let orig_std = (orig_x.iter().map(|c| (c - orig_mean).powi(2)).sum::<f32>() / orig_x.len() as f32).sqrt();
        assert!((x_std - orig_std / scale).abs() < 1e-4);
    }

    #[test]
    fn constant_sequence_is_not_scaled() {
        let mut data = vec![1.0; NUM_KEYPOINTS * 3 * 2];
        normalise_skeletons(&mut data);
        assert!(data.iter().all(|&x| x == 1.0));
    }

    #[test]
    fn samples_are_channel_first() {
        let json = json(&[
            ("train", "ollie", Some("s1"), vec![frame(0.0), frame(1.0)]),
            ("val", "kickflip", None, vec![frame(0.0)]),
            ("train", "tre-flip", None, vec![]),
        ]);

        let train = SkeletonDataset::from_json(&json, "train").unwrap();
        assert_eq!(train.len(), 2);

        let sample = train.get(0).unwrap();
        assert_eq!(sample.shape, Shape::from([3, 2, NUM_KEYPOINTS]));
        assert_eq!(sample.label, TrickLabel::Known(0));
        assert_eq!(sample.session_id.as_deref(), Some("s1"));
        assert!(sample.values[2 * 2 * NUM_KEYPOINTS..].iter().all(|&c| c == 0.5));

        let empty = train.get(1).unwrap();
        assert_eq!(empty.shape, Shape::from([3, 0, NUM_KEYPOINTS]));
        assert_eq!(empty.label, TrickLabel::Unknown);
        assert_eq!(empty.session_id.as_deref(), Some(""));

        let val = SkeletonDataset::from_json(&json, "val").unwrap();
        assert_eq!(val.len(), 1);
        assert_eq!(val.get(0).unwrap().label.class_index(), 4);

        assert!(matches!(train.get(2), Err(DatasetError::IndexOutOfBounds { index: 2, len: 2 })));
    }

    #[test]
    fn malformed_frames_are_rejected() {
        let mut short = frame(0.0);
        short.pop();
        let json = json(&[("train", "ollie", None, vec![frame(0.0), short])]);

        let dataset = SkeletonDataset::from_json(&json, "train").unwrap();
        assert!(matches!(dataset.get(0), Err(DatasetError::MalformedSample { index: 0, .. })));

        let missing = r#"[{"split": "train", "label": "ollie"}]"#;
        let dataset = SkeletonDataset::from_json(missing, "train").unwrap();
        assert!(matches!(dataset.get(0), Err(DatasetError::MalformedSample { index: 0, .. })));
    }
}
