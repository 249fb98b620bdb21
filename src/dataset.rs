pub mod features;
pub mod skeleton;

pub use features::FeatureDataset;
pub use skeleton::SkeletonDataset;

use serde::de::DeserializeOwned;
use trick_core::Shape;

use crate::catalog::TrickLabel;

#[derive(Debug)]
pub enum DatasetError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    MalformedSample { index: usize, reason: String },
    IndexOutOfBounds { index: usize, len: usize },
}

impl std::fmt::Display for DatasetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "Failed to read dataset: {err}"),
            Self::Parse(err) => write!(f, "Failed to parse dataset: {err}"),
            Self::MalformedSample { index, reason } => write!(f, "Sample {index} is malformed: {reason}"),
            Self::IndexOutOfBounds { index, len } => write!(f, "Index {index} out of bounds for {len} samples"),
        }
    }
}

impl std::error::Error for DatasetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DatasetError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for DatasetError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// A single normalised sequence, ready to be batched.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub shape: Shape,
    pub values: Vec<f32>,
    pub label: TrickLabel,
    pub session_id: Option<String>,
}

/// Indexed access to the samples of one split.
pub trait Dataset {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Result<Sample, DatasetError>;
}

/// Fields shared by every record kind, used for split filtering.
pub(crate) trait Record {
    fn split(&self) -> Option<&str>;
}

/// Reads a JSON array of records and keeps those tagged with `split`.
pub(crate) fn load_split<R: DeserializeOwned + Record>(json: &str, split: &str) -> Result<Vec<R>, DatasetError> {
    let records = serde_json::from_str::<Vec<R>>(json)?;
    Ok(records.into_iter().filter(|record| record.split() == Some(split)).collect())
}

pub(crate) fn check_index(index: usize, len: usize) -> Result<(), DatasetError> {
    if index < len {
        Ok(())
    } else {
        Err(DatasetError::IndexOutOfBounds { index, len })
    }
}

pub(crate) fn malformed(index: usize, reason: impl Into<String>) -> DatasetError {
    DatasetError::MalformedSample { index, reason: reason.into() }
}

pub(crate) fn required<T>(field: Option<T>, index: usize, name: &str) -> Result<T, DatasetError> {
    field.ok_or_else(|| malformed(index, format!("missing field '{name}'")))
}
