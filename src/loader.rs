use std::collections::HashMap;

use rand::{seq::SliceRandom, Rng};
use trick_core::Shape;

use crate::{
    catalog::NUM_CLASSES,
    dataset::{Dataset, DatasetError},
};

pub const INPUTS: &str = "inputs";
pub const TARGETS: &str = "targets";

#[derive(Debug)]
pub enum DataLoadingError {
    RaggedBatch { index: usize, expected: Shape, found: Shape },
    Dataset(DatasetError),
}

impl std::fmt::Display for DataLoadingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RaggedBatch { index, expected, found } => {
                write!(f, "Sample {index} has shape {found}, but the batch expects {expected}")
            }
            Self::Dataset(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for DataLoadingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Dataset(err) => Some(err),
            Self::RaggedBatch { .. } => None,
        }
    }
}

impl From<DatasetError> for DataLoadingError {
    fn from(value: DatasetError) -> Self {
        Self::Dataset(value)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HostTensor {
    pub shape: Shape,
    pub vals: Vec<f32>,
}

/// A batch of samples stacked along a new leading axis, with one-hot targets.
#[derive(Debug)]
pub struct PreparedBatch {
    pub batch_size: usize,
    pub inputs: HashMap<String, HostTensor>,
    pub labels: Vec<usize>,
}

impl PreparedBatch {
    pub fn input(&self, id: &str) -> Option<&HostTensor> {
        self.inputs.get(id)
    }
}

pub struct DataLoader<'a, D> {
    dataset: &'a D,
    batch_size: usize,
    shuffle: bool,
}

impl<'a, D: Dataset> DataLoader<'a, D> {
    pub fn new(dataset: &'a D, batch_size: usize, shuffle: bool) -> Self {
        assert!(batch_size > 0, "Batch size must be positive!");
        Self { dataset, batch_size, shuffle }
    }

    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    /// Yields every sample exactly once, the final batch may be short.
    pub fn batches<R: Rng>(&self, rng: &mut R) -> Batches<'_, 'a, D> {
        let mut order = (0..self.dataset.len()).collect::<Vec<_>>();

        if self.shuffle {
            order.shuffle(rng);
        }

        let chunks = order.chunks(self.batch_size).map(<[usize]>::to_vec).collect::<Vec<_>>();
        Batches { loader: self, chunks: chunks.into_iter() }
    }

    pub fn prepare(&self, indices: &[usize]) -> Result<PreparedBatch, DataLoadingError> {
        let batch_size = indices.len();
        let mut sample_shape = None;
        let mut vals = Vec::new();
        let mut labels = Vec::with_capacity(batch_size);

        for &index in indices {
            let sample = self.dataset.get(index)?;

            let expected = sample_shape.get_or_insert_with(|| sample.shape.clone());
            if *expected != sample.shape {
                return Err(DataLoadingError::RaggedBatch { index, expected: expected.clone(), found: sample.shape });
            }

            vals.extend_from_slice(&sample.values);
            labels.push(sample.label.class_index());
        }

        let mut dims = vec![batch_size];
        dims.extend_from_slice(sample_shape.unwrap_or_default().dims());

        let mut targets = vec![0.0; batch_size * NUM_CLASSES];
        for (row, &label) in targets.chunks_exact_mut(NUM_CLASSES).zip(&labels) {
            row[label] = 1.0;
        }

        let mut inputs = HashMap::new();
        inputs.insert(INPUTS.to_string(), HostTensor { shape: Shape::new(&dims), vals });
        inputs.insert(TARGETS.to_string(), HostTensor { shape: Shape::from([batch_size, NUM_CLASSES]), vals: targets });

        Ok(PreparedBatch { batch_size, inputs, labels })
    }
}

pub struct Batches<'l, 'a, D> {
    loader: &'l DataLoader<'a, D>,
    chunks: std::vec::IntoIter<Vec<usize>>,
}

impl<D: Dataset> Iterator for Batches<'_, '_, D> {
    type Item = Result<PreparedBatch, DataLoadingError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.chunks.next().map(|indices| self.loader.prepare(&indices))
    }
}
