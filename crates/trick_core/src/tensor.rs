use crate::Shape;

#[derive(Clone, Debug, Default)]
pub struct DenseTensor {
    shape: Shape,
    buf: Vec<f32>,
}

impl DenseTensor {
    pub fn zeroed(shape: Shape) -> Self {
        Self { buf: vec![0.0; shape.size()], shape }
    }

    pub fn from_slice(shape: Shape, values: &[f32]) -> Self {
        assert_eq!(shape.size(), values.len(), "{shape} does not hold {} values!", values.len());
        Self { shape, buf: values.to_vec() }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn values(&self) -> &[f32] {
        &self.buf
    }

    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.buf
    }

    /// - If the provided `shape` matches the tensor's current shape, nothing is done.
    /// - If it doesn't, the tensor is reshaped into this shape, and its values are zeroed.
    pub fn reshape_if_needed(&mut self, shape: &Shape) {
        if &self.shape != shape {
            self.buf.clear();
            self.buf.resize(shape.size(), 0.0);
            self.shape = shape.clone();
        }
    }

    pub fn load_from_slice(&mut self, shape: &Shape, values: &[f32]) {
        assert_eq!(shape.size(), values.len(), "{shape} does not hold {} values!", values.len());
        self.reshape_if_needed(shape);
        self.buf.copy_from_slice(values);
    }

    pub fn set_zero(&mut self) {
        self.buf.iter_mut().for_each(|x| *x = 0.0);
    }

    pub fn set_to(&mut self, val: f32) {
        self.buf.iter_mut().for_each(|x| *x = val);
    }

    pub fn copy_into(&self, dest: &mut Self) {
        dest.reshape_if_needed(&self.shape);
        dest.buf.copy_from_slice(&self.buf);
    }

    /// Writes a complete description of the tensor into a buffer of bytes,
    /// along with an ID tag.
    pub fn write_to_byte_buffer(&self, id: &str) -> std::io::Result<Vec<u8>> {
        use std::io::{Error, ErrorKind, Write};

        if !id.is_ascii() {
            return Err(Error::new(ErrorKind::InvalidInput, "IDs may not contain non-ASCII characters!"));
        }

        if id.contains('\n') {
            return Err(Error::new(ErrorKind::InvalidInput, "IDs may not contain newlines!"));
        }

        let mut buf = Vec::with_capacity(id.len() + 1 + std::mem::size_of::<usize>() + 4 * self.size());

        buf.write_all(id.as_bytes())?;
        buf.write_all(b"\n")?;
        buf.write_all(&usize::to_le_bytes(self.size()))?;

        for &val in &self.buf {
            buf.write_all(&f32::to_le_bytes(val))?;
        }

        Ok(buf)
    }
}

/// A node's values, its gradient if it requires one, and any buffers
/// an operation needs to keep between forward and backward passes.
#[derive(Debug, Default)]
pub struct Tensor {
    pub values: DenseTensor,
    pub gradients: Option<DenseTensor>,
    pub internal: Vec<(String, DenseTensor)>,
}

impl Tensor {
    pub fn new(requires_grad: bool) -> Self {
        let gradients = requires_grad.then(DenseTensor::default);
        Self { values: DenseTensor::default(), gradients, internal: Vec::new() }
    }

    pub fn shape(&self) -> &Shape {
        self.values.shape()
    }

    pub fn zero_grad(&mut self) {
        if let Some(grad) = self.gradients.as_mut() {
            grad.set_zero();
        }
    }

    pub fn get_internal(&self, id: &str) -> Option<&DenseTensor> {
        self.internal.iter().find(|(name, _)| name == id).map(|(_, buf)| buf)
    }

    /// Returns the internal buffer named `id`, creating it if it doesn't exist yet.
    pub fn internal_mut(&mut self, id: &str) -> &mut DenseTensor {
        let idx = match self.internal.iter().position(|(name, _)| name == id) {
            Some(idx) => idx,
            None => {
                self.internal.push((id.to_string(), DenseTensor::default()));
                self.internal.len() - 1
            }
        };

        &mut self.internal[idx].1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_dense_tensor() {
        let tensor = DenseTensor::from_slice(Shape::from([3, 3]), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);

        let bytes = tensor.write_to_byte_buffer("tensor").unwrap();

        assert_eq!(bytes.len(), 7 + std::mem::size_of::<usize>() + 36);
        assert_eq!(&bytes[..7], b"tensor\n");
    }

    #[test]
    fn attempt_invalid_writes() {
        let tensor = DenseTensor::default();
        assert!(tensor.write_to_byte_buffer("tensor\n").is_err());
        assert!(tensor.write_to_byte_buffer("tènsor").is_err());
    }

    #[test]
    fn reshape_zeroes_only_on_change() {
        let shape = Shape::from([2, 2]);
        let mut tensor = DenseTensor::from_slice(shape.clone(), &[1.0; 4]);

        tensor.reshape_if_needed(&shape);
        assert_eq!(tensor.values(), &[1.0; 4]);

        tensor.reshape_if_needed(&Shape::from([4, 1]));
        assert_eq!(tensor.values(), &[0.0; 4]);
    }

    #[test]
    fn internal_buffers_are_reused() {
        let mut tensor = Tensor::new(true);
        tensor.internal_mut("mask").load_from_slice(&Shape::from([2]), &[1.0, 0.0]);
        tensor.internal_mut("mask").set_to(3.0);

        assert_eq!(tensor.internal.len(), 1);
        assert_eq!(tensor.get_internal("mask").unwrap().values(), &[3.0, 3.0]);
        assert!(tensor.get_internal("other").is_none());
    }
}
