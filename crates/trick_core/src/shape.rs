#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<usize>,
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;

        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, " x ")?;
            }

            write!(f, "{dim}")?;
        }

        write!(f, "]")
    }
}

impl From<&[usize]> for Shape {
    fn from(value: &[usize]) -> Self {
        Self::new(value)
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(value: [usize; N]) -> Self {
        Self::new(&value)
    }
}

impl Shape {
    pub fn new(dims: &[usize]) -> Self {
        Self { dims: dims.to_vec() }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dim(&self, axis: usize) -> usize {
        self.dims[axis]
    }

    /// Product of all dimensions, a rank 0 shape holds a single value.
    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn last(&self) -> usize {
        self.dims.last().copied().unwrap_or(1)
    }

    /// Row-major strides.
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1; self.dims.len()];

        for i in (0..self.dims.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.dims[i + 1];
        }

        strides
    }

    /// Axis `i` of the result is axis `perm[i]` of `self`.
    pub fn permute(&self, perm: &[usize]) -> Self {
        assert_eq!(perm.len(), self.rank(), "Permutation {perm:?} does not match {self}!");
        Self { dims: perm.iter().map(|&axis| self.dims[axis]).collect() }
    }

    pub fn without_last(&self) -> Self {
        Self { dims: self.dims[..self.dims.len().saturating_sub(1)].to_vec() }
    }

    pub fn with_last(&self, last: usize) -> Self {
        let mut dims = self.dims.clone();

        if let Some(x) = dims.last_mut() {
            *x = last;
        }

        Self { dims }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strides_and_size() {
        let shape = Shape::from([2, 3, 4]);
        assert_eq!(shape.size(), 24);
        assert_eq!(shape.strides(), vec![12, 4, 1]);
        assert_eq!(format!("{shape}"), "[2 x 3 x 4]");
    }

    #[test]
    fn permuted_dims() {
        let shape = Shape::from([2, 3, 4, 5]);
        assert_eq!(shape.permute(&[0, 3, 1, 2]), Shape::from([2, 5, 3, 4]));
        assert_eq!(shape.with_last(7), Shape::from([2, 3, 4, 7]));
        assert_eq!(shape.without_last(), Shape::from([2, 3, 4]));
    }
}
