use std::fmt::{Debug, Display};

use itertools::Itertools;
use tinyvec::TinyVec;

/// A static, row-major tensor shape
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape {
    pub dims: TinyVec<[usize; 6]>,
}

impl Shape {
    pub fn new(dims: &[usize]) -> Self {
        Self {
            dims: dims.iter().copied().collect(),
        }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dim(&self, dim: usize) -> usize {
        self.dims[dim]
    }

    pub fn set_dim(&mut self, dim: usize, size: usize) {
        self.dims[dim] = size;
    }

    /// Builder-style version of [`Shape::set_dim`]
    pub fn with_dim(mut self, dim: usize, size: usize) -> Self {
        self.set_dim(dim, size);
        self
    }

    pub fn n_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Number of contiguous blocks the row-major flattening produces before reaching `dim`,
    /// i.e. the product of every dimension strictly before it.
    pub fn stride_count(&self, dim: usize) -> usize {
        self.dims[..dim].iter().product()
    }

    /// Element strides of a dense row-major layout
    pub fn row_major_strides(&self) -> Vec<usize> {
        let mut strides = vec![1; self.rank()];
        for i in (0..self.rank().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.dims[i + 1];
        }
        strides
    }

    /// Flat offset of a multi-dimensional index
    pub fn linearize(&self, index: &[usize]) -> usize {
        debug_assert_eq!(index.len(), self.rank());
        index
            .iter()
            .zip(self.row_major_strides())
            .map(|(i, s)| i * s)
            .sum()
    }

    /// Multi-dimensional index of a flat offset
    pub fn delinearize(&self, mut offset: usize) -> Vec<usize> {
        let mut index = vec![0; self.rank()];
        for (i, stride) in self.row_major_strides().into_iter().enumerate() {
            index[i] = offset / stride;
            offset %= stride;
        }
        index
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims)
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape::new(&dims)
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::new(&dims)
    }
}

impl Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "f32[{}]", self.dims.iter().join(","))
    }
}

impl Debug for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.dims.as_slice())
    }
}
