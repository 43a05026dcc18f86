use crate::{
    error::{CompileError, Result},
    shape::Shape,
};

/// A dense row-major tensor with data
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub shape: Shape,
    pub data: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: impl Into<Shape>, data: Vec<f32>) -> Result<Self> {
        let shape = shape.into();
        if shape.n_elements() != data.len() {
            return Err(CompileError::Evaluation(format!(
                "{} elements don't fit shape {shape:?}",
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// Reinterpret the data under a new shape with the same element count
    pub fn reshape(&self, shape: &Shape) -> Result<Tensor> {
        Tensor::new(shape.clone(), self.data.clone())
    }

    /// Concatenate tensors along `dim`. Every part must agree on all other dimensions.
    pub fn concat(dim: usize, parts: &[&Tensor]) -> Result<Tensor> {
        let Some(first) = parts.first() else {
            return Err(CompileError::Evaluation("nothing to concatenate".to_string()));
        };
        if dim >= first.shape.rank() {
            return Err(CompileError::Evaluation(format!(
                "concat dimension {dim} out of range for {:?}",
                first.shape
            )));
        }
        for part in parts {
            let compatible = part.shape.rank() == first.shape.rank()
                && (0..first.shape.rank())
                    .all(|d| d == dim || part.shape.dim(d) == first.shape.dim(d));
            if !compatible {
                return Err(CompileError::Evaluation(format!(
                    "cannot concatenate {:?} with {:?} along {dim}",
                    part.shape, first.shape
                )));
            }
        }
        let outer = first.shape.stride_count(dim);
        let mut shape = first.shape.clone();
        shape.set_dim(dim, parts.iter().map(|p| p.shape.dim(dim)).sum());
        let mut data = Vec::with_capacity(shape.n_elements());
        for o in 0..outer {
            for part in parts {
                // Each outer block of a part holds its full slab from `dim` onwards
                let block = part.data.len() / outer;
                data.extend_from_slice(&part.data[o * block..(o + 1) * block]);
            }
        }
        Tensor::new(shape, data)
    }
}
