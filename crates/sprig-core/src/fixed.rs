// FixedTensor: a contiguous fixed-point array with its shape and exponent
//
// The exponent travels with the data, so every conversion into the float
// domain (and back) names the scale it uses instead of relying on a
// constant at the call site.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::qformat::{FixedPoint, QFormat};
use crate::shape::Shape;

/// A fixed-point tensor: `data[i]` stands for `data[i] / 2^q`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedTensor<T> {
    shape: Shape,
    q: QFormat,
    data: Vec<T>,
}

impl<T: FixedPoint> FixedTensor<T> {
    /// Wrap existing values. Fails when `data` does not fill `shape`.
    pub fn new(shape: impl Into<Shape>, q: QFormat, data: Vec<T>) -> Result<Self> {
        let shape = shape.into();
        let expected = shape.elem_count();
        if data.len() != expected {
            return Err(Error::ElementCountMismatch {
                shape,
                expected,
                got: data.len(),
            });
        }
        Ok(FixedTensor { shape, q, data })
    }

    pub fn zeros(shape: impl Into<Shape>, q: QFormat) -> Self {
        let shape = shape.into();
        let data = vec![T::default(); shape.elem_count()];
        FixedTensor { shape, q, data }
    }

    /// Requantize float values with exponent `q`.
    pub fn from_f32(shape: impl Into<Shape>, q: QFormat, values: &[f32]) -> Result<Self> {
        Self::new(shape, q, q.requantize_slice(values))
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn q(&self) -> QFormat {
        self.q
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of slices along dim 0 (filters of a conv weight).
    pub fn outer_count(&self) -> usize {
        self.shape.outer()
    }

    /// The `i`-th slice along dim 0, e.g. one filter's weight block.
    pub fn outer_slice(&self, i: usize) -> &[T] {
        let n = self.shape.inner_count();
        &self.data[i * n..(i + 1) * n]
    }

    pub fn dequantize(&self) -> Vec<f32> {
        self.q.dequantize_slice(&self.data)
    }

    /// Check the tensor against an expected geometry. Deserialized tensors
    /// skip `new`, so the element count is re-checked here as well.
    pub fn expect_dims(&self, expected: &[usize]) -> Result<()> {
        if self.dims() != expected {
            return Err(Error::shape_mismatch(expected, self.dims()));
        }
        if self.data.len() != self.shape.elem_count() {
            return Err(Error::ElementCountMismatch {
                shape: self.shape.clone(),
                expected: self.shape.elem_count(),
                got: self.data.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_checks_length() {
        let err = FixedTensor::<i8>::new((2, 3), QFormat::new(4), vec![0; 5]).unwrap_err();
        assert!(matches!(
            err,
            Error::ElementCountMismatch {
                expected: 6,
                got: 5,
                ..
            }
        ));
    }

    #[test]
    fn test_outer_slice() {
        let t = FixedTensor::<i8>::new((3, 2), QFormat::new(0), vec![1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(t.outer_count(), 3);
        assert_eq!(t.outer_slice(1), &[3, 4]);
    }

    #[test]
    fn test_from_f32_dequantize() {
        let t = FixedTensor::<i8>::from_f32(3, QFormat::new(2), &[0.25, -0.5, 0.6]).unwrap();
        assert_eq!(t.data(), &[1, -2, 3]);
        assert_eq!(t.dequantize(), vec![0.25, -0.5, 0.75]);
    }

    #[test]
    fn test_expect_dims() {
        let t = FixedTensor::<i8>::zeros((2, 4, 4), QFormat::new(4));
        assert!(t.expect_dims(&[2, 4, 4]).is_ok());
        assert!(matches!(
            t.expect_dims(&[4, 4, 2]),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
