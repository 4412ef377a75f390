// Matrix: row-major f32 storage for the training domain
//
// Rows are examples (or output units for weight matrices), columns are
// features. Storage is reserved with `try_reserve_exact`, so a feature
// matrix too large for the device surfaces as `Error::Allocation` instead
// of an abort.
//
// Products come in three flavours to avoid materializing transposes:
//
//   matmul     A @ B      [m,k] @ [k,n]
//   matmul_nt  A @ B^T    [m,k] @ [n,k]^T   (dense forward: x @ W^T)
//   matmul_tn  A^T @ B    [r,m]^T @ [r,n]   (weight gradient: dy^T @ x)

use std::fmt;

use crate::error::{Error, Result};
use crate::shape::Shape;

#[derive(Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    /// A zero-filled matrix.
    pub fn zeros(rows: usize, cols: usize) -> Result<Self> {
        let n = rows
            .checked_mul(cols)
            .ok_or(Error::Allocation { elements: usize::MAX })?;
        let mut data = Vec::new();
        data.try_reserve_exact(n)
            .map_err(|_| Error::Allocation { elements: n })?;
        data.resize(n, 0.0);
        Ok(Matrix { rows, cols, data })
    }

    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::ElementCountMismatch {
                shape: Shape::from((rows, cols)),
                expected: rows * cols,
                got: data.len(),
            });
        }
        Ok(Matrix { rows, cols, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> Shape {
        Shape::from((self.rows, self.cols))
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut [f32] {
        &mut self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn get(&self, r: usize, c: usize) -> f32 {
        self.data[r * self.cols + c]
    }

    pub fn set(&mut self, r: usize, c: usize, v: f32) {
        self.data[r * self.cols + c] = v;
    }

    /// Index of the largest entry in row `i`. Ties resolve to the lowest
    /// index: the scan only moves on a strict improvement.
    pub fn argmax_row(&self, i: usize) -> usize {
        argmax(self.row(i))
    }

    /// Copy the given rows, in order, into a new matrix.
    pub fn select_rows(&self, indices: &[usize]) -> Result<Matrix> {
        let mut out = Matrix::zeros(indices.len(), self.cols)?;
        for (dst, &src) in indices.iter().enumerate() {
            out.row_mut(dst).copy_from_slice(self.row(src));
        }
        Ok(out)
    }

    pub fn fill(&mut self, v: f32) {
        self.data.iter_mut().for_each(|x| *x = v);
    }

    /// `self += alpha * other`
    pub fn axpy(&mut self, alpha: f32, other: &Matrix) -> Result<()> {
        self.expect_same(other)?;
        for (a, &b) in self.data.iter_mut().zip(&other.data) {
            *a += alpha * b;
        }
        Ok(())
    }

    pub fn scale(&mut self, s: f32) {
        self.data.iter_mut().for_each(|x| *x *= s);
    }

    /// `self @ other`
    pub fn matmul(&self, other: &Matrix) -> Result<Matrix> {
        if self.cols != other.rows {
            return Err(self.matmul_error(other.rows, other.cols));
        }
        let mut out = Matrix::zeros(self.rows, other.cols)?;
        for i in 0..self.rows {
            let out_row = &mut out.data[i * other.cols..(i + 1) * other.cols];
            for (k, &a) in self.row(i).iter().enumerate() {
                if a == 0.0 {
                    continue;
                }
                for (o, &b) in out_row.iter_mut().zip(other.row(k)) {
                    *o += a * b;
                }
            }
        }
        Ok(out)
    }

    /// `self @ other^T`
    pub fn matmul_nt(&self, other: &Matrix) -> Result<Matrix> {
        if self.cols != other.cols {
            return Err(self.matmul_error(other.cols, other.rows));
        }
        let mut out = Matrix::zeros(self.rows, other.rows)?;
        for i in 0..self.rows {
            let a = self.row(i);
            for j in 0..other.rows {
                let dot: f32 = a.iter().zip(other.row(j)).map(|(x, y)| x * y).sum();
                out.data[i * other.rows + j] = dot;
            }
        }
        Ok(out)
    }

    /// `self^T @ other`
    pub fn matmul_tn(&self, other: &Matrix) -> Result<Matrix> {
        if self.rows != other.rows {
            return Err(Error::MatmulShapeMismatch {
                m: self.cols,
                k1: self.rows,
                k2: other.rows,
                n: other.cols,
            });
        }
        let mut out = Matrix::zeros(self.cols, other.cols)?;
        for r in 0..self.rows {
            let b = other.row(r);
            for (i, &a) in self.row(r).iter().enumerate() {
                if a == 0.0 {
                    continue;
                }
                let out_row = &mut out.data[i * other.cols..(i + 1) * other.cols];
                for (o, &bv) in out_row.iter_mut().zip(b) {
                    *o += a * bv;
                }
            }
        }
        Ok(out)
    }

    fn expect_same(&self, other: &Matrix) -> Result<()> {
        if self.rows != other.rows || self.cols != other.cols {
            return Err(Error::ShapeMismatch {
                expected: self.shape(),
                got: other.shape(),
            });
        }
        Ok(())
    }

    fn matmul_error(&self, k2: usize, n: usize) -> Error {
        Error::MatmulShapeMismatch {
            m: self.rows,
            k1: self.cols,
            k2,
            n,
        }
    }
}

impl fmt::Debug for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Matrix[{}x{}]", self.rows, self.cols)
    }
}

/// Index of the largest value, lowest index on ties. Empty input gives 0.
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}
