// Dataset: in-memory feature and one-hot label matrices
//
//   x: [examples, features]
//   y: [examples, classes]     exactly one 1.0 per row
//
// Datasets are assembled row by row through `DatasetBuilder`, which only
// hands out a `Dataset` once every row has its features and a label, so a
// half-built label matrix is never observable.

use sprig_core::{Error, Matrix, Result};

#[derive(Debug, Clone)]
pub struct Dataset {
    x: Matrix,
    y: Matrix,
}

impl Dataset {
    /// Wrap existing matrices, checking the one-hot and row-count invariants.
    pub fn new(x: Matrix, y: Matrix) -> Result<Self> {
        if x.rows() != y.rows() {
            return Err(Error::shape_mismatch(&[x.rows()], &[y.rows()]));
        }
        for r in 0..y.rows() {
            let row = y.row(r);
            let ones = row.iter().filter(|&&v| v == 1.0).count();
            let zeros = row.iter().filter(|&&v| v == 0.0).count();
            if ones != 1 || ones + zeros != row.len() {
                return Err(Error::msg(format!("label row {r} is not one-hot")));
            }
        }
        Ok(Dataset { x, y })
    }

    pub fn len(&self) -> usize {
        self.x.rows()
    }

    pub fn is_empty(&self) -> bool {
        self.x.rows() == 0
    }

    pub fn features(&self) -> usize {
        self.x.cols()
    }

    pub fn classes(&self) -> usize {
        self.y.cols()
    }

    pub fn x(&self) -> &Matrix {
        &self.x
    }

    pub fn y(&self) -> &Matrix {
        &self.y
    }

    /// Ground-truth class of example `i`.
    pub fn label(&self, i: usize) -> usize {
        self.y.argmax_row(i)
    }

    /// Rows `indices` as a `(features, labels)` batch.
    pub fn gather(&self, indices: &[usize]) -> Result<(Matrix, Matrix)> {
        Ok((self.x.select_rows(indices)?, self.y.select_rows(indices)?))
    }
}

/// Row-by-row construction of a `Dataset` with a fixed row count.
#[derive(Debug)]
pub struct DatasetBuilder {
    x: Matrix,
    y: Matrix,
    filled: usize,
}

impl DatasetBuilder {
    /// Reserve storage for `rows` examples. Fails on allocation failure.
    pub fn new(rows: usize, features: usize, classes: usize) -> Result<Self> {
        if classes == 0 {
            return Err(Error::EmptyDimension {
                layer: "dataset",
                what: "class count",
            });
        }
        Ok(DatasetBuilder {
            x: Matrix::zeros(rows, features)?,
            y: Matrix::zeros(rows, classes)?,
            filled: 0,
        })
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    /// Append one example.
    pub fn push(&mut self, features: &[f32], label: usize) -> Result<()> {
        let row = self.filled;
        if row == self.x.rows() {
            return Err(Error::msg(format!("dataset already holds {row} rows")));
        }
        if features.len() != self.x.cols() {
            return Err(Error::shape_mismatch(&[self.x.cols()], &[features.len()]));
        }
        if label >= self.y.cols() {
            return Err(Error::LabelOutOfRange {
                label,
                classes: self.y.cols(),
            });
        }
        self.x.row_mut(row).copy_from_slice(features);
        self.y.set(row, label, 1.0);
        self.filled += 1;
        Ok(())
    }

    pub fn finish(self) -> Result<Dataset> {
        if self.filled != self.x.rows() {
            return Err(Error::shape_mismatch(&[self.x.rows()], &[self.filled]));
        }
        Ok(Dataset {
            x: self.x,
            y: self.y,
        })
    }
}
