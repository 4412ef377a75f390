// Batcher: draws mini-batches from a Dataset
//
// Random order samples rows with replacement from a seeded StdRng, so two
// runs with the same seed see the same batches. Sequential order walks the
// rows in storage order and wraps around at the end.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use sprig_core::{Error, Matrix, Result};

use crate::dataset::Dataset;

/// How batch rows are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOrder {
    #[default]
    Random,
    Sequential,
}

pub struct Batcher {
    order: BatchOrder,
    cursor: usize,
    rng: StdRng,
}

impl Batcher {
    pub fn new(order: BatchOrder, seed: u64) -> Self {
        Batcher {
            order,
            cursor: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Row indices of the next batch.
    pub fn next_indices(&mut self, len: usize, size: usize) -> Result<Vec<usize>> {
        if len == 0 {
            return Err(Error::EmptyDimension {
                layer: "batcher",
                what: "dataset length",
            });
        }
        if size == 0 {
            return Err(Error::EmptyDimension {
                layer: "batcher",
                what: "batch size",
            });
        }
        let indices = match self.order {
            BatchOrder::Random => (0..size).map(|_| self.rng.gen_range(0..len)).collect(),
            BatchOrder::Sequential => {
                let start = self.cursor % len;
                self.cursor = (start + size) % len;
                (0..size).map(|i| (start + i) % len).collect()
            }
        };
        Ok(indices)
    }

    /// The next `(features, labels)` batch of `size` rows.
    pub fn next_batch(&mut self, data: &Dataset, size: usize) -> Result<(Matrix, Matrix)> {
        let indices = self.next_indices(data.len(), size)?;
        data.gather(&indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_wraps() {
        let mut b = Batcher::new(BatchOrder::Sequential, 0);
        assert_eq!(b.next_indices(5, 3).unwrap(), vec![0, 1, 2]);
        assert_eq!(b.next_indices(5, 3).unwrap(), vec![3, 4, 0]);
        assert_eq!(b.next_indices(5, 3).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_random_is_seeded() {
        let mut a = Batcher::new(BatchOrder::Random, 42);
        let mut b = Batcher::new(BatchOrder::Random, 42);
        for _ in 0..4 {
            let ia = a.next_indices(10, 8).unwrap();
            assert!(ia.iter().all(|&i| i < 10));
            assert_eq!(ia, b.next_indices(10, 8).unwrap());
        }
    }

    #[test]
    fn test_empty_rejected() {
        let mut b = Batcher::new(BatchOrder::Random, 0);
        assert!(b.next_indices(0, 4).is_err());
        assert!(b.next_indices(4, 0).is_err());
    }
}
