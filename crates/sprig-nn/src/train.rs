// Training driver: mini-batch SGD and accuracy evaluation
//
// The network is expected to end in a softmax. For a batch of B rows with
// one-hot targets y and predicted probabilities p:
//
//   loss = -(1/B) Σ_rows Σ_classes y * ln(p)
//   dL/dz = p - y            (gradient at the softmax input, summed over rows)
//
// The softmax layer forwards that gradient unchanged, so `train_epoch` hands
// p - y straight to `Network::backward`.

use serde::{Deserialize, Serialize};

use sprig_core::{argmax, Matrix, Result};
use sprig_data::{Batcher, Dataset};

use crate::layer::expect_width;
use crate::network::Network;
use crate::optim::Sgd;

/// Rows evaluated per forward pass in `accuracy`.
const EVAL_CHUNK: usize = 256;

/// Correct arg-max predictions over a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Accuracy {
    pub correct: usize,
    pub total: usize,
}

impl Accuracy {
    /// `correct / total`, 0.0 for an empty dataset.
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f32 / self.total as f32
        }
    }
}

impl std::fmt::Display for Accuracy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} ({:.4})", self.correct, self.total, self.fraction())
    }
}

/// Mean cross-entropy of `probs` against one-hot `targets`.
pub fn cross_entropy(probs: &Matrix, targets: &Matrix) -> Result<f32> {
    expect_width(probs, targets.cols())?;
    if probs.rows() == 0 {
        return Ok(0.0);
    }
    let mut total = 0.0f32;
    for r in 0..probs.rows() {
        for (&p, &t) in probs.row(r).iter().zip(targets.row(r)) {
            if t > 0.0 {
                total -= t * p.max(f32::MIN_POSITIVE).ln();
            }
        }
    }
    Ok(total / probs.rows() as f32)
}

/// Run `iterations` mini-batches of `batch_size` rows. Returns the mean loss.
pub fn train_epoch(
    net: &mut Network,
    data: &Dataset,
    batcher: &mut Batcher,
    batch_size: usize,
    iterations: usize,
    sgd: &Sgd,
) -> Result<f32> {
    net.set_training(true);
    let mut sum = 0.0f32;
    for _ in 0..iterations {
        let (x, y) = batcher.next_batch(data, batch_size)?;
        let probs = net.forward(&x)?;
        sum += cross_entropy(&probs, &y)?;
        let mut dy = probs;
        dy.axpy(-1.0, &y)?;
        net.backward(&dy)?;
        net.update(sgd);
    }
    let mean = if iterations == 0 { 0.0 } else { sum / iterations as f32 };
    tracing::trace!(iterations, batch_size, mean_loss = mean, "train epoch");
    Ok(mean)
}

/// Evaluate arg-max accuracy in evaluation mode.
pub fn accuracy(net: &mut Network, data: &Dataset) -> Result<Accuracy> {
    net.set_training(false);
    let mut correct = 0;
    let rows: Vec<usize> = (0..data.len()).collect();
    for chunk in rows.chunks(EVAL_CHUNK) {
        let (x, _) = data.gather(chunk)?;
        let out = net.forward(&x)?;
        for (i, &row) in chunk.iter().enumerate() {
            if argmax(out.row(i)) == data.label(row) {
                correct += 1;
            }
        }
    }
    Ok(Accuracy {
        correct,
        total: data.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cross_entropy_perfect_and_uniform() {
        let t = Matrix::from_vec(1, 2, vec![0.0, 1.0]).unwrap();
        let perfect = Matrix::from_vec(1, 2, vec![0.0, 1.0]).unwrap();
        assert!(cross_entropy(&perfect, &t).unwrap().abs() < 1e-6);
        let uniform = Matrix::from_vec(1, 2, vec![0.5, 0.5]).unwrap();
        assert!((cross_entropy(&uniform, &t).unwrap() - 2f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn test_accuracy_fraction() {
        assert_eq!(Accuracy::default().fraction(), 0.0);
        let a = Accuracy { correct: 3, total: 4 };
        assert_eq!(a.fraction(), 0.75);
    }
}
