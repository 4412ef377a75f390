// Incremental retraining loop
//
// The head trained on phase-2 features:
//
//   Connected(N*H*W → hidden) → ReLU → Connected(hidden → classes) → Softmax
//
// freshly initialised from a seeded RNG. Training runs a fixed number of
// epochs with no early stopping. Accuracy on both datasets is reported once
// before the first epoch (epoch 0) and after every epoch, so E epochs give
// E + 1 reports.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use sprig_core::{Error, Result};
use sprig_data::{BatchOrder, Batcher, Dataset};
use sprig_nn::{accuracy, train_epoch, Accuracy, Activation, Connected, Network, Sgd};

/// Hyperparameters of one training run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainSettings {
    pub batch_size: usize,
    /// Mini-batches per epoch.
    pub iterations: usize,
    pub epochs: usize,
    pub sgd: Sgd,
    pub order: BatchOrder,
    pub seed: u64,
}

/// Accuracy after one epoch. Epoch 0 is the untrained baseline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochReport {
    pub epoch: usize,
    /// Mean training loss of the epoch, `None` for the baseline.
    pub loss: Option<f32>,
    pub train: Accuracy,
    pub test: Accuracy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrainReport {
    pub epochs: Vec<EpochReport>,
}

impl RetrainReport {
    pub fn baseline(&self) -> Option<&EpochReport> {
        self.epochs.first()
    }

    pub fn last(&self) -> Option<&EpochReport> {
        self.epochs.last()
    }
}

impl fmt::Display for RetrainReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Retraining: {} reports", self.epochs.len())?;
        for e in &self.epochs {
            write!(
                f,
                "  epoch {:>3}: train {:.4}  test {:.4}",
                e.epoch,
                e.train.fraction(),
                e.test.fraction()
            )?;
            match e.loss {
                Some(loss) => writeln!(f, "  loss {loss:.6}")?,
                None => writeln!(f)?,
            }
        }
        Ok(())
    }
}

/// A new two-layer classifier head.
pub fn build_head<R: Rng + ?Sized>(
    in_features: usize,
    hidden: usize,
    classes: usize,
    rng: &mut R,
) -> Result<Network> {
    let mut net = Network::new();
    net.push(Connected::new(in_features, hidden, rng)?)?;
    net.push(Activation::relu(hidden)?)?;
    net.push(Connected::new(hidden, classes, rng)?)?;
    net.push(Activation::softmax(classes)?)?;
    Ok(net)
}

fn check_fit(net: &Network, data: &Dataset) -> Result<()> {
    if net.input_len() != data.features() {
        return Err(Error::shape_mismatch(&[net.input_len()], &[data.features()]));
    }
    if net.output_len() != data.classes() {
        return Err(Error::shape_mismatch(&[net.output_len()], &[data.classes()]));
    }
    Ok(())
}

/// Train `net` for `settings.epochs` epochs, reporting accuracy on `train`
/// and `test` before the first epoch and after each one.
pub fn retrain(
    net: &mut Network,
    train: &Dataset,
    test: &Dataset,
    settings: &TrainSettings,
) -> Result<RetrainReport> {
    check_fit(net, train)?;
    check_fit(net, test)?;
    let mut batcher = Batcher::new(settings.order, settings.seed);
    let mut report = RetrainReport {
        epochs: Vec::with_capacity(settings.epochs + 1),
    };

    for epoch in 0..=settings.epochs {
        let loss = if epoch == 0 {
            None
        } else {
            Some(train_epoch(
                net,
                train,
                &mut batcher,
                settings.batch_size,
                settings.iterations,
                &settings.sgd,
            )?)
        };
        let e = EpochReport {
            epoch,
            loss,
            train: accuracy(net, train)?,
            test: accuracy(net, test)?,
        };
        tracing::info!(
            epoch,
            loss = e.loss.unwrap_or(f32::NAN),
            train = e.train.fraction(),
            test = e.test.fraction(),
            "epoch"
        );
        report.epochs.push(e);
    }
    Ok(report)
}

/// Train `net` for `epochs` epochs without evaluation. Returns each epoch's
/// mean loss. Used to fine-tune the reduced convolution through the frozen
/// migrated head.
pub fn fine_tune(
    net: &mut Network,
    train: &Dataset,
    settings: &TrainSettings,
    epochs: usize,
) -> Result<Vec<f32>> {
    check_fit(net, train)?;
    let mut batcher = Batcher::new(settings.order, settings.seed);
    let mut losses = Vec::with_capacity(epochs);
    for epoch in 1..=epochs {
        let loss = train_epoch(
            net,
            train,
            &mut batcher,
            settings.batch_size,
            settings.iterations,
            &settings.sgd,
        )?;
        tracing::debug!(epoch, loss, "fine-tune epoch");
        losses.push(loss);
    }
    Ok(losses)
}
