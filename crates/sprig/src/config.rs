// Pipeline configuration
//
// Every field has a default, so an empty JSON object is a valid config:
//
//   keep_filters     16        filters kept in the target convolution
//   policy           highest   which end of the saliency ranking survives
//   batch_size       8
//   iterations       null      mini-batches per epoch; null → train_len / batch_size
//   rate             1e-4
//   momentum         0.9
//   decay            1e-5
//   epochs           24        retraining epochs after the baseline report
//   order            random    random (with replacement) or sequential batches
//   seed             0         batch sampling and head initialisation
//   num_workers      0         materializer threads; 0 runs inline
//   finetune_epochs  0         reduced-conv fine-tuning before requantization

use std::path::Path;

use serde::{Deserialize, Serialize};

use sprig_core::{Error, Result};
use sprig_data::BatchOrder;
use sprig_nn::Sgd;

use crate::rank::KeepPolicy;
use crate::retrain::TrainSettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub keep_filters: usize,
    pub policy: KeepPolicy,
    pub batch_size: usize,
    pub iterations: Option<usize>,
    pub rate: f32,
    pub momentum: f32,
    pub decay: f32,
    pub epochs: usize,
    pub order: BatchOrder,
    pub seed: u64,
    pub num_workers: usize,
    pub finetune_epochs: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            keep_filters: 16,
            policy: KeepPolicy::Highest,
            batch_size: 8,
            iterations: None,
            rate: 1e-4,
            momentum: 0.9,
            decay: 1e-5,
            epochs: 24,
            order: BatchOrder::Random,
            seed: 0,
            num_workers: 0,
            finetune_epochs: 0,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    pub fn keep_filters(mut self, n: usize) -> Self {
        self.keep_filters = n;
        self
    }

    pub fn policy(mut self, policy: KeepPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }

    pub fn iterations(mut self, n: usize) -> Self {
        self.iterations = Some(n);
        self
    }

    pub fn rate(mut self, rate: f32) -> Self {
        self.rate = rate;
        self
    }

    pub fn momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn decay(mut self, decay: f32) -> Self {
        self.decay = decay;
        self
    }

    pub fn epochs(mut self, n: usize) -> Self {
        self.epochs = n;
        self
    }

    pub fn order(mut self, order: BatchOrder) -> Self {
        self.order = order;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    pub fn finetune_epochs(mut self, n: usize) -> Self {
        self.finetune_epochs = n;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.keep_filters == 0 {
            return Err(Error::EmptyDimension {
                layer: "config",
                what: "keep_filters",
            });
        }
        if self.batch_size == 0 {
            return Err(Error::EmptyDimension {
                layer: "config",
                what: "batch_size",
            });
        }
        if self.iterations == Some(0) {
            return Err(Error::EmptyDimension {
                layer: "config",
                what: "iterations",
            });
        }
        for (name, v) in [
            ("rate", self.rate),
            ("momentum", self.momentum),
            ("decay", self.decay),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(Error::msg(format!(
                    "config: {name} must be finite and non-negative, got {v}"
                )));
            }
        }
        Ok(())
    }

    pub fn sgd(&self) -> Sgd {
        Sgd::new(self.rate, self.momentum, self.decay)
    }

    /// Training settings for a dataset of `train_len` rows.
    pub fn train_settings(&self, train_len: usize) -> TrainSettings {
        TrainSettings {
            batch_size: self.batch_size,
            iterations: self
                .iterations
                .unwrap_or_else(|| (train_len / self.batch_size.max(1)).max(1)),
            epochs: self.epochs,
            sgd: self.sgd(),
            order: self.order,
            seed: self.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_json_is_default() {
        let c = PipelineConfig::from_json_str("{}").unwrap();
        assert_eq!(c, PipelineConfig::default());
        assert_eq!(c.keep_filters, 16);
        assert_eq!(c.batch_size, 8);
        assert_eq!(c.epochs, 24);
    }

    #[test]
    fn test_partial_json() {
        let c = PipelineConfig::from_json_str(
            r#"{"keep_filters": 4, "policy": "lowest", "order": "sequential", "iterations": 3}"#,
        )
        .unwrap();
        assert_eq!(c.keep_filters, 4);
        assert_eq!(c.policy, KeepPolicy::Lowest);
        assert_eq!(c.order, BatchOrder::Sequential);
        assert_eq!(c.train_settings(100).iterations, 3);
        assert_eq!(c.rate, 1e-4);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(PipelineConfig::from_json_str(r#"{"keep": 4}"#).is_err());
    }

    #[test]
    fn test_validation() {
        assert!(PipelineConfig::new().batch_size(0).validate().is_err());
        assert!(matches!(
            PipelineConfig::new().keep_filters(0).validate(),
            Err(Error::EmptyDimension {
                what: "keep_filters",
                ..
            })
        ));
        assert!(PipelineConfig::new().rate(f32::NAN).validate().is_err());
        assert!(PipelineConfig::new().momentum(-0.1).validate().is_err());
        assert!(PipelineConfig::new().iterations(0).validate().is_err());
        assert!(PipelineConfig::new().validate().is_ok());
    }

    #[test]
    fn test_default_iterations() {
        let c = PipelineConfig::new().batch_size(8);
        assert_eq!(c.train_settings(100).iterations, 12);
        assert_eq!(c.train_settings(3).iterations, 1);
    }

    #[test]
    fn test_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{"epochs": 2, "seed": 7}}"#).unwrap();
        let c = PipelineConfig::from_json_file(f.path()).unwrap();
        assert_eq!(c.epochs, 2);
        assert_eq!(c.seed, 7);
    }
}
