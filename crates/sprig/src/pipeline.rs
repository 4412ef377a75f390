// Pipeline: one pruning and retraining event, phase by phase
//
//   1. rank         L2 saliency of every target filter
//   2. select       keep N filters, ranking consumed
//   3. features #1  stage-2 output over train and test, fixed-point accuracy
//   4. migrate      float migration network; optional conv fine-tuning
//   5. bridge       requantize the reduced convolution
//   6. features #2  pruned-conv output over train and test
//   7. retrain      fresh head, baseline report + one report per epoch
//   8. bridge       requantize the head with the original dense exponents
//
// Phases run strictly in order and every error abandons the whole event:
// nothing partial is returned.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::info;

use sprig_core::{Error, Result};
use sprig_data::LabeledImages;
use sprig_nn::{Accuracy, Connected, Conv2d, Network};

use crate::bridge::{requantize_conv, requantize_connected};
use crate::config::PipelineConfig;
use crate::features::{materialize, FeatureTap};
use crate::model::{FixedLayer, QuantizedModel, StageDims};
use crate::prune::{build_migration_network, check_keep, MigrationReport};
use crate::rank::{rank_filters, FilterNorms};
use crate::retrain::{build_head, fine_tune, retrain, RetrainReport};

/// Everything one event produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PruneOutcome {
    pub norms: Vec<FilterNorms>,
    pub migration: MigrationReport,
    /// Accuracy of the unpruned fixed-point network.
    pub fixed_train: Accuracy,
    pub fixed_test: Accuracy,
    pub finetune_losses: Vec<f32>,
    /// Deployable reduced convolution, `[N, C_in, k, k]`.
    pub conv: FixedLayer,
    /// Deployable retrained head, first and second dense layer.
    pub head: [FixedLayer; 2],
    pub retrain: RetrainReport,
}

pub struct Pipeline<'m> {
    model: &'m QuantizedModel,
    config: PipelineConfig,
    dims: StageDims,
}

fn connected_at(net: &Network, i: usize) -> Result<&Connected> {
    net.layer_as::<Connected>(i)
        .ok_or_else(|| Error::msg(format!("layer {i} is not a connected layer")))
}

impl<'m> Pipeline<'m> {
    /// Check the model and config, including the keep count, before any
    /// buffer is allocated.
    pub fn new(model: &'m QuantizedModel, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let dims = model.validate()?;
        check_keep(config.keep_filters, model.target().outputs())?;
        Ok(Pipeline {
            model,
            config,
            dims,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self, train: &LabeledImages, test: &LabeledImages) -> Result<PruneOutcome> {
        let model = self.model;
        let cfg = &self.config;
        let target = model.target();
        info!(
            filters = target.outputs(),
            keep = cfg.keep_filters,
            policy = ?cfg.policy,
            "pruning event started"
        );

        let (ranking, norms) = rank_filters(&target.weight);
        let kept = ranking.select(cfg.keep_filters, cfg.policy)?;
        info!(kept = ?kept, "filters selected");

        let train1 = materialize(model, train, FeatureTap::TargetInput, cfg.num_workers)?;
        let test1 = materialize(model, test, FeatureTap::TargetInput, cfg.num_workers)?;
        let fixed_train = train1.fixed_accuracy.unwrap_or_default();
        let fixed_test = test1.fixed_accuracy.unwrap_or_default();
        info!(
            train = fixed_train.fraction(),
            test = fixed_test.fraction(),
            features = train1.data.features(),
            "fixed-point baseline"
        );

        let (mut migration_net, migration) = build_migration_network(model, &kept)?;
        let finetune_losses = if cfg.finetune_epochs > 0 {
            let settings = cfg.train_settings(train1.data.len());
            fine_tune(&mut migration_net, &train1.data, &settings, cfg.finetune_epochs)?
        } else {
            Vec::new()
        };
        drop((train1, test1));

        let reduced = migration_net
            .layer_as::<Conv2d>(0)
            .ok_or_else(|| Error::msg("migration network does not start with a convolution"))?;
        let conv = requantize_conv(reduced, target.weight.q(), target.bias.q())?;
        drop(migration_net);

        let train2 = materialize(model, train, FeatureTap::PrunedConv(&conv), cfg.num_workers)?;
        let test2 = materialize(model, test, FeatureTap::PrunedConv(&conv), cfg.num_workers)?;
        info!(features = train2.data.features(), "pruned features materialized");

        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let mut head = build_head(
            train2.data.features(),
            self.dims.dense[0],
            model.classes(),
            &mut rng,
        )?;
        let settings = cfg.train_settings(train2.data.len());
        let report = retrain(&mut head, &train2.data, &test2.data, &settings)?;
        if let Some(last) = report.last() {
            info!(
                train = last.train.fraction(),
                test = last.test.fraction(),
                "retraining finished"
            );
        }

        let [d1, d2] = &model.dense;
        let head = [
            requantize_connected(connected_at(&head, 0)?, d1.weight.q(), d1.bias.q())?,
            requantize_connected(connected_at(&head, 2)?, d2.weight.q(), d2.bias.q())?,
        ];

        Ok(PruneOutcome {
            norms,
            migration,
            fixed_train,
            fixed_test,
            finetune_losses,
            conv,
            head,
            retrain: report,
        })
    }
}
