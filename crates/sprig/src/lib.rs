//! # sprig
//!
//! Structured channel pruning and incremental retraining for a quantized
//! three-convolution, two-dense CNN.
//!
//! The facade crate: it runs one pruning event end to end and re-exports
//! the collaborator crates.
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|----------|
//! | `sprig-core` | Error, Shape, QFormat, FixedTensor, float Matrix |
//! | `sprig-kernels` | Saturating q7 conv, pool, ReLU, dense, softmax |
//! | `sprig-nn` | Float layers, Network, SGD, training driver |
//! | `sprig-data` | Labelled image collections, one-hot datasets, batching |
//!
//! ## Pipeline
//!
//! rank → select → materialize (stage-2 features) → migrate → requantize
//! conv → materialize (pruned-conv features) → retrain head → requantize head

pub use sprig_core::{Error, FixedTensor, Matrix, QFormat, Result, Shape};

/// Re-export the fixed-point kernels.
pub mod kernels {
    pub use sprig_kernels::*;
}

/// Re-export the float layer library.
pub mod nn {
    pub use sprig_nn::*;
}

/// Re-export the data containers.
pub mod data {
    pub use sprig_data::*;
}

/// Quantization bridge: float layers back to fixed point.
pub mod bridge;

/// Model bundle JSON I/O.
pub mod bundle;

/// Pipeline configuration with defaults.
pub mod config;

/// Feature dataset materializer.
pub mod features;

/// Backbone geometry and fixed-point parameters.
pub mod model;

/// Phase-by-phase orchestration of one pruning event.
pub mod pipeline;

/// Channel pruning and weight migration.
pub mod prune;

/// Filter saliency ranking.
pub mod rank;

/// Incremental retraining of the classifier head.
pub mod retrain;

/// Fixed-point backbone execution.
pub mod runner;

/// Prelude: import this for the most common types.
pub mod prelude {
    pub use crate::bridge::{requantize_connected, requantize_conv};
    pub use crate::bundle::ModelBundle;
    pub use crate::config::PipelineConfig;
    pub use crate::features::{materialize, FeatureTap, Features};
    pub use crate::model::{
        Architecture, ConvSpec, ConvStage, DenseSpec, FixedLayer, InputSpec, PoolSpec,
        QuantizedModel, ShiftSpec, StageDims, TARGET_CONV,
    };
    pub use crate::pipeline::{Pipeline, PruneOutcome};
    pub use crate::prune::{build_migration_network, reduce_conv, MigrationReport};
    pub use crate::rank::{rank_filters, FilterNorms, FilterRecord, KeepPolicy, SaliencyRanking};
    pub use crate::retrain::{build_head, retrain, EpochReport, RetrainReport, TrainSettings};
    pub use crate::runner::{ActivationRef, Runner, Tap};
    pub use crate::{Error, FixedTensor, Matrix, QFormat, Result, Shape};
}
