// Feature dataset materializer
//
// Runs the fixed-point backbone over every image of a collection and turns
// one intermediate activation into one float feature row:
//
//   TargetInput   full run; stage-2 output (pooled + ReLU), the input of the
//                 pruned convolution. Also counts fixed-point accuracy.
//   PrunedConv    pruned run; raw output of the reduced convolution.
//
// Each row is dequantized by its activation's own exponent. Label rows are
// one-hot at the image's ground-truth class.
//
// With `num_workers > 0` the images are split into contiguous chunks, one
// per worker, each with its own Runner; rows are written back in image
// order. The whole dataset exists before this returns.

use rayon::prelude::*;

use sprig_core::{Error, Result};
use sprig_data::{Dataset, DatasetBuilder, LabeledImages};
use sprig_nn::Accuracy;

use crate::model::{FixedLayer, QuantizedModel, StageDims, TARGET_CONV};
use crate::runner::{Runner, Tap};

/// Which activation becomes the feature row.
#[derive(Debug, Clone, Copy)]
pub enum FeatureTap<'a> {
    TargetInput,
    PrunedConv(&'a FixedLayer),
}

/// A materialized dataset.
#[derive(Debug)]
pub struct Features {
    pub data: Dataset,
    /// Fixed-point accuracy of the full network, for `TargetInput` only.
    pub fixed_accuracy: Option<Accuracy>,
}

struct Row {
    features: Vec<f32>,
    correct: Option<bool>,
}

fn check_images(model: &QuantizedModel, images: &LabeledImages) -> Result<()> {
    images.validate()?;
    let input = model.arch.input;
    let expected = input.dims().shape();
    if images.shape() != &expected {
        return Err(Error::ShapeMismatch {
            expected,
            got: images.shape().clone(),
        });
    }
    if images.q() != input.q {
        return Err(Error::msg(format!(
            "image exponent {} does not match model input exponent {}",
            images.q().frac_bits(),
            input.q.frac_bits()
        )));
    }
    images.check_labels(model.classes())
}

fn tap_width(dims: &StageDims, tap: FeatureTap<'_>) -> usize {
    match tap {
        FeatureTap::TargetInput => dims.stage_input(TARGET_CONV).len(),
        FeatureTap::PrunedConv(layer) => layer.outputs() * dims.conv[TARGET_CONV].plane(),
    }
}

fn extract(
    runner: &mut Runner<'_>,
    tap: FeatureTap<'_>,
    image: &[i8],
    label: usize,
    out: &mut [f32],
) -> Result<Option<bool>> {
    match tap {
        FeatureTap::TargetInput => {
            let predicted = runner.classify(image)?;
            let act = runner
                .activation(Tap::Pool(TARGET_CONV - 1))
                .ok_or_else(|| Error::msg("runner: stage output unavailable"))?;
            act.dequantize_into(out);
            Ok(Some(predicted == label))
        }
        FeatureTap::PrunedConv(layer) => {
            runner.run_pruned(image, layer)?.dequantize_into(out);
            Ok(None)
        }
    }
}

fn rows_for(
    model: &QuantizedModel,
    images: &LabeledImages,
    tap: FeatureTap<'_>,
    range: std::ops::Range<usize>,
) -> Result<Vec<Row>> {
    let mut runner = Runner::new(model)?;
    let width = tap_width(runner.dims(), tap);
    range
        .map(|i| {
            let mut features = vec![0.0; width];
            let correct = extract(&mut runner, tap, images.image(i), images.label(i), &mut features)?;
            Ok(Row { features, correct })
        })
        .collect()
}

/// Build one feature dataset from `images`.
pub fn materialize(
    model: &QuantizedModel,
    images: &LabeledImages,
    tap: FeatureTap<'_>,
    num_workers: usize,
) -> Result<Features> {
    let dims = model.validate()?;
    check_images(model, images)?;
    let classes = model.classes();
    let width = tap_width(&dims, tap);
    let mut builder = DatasetBuilder::new(images.len(), width, classes)?;
    let mut correct = 0;

    if num_workers > 0 && images.len() > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers)
            .build()
            .map_err(|e| Error::msg(format!("materializer thread pool: {e}")))?;
        let chunk = images.len().div_ceil(num_workers);
        let starts: Vec<usize> = (0..images.len()).step_by(chunk).collect();
        let chunks: Vec<Result<Vec<Row>>> = pool.install(|| {
            starts
                .par_iter()
                .map(|&s| rows_for(model, images, tap, s..(s + chunk).min(images.len())))
                .collect()
        });
        let mut i = 0;
        for rows in chunks {
            for row in rows? {
                builder.push(&row.features, images.label(i))?;
                if row.correct == Some(true) {
                    correct += 1;
                }
                i += 1;
            }
        }
    } else {
        let mut runner = Runner::new(model)?;
        let mut row = vec![0.0; width];
        for (image, label) in images.iter() {
            if extract(&mut runner, tap, image, label, &mut row)? == Some(true) {
                correct += 1;
            }
            builder.push(&row, label)?;
        }
    }

    let data = builder.finish()?;
    let fixed_accuracy = match tap {
        FeatureTap::TargetInput => Some(Accuracy {
            correct,
            total: images.len(),
        }),
        FeatureTap::PrunedConv(_) => None,
    };
    tracing::debug!(
        rows = data.len(),
        features = data.features(),
        workers = num_workers,
        "features materialized"
    );
    Ok(Features {
        data,
        fixed_accuracy,
    })
}
