// Channel pruning & weight migration
//
// Given the kept filter indices (ascending) of the target convolution,
// build the float migration network:
//
//   Conv2d(N) → BatchNorm2d → ReLU → Connected(frozen) → ReLU
//             → Connected(frozen) → Softmax
//
// The reduced convolution takes filter kept[j] of the original layer as its
// output channel j, with kernel geometry unchanged. Keeping every filter in
// index order therefore reproduces the original layer exactly.
//
// DENSE GATHERING:
//
//   The original first dense layer reads the pooled map of all F channels.
//   The migrated one reads the raw conv map of the N kept channels, so each
//   conv cell takes the weight of every pooled cell whose window covers it,
//   divided by that window's cell count:
//
//     W'[o][j, y, x] = Σ_{p ∋ (y,x)} W[o][kept[j], p] / |p|
//
//   which is the head's response to an average-pooled input.
//
// Both dense layers are frozen. Nothing downstream of the convolution is
// ever changed by training this network.

use serde::{Deserialize, Serialize};

use sprig_core::{Error, Matrix, Result};
use sprig_kernels::{MapDims, Window};
use sprig_nn::{Activation, BatchNorm2d, Connected, Conv2d, Network};

use crate::model::{FixedLayer, QuantizedModel, StageDims, TARGET_CONV};

/// What moved from the fixed-point model into the migration network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Original indices of the kept filters, ascending.
    pub kept: Vec<usize>,
    /// Weights per filter (`C_in * k * k`).
    pub filter_len: usize,
    pub weights_migrated: usize,
    pub biases_migrated: usize,
}

/// Fail unless `keep` filters can be taken from a layer of `filters`.
pub fn check_keep(keep: usize, filters: usize) -> Result<()> {
    if keep > filters {
        return Err(Error::KeepExceedsFilters { keep, filters });
    }
    Ok(())
}

fn check_kept(kept: &[usize], filters: usize) -> Result<()> {
    check_keep(kept.len(), filters)?;
    for (i, &k) in kept.iter().enumerate() {
        if k >= filters {
            return Err(Error::msg(format!(
                "filter index {k} out of range for {filters} filters"
            )));
        }
        if i > 0 && kept[i - 1] >= k {
            return Err(Error::msg("kept filter indices must be strictly ascending"));
        }
    }
    Ok(())
}

/// Dequantize the kept filters of the target convolution into a new layer.
pub fn reduce_conv(model: &QuantizedModel, kept: &[usize]) -> Result<Conv2d> {
    let dims = model.validate()?;
    reduce_conv_with(model, &dims, kept)
}

fn reduce_conv_with(model: &QuantizedModel, dims: &StageDims, kept: &[usize]) -> Result<Conv2d> {
    let layer = model.target();
    check_kept(kept, layer.outputs())?;
    let fan_in = layer.fan_in();
    let wq = layer.weight.q();
    let bq = layer.bias.q();

    let mut weight = Matrix::zeros(kept.len(), fan_in)?;
    let mut bias = Matrix::zeros(1, kept.len())?;
    for (j, &f) in kept.iter().enumerate() {
        wq.dequantize_into(layer.weight.outer_slice(f), weight.row_mut(j));
        bias.set(0, j, bq.dequantize(layer.bias.data()[f]));
    }
    Conv2d::from_weights(
        dims.stage_input(TARGET_CONV),
        model.arch.target().conv.window(),
        weight,
        bias,
    )
}

/// Conv-map cells covered by each pooled cell, in pooled CHW order for
/// one channel.
fn pool_windows(conv: MapDims, pool: MapDims, window: Window) -> Vec<Vec<usize>> {
    let mut cells = Vec::with_capacity(pool.plane());
    for py in 0..pool.height {
        let y0 = (py * window.stride) as isize - window.padding as isize;
        for px in 0..pool.width {
            let x0 = (px * window.stride) as isize - window.padding as isize;
            let mut covered = Vec::with_capacity(window.kernel * window.kernel);
            for y in y0.max(0)..(y0 + window.kernel as isize).min(conv.height as isize) {
                for x in x0.max(0)..(x0 + window.kernel as isize).min(conv.width as isize) {
                    covered.push(y as usize * conv.width + x as usize);
                }
            }
            cells.push(covered);
        }
    }
    cells
}

/// First dense layer re-indexed from the pooled map of all filters to the
/// raw conv map of the kept filters.
pub fn gather_dense(model: &QuantizedModel, dims: &StageDims, kept: &[usize]) -> Result<Matrix> {
    let dense = &model.dense[0];
    let conv = dims.conv[TARGET_CONV];
    let pool = dims.pool[TARGET_CONV];
    let windows = pool_windows(conv, pool, model.arch.target().pool.window());
    let original = dense.weight.dequantize();
    let in_features = dense.fan_in();

    let mut weight = Matrix::zeros(dense.outputs(), kept.len() * conv.plane())?;
    for o in 0..dense.outputs() {
        let src = &original[o * in_features..(o + 1) * in_features];
        let dst = weight.row_mut(o);
        for (j, &f) in kept.iter().enumerate() {
            let channel = &mut dst[j * conv.plane()..(j + 1) * conv.plane()];
            for (p, covered) in windows.iter().enumerate() {
                if covered.is_empty() {
                    continue;
                }
                let w = src[f * pool.plane() + p] / covered.len() as f32;
                for &cell in covered {
                    channel[cell] += w;
                }
            }
        }
    }
    Ok(weight)
}

fn dequantized_bias(layer: &FixedLayer) -> Result<Matrix> {
    Matrix::from_vec(1, layer.outputs(), layer.bias.dequantize())
}

/// Build the migration network for `kept` (ascending filter indices).
///
/// An empty `kept` yields an empty convolution, which the batch-norm layer
/// after it rejects with `EmptyDimension`.
pub fn build_migration_network(
    model: &QuantizedModel,
    kept: &[usize],
) -> Result<(Network, MigrationReport)> {
    let dims = model.validate()?;
    let conv = reduce_conv_with(model, &dims, kept)?;
    let out = conv.out_dims();
    let filter_len = model.target().fan_in();

    let bn = BatchNorm2d::new(out.channels, out.plane())?;
    let d1 = &model.dense[0];
    let d2 = &model.dense[1];
    let hidden = Connected::from_weights(gather_dense(model, &dims, kept)?, dequantized_bias(d1)?)?
        .frozen();
    let d2_weight = Matrix::from_vec(d2.outputs(), d2.fan_in(), d2.weight.dequantize())?;
    let classifier = Connected::from_weights(d2_weight, dequantized_bias(d2)?)?.frozen();

    let mut net = Network::new();
    net.push(conv)?;
    net.push(bn)?;
    net.push(Activation::relu(out.len())?)?;
    net.push(hidden)?;
    net.push(Activation::relu(d1.outputs())?)?;
    net.push(classifier)?;
    net.push(Activation::softmax(d2.outputs())?)?;

    let report = MigrationReport {
        kept: kept.to_vec(),
        filter_len,
        weights_migrated: kept.len() * filter_len,
        biases_migrated: kept.len(),
    };
    tracing::debug!(
        kept = ?report.kept,
        weights = report.weights_migrated,
        layers = net.len(),
        "migration network built"
    );
    Ok((net, report))
}
