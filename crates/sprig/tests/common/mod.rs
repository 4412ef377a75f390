// Shared fixtures: a tiny backbone with a known target convolution.
//
//   input   1 x 8 x 8, Q4
//   stage 1 conv 1→2 k3 p1, pool 2/2  → 2 x 4 x 4
//   stage 2 conv 2→2 k3 p1, pool 1/1  → 2 x 4 x 4
//   stage 3 conv 2→3 k3 p1, pool 2/2  → 3 x 2 x 2   (target, 3 filters)
//   dense   12 → 4 → 3
//
// Target filter L2 norms (Q4): filter 0 = 0.5, filter 1 = 2.0,
// filter 2 ≈ 1.2 (sqrt(12² + 15²) / 16).

#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use sprig::prelude::*;
use sprig_data::LabeledImages;

pub const CLASSES: usize = 3;
pub const TARGET_FILTERS: usize = 3;
pub const FILTER_LEN: usize = 2 * 3 * 3;

pub fn q4() -> QFormat {
    QFormat::new(4)
}

fn shifts() -> ShiftSpec {
    // x(Q4) * w(Q4) accumulates at Q8; bias Q4 << 4; >> 4 back to Q4
    ShiftSpec {
        bias_lshift: 4,
        out_rshift: 4,
    }
}

fn stage(out_channels: usize, pool: usize) -> ConvStage {
    ConvStage {
        conv: ConvSpec {
            out_channels,
            kernel: 3,
            stride: 1,
            padding: 1,
            shifts: shifts(),
            out_q: q4(),
        },
        pool: PoolSpec {
            kernel: pool,
            stride: pool,
            padding: 0,
        },
    }
}

pub fn architecture() -> Architecture {
    Architecture {
        input: InputSpec {
            channels: 1,
            height: 8,
            width: 8,
            q: q4(),
        },
        stages: [stage(2, 2), stage(2, 1), stage(TARGET_FILTERS, 2)],
        dense: [
            DenseSpec {
                out_features: 4,
                shifts: shifts(),
                out_q: q4(),
            },
            DenseSpec {
                out_features: CLASSES,
                shifts: shifts(),
                out_q: q4(),
            },
        ],
    }
}

fn random_layer(dims: &[usize], rng: &mut StdRng) -> FixedLayer {
    let n: usize = dims.iter().product();
    let weight: Vec<i8> = (0..n).map(|_| rng.gen_range(-6..=6)).collect();
    let bias: Vec<i8> = (0..dims[0]).map(|_| rng.gen_range(-4..=4)).collect();
    FixedLayer::new(
        FixedTensor::new(dims.to_vec(), q4(), weight).unwrap(),
        FixedTensor::new(dims[0], q4(), bias).unwrap(),
    )
    .unwrap()
}

fn target_layer() -> FixedLayer {
    let mut w = vec![0i8; TARGET_FILTERS * FILTER_LEN];
    w[0] = 8; // filter 0: 0.5
    w[FILTER_LEN] = 32; // filter 1: 2.0
    w[2 * FILTER_LEN] = 12; // filter 2: ≈1.2
    w[2 * FILTER_LEN + 10] = 15;
    FixedLayer::new(
        FixedTensor::new(vec![TARGET_FILTERS, 2, 3, 3], q4(), w).unwrap(),
        FixedTensor::new(TARGET_FILTERS, q4(), vec![1, -2, 3]).unwrap(),
    )
    .unwrap()
}

pub fn model() -> QuantizedModel {
    let mut rng = StdRng::seed_from_u64(2024);
    QuantizedModel {
        arch: architecture(),
        conv: [
            random_layer(&[2, 1, 3, 3], &mut rng),
            random_layer(&[2, 2, 3, 3], &mut rng),
            target_layer(),
        ],
        dense: [
            random_layer(&[4, 12], &mut rng),
            random_layer(&[CLASSES, 4], &mut rng),
        ],
    }
}

pub fn images(count: usize, seed: u64) -> LabeledImages {
    let mut rng = StdRng::seed_from_u64(seed);
    let images = (0..count)
        .map(|_| (0..64).map(|_| rng.gen_range(0..=64)).collect())
        .collect();
    let labels = (0..count).map(|i| i % CLASSES).collect();
    LabeledImages::new((1, 8, 8), q4(), images, labels).unwrap()
}
