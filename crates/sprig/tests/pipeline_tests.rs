// Integration tests for the pruning pipeline
//
// Every test runs on the tiny backbone in `common`: three target filters
// with saliencies of about [0.5, 2.0, 1.2].

mod common;

use common::{images, model, CLASSES, FILTER_LEN, TARGET_FILTERS};

use sprig::nn::{Connected, Conv2d};
use sprig::prelude::*;
use sprig::retrain::fine_tune;

fn approx_eq(a: f32, b: f32, tol: f32) -> bool {
    (a - b).abs() < tol
}

// Ranking

#[test]
fn test_ranking_order() {
    let m = model();
    let (ranking, norms) = rank_filters(&m.target().weight);
    let order: Vec<usize> = ranking.records().iter().map(|r| r.index).collect();
    assert_eq!(order, vec![0, 2, 1]);
    assert!(ranking.is_sorted());
    assert_eq!(ranking.len(), TARGET_FILTERS);
    assert!(approx_eq(norms[0].l2, 0.5, 1e-6));
    assert!(approx_eq(norms[1].l2, 2.0, 1e-6));
    assert!(approx_eq(norms[2].l2, 1.2, 1e-2));
}

#[test]
fn test_keep_two_highest() {
    let m = model();
    let (ranking, _) = rank_filters(&m.target().weight);
    let kept = ranking.select(2, KeepPolicy::Highest).unwrap();
    assert_eq!(kept, vec![1, 2]);

    let (net, report) = build_migration_network(&m, &kept).unwrap();
    assert_eq!(report.kept, vec![1, 2]);
    assert_eq!(report.weights_migrated, 2 * FILTER_LEN);
    assert_eq!(report.biases_migrated, 2);
    assert_eq!(net.len(), 7);

    let conv = net.layer_as::<Conv2d>(0).unwrap();
    assert_eq!(conv.out_channels(), 2);
    let q = m.target().weight.q();
    assert_eq!(conv.weight().row(0), q.dequantize_slice(m.target().weight.outer_slice(1)).as_slice());
    assert_eq!(conv.weight().row(1), q.dequantize_slice(m.target().weight.outer_slice(2)).as_slice());
    assert_eq!(conv.bias().data(), &[-2.0 / 16.0, 3.0 / 16.0]);
}

#[test]
fn test_keep_lowest_policy() {
    let m = model();
    let (ranking, _) = rank_filters(&m.target().weight);
    assert_eq!(ranking.select(2, KeepPolicy::Lowest).unwrap(), vec![0, 2]);
}

// Migration

#[test]
fn test_migrated_head_is_frozen() {
    let m = model();
    let (net, _) = build_migration_network(&m, &[0, 1, 2]).unwrap();
    let hidden = net.layer_as::<Connected>(3).unwrap();
    let classifier = net.layer_as::<Connected>(5).unwrap();
    assert!(net.layers()[3].is_frozen());
    assert!(net.layers()[5].is_frozen());
    assert!(!net.layers()[0].is_frozen());
    assert_eq!(hidden.in_features(), 3 * 16);
    assert_eq!(hidden.out_features(), 4);
    assert_eq!(classifier.in_features(), 4);
    assert_eq!(classifier.out_features(), CLASSES);
    // only the reduced convolution is trainable
    assert_eq!(net.trainable_params(), 3 * FILTER_LEN + 3);
}

#[test]
fn test_gathered_dense_weights_sum_to_original() {
    // Each pooled weight is spread evenly over its window, so summing a
    // window of the gathered row gives the original weight back.
    let m = model();
    let (net, _) = build_migration_network(&m, &[1]).unwrap();
    let hidden = net.layer_as::<Connected>(3).unwrap();
    let original = m.dense[0].weight.dequantize();
    for o in 0..4 {
        let row = hidden.weight().row(o);
        for (p, cells) in [[0, 1, 4, 5], [2, 3, 6, 7], [8, 9, 12, 13], [10, 11, 14, 15]]
            .iter()
            .enumerate()
        {
            let sum: f32 = cells.iter().map(|&c| row[c]).sum();
            assert!(approx_eq(sum, original[o * 12 + 4 + p], 1e-5));
        }
    }
}

#[test]
fn test_keep_all_is_bit_exact() {
    let m = model();
    let (ranking, _) = rank_filters(&m.target().weight);
    let kept = ranking.select(TARGET_FILTERS, KeepPolicy::Highest).unwrap();
    assert_eq!(kept, vec![0, 1, 2]);
    let (net, _) = build_migration_network(&m, &kept).unwrap();
    let conv = net.layer_as::<Conv2d>(0).unwrap();
    let fixed = requantize_conv(conv, m.target().weight.q(), m.target().bias.q()).unwrap();
    assert_eq!(&fixed, m.target());

    let set = images(6, 3);
    let mut full = Runner::new(&m).unwrap();
    let mut pruned = Runner::new(&m).unwrap();
    for (image, _) in set.iter() {
        full.classify(image).unwrap();
        let expected = full.activation(Tap::Conv(TARGET_CONV)).unwrap();
        let got = pruned.run_pruned(image, &fixed).unwrap();
        assert_eq!(got.data, expected.data);
        assert_eq!(got.dims, expected.dims);
    }
}

#[test]
fn test_keep_zero_is_empty_and_rejected_downstream() {
    let m = model();
    let conv = reduce_conv(&m, &[]).unwrap();
    assert_eq!(conv.out_channels(), 0);
    assert!(matches!(
        build_migration_network(&m, &[]),
        Err(Error::EmptyDimension { .. })
    ));
}

#[test]
fn test_keep_zero_fails_before_any_phase() {
    let m = model();
    assert!(matches!(
        Pipeline::new(&m, PipelineConfig::new().keep_filters(0)),
        Err(Error::EmptyDimension {
            what: "keep_filters",
            ..
        })
    ));
}

#[test]
fn test_keep_more_than_filters_fails_early() {
    let m = model();
    assert!(matches!(
        Pipeline::new(&m, PipelineConfig::new().keep_filters(4)),
        Err(Error::KeepExceedsFilters {
            keep: 4,
            filters: 3
        })
    ));
    assert!(matches!(
        reduce_conv(&m, &[0, 1, 2, 3]),
        Err(Error::KeepExceedsFilters { .. })
    ));
}

// Runner

#[test]
fn test_runner_exposes_activations() {
    let m = model();
    let mut runner = Runner::new(&m).unwrap();
    let set = images(1, 5);
    let class = runner.classify(set.image(0)).unwrap();
    assert!(class < CLASSES);

    let acts = runner.activations();
    assert_eq!(acts.len(), 9);
    assert_eq!(acts[0].0, Tap::Conv(0));
    assert_eq!(runner.activation(Tap::Pool(1)).unwrap().len(), 32);
    assert_eq!(runner.activation(Tap::Softmax).unwrap().q, QFormat::new(7));
    assert!(runner.activation(Tap::Conv(3)).is_none());

    let probs = runner.activation(Tap::Softmax).unwrap().data.to_vec();
    let best = probs.iter().copied().max().unwrap();
    assert_eq!(probs.iter().position(|&p| p == best).unwrap(), class);
}

#[test]
fn test_runner_rejects_wrong_image_size() {
    let m = model();
    let mut runner = Runner::new(&m).unwrap();
    assert!(matches!(
        runner.classify(&[0; 10]),
        Err(Error::ElementCountMismatch { .. })
    ));
}

#[test]
fn test_invalid_model_rejected() {
    let mut m = model();
    m.dense[0] = m.dense[1].clone();
    assert!(Runner::new(&m).is_err());
    assert!(Pipeline::new(&m, PipelineConfig::new().keep_filters(1)).is_err());
}

// Materializer

#[test]
fn test_phase_one_features() {
    let m = model();
    let set = images(9, 7);
    let f = materialize(&m, &set, FeatureTap::TargetInput, 0).unwrap();
    assert_eq!(f.data.len(), 9);
    assert_eq!(f.data.features(), 2 * 4 * 4);
    assert_eq!(f.data.classes(), CLASSES);
    for r in 0..9 {
        let row = f.data.y().row(r);
        assert_eq!(row.iter().filter(|&&v| v == 1.0).count(), 1);
        assert_eq!(row.iter().filter(|&&v| v == 0.0).count(), CLASSES - 1);
        assert_eq!(f.data.label(r), set.label(r));
        // stage-2 output is post-ReLU
        assert!(f.data.x().row(r).iter().all(|&v| v >= 0.0));
    }
    let acc = f.fixed_accuracy.unwrap();
    assert_eq!(acc.total, 9);
    assert!((0.0..=1.0).contains(&acc.fraction()));
}

#[test]
fn test_phase_two_features() {
    let m = model();
    let kept = [1, 2];
    let (net, _) = build_migration_network(&m, &kept).unwrap();
    let conv = requantize_conv(
        net.layer_as::<Conv2d>(0).unwrap(),
        m.target().weight.q(),
        m.target().bias.q(),
    )
    .unwrap();
    let set = images(5, 8);
    let f = materialize(&m, &set, FeatureTap::PrunedConv(&conv), 0).unwrap();
    assert_eq!(f.data.features(), kept.len() * 4 * 4);
    assert!(f.fixed_accuracy.is_none());
}

#[test]
fn test_parallel_materialization_matches_inline() {
    let m = model();
    let set = images(11, 4);
    let inline = materialize(&m, &set, FeatureTap::TargetInput, 0).unwrap();
    let parallel = materialize(&m, &set, FeatureTap::TargetInput, 3).unwrap();
    assert_eq!(inline.data.x().data(), parallel.data.x().data());
    assert_eq!(inline.data.y().data(), parallel.data.y().data());
    assert_eq!(inline.fixed_accuracy, parallel.fixed_accuracy);
}

#[test]
fn test_more_workers_than_images() {
    let m = model();
    let set = images(3, 9);
    let inline = materialize(&m, &set, FeatureTap::TargetInput, 0).unwrap();
    for workers in [1, 2, 8] {
        let parallel = materialize(&m, &set, FeatureTap::TargetInput, workers).unwrap();
        assert_eq!(parallel.data.features(), inline.data.features());
        assert_eq!(inline.data.x().data(), parallel.data.x().data());
        assert_eq!(inline.fixed_accuracy, parallel.fixed_accuracy);
    }
}

#[test]
fn test_label_out_of_range() {
    let m = model();
    let bad = sprig::data::LabeledImages::new(
        (1, 8, 8),
        QFormat::new(4),
        vec![vec![0; 64]],
        vec![CLASSES],
    )
    .unwrap();
    assert!(matches!(
        materialize(&m, &bad, FeatureTap::TargetInput, 0),
        Err(Error::LabelOutOfRange { .. })
    ));
}

// Fine-tuning

#[test]
fn test_fine_tune_leaves_head_untouched() {
    let m = model();
    let (mut net, _) = build_migration_network(&m, &[0, 2]).unwrap();
    let hidden_before = net.layer_as::<Connected>(3).unwrap().weight().clone();
    let conv_before = net.layer_as::<Conv2d>(0).unwrap().weight().clone();
    let f = materialize(&m, &images(12, 6), FeatureTap::TargetInput, 0).unwrap();
    let settings = PipelineConfig::new()
        .batch_size(4)
        .rate(0.01)
        .train_settings(f.data.len());
    let losses = fine_tune(&mut net, &f.data, &settings, 2).unwrap();
    assert_eq!(losses.len(), 2);
    assert_eq!(
        net.layer_as::<Connected>(3).unwrap().weight().data(),
        hidden_before.data()
    );
    assert_ne!(
        net.layer_as::<Conv2d>(0).unwrap().weight().data(),
        conv_before.data()
    );
}

// End to end

#[test]
fn test_pipeline_end_to_end() {
    let m = model();
    let config = PipelineConfig::new()
        .keep_filters(2)
        .batch_size(4)
        .epochs(3)
        .rate(0.01)
        .seed(11);
    let outcome = Pipeline::new(&m, config)
        .unwrap()
        .run(&images(24, 1), &images(12, 2))
        .unwrap();

    assert_eq!(outcome.norms.len(), TARGET_FILTERS);
    assert_eq!(outcome.migration.kept, vec![1, 2]);
    assert_eq!(outcome.conv.weight.dims(), &[2, 2, 3, 3]);
    assert_eq!(outcome.conv.bias.dims(), &[2]);
    assert_eq!(outcome.conv.weight.q(), m.target().weight.q());
    assert_eq!(outcome.head[0].weight.dims(), &[4, 2 * 16]);
    assert_eq!(outcome.head[1].weight.dims(), &[CLASSES, 4]);
    assert!(outcome.finetune_losses.is_empty());

    assert_eq!(outcome.retrain.epochs.len(), 4);
    for e in &outcome.retrain.epochs {
        assert!((0.0..=1.0).contains(&e.train.fraction()));
        assert!((0.0..=1.0).contains(&e.test.fraction()));
        assert_eq!(e.train.total, 24);
        assert_eq!(e.test.total, 12);
    }
    assert_eq!(outcome.fixed_train.total, 24);
}

#[test]
fn test_default_epochs_give_25_reports() {
    let m = model();
    let config = PipelineConfig::new().keep_filters(1).iterations(1);
    let outcome = Pipeline::new(&m, config)
        .unwrap()
        .run(&images(8, 1), &images(4, 2))
        .unwrap();
    assert_eq!(outcome.retrain.epochs.len(), 25);
}

#[test]
fn test_pipeline_is_deterministic() {
    let m = model();
    let run = || {
        Pipeline::new(&m, PipelineConfig::new().keep_filters(2).epochs(2).seed(3))
            .unwrap()
            .run(&images(10, 1), &images(5, 2))
            .unwrap()
    };
    assert_eq!(run(), run());
}

// Bundle I/O

#[test]
fn test_bundle_round_trip() {
    let bundle = ModelBundle {
        model: model(),
        train: images(4, 1),
        test: images(2, 2),
    };
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bundle.json");
    bundle.save(&path).unwrap();
    let loaded = ModelBundle::load(&path).unwrap();
    assert_eq!(loaded, bundle);
}

#[test]
fn test_bundle_rejects_bad_labels() {
    let bundle = ModelBundle {
        model: model(),
        train: images(4, 1),
        test: sprig::data::LabeledImages::new(
            (1, 8, 8),
            QFormat::new(4),
            vec![vec![0; 64]],
            vec![7],
        )
        .unwrap(),
    };
    let json = serde_json::to_vec(&bundle).unwrap();
    assert!(ModelBundle::from_reader(json.as_slice()).is_err());
}
