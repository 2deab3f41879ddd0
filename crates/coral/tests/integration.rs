//! End-to-end checks: a miniature two-run experiment, the transplant path
//! feeding training, and the alignment choice.

use burn::backend::ndarray::NdArray;
use burn::backend::Autodiff;
use burn::module::AutodiffModule;
use burn::tensor::backend::Backend;
use rand::rngs::StdRng;
use rand::SeedableRng;

use coral::data::{synthetic_dataset, DomainDataset, ImageShape, SyntheticSpec};
use coral::eval::{evaluate, EvalDomain};
use coral::model::network::{DeepCoral, DeepCoralConfig, SharedNetConfig};
use coral::pretrained::{apply_to_shared, export_shared};
use coral::training::trainer::{init_sgd, run_training_epoch, AlignmentSource, RunConfig};

type TestAutodiffBackend = Autodiff<NdArray<f32>>;

fn domains() -> (DomainDataset, DomainDataset) {
    let shape = ImageShape {
        channels: 1,
        height: 8,
        width: 8,
    };
    let source = synthetic_dataset(
        "source",
        &SyntheticSpec {
            examples: 24,
            classes: 3,
            shape,
            intensity_shift: 0.0,
            noise: 0.2,
            seed: 11,
        },
    )
    .unwrap();
    let target = synthetic_dataset(
        "target",
        &SyntheticSpec {
            examples: 16,
            classes: 3,
            shape,
            intensity_shift: 0.6,
            noise: 0.2,
            seed: 22,
        },
    )
    .unwrap();
    (source, target)
}

fn model_config() -> DeepCoralConfig {
    DeepCoralConfig::new(3).with_shared(
        SharedNetConfig::new()
            .with_in_channels(1)
            .with_image_size(8)
            .with_conv1_channels(2)
            .with_conv2_channels(4)
            .with_hidden_size(8)
            .with_feature_size(4),
    )
}

#[test]
fn baseline_and_regularized_runs_complete() {
    let device = Default::default();
    let (source, target) = domains();
    for config in [
        RunConfig::without_regularizer(),
        RunConfig::with_regularizer(1.0),
    ] {
        let config = config
            .with_epochs(2)
            .with_source_batch_size(8)
            .with_target_batch_size(8)
            .with_learning_rate(1e-2);
        TestAutodiffBackend::seed(7);
        let mut model = model_config().init::<TestAutodiffBackend>(&device);
        let mut optim_shared = init_sgd::<TestAutodiffBackend, _>(&config);
        let mut optim_head = init_sgd::<TestAutodiffBackend, _>(&config);
        let mut rng = StdRng::seed_from_u64(3);
        for epoch in 1..=config.epochs {
            let (stepped, metrics) = run_training_epoch(
                model,
                &mut optim_shared,
                &mut optim_head,
                &source,
                &target,
                &config,
                epoch,
                &mut rng,
                &device,
            )
            .unwrap();
            model = stepped;
            // min(24/8, 16/8) = 2 steps per epoch.
            assert_eq!(metrics.len(), 2);
            assert!(metrics.iter().all(|m| m.total_loss.is_finite()));

            let inference = model.valid();
            let src = evaluate(&inference, &source, 8, epoch, EvalDomain::Source, &device)
                .unwrap();
            let tgt = evaluate(&inference, &target, 8, epoch, EvalDomain::Target, &device)
                .unwrap();
            assert_eq!(src.total, 24);
            assert_eq!(tgt.total, 16);
            assert_eq!(src.epoch, epoch);
        }
    }
}

#[test]
fn transplanted_extractor_feeds_training() {
    let device = Default::default();
    let (source, target) = domains();
    let donor = model_config().init::<TestAutodiffBackend>(&device);
    let map = export_shared(&donor.shared).unwrap();

    let config = RunConfig::with_regularizer(1.0)
        .with_source_batch_size(8)
        .with_target_batch_size(8);
    let recipient = model_config().init::<TestAutodiffBackend>(&device);
    let (shared, report) = apply_to_shared(recipient.shared, &map, &device).unwrap();
    assert_eq!(report.loaded, 8);
    assert_eq!(report.missing, 0);
    let model = DeepCoral {
        shared,
        head: recipient.head,
    };

    let mut optim_shared = init_sgd::<TestAutodiffBackend, _>(&config);
    let mut optim_head = init_sgd::<TestAutodiffBackend, _>(&config);
    let mut rng = StdRng::seed_from_u64(5);
    let (_, metrics) = run_training_epoch(
        model,
        &mut optim_shared,
        &mut optim_head,
        &source,
        &target,
        &config,
        1,
        &mut rng,
        &device,
    )
    .unwrap();
    assert_eq!(metrics.len(), 2);
    assert!(metrics.iter().all(|m| m.total_loss.is_finite()));
}

#[test]
fn alignment_choice_selects_representation() {
    let device = Default::default();
    let (source, target) = domains();
    for alignment in [AlignmentSource::Logits, AlignmentSource::Features] {
        let config = RunConfig::with_regularizer(1.0)
            .with_source_batch_size(8)
            .with_target_batch_size(8)
            .with_alignment(alignment);
        let model = model_config().init::<TestAutodiffBackend>(&device);
        let mut optim_shared = init_sgd::<TestAutodiffBackend, _>(&config);
        let mut optim_head = init_sgd::<TestAutodiffBackend, _>(&config);
        let mut rng = StdRng::seed_from_u64(8);
        let (_, metrics) = run_training_epoch(
            model,
            &mut optim_shared,
            &mut optim_head,
            &source,
            &target,
            &config,
            1,
            &mut rng,
            &device,
        )
        .unwrap();
        assert!(metrics.iter().all(|m| m.discrepancy_loss >= 0.0));
        assert!(metrics
            .iter()
            .all(|m| (m.total_loss - (m.classification_loss + m.discrepancy_loss)).abs() < 1e-4));
    }
}
