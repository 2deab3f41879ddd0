//! Experiment orchestration: load data once, then train the baseline and
//! the regularized run from identical initial weights and collect their
//! metrics for reporting.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use burn::backend::ndarray::NdArray;
use burn::backend::Autodiff;
use burn::module::{AutodiffModule, Module};
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::Backend;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;

use coral::data::{synthetic_dataset, DomainDataset, SyntheticSpec};
use coral::eval::{evaluate, EvalDomain};
use coral::model::network::DeepCoral;
use coral::pretrained::{apply_to_shared, load_named_tensors, NamedTensors};
use coral::training::metrics::{BatchMetric, EvalMetric};
use coral::training::trainer::{init_sgd, run_training_epoch, RunConfig};

use crate::config::{self, ExperimentConfig};
use crate::report;

type TrainBackend = Autodiff<NdArray<f32>>;

/// Command-line selections forwarded from `main`.
pub struct ExperimentArgs {
    pub config: Option<PathBuf>,
    pub load: Option<PathBuf>,
    pub out_dir: Option<PathBuf>,
}

/// Everything one run produced, keyed by its label.
pub struct RunReport {
    pub label: &'static str,
    pub train: Vec<BatchMetric>,
    pub source_evals: Vec<EvalMetric>,
    pub target_evals: Vec<EvalMetric>,
}

/// Run the full two-run comparison experiment.
pub fn run_experiment(args: ExperimentArgs) -> anyhow::Result<()> {
    let started = Instant::now();

    // 1. Resolve configuration: defaults, then TOML, then flags.
    let mut experiment = match &args.config {
        Some(path) => config::load_experiment_toml(path)?,
        None => ExperimentConfig::default(),
    };
    if let Some(dir) = args.out_dir {
        experiment.output.dir = dir;
    }
    experiment.validate()?;

    // 2. Optional pretrained extractor weights, shared by both runs.
    let pretrained: Option<NamedTensors> = match &args.load {
        Some(path) => {
            let tensors = load_named_tensors(path)
                .with_context(|| format!("loading pretrained tensors {}", path.display()))?;
            tracing::info!(path = %path.display(), entries = tensors.len(), "Loaded pretrained tensors");
            Some(tensors)
        }
        None => None,
    };

    // 3. Datasets, loaded once and reused by both runs.
    let (source, target) = load_domains(&experiment)?;
    tracing::info!(
        source = source.len(),
        target = target.len(),
        classes = experiment.model.num_classes,
        "Datasets ready"
    );

    // 4. Baseline first, then the regularized run.
    fs::create_dir_all(&experiment.output.dir)?;
    let mut reports = Vec::new();
    for run_config in experiment.run_configs() {
        let label = if run_config.regularizer_enabled {
            "with_coral"
        } else {
            "without_coral"
        };
        let report = execute_run(
            label,
            &run_config,
            &experiment,
            &source,
            &target,
            pretrained.as_ref(),
        )?;
        reports.push(report);
    }

    // 5. Persist metrics, the summary, and the comparison plot.
    report::write_all(&experiment.output.dir, &experiment, &reports)?;

    // 6. Final recap on stdout.
    println!("\n--- Experiment Summary ---");
    for report in &reports {
        let source_acc = report.source_evals.last().map_or(f64::NAN, |m| m.accuracy);
        let target_acc = report.target_evals.last().map_or(f64::NAN, |m| m.accuracy);
        println!(
            "{:>14}: source {source_acc:.2}% / target {target_acc:.2}%",
            report.label
        );
    }
    println!("Artifacts in {}", experiment.output.dir.display());
    println!("Elapsed: {:.1?}", started.elapsed());
    Ok(())
}

/// Load both domains from JSONL, or generate synthetic ones when no paths
/// are configured.
fn load_domains(experiment: &ExperimentConfig) -> anyhow::Result<(DomainDataset, DomainDataset)> {
    let shape = experiment.image_shape();
    let (source, target) = match (&experiment.data.source_path, &experiment.data.target_path) {
        (Some(source_path), Some(target_path)) => {
            let source = DomainDataset::from_jsonl("source", shape, source_path)
                .with_context(|| format!("loading source domain {}", source_path.display()))?;
            let target = DomainDataset::from_jsonl("target", shape, target_path)
                .with_context(|| format!("loading target domain {}", target_path.display()))?;
            (source, target)
        }
        (None, None) => {
            tracing::info!("No dataset paths configured, generating synthetic domains");
            let data = &experiment.data;
            let source = synthetic_dataset(
                "source",
                &SyntheticSpec {
                    examples: data.synthetic_source_examples,
                    classes: experiment.model.num_classes,
                    shape,
                    intensity_shift: 0.0,
                    noise: data.synthetic_noise as f32,
                    seed: experiment.run.seed.wrapping_add(1),
                },
            )?;
            let target = synthetic_dataset(
                "target",
                &SyntheticSpec {
                    examples: data.synthetic_target_examples,
                    classes: experiment.model.num_classes,
                    shape,
                    intensity_shift: data.synthetic_domain_shift as f32,
                    noise: data.synthetic_noise as f32,
                    seed: experiment.run.seed.wrapping_add(2),
                },
            )?;
            (source, target)
        }
        _ => anyhow::bail!("source_path and target_path must be set together"),
    };
    for dataset in [&source, &target] {
        if let Some(max_label) = dataset.max_label() {
            anyhow::ensure!(
                max_label < experiment.model.num_classes,
                "{} dataset has label {max_label} but the model predicts {} classes",
                dataset.name(),
                experiment.model.num_classes
            );
        }
    }
    Ok((source, target))
}

/// Train one run to completion and evaluate both domains after every epoch.
fn execute_run(
    label: &'static str,
    run_config: &RunConfig,
    experiment: &ExperimentConfig,
    source: &DomainDataset,
    target: &DomainDataset,
    pretrained: Option<&NamedTensors>,
) -> anyhow::Result<RunReport> {
    let device = Default::default();
    tracing::info!(
        label,
        lambda = run_config.effective_lambda(),
        epochs = run_config.epochs,
        "Starting run"
    );

    // Same backend seed for both runs: identical initial weights, so the
    // regularizer is the only difference between them.
    TrainBackend::seed(experiment.run.seed);
    let mut model: DeepCoral<TrainBackend> = experiment.model_config().init(&device);
    if let Some(tensors) = pretrained {
        let (shared, transplant) = apply_to_shared(model.shared, tensors, &device)?;
        model = DeepCoral {
            shared,
            head: model.head,
        };
        tracing::info!(
            label,
            loaded = transplant.loaded,
            missing = transplant.missing,
            discarded = transplant.discarded,
            "Applied pretrained extractor weights"
        );
    }

    let mut optim_shared = init_sgd::<TrainBackend, _>(run_config);
    let mut optim_head = init_sgd::<TrainBackend, _>(run_config);
    let mut rng = StdRng::seed_from_u64(experiment.run.seed);

    let mut train = Vec::new();
    let mut source_evals = Vec::with_capacity(run_config.epochs);
    let mut target_evals = Vec::with_capacity(run_config.epochs);

    let pb = ProgressBar::new(run_config.epochs as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .expect("valid progress bar template")
            .progress_chars("=> "),
    );

    for epoch in 1..=run_config.epochs {
        let (stepped, metrics) = run_training_epoch(
            model,
            &mut optim_shared,
            &mut optim_head,
            source,
            target,
            run_config,
            epoch,
            &mut rng,
            &device,
        )?;
        model = stepped;
        train.extend(metrics);

        let eval_model = model.valid();
        let source_eval = evaluate(
            &eval_model,
            source,
            run_config.source_batch_size,
            epoch,
            EvalDomain::Source,
            &device,
        )?;
        let target_eval = evaluate(
            &eval_model,
            target,
            run_config.target_batch_size,
            epoch,
            EvalDomain::Target,
            &device,
        )?;
        pb.set_message(format!(
            "{label} src {:.1}% tgt {:.1}%",
            source_eval.accuracy, target_eval.accuracy
        ));
        source_evals.push(source_eval);
        target_evals.push(target_eval);
        pb.inc(1);
    }
    pb.finish_with_message(format!("{label} done"));

    if experiment.output.save_models {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let path = experiment.output.dir.join(format!("model_{label}"));
        model
            .clone()
            .save_file(&path, &recorder)
            .map_err(|e| anyhow::anyhow!("saving {label} model record: {e}"))?;
        tracing::info!(label, path = %path.display(), "Saved model record");
    }

    Ok(RunReport {
        label,
        train,
        source_evals,
        target_evals,
    })
}
