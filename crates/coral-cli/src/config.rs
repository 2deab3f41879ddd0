//! Experiment configuration: TOML sections with per-field defaults,
//! validation, and derivation of the two run configs.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use coral::data::ImageShape;
use coral::model::network::{DeepCoralConfig, SharedNetConfig};
use coral::training::trainer::{AlignmentSource, RunConfig};

/// Top-level experiment TOML. Every section and key is optional. Serialized
/// back out as the config echo in `summary.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub model: ModelSection,
    #[serde(default)]
    pub data: DataSection,
    #[serde(default)]
    pub output: OutputSection,
}

/// `[run]` — optimization schedule shared by both runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSection {
    /// Regularizer weight for the enabled run.
    #[serde(default = "default_lambda")]
    pub lambda: f64,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_source_batch_size")]
    pub source_batch_size: usize,
    #[serde(default = "default_target_batch_size")]
    pub target_batch_size: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_momentum")]
    pub momentum: f64,
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f64,
    #[serde(default = "default_alignment")]
    pub alignment: AlignmentSource,
    /// Backend seed applied before each run, so both start from identical
    /// initial weights.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

/// `[model]` — network dimensions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSection {
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,
    #[serde(default = "default_in_channels")]
    pub in_channels: usize,
    #[serde(default = "default_image_size")]
    pub image_size: usize,
    #[serde(default = "default_conv1_channels")]
    pub conv1_channels: usize,
    #[serde(default = "default_conv2_channels")]
    pub conv2_channels: usize,
    #[serde(default = "default_hidden_size")]
    pub hidden_size: usize,
    #[serde(default = "default_feature_size")]
    pub feature_size: usize,
    #[serde(default = "default_dropout")]
    pub dropout: f64,
}

/// `[data]` — JSONL paths, or the synthetic fallback when omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSection {
    /// Labeled source-domain JSONL.
    #[serde(default)]
    pub source_path: Option<PathBuf>,
    /// Target-domain JSONL; its labels are used for evaluation only.
    #[serde(default)]
    pub target_path: Option<PathBuf>,
    #[serde(default = "default_source_examples")]
    pub synthetic_source_examples: usize,
    #[serde(default = "default_target_examples")]
    pub synthetic_target_examples: usize,
    /// Pixel intensity offset separating the synthetic domains.
    #[serde(default = "default_domain_shift")]
    pub synthetic_domain_shift: f64,
    #[serde(default = "default_noise")]
    pub synthetic_noise: f64,
}

/// `[output]` — artifact destinations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSection {
    #[serde(default = "default_out_dir")]
    pub dir: PathBuf,
    /// Also save each run's final model as a burn record.
    #[serde(default = "default_save_models")]
    pub save_models: bool,
}

fn default_lambda() -> f64 {
    1.0
}
fn default_epochs() -> usize {
    50
}
fn default_source_batch_size() -> usize {
    200
}
fn default_target_batch_size() -> usize {
    56
}
fn default_learning_rate() -> f64 {
    1e-3
}
fn default_momentum() -> f64 {
    0.9
}
fn default_weight_decay() -> f64 {
    5e-4
}
fn default_alignment() -> AlignmentSource {
    AlignmentSource::Logits
}
fn default_seed() -> u64 {
    0
}
fn default_num_classes() -> usize {
    10
}
fn default_in_channels() -> usize {
    3
}
fn default_image_size() -> usize {
    16
}
fn default_conv1_channels() -> usize {
    32
}
fn default_conv2_channels() -> usize {
    64
}
fn default_hidden_size() -> usize {
    128
}
fn default_feature_size() -> usize {
    64
}
fn default_dropout() -> f64 {
    0.5
}
fn default_source_examples() -> usize {
    2000
}
fn default_target_examples() -> usize {
    600
}
fn default_domain_shift() -> f64 {
    0.5
}
fn default_noise() -> f64 {
    0.2
}
fn default_out_dir() -> PathBuf {
    PathBuf::from("runs")
}
fn default_save_models() -> bool {
    true
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            lambda: default_lambda(),
            epochs: default_epochs(),
            source_batch_size: default_source_batch_size(),
            target_batch_size: default_target_batch_size(),
            learning_rate: default_learning_rate(),
            momentum: default_momentum(),
            weight_decay: default_weight_decay(),
            alignment: default_alignment(),
            seed: default_seed(),
        }
    }
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            num_classes: default_num_classes(),
            in_channels: default_in_channels(),
            image_size: default_image_size(),
            conv1_channels: default_conv1_channels(),
            conv2_channels: default_conv2_channels(),
            hidden_size: default_hidden_size(),
            feature_size: default_feature_size(),
            dropout: default_dropout(),
        }
    }
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            source_path: None,
            target_path: None,
            synthetic_source_examples: default_source_examples(),
            synthetic_target_examples: default_target_examples(),
            synthetic_domain_shift: default_domain_shift(),
            synthetic_noise: default_noise(),
        }
    }
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            dir: default_out_dir(),
            save_models: default_save_models(),
        }
    }
}

/// Read and parse an experiment TOML.
pub fn load_experiment_toml(path: &Path) -> anyhow::Result<ExperimentConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading experiment config {}", path.display()))?;
    let config: ExperimentConfig = toml::from_str(&raw)
        .with_context(|| format!("parsing experiment config {}", path.display()))?;
    tracing::info!(path = %path.display(), "Loaded experiment config");
    Ok(config)
}

impl ExperimentConfig {
    /// Reject configurations that cannot train.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.run.epochs > 0, "epochs must be at least 1");
        anyhow::ensure!(
            self.run.source_batch_size >= 2 && self.run.target_batch_size >= 2,
            "batch sizes must be at least 2 for the covariance term"
        );
        anyhow::ensure!(self.run.lambda >= 0.0, "lambda must be non-negative");
        anyhow::ensure!(
            self.model.image_size % 4 == 0,
            "image_size {} must be divisible by 4",
            self.model.image_size
        );
        anyhow::ensure!(self.model.num_classes >= 2, "need at least two classes");
        Ok(())
    }

    /// The two training runs, baseline first.
    pub fn run_configs(&self) -> [RunConfig; 2] {
        let base = |enabled: bool, lambda: f64| {
            RunConfig::new(enabled, lambda)
                .with_epochs(self.run.epochs)
                .with_source_batch_size(self.run.source_batch_size)
                .with_target_batch_size(self.run.target_batch_size)
                .with_learning_rate(self.run.learning_rate)
                .with_momentum(self.run.momentum)
                .with_weight_decay(self.run.weight_decay)
                .with_alignment(self.run.alignment)
        };
        [base(false, 0.0), base(true, self.run.lambda)]
    }

    /// Network dimensions as a model config.
    pub fn model_config(&self) -> DeepCoralConfig {
        DeepCoralConfig::new(self.model.num_classes).with_shared(
            SharedNetConfig::new()
                .with_in_channels(self.model.in_channels)
                .with_image_size(self.model.image_size)
                .with_conv1_channels(self.model.conv1_channels)
                .with_conv2_channels(self.model.conv2_channels)
                .with_hidden_size(self.model.hidden_size)
                .with_feature_size(self.model.feature_size)
                .with_dropout(self.model.dropout),
        )
    }

    /// Image shape every dataset must match.
    pub fn image_shape(&self) -> ImageShape {
        ImageShape {
            channels: self.model.in_channels,
            height: self.model.image_size,
            width: self.model.image_size,
        }
    }
}
