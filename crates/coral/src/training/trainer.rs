//! One training epoch over paired source/target batches.
//!
//! Every step forwards one batch from each domain through the shared
//! weights, blends the source classification loss with the covariance
//! discrepancy, and applies one SGD step per sub-module: the classifier
//! head steps at [`HEAD_LR_MULTIPLIER`] times the base learning rate.

use burn::config::Config;
use burn::module::{AutodiffModule, ModuleVisitor, ParamId};
use burn::nn::Linear;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{GradientsParams, Optimizer, SgdConfig};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Tensor;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::data::DomainDataset;
use crate::error::CoralError;
use crate::model::bridge;
use crate::model::network::{DeepCoral, SharedNet};
use crate::training::loss::{classification_loss, coral_discrepancy};
use crate::training::metrics::BatchMetric;

/// The classifier head trains at this multiple of the base learning rate.
pub const HEAD_LR_MULTIPLIER: f64 = 10.0;

/// Which per-domain representation the discrepancy is computed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentSource {
    /// Align classifier outputs.
    Logits,
    /// Align penultimate feature vectors.
    Features,
}

/// Hyperparameters for one experiment run. Immutable once constructed.
#[derive(Config, Debug)]
pub struct RunConfig {
    /// Whether the covariance regularizer participates in the total loss.
    pub regularizer_enabled: bool,
    /// Regularizer weight; 0 when disabled.
    pub lambda: f64,
    #[config(default = 50)]
    pub epochs: usize,
    #[config(default = 200)]
    pub source_batch_size: usize,
    #[config(default = 56)]
    pub target_batch_size: usize,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    #[config(default = 0.9)]
    pub momentum: f64,
    #[config(default = 5e-4)]
    pub weight_decay: f64,
    /// Which representation the discrepancy aligns.
    #[config(default = "AlignmentSource::Logits")]
    pub alignment: AlignmentSource,
}

impl RunConfig {
    /// Baseline run: regularizer off.
    pub fn without_regularizer() -> Self {
        Self::new(false, 0.0)
    }

    /// Regularized run with the given weight.
    pub fn with_regularizer(lambda: f64) -> Self {
        Self::new(true, lambda)
    }

    /// Weight applied to the discrepancy term: `lambda` when enabled, else 0.
    pub fn effective_lambda(&self) -> f64 {
        if self.regularizer_enabled {
            self.lambda
        } else {
            0.0
        }
    }
}

/// Build one SGD optimizer configured per `config`.
///
/// Two instances drive one model, one over the shared extractor at the base
/// learning rate and one over the head at [`HEAD_LR_MULTIPLIER`] times it.
pub fn init_sgd<B, M>(config: &RunConfig) -> impl Optimizer<M, B>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    SgdConfig::new()
        .with_momentum(Some(
            MomentumConfig::new()
                .with_momentum(config.momentum)
                .with_dampening(0.0),
        ))
        .with_weight_decay(Some(WeightDecayConfig::new(config.weight_decay as f32)))
        .init()
}

/// Collects the gradient entries belonging to one sub-module out of a full
/// backward pass.
struct SubmoduleGrads<'a, B: AutodiffBackend> {
    grads: &'a B::Gradients,
    out: GradientsParams,
}

impl<'a, B: AutodiffBackend> ModuleVisitor<B> for SubmoduleGrads<'a, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, tensor: &Tensor<B, D>) {
        if let Some(grad) = tensor.grad(self.grads) {
            self.out.register::<B::InnerBackend, D>(id, grad);
        }
    }
}

fn submodule_grads<B, M>(grads: &B::Gradients, module: &M) -> GradientsParams
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let mut visitor = SubmoduleGrads::<B> {
        grads,
        out: GradientsParams::new(),
    };
    module.visit(&mut visitor);
    visitor.out
}

/// Run one epoch of paired-domain training.
///
/// Walks `min(source batches, target batches)` synchronized steps; leftover
/// batches from the longer stream are dropped for this epoch (the shuffle
/// rotates which ones). Each step optimizes
/// `classification + lambda * discrepancy`; the discrepancy is computed and
/// reported even when [`RunConfig::effective_lambda`] is zero. A non-finite
/// loss is logged and carried through, not treated as fatal.
///
/// Returns the stepped model and one [`BatchMetric`] per step, in order.
///
/// # Errors
///
/// [`CoralError::ShapeMismatch`] when the domains disagree on image shape,
/// [`CoralError::InvalidInput`] when either dataset yields no full batch.
#[allow(clippy::too_many_arguments)]
pub fn run_training_epoch<B, OS, OH>(
    model: DeepCoral<B>,
    optim_shared: &mut OS,
    optim_head: &mut OH,
    source: &DomainDataset,
    target: &DomainDataset,
    config: &RunConfig,
    epoch: usize,
    rng: &mut StdRng,
    device: &B::Device,
) -> Result<(DeepCoral<B>, Vec<BatchMetric>), CoralError>
where
    B: AutodiffBackend,
    OS: Optimizer<SharedNet<B>, B>,
    OH: Optimizer<Linear<B>, B>,
{
    if source.shape() != target.shape() {
        return Err(CoralError::ShapeMismatch(format!(
            "domains disagree on image shape: {:?} vs {:?}",
            source.shape(),
            target.shape()
        )));
    }

    let source_batches = source.shuffled_batches(config.source_batch_size, rng);
    let target_batches = target.shuffled_batches(config.target_batch_size, rng);
    let total_steps = source_batches.len().min(target_batches.len());
    if total_steps == 0 {
        return Err(CoralError::InvalidInput(format!(
            "epoch {epoch}: no full batch available (source {}, target {} examples)",
            source.len(),
            target.len()
        )));
    }

    let lambda = config.effective_lambda();
    let mut model = model;
    let mut metrics = Vec::with_capacity(total_steps);

    for (step, (source_batch, target_batch)) in
        source_batches.into_iter().zip(target_batches).enumerate()
    {
        let source_images = bridge::images_to_tensor::<B>(&source_batch, source.shape(), device);
        let source_labels = bridge::labels_to_tensor::<B>(&source_batch, device);
        let target_images = bridge::images_to_tensor::<B>(&target_batch, target.shape(), device);

        let output = model.forward(source_images, target_images);
        let ce = classification_loss(output.source.logits.clone(), source_labels);
        let (target_repr, source_repr) = match config.alignment {
            AlignmentSource::Logits => (output.target.logits, output.source.logits),
            AlignmentSource::Features => (output.target.features, output.source.features),
        };
        let discrepancy = coral_discrepancy(target_repr, source_repr)?;
        let total = ce.clone().add(discrepancy.clone().mul_scalar(lambda));

        let metric = BatchMetric {
            epoch,
            step: step + 1,
            total_steps,
            lambda,
            discrepancy_loss: bridge::scalar_to_f64(discrepancy),
            classification_loss: bridge::scalar_to_f64(ce),
            total_loss: bridge::scalar_to_f64(total.clone()),
        };
        if !metric.total_loss.is_finite() {
            tracing::warn!(
                epoch,
                step = metric.step,
                classification = metric.classification_loss,
                discrepancy = metric.discrepancy_loss,
                "non-finite loss, continuing"
            );
        }

        let grads = total.backward();
        let shared_grads = submodule_grads::<B, _>(&grads, &model.shared);
        let head_grads = submodule_grads::<B, _>(&grads, &model.head);
        let DeepCoral { shared, head } = model;
        let shared = optim_shared.step(config.learning_rate.into(), shared, shared_grads);
        let head = optim_head.step(
            (config.learning_rate * HEAD_LR_MULTIPLIER).into(),
            head,
            head_grads,
        );
        model = DeepCoral { shared, head };

        metrics.push(metric);
    }

    let steps = metrics.len() as f64;
    let avg = |f: fn(&BatchMetric) -> f64| metrics.iter().map(f).sum::<f64>() / steps;
    tracing::info!(
        epoch,
        total_steps,
        lambda,
        classification = avg(|m| m.classification_loss),
        discrepancy = avg(|m| m.discrepancy_loss),
        total = avg(|m| m.total_loss),
        "epoch averages"
    );

    Ok((model, metrics))
}
