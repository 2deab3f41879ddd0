//! Inference-mode evaluation over one labeled domain.

use burn::tensor::backend::Backend;
use burn::tensor::ElementConversion;

use crate::data::DomainDataset;
use crate::error::CoralError;
use crate::model::bridge;
use crate::model::network::DeepCoral;
use crate::training::loss::classification_loss;
use crate::training::metrics::EvalMetric;

/// Which branch of the paired forward to score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalDomain {
    Source,
    Target,
}

impl EvalDomain {
    /// Lowercase name used in logs and file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            EvalDomain::Source => "source",
            EvalDomain::Target => "target",
        }
    }
}

/// Score `model` on every example of `dataset`.
///
/// The paired forward takes two image batches, so the same batch is passed
/// on both sides and `domain` picks which branch's logits get scored. Pass
/// the inference-form model (`model.valid()` on an autodiff backend); the
/// dataset is walked in order with the partial final batch kept, summing
/// cross-entropy over examples and counting argmax hits. Parameters are
/// never mutated.
///
/// # Errors
///
/// [`CoralError::InvalidInput`] when the dataset is empty.
pub fn evaluate<B: Backend>(
    model: &DeepCoral<B>,
    dataset: &DomainDataset,
    batch_size: usize,
    epoch: usize,
    domain: EvalDomain,
    device: &B::Device,
) -> Result<EvalMetric, CoralError> {
    if dataset.is_empty() {
        return Err(CoralError::InvalidInput(format!(
            "dataset {} has no examples to evaluate",
            dataset.name()
        )));
    }

    let mut loss_sum = 0.0;
    let mut correct = 0usize;
    let mut total = 0usize;

    for batch in dataset.sequential_batches(batch_size) {
        let images = bridge::images_to_tensor::<B>(&batch, dataset.shape(), device);
        let labels = bridge::labels_to_tensor::<B>(&batch, device);
        let output = model.forward(images.clone(), images);
        let logits = match domain {
            EvalDomain::Source => output.source.logits,
            EvalDomain::Target => output.target.logits,
        };
        let mean_ce = classification_loss(logits.clone(), labels.clone());
        loss_sum += bridge::scalar_to_f64(mean_ce) * batch.len as f64;

        let hits: i64 = logits
            .argmax(1)
            .equal(labels.unsqueeze_dim::<2>(1))
            .int()
            .sum()
            .into_scalar()
            .elem();
        correct += hits as usize;
        total += batch.len;
    }

    let metric = EvalMetric::new(epoch, loss_sum / total as f64, correct, total);
    tracing::info!(
        epoch,
        domain = domain.as_str(),
        average_loss = metric.average_loss,
        correct = metric.correct,
        total = metric.total,
        accuracy = metric.accuracy,
        "evaluation"
    );
    Ok(metric)
}
