//! Loss functions: the CORAL covariance discrepancy between two feature
//! batches and the source-domain classification loss.

use burn::nn::loss::CrossEntropyLossConfig;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};

use crate::error::CoralError;

/// Unbiased sample covariance of a feature batch, in matrix form.
///
/// For a batch `B` of shape `(n, d)`:
///
/// ```text
/// cov(B) = (BᵀB - (1ᵀB)ᵀ(1ᵀB) / n) / (n - 1)
/// ```
///
/// where `1` is the all-ones row vector of length `n`. Built from matrix
/// products only, so gradients flow to every entry of `B`. The caller
/// ensures `n >= 2`; a single-row batch divides by zero.
pub fn batch_covariance<B: Backend>(batch: Tensor<B, 2>) -> Tensor<B, 2> {
    let [n, _d] = batch.dims();
    let ones = Tensor::<B, 2>::ones([1, n], &batch.device());
    let col_sums = ones.matmul(batch.clone()); // (1, d)
    let outer = col_sums
        .clone()
        .transpose()
        .matmul(col_sums)
        .div_scalar(n as f32);
    batch
        .clone()
        .transpose()
        .matmul(batch)
        .sub(outer)
        .div_scalar((n - 1) as f32)
}

/// CORAL discrepancy between a target and a source feature batch.
///
/// Computes the covariance of each batch and returns the squared Frobenius
/// distance scaled by `1 / (4 d^2)`, as a single-element tensor that
/// participates in autodiff on both inputs.
///
/// # Errors
///
/// [`CoralError::ShapeMismatch`] when the feature dimensions differ and
/// [`CoralError::InvalidInput`] when either batch has fewer than two rows.
pub fn coral_discrepancy<B: Backend>(
    target: Tensor<B, 2>,
    source: Tensor<B, 2>,
) -> Result<Tensor<B, 1>, CoralError> {
    let [n_target, d_target] = target.dims();
    let [n_source, d_source] = source.dims();
    if d_target != d_source {
        return Err(CoralError::ShapeMismatch(format!(
            "feature dims differ: target {d_target}, source {d_source}"
        )));
    }
    if n_target < 2 || n_source < 2 {
        return Err(CoralError::InvalidInput(format!(
            "covariance needs at least 2 rows per batch, got target {n_target}, source {n_source}"
        )));
    }
    let diff = batch_covariance(target).sub(batch_covariance(source));
    let scale = 4.0 * (d_target * d_target) as f32;
    Ok(diff.powf_scalar(2.0).sum().div_scalar(scale))
}

/// Mean cross-entropy between logits and integer class labels.
pub fn classification_loss<B: Backend>(
    logits: Tensor<B, 2>,
    labels: Tensor<B, 1, Int>,
) -> Tensor<B, 1> {
    CrossEntropyLossConfig::new()
        .init(&logits.device())
        .forward(logits, labels)
}
