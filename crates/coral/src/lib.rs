//! Deep CORAL domain adaptation on burn.
//!
//! A shared convolutional extractor and classifier head train on labeled
//! source images while a differentiable covariance discrepancy pulls the
//! second-order statistics of unlabeled target-domain features towards the
//! source. This crate holds the loss, the paired-batch epoch trainer,
//! per-domain evaluation, dataset plumbing, and pretrained-weight
//! transplantation; the `coral-cli` binary drives full with/without
//! regularizer experiments on top of it.

pub mod data;
pub mod error;
pub mod eval;
pub mod model;
pub mod pretrained;
pub mod training;
