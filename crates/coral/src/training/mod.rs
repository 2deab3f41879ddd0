//! Paired-domain training: loss functions, the epoch loop, and the metric
//! records both emit.

pub mod loss;
pub mod metrics;
pub mod trainer;
