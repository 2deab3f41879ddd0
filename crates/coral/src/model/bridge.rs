//! Conversions between raw batch buffers and burn tensors.

use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Int, Tensor, TensorData};

use crate::data::{ImageBatch, ImageShape};

/// Convert a flattened image batch to a `(batch, channels, height, width)`
/// float tensor.
///
/// # Panics
///
/// Panics if the pixel buffer length does not equal
/// `batch.len * shape.pixels_per_image()`.
pub fn images_to_tensor<B: Backend>(
    batch: &ImageBatch,
    shape: ImageShape,
    device: &B::Device,
) -> Tensor<B, 4> {
    let expected = batch.len * shape.pixels_per_image();
    assert_eq!(
        batch.images.len(),
        expected,
        "pixel buffer holds {} values, expected {expected}",
        batch.images.len()
    );
    Tensor::from_data(
        TensorData::new(
            batch.images.clone(),
            [batch.len, shape.channels, shape.height, shape.width],
        ),
        device,
    )
}

/// Convert batch labels to a rank-1 integer tensor.
///
/// # Panics
///
/// Panics if the label count does not equal `batch.len`.
pub fn labels_to_tensor<B: Backend>(batch: &ImageBatch, device: &B::Device) -> Tensor<B, 1, Int> {
    assert_eq!(batch.labels.len(), batch.len, "label count mismatch");
    Tensor::from_data(TensorData::new(batch.labels.clone(), [batch.len]), device)
}

/// Extract the value of a single-element tensor as `f64`.
///
/// # Panics
///
/// Panics if the tensor holds more than one element.
pub fn scalar_to_f64<B: Backend>(value: Tensor<B, 1>) -> f64 {
    value.into_scalar().elem::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestBackend = burn::backend::ndarray::NdArray<f32>;

    fn tiny_batch() -> (ImageBatch, ImageShape) {
        let shape = ImageShape {
            channels: 1,
            height: 2,
            width: 2,
        };
        let batch = ImageBatch {
            images: vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0],
            labels: vec![0, 1],
            len: 2,
        };
        (batch, shape)
    }

    #[test]
    fn images_round_trip() {
        let device = Default::default();
        let (batch, shape) = tiny_batch();
        let images = images_to_tensor::<TestBackend>(&batch, shape, &device);
        assert_eq!(images.dims(), [2, 1, 2, 2]);
        let values = images.into_data().to_vec::<f32>().unwrap();
        assert_eq!(values, batch.images);
    }

    #[test]
    fn labels_are_rank_one_ints() {
        let device = Default::default();
        let (batch, _) = tiny_batch();
        let labels = labels_to_tensor::<TestBackend>(&batch, &device);
        assert_eq!(labels.dims(), [2]);
        let values = labels.into_data().to_vec::<i64>().unwrap();
        assert_eq!(values, vec![0, 1]);
    }

    #[test]
    #[should_panic(expected = "pixel buffer")]
    fn rejects_wrong_pixel_count() {
        let device = Default::default();
        let (mut batch, shape) = tiny_batch();
        batch.images.pop();
        let _ = images_to_tensor::<TestBackend>(&batch, shape, &device);
    }

    #[test]
    fn scalar_extraction() {
        let device = Default::default();
        let value = Tensor::<TestBackend, 1>::from_data(TensorData::from([2.5f32]), &device);
        assert!((scalar_to_f64(value) - 2.5).abs() < 1e-6);
    }
}
