//! Deep CORAL network: a shared convolutional feature extractor and a linear
//! classifier head, with a paired forward pass covering both domains.

use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d, Relu};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Configuration for [`SharedNet`].
///
/// The extractor halves the spatial resolution twice, so `image_size` must
/// be divisible by 4:
///
/// ```text
/// (batch, in_channels, s, s)
///   -> conv1 / relu / pool -> (batch, conv1_channels, s/2, s/2)
///   -> conv2 / relu / pool -> (batch, conv2_channels, s/4, s/4)
///   -> flatten / fc1 / relu / dropout -> (batch, hidden_size)
///   -> fc2 / relu -> (batch, feature_size)
/// ```
#[derive(Config, Debug)]
pub struct SharedNetConfig {
    /// Input image channels.
    #[config(default = 3)]
    pub in_channels: usize,
    /// Side length of the square input images. Must be divisible by 4.
    #[config(default = 16)]
    pub image_size: usize,
    /// Output channels of the first convolution.
    #[config(default = 32)]
    pub conv1_channels: usize,
    /// Output channels of the second convolution.
    #[config(default = 64)]
    pub conv2_channels: usize,
    /// Width of the intermediate fully connected layer.
    #[config(default = 128)]
    pub hidden_size: usize,
    /// Dimensionality of the produced feature vectors.
    #[config(default = 64)]
    pub feature_size: usize,
    /// Dropout probability after the first fully connected layer.
    #[config(default = 0.5)]
    pub dropout: f64,
}

/// Shared convolutional feature extractor; both domains pass through the
/// same weights.
#[derive(Module, Debug)]
pub struct SharedNet<B: Backend> {
    pub conv1: Conv2d<B>,
    pub pool1: MaxPool2d,
    pub conv2: Conv2d<B>,
    pub pool2: MaxPool2d,
    pub fc1: Linear<B>,
    pub dropout: Dropout,
    pub fc2: Linear<B>,
    pub activation: Relu,
}

impl SharedNetConfig {
    /// Initialize the extractor on `device`.
    ///
    /// # Panics
    ///
    /// Panics if `image_size` is not divisible by 4 (two 2x2 max pools).
    pub fn init<B: Backend>(&self, device: &B::Device) -> SharedNet<B> {
        assert!(
            self.image_size % 4 == 0,
            "image_size {} must be divisible by 4",
            self.image_size
        );
        let reduced = self.image_size / 4;
        SharedNet {
            conv1: Conv2dConfig::new([self.in_channels, self.conv1_channels], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
            pool1: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            conv2: Conv2dConfig::new([self.conv1_channels, self.conv2_channels], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
            pool2: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            fc1: LinearConfig::new(self.conv2_channels * reduced * reduced, self.hidden_size)
                .init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            fc2: LinearConfig::new(self.hidden_size, self.feature_size).init(device),
            activation: Relu::new(),
        }
    }
}

impl<B: Backend> SharedNet<B> {
    /// Map a batch of images to feature vectors.
    ///
    /// Input shape `(batch, channels, size, size)`, output
    /// `(batch, feature_size)`.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.activation.forward(self.conv1.forward(images));
        let x = self.pool1.forward(x);
        let x = self.activation.forward(self.conv2.forward(x));
        let x = self.pool2.forward(x);
        let [n, c, h, w] = x.dims();
        let x = x.reshape([n, c * h * w]);
        let x = self.activation.forward(self.fc1.forward(x));
        let x = self.dropout.forward(x);
        self.activation.forward(self.fc2.forward(x))
    }
}

/// Feature and logit pair produced for one domain by the paired forward.
#[derive(Debug, Clone)]
pub struct DomainOutput<B: Backend> {
    /// Penultimate representation, shape `(batch, feature_size)`.
    pub features: Tensor<B, 2>,
    /// Classifier outputs, shape `(batch, num_classes)`.
    pub logits: Tensor<B, 2>,
}

/// Output of [`DeepCoral::forward`], one branch per domain.
#[derive(Debug, Clone)]
pub struct CoralOutput<B: Backend> {
    pub source: DomainOutput<B>,
    pub target: DomainOutput<B>,
}

/// Configuration for [`DeepCoral`].
#[derive(Config, Debug)]
pub struct DeepCoralConfig {
    /// Number of output classes.
    pub num_classes: usize,
    /// Shared feature extractor.
    #[config(default = "SharedNetConfig::new()")]
    pub shared: SharedNetConfig,
}

/// Deep CORAL classifier.
///
/// The `shared`/`head` split carries the differential learning rates and
/// scopes pretrained weights: only `shared` is ever transplanted.
#[derive(Module, Debug)]
pub struct DeepCoral<B: Backend> {
    pub shared: SharedNet<B>,
    pub head: Linear<B>,
}

impl DeepCoralConfig {
    /// Initialize the full model on `device`. The head is always randomly
    /// initialized.
    pub fn init<B: Backend>(&self, device: &B::Device) -> DeepCoral<B> {
        DeepCoral {
            shared: self.shared.init(device),
            head: LinearConfig::new(self.shared.feature_size, self.num_classes).init(device),
        }
    }
}

impl<B: Backend> DeepCoral<B> {
    /// Run both domain batches through the shared weights in one call.
    pub fn forward(&self, source: Tensor<B, 4>, target: Tensor<B, 4>) -> CoralOutput<B> {
        CoralOutput {
            source: self.forward_one(source),
            target: self.forward_one(target),
        }
    }

    fn forward_one(&self, images: Tensor<B, 4>) -> DomainOutput<B> {
        let features = self.shared.forward(images);
        let logits = self.head.forward(features.clone());
        DomainOutput { features, logits }
    }
}
