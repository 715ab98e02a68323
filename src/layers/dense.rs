//! Dense (fully connected) layer applied independently at every timestep.

use crate::layers::{Activation, he_normal};
use burn::{
    module::Module,
    nn::{Linear, LinearConfig},
    tensor::{Tensor, backend::Backend},
};

/// Configuration for a Dense layer.
#[derive(Debug, Clone)]
pub struct DenseConfig {
    /// Number of input features.
    pub input_size: usize,
    /// Number of output features.
    pub output_size: usize,
    /// Activation function to apply after the linear transformation.
    pub activation: Activation,
}

impl DenseConfig {
    /// Creates a new DenseConfig.
    pub fn new(input_size: usize, output_size: usize) -> Self {
        Self {
            input_size,
            output_size,
            activation: Activation::None,
        }
    }

    /// Sets the activation function.
    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    /// Initializes the Dense layer with he_normal kernels on the given device.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Dense<B> {
        let linear = LinearConfig::new(self.input_size, self.output_size)
            .with_initializer(he_normal())
            .init(device);

        Dense {
            linear,
            input_size: self.input_size,
            output_size: self.output_size,
            activation_id: self.activation.to_id(),
        }
    }
}

/// A dense layer with optional activation.
///
/// Works on any tensor rank: the projection is applied over the last
/// dimension, so a `[batch, time, features]` input is projected per timestep.
#[derive(Module, Debug)]
pub struct Dense<B: Backend> {
    linear: Linear<B>,
    input_size: usize,
    output_size: usize,
    /// Activation function ID, see [`Activation::to_id`].
    activation_id: u8,
}

impl<B: Backend> Dense<B> {
    /// Performs the forward pass.
    pub fn forward<const D: usize>(&self, input: Tensor<B, D>) -> Tensor<B, D> {
        let output = self.linear.forward(input);
        self.activation().apply(output)
    }

    /// Returns the input size of this layer.
    pub fn input_size(&self) -> usize {
        self.input_size
    }

    /// Returns the output size of this layer.
    pub fn output_size(&self) -> usize {
        self.output_size
    }

    /// Returns the activation function.
    pub fn activation(&self) -> Activation {
        Activation::from_id(self.activation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_dense_config_creation() {
        let config = DenseConfig::new(4096, 64).with_activation(Activation::Relu);

        assert_eq!(config.input_size, 4096);
        assert_eq!(config.output_size, 64);
        assert_eq!(config.activation, Activation::Relu);
    }

    #[test]
    fn test_dense_layer_creation() {
        let device = <TestBackend as burn::tensor::backend::BackendTypes>::Device::default();
        let dense: Dense<TestBackend> = DenseConfig::new(8, 3)
            .with_activation(Activation::Relu)
            .init(&device);

        assert_eq!(dense.input_size(), 8);
        assert_eq!(dense.output_size(), 3);
        assert_eq!(dense.activation(), Activation::Relu);
        assert_eq!(dense.num_params(), 8 * 3 + 3);
    }

    #[test]
    fn test_dense_forward_per_timestep() {
        let device = <TestBackend as burn::tensor::backend::BackendTypes>::Device::default();
        let dense: Dense<TestBackend> = DenseConfig::new(16, 5).init(&device);

        let input = Tensor::<TestBackend, 3>::zeros([2, 7, 16], &device);
        let output = dense.forward(input);

        assert_eq!(output.dims(), [2, 7, 5]);
    }

    #[test]
    fn test_dense_relu_output_non_negative() {
        let device = <TestBackend as burn::tensor::backend::BackendTypes>::Device::default();
        let dense: Dense<TestBackend> = DenseConfig::new(6, 4)
            .with_activation(Activation::Relu)
            .init(&device);

        let input = Tensor::<TestBackend, 3>::random(
            [3, 5, 6],
            burn::tensor::Distribution::Uniform(-1.0, 1.0),
            &device,
        );
        let min: f32 = dense.forward(input).min().into_scalar();

        assert!(min >= 0.0);
    }
}
