//! Batch normalization over the feature axis of a sequence.

use burn::module::Module;
use burn::nn::{BatchNorm, BatchNormConfig};
use burn::tensor::{Tensor, backend::Backend};

/// Batch normalization settings shared by every normalized stage.
///
/// `momentum` follows Burn's convention (weight of the new batch statistic),
/// so a moving-average decay of 0.99 is a momentum of 0.01.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormSettings {
    pub epsilon: f64,
    pub momentum: f64,
}

impl NormSettings {
    pub fn config(&self, num_features: usize) -> BatchNormConfig {
        BatchNormConfig::new(num_features)
            .with_epsilon(self.epsilon)
            .with_momentum(self.momentum)
    }
}

/// Batch normalization for `[batch, time, features]` tensors.
///
/// Burn normalizes over dimension 1, so the time and feature axes are swapped
/// around the call.
#[derive(Module, Debug)]
pub struct SequenceBatchNorm<B: Backend> {
    batch_norm: BatchNorm<B>,
    num_features: usize,
}

impl<B: Backend> SequenceBatchNorm<B> {
    pub fn new(num_features: usize, settings: NormSettings, device: &B::Device) -> Self {
        Self {
            batch_norm: settings.config(num_features).init(device),
            num_features,
        }
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let channels_first = input.swap_dims(1, 2);
        self.batch_norm.forward(channels_first).swap_dims(1, 2)
    }
}
