//! Neural network layer implementations.
//!
//! Building blocks of the recognition network: convolution blocks, per-timestep
//! dense projections, sequence batch normalization, LSTM layers and the
//! bidirectional wrapper.

pub mod activation;
pub mod conv;
pub mod dense;
pub mod norm;
pub mod recurrent;

pub use activation::Activation;
pub use conv::{ConvBlock, ConvBlockConfig};
pub use dense::{Dense, DenseConfig};
pub use norm::{NormSettings, SequenceBatchNorm};
pub use recurrent::{Bidirectional, Lstm, LstmCell, MergeMode};

use burn::nn::Initializer;

/// he_normal: zero-mean normal kernels with variance `2 / fan_in`.
pub fn he_normal() -> Initializer {
    Initializer::KaimingNormal {
        gain: std::f64::consts::SQRT_2,
        fan_out_only: false,
    }
}
