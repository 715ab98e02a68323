//! The recognition model: configuration, shared network and output heads.
//!
//! # Example
//!
//! ```
//! use burn::backend::NdArray;
//! use burn::tensor::{Tensor, backend::Backend};
//! use crnn_ctc::model::{ModelConfig, build_inference_model};
//!
//! type TestBackend = NdArray;
//! let device = <TestBackend as burn::tensor::backend::BackendTypes>::Device::default();
//!
//! // A reduced geometry keeps the example fast: 64x16 images, 8 timesteps.
//! let config = ModelConfig::new().image_size(64, 16).timesteps(8).label_length(3);
//! let model = build_inference_model::<TestBackend>(&config, &device).unwrap();
//!
//! let probabilities = model.forward(Tensor::zeros([1, 64, 16, 1], &device)).unwrap();
//! assert_eq!(probabilities.dims(), [1, 8, 55]);
//! ```

mod config;
mod heads;
mod network;

pub use config::{LayerSummary, ModelConfig, RECURRENT_MERGES, SequenceGeometry};
pub use heads::{
    InferenceModel, LOSS_OUTPUT, Model, PROBABILITIES_OUTPUT, TrainingModel, build_inference_model,
    build_model, build_training_model,
};
pub use network::{Crnn, FeatureExtractor, IMAGE_INPUT, RecurrentStack, SequenceReshaper};

#[cfg(test)]
pub(crate) mod test_support {
    use super::ModelConfig;

    /// 64x16 images, 8 timesteps, 3-character labels over 5 classes and
    /// narrow recurrent layers: same topology, fast to run.
    pub(crate) fn small_config() -> ModelConfig {
        ModelConfig::new()
            .image_size(64, 16)
            .timesteps(8)
            .label_length(3)
            .num_classes(5)
            .dense_units(8)
            .rnn_units(6)
    }
}
