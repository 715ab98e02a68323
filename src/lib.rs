//! # crnn-ctc
//!
//! A convolutional-recurrent network (CRNN) for reading short strings from
//! fixed-size images, such as licence plates, trained end-to-end with a
//! Connectionist Temporal Classification (CTC) loss.
//!
//! ## Architecture
//!
//! - **Convolution stack**: seven conv → batch norm → ReLU stages (64 to 512
//!   channels). Pooling shrinks a 256×64 image to a 64×4×512 feature map.
//! - **Reshape**: the map becomes 32 timesteps of 4096 features, projected to
//!   64 features per step.
//! - **Recurrent stack**: two bidirectional LSTM layers (256 units per
//!   direction). The first merges its directions by addition, the second by
//!   concatenation.
//! - **Heads**: a dense classifier over 54 characters plus the CTC blank,
//!   followed by either a softmax (inference) or the CTC loss on all but the
//!   first two timesteps (training).
//!
//! ## Example
//!
//! ```
//! use burn::backend::NdArray;
//! use crnn_ctc::prelude::*;
//!
//! type TestBackend = NdArray;
//! let device = <TestBackend as burn::tensor::backend::BackendTypes>::Device::default();
//!
//! let config = ModelConfig::new().image_size(64, 16).timesteps(8).label_length(3);
//! let model: Model<TestBackend> = build_model(true, &config, &device).unwrap();
//!
//! assert!(model.is_training());
//! assert_eq!(model.input_names().len(), 4);
//! ```

pub mod errors;
pub mod layers;
pub mod model;
pub mod training;

// Re-exports for convenience
pub use errors::ModelError;
pub use model::{InferenceModel, Model, ModelConfig, TrainingModel, build_model};

/// Backend type alias for WGPU with autodiff support.
pub type Backend = burn::backend::Autodiff<burn::backend::Wgpu>;

/// Backend type for inference (no autodiff).
pub type InferenceBackend = burn::backend::Wgpu;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::errors::ModelError;
    pub use crate::layers::{Activation, MergeMode};
    pub use crate::model::{
        InferenceModel, Model, ModelConfig, TrainingModel, build_inference_model, build_model,
        build_training_model,
    };
    pub use crate::{Backend, InferenceBackend};
}
