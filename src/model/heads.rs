//! Inference and training heads over the shared network, and the
//! `build_model` entry points.

use burn::module::Module;
use burn::tensor::{Int, Tensor, backend::Backend};

use crate::errors::ModelError;
use crate::layers::Activation;
use crate::training::{CtcLossHead, INPUT_LENGTH_INPUT, LABEL_LENGTH_INPUT, LABELS_INPUT};

use super::config::ModelConfig;
use super::network::{Crnn, IMAGE_INPUT};

/// Name of the inference output.
pub const PROBABILITIES_OUTPUT: &str = "softmax";
/// Name of the training output.
pub const LOSS_OUTPUT: &str = "ctc";

/// Image in, per-timestep class probabilities out.
#[derive(Module, Debug)]
pub struct InferenceModel<B: Backend> {
    network: Crnn<B>,
}

impl<B: Backend> InferenceModel<B> {
    pub fn network(&self) -> &Crnn<B> {
        &self.network
    }

    /// `image` is `[batch, width, height, 1]`; returns
    /// `[batch, timesteps, classes]` with every class vector summing to one.
    pub fn forward(&self, image: Tensor<B, 4>) -> Result<Tensor<B, 3>, ModelError> {
        self.network.check_image(&image)?;
        Ok(Activation::Softmax.apply(self.network.forward(image)))
    }
}

/// Image, labels and lengths in, CTC loss per example out.
#[derive(Module, Debug)]
pub struct TrainingModel<B: Backend> {
    network: Crnn<B>,
    loss: CtcLossHead,
}

impl<B: Backend> TrainingModel<B> {
    pub fn network(&self) -> &Crnn<B> {
        &self.network
    }

    /// Timesteps the CTC loss sees: the network's timesteps minus the
    /// discarded prefix.
    pub fn effective_input_length(&self) -> usize {
        self.network.timesteps() - self.loss.discarded_timesteps()
    }

    /// An `input_length` tensor using every effective timestep of every
    /// example.
    pub fn input_lengths(&self, batch_size: usize, device: &B::Device) -> Tensor<B, 1, Int> {
        Tensor::full([batch_size], self.effective_input_length() as i64, device)
    }

    /// Per-example CTC loss, shape `[batch]`.
    pub fn forward(
        &self,
        image: Tensor<B, 4>,
        labels: Tensor<B, 2, Int>,
        input_length: Tensor<B, 1, Int>,
        label_length: Tensor<B, 1, Int>,
    ) -> Result<Tensor<B, 1>, ModelError> {
        let log_probs = self.log_probs(image)?;
        self.loss
            .forward(log_probs, labels, input_length, label_length)
    }

    /// Batch-mean CTC loss (each example normalized by its label length),
    /// shape `[1]`.
    pub fn forward_mean(
        &self,
        image: Tensor<B, 4>,
        labels: Tensor<B, 2, Int>,
        input_length: Tensor<B, 1, Int>,
        label_length: Tensor<B, 1, Int>,
    ) -> Result<Tensor<B, 1>, ModelError> {
        let log_probs = self.log_probs(image)?;
        self.loss
            .forward_mean(log_probs, labels, input_length, label_length)
    }

    /// Drops the loss head, keeping the trained weights.
    pub fn into_inference(self) -> InferenceModel<B> {
        InferenceModel {
            network: self.network,
        }
    }

    fn log_probs(&self, image: Tensor<B, 4>) -> Result<Tensor<B, 3>, ModelError> {
        self.network.check_image(&image)?;
        Ok(Activation::LogSoftmax.apply(self.network.forward(image)))
    }
}

/// Either head, as selected by [`build_model`].
#[derive(Debug)]
pub enum Model<B: Backend> {
    Training(TrainingModel<B>),
    Inference(InferenceModel<B>),
}

impl<B: Backend> Model<B> {
    pub fn is_training(&self) -> bool {
        matches!(self, Model::Training(_))
    }

    /// Names of the inputs, in call order.
    pub fn input_names(&self) -> &'static [&'static str] {
        match self {
            Model::Training(_) => &[
                IMAGE_INPUT,
                LABELS_INPUT,
                INPUT_LENGTH_INPUT,
                LABEL_LENGTH_INPUT,
            ],
            Model::Inference(_) => &[IMAGE_INPUT],
        }
    }

    pub fn output_name(&self) -> &'static str {
        match self {
            Model::Training(_) => LOSS_OUTPUT,
            Model::Inference(_) => PROBABILITIES_OUTPUT,
        }
    }

    pub fn network(&self) -> &Crnn<B> {
        match self {
            Model::Training(model) => model.network(),
            Model::Inference(model) => model.network(),
        }
    }

    pub fn num_params(&self) -> usize {
        self.network().num_params()
    }

    pub fn into_training(self) -> Option<TrainingModel<B>> {
        match self {
            Model::Training(model) => Some(model),
            Model::Inference(_) => None,
        }
    }

    /// The inference head; a training model gives up its loss head.
    pub fn into_inference(self) -> InferenceModel<B> {
        match self {
            Model::Training(model) => model.into_inference(),
            Model::Inference(model) => model,
        }
    }
}

/// Builds the network with the loss head (`training`) or the probability
/// head.
pub fn build_model<B: Backend>(
    training: bool,
    config: &ModelConfig,
    device: &B::Device,
) -> Result<Model<B>, ModelError> {
    if training {
        build_training_model(config, device).map(Model::Training)
    } else {
        build_inference_model(config, device).map(Model::Inference)
    }
}

pub fn build_training_model<B: Backend>(
    config: &ModelConfig,
    device: &B::Device,
) -> Result<TrainingModel<B>, ModelError> {
    let network = build_network(config, device, "training")?;
    Ok(TrainingModel {
        network,
        loss: CtcLossHead::new(config),
    })
}

pub fn build_inference_model<B: Backend>(
    config: &ModelConfig,
    device: &B::Device,
) -> Result<InferenceModel<B>, ModelError> {
    let network = build_network(config, device, "inference")?;
    Ok(InferenceModel { network })
}

fn build_network<B: Backend>(
    config: &ModelConfig,
    device: &B::Device,
    head: &str,
) -> Result<Crnn<B>, ModelError> {
    for layer in config.summary()? {
        log::debug!(
            "{:<14} {:?} ({} params)",
            layer.name,
            layer.output_shape,
            layer.params
        );
    }

    let network = Crnn::new(config, device)?;
    log::info!(
        "Built {} model: {} timesteps x {} classes, {} parameters",
        head,
        network.timesteps(),
        network.num_classes(),
        network.num_params()
    );
    Ok(network)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::small_config;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn device() -> <TestBackend as burn::tensor::backend::BackendTypes>::Device {
        Default::default()
    }

    #[test]
    fn test_build_model_selects_head() {
        let config = small_config();

        let training = build_model::<TestBackend>(true, &config, &device()).unwrap();
        let inference = build_model::<TestBackend>(false, &config, &device()).unwrap();

        assert!(training.is_training());
        assert!(!inference.is_training());
        assert_eq!(
            training.input_names(),
            &["the_input", "the_labels", "input_length", "label_length"]
        );
        assert_eq!(inference.input_names(), &["the_input"]);
        assert_eq!(training.output_name(), LOSS_OUTPUT);
        assert_eq!(inference.output_name(), PROBABILITIES_OUTPUT);
    }

    #[test]
    fn test_build_model_propagates_config_errors() {
        let result = build_model::<TestBackend>(false, &small_config().timesteps(5), &device());

        assert!(matches!(result, Err(ModelError::InvalidGraph(_))));
    }

    #[test]
    fn test_inference_rejects_wrong_image() {
        let model = build_inference_model::<TestBackend>(&small_config(), &device()).unwrap();

        let result = model.forward(Tensor::zeros([1, 64, 16, 3], &device()));

        assert!(matches!(result, Err(ModelError::InvalidInput { .. })));
    }

    #[test]
    fn test_effective_input_length_drops_two_timesteps() {
        let model = build_training_model::<TestBackend>(&small_config(), &device()).unwrap();

        assert_eq!(model.effective_input_length(), 6);

        let lengths: Vec<i64> = model
            .input_lengths(3, &device())
            .to_data()
            .iter::<i64>()
            .collect();
        assert_eq!(lengths, vec![6, 6, 6]);
    }

    #[test]
    fn test_training_loss_per_example() {
        let model = build_training_model::<TestBackend>(&small_config(), &device()).unwrap();

        let labels =
            Tensor::<TestBackend, 1, Int>::from_data([0i64, 1, 2, 4, 3, 0].as_slice(), &device())
                .reshape([2, 3]);
        let label_length =
            Tensor::<TestBackend, 1, Int>::from_data([3i64, 2].as_slice(), &device());

        let loss = model
            .forward(
                Tensor::zeros([2, 64, 16, 1], &device()),
                labels,
                model.input_lengths(2, &device()),
                label_length,
            )
            .unwrap();
        let values: Vec<f32> = loss.to_data().to_vec().unwrap();

        assert_eq!(values.len(), 2);
        assert!(values.iter().all(|v| v.is_finite() && *v >= 0.0));
    }

    #[test]
    fn test_into_inference_keeps_weights() {
        let training = build_training_model::<TestBackend>(&small_config(), &device()).unwrap();
        let params = training.network().num_params();

        let inference = training.into_inference();

        assert_eq!(inference.network().num_params(), params);
    }
}
