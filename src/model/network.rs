//! The shared recognition network: convolution stack, reshape, recurrent
//! stack and classifier. Both output heads wrap a [`Crnn`].

use burn::module::Module;
use burn::tensor::{Tensor, backend::Backend};

use crate::errors::ModelError;
use crate::layers::{
    Activation, Bidirectional, ConvBlock, Dense, DenseConfig, NormSettings, SequenceBatchNorm,
};

use super::config::{ModelConfig, RECURRENT_MERGES, SequenceGeometry};

/// Name of the image input.
pub const IMAGE_INPUT: &str = "the_input";

/// Convolution stages turning `[batch, width, height, 1]` images into
/// `[batch, channels, width', height']` feature maps.
#[derive(Module, Debug)]
pub struct FeatureExtractor<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
}

impl<B: Backend> FeatureExtractor<B> {
    pub fn new(config: &ModelConfig, device: &B::Device) -> Self {
        let norm = config.norm_settings();
        let blocks = config
            .conv_stack()
            .iter()
            .map(|block| block.init(norm, device))
            .collect();
        Self { blocks }
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn forward(&self, image: Tensor<B, 4>) -> Tensor<B, 4> {
        // [batch, width, height, channels] -> [batch, channels, width, height]
        let mut x = image.permute([0, 3, 1, 2]);
        for block in &self.blocks {
            x = block.forward(x);
        }
        x
    }
}

/// Reinterprets the feature map as a sequence along the width axis and
/// projects every timestep down to `dense_units` features.
///
/// The map is flattened in (width, height, channel) order and cut into
/// `timesteps` equal slices, so with a 64-wide map each timestep covers two
/// adjacent columns.
#[derive(Module, Debug)]
pub struct SequenceReshaper<B: Backend> {
    projection: Dense<B>,
    timesteps: usize,
    features: usize,
}

impl<B: Backend> SequenceReshaper<B> {
    pub fn new(geometry: SequenceGeometry, units: usize, device: &B::Device) -> Self {
        Self {
            projection: DenseConfig::new(geometry.features, units)
                .with_activation(Activation::Relu)
                .init(device),
            timesteps: geometry.timesteps,
            features: geometry.features,
        }
    }

    pub fn timesteps(&self) -> usize {
        self.timesteps
    }

    /// Features per timestep before the projection.
    pub fn features(&self) -> usize {
        self.features
    }

    /// Flattens `[batch, channels, width, height]` into
    /// `[batch, timesteps, features]` without projecting.
    pub fn to_sequence(&self, feature_map: Tensor<B, 4>) -> Tensor<B, 3> {
        let [batch_size, ..] = feature_map.dims();
        feature_map
            .permute([0, 2, 3, 1])
            .reshape([batch_size, self.timesteps, self.features])
    }

    pub fn forward(&self, feature_map: Tensor<B, 4>) -> Tensor<B, 3> {
        self.projection.forward(self.to_sequence(feature_map))
    }
}

/// Two bidirectional LSTM layers, each followed by batch normalization.
///
/// The first merges its directions by addition, the second by concatenation.
#[derive(Module, Debug)]
pub struct RecurrentStack<B: Backend> {
    layers: Vec<Bidirectional<B>>,
    norms: Vec<SequenceBatchNorm<B>>,
}

impl<B: Backend> RecurrentStack<B> {
    pub fn new(
        input_size: usize,
        hidden_size: usize,
        norm: NormSettings,
        device: &B::Device,
    ) -> Self {
        let mut layers = Vec::with_capacity(RECURRENT_MERGES.len());
        let mut norms = Vec::with_capacity(RECURRENT_MERGES.len());
        let mut input_size = input_size;

        for merge in RECURRENT_MERGES {
            let layer = Bidirectional::new(input_size, hidden_size, merge, device);
            input_size = layer.output_size();
            norms.push(SequenceBatchNorm::new(input_size, norm, device));
            layers.push(layer);
        }

        Self { layers, norms }
    }

    pub fn layers(&self) -> &[Bidirectional<B>] {
        &self.layers
    }

    pub fn output_size(&self) -> usize {
        self.layers.last().map(|l| l.output_size()).unwrap_or(0)
    }

    /// Output of every layer after its merge and normalization.
    pub fn forward_layers(&self, input: Tensor<B, 3>) -> Vec<Tensor<B, 3>> {
        let mut outputs = Vec::with_capacity(self.layers.len());
        let mut x = input;
        for (layer, norm) in self.layers.iter().zip(&self.norms) {
            x = norm.forward(layer.forward(x));
            outputs.push(x.clone());
        }
        outputs
    }

    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let mut x = input;
        for (layer, norm) in self.layers.iter().zip(&self.norms) {
            x = norm.forward(layer.forward(x));
        }
        x
    }
}

/// Convolutional-recurrent network producing per-timestep class logits.
#[derive(Module, Debug)]
pub struct Crnn<B: Backend> {
    features: FeatureExtractor<B>,
    reshaper: SequenceReshaper<B>,
    recurrent: RecurrentStack<B>,
    classifier: Dense<B>,
    image_width: usize,
    image_height: usize,
}

impl<B: Backend> Crnn<B> {
    /// Validates the configuration and allocates the network on `device`.
    pub fn new(config: &ModelConfig, device: &B::Device) -> Result<Self, ModelError> {
        let geometry = config.validate()?;
        log::debug!(
            "feature map {:?} reshaped into {} timesteps of {} features",
            geometry.feature_map,
            geometry.timesteps,
            geometry.features
        );

        let features = FeatureExtractor::new(config, device);
        let reshaper = SequenceReshaper::new(geometry, config.dense_units, device);
        let recurrent = RecurrentStack::new(
            config.dense_units,
            config.rnn_units,
            config.norm_settings(),
            device,
        );
        let classifier =
            DenseConfig::new(recurrent.output_size(), config.output_classes()).init(device);

        Ok(Self {
            features,
            reshaper,
            recurrent,
            classifier,
            image_width: config.image_width,
            image_height: config.image_height,
        })
    }

    pub fn feature_extractor(&self) -> &FeatureExtractor<B> {
        &self.features
    }

    pub fn reshaper(&self) -> &SequenceReshaper<B> {
        &self.reshaper
    }

    pub fn recurrent(&self) -> &RecurrentStack<B> {
        &self.recurrent
    }

    pub fn timesteps(&self) -> usize {
        self.reshaper.timesteps()
    }

    pub fn num_classes(&self) -> usize {
        self.classifier.output_size()
    }

    /// Checks that `image` is `[batch, width, height, 1]` with a non-empty batch.
    pub fn check_image(&self, image: &Tensor<B, 4>) -> Result<(), ModelError> {
        let [batch_size, width, height, channels] = image.dims();
        if batch_size == 0 {
            return Err(ModelError::invalid_input(IMAGE_INPUT, "empty batch"));
        }
        if [width, height, channels] != [self.image_width, self.image_height, 1] {
            return Err(ModelError::invalid_input(
                IMAGE_INPUT,
                format!(
                    "expected [batch, {}, {}, 1], got {:?}",
                    self.image_width,
                    self.image_height,
                    image.dims()
                ),
            ));
        }
        Ok(())
    }

    /// Sequence fed to the recurrent stack: `[batch, timesteps, dense_units]`.
    pub fn encode(&self, image: Tensor<B, 4>) -> Tensor<B, 3> {
        self.reshaper.forward(self.features.forward(image))
    }

    /// Unnormalized class scores: `[batch, timesteps, classes]`.
    pub fn forward(&self, image: Tensor<B, 4>) -> Tensor<B, 3> {
        let sequence = self.encode(image);
        self.classifier.forward(self.recurrent.forward(sequence))
    }
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
    fn test_feature_extractor_output_shape() {
        let config = small_config();
        let extractor = FeatureExtractor::<TestBackend>::new(&config, &device());

        let output = extractor.forward(Tensor::zeros([2, 64, 16, 1], &device()));

        assert_eq!(extractor.num_blocks(), 7);
        assert_eq!(output.dims(), [2, 512, 16, 1]);
    }

    #[test]
    fn test_reshaper_flattens_width_height_channel_order() {
        let geometry = SequenceGeometry {
            feature_map: [4, 1, 2],
            timesteps: 2,
            features: 4,
        };
        let reshaper = SequenceReshaper::<TestBackend>::new(geometry, 3, &device());

        // [batch=1, channels=2, width=4, height=1]; value = 10 * channel + column.
        let map = Tensor::<TestBackend, 4>::from_floats(
            [[[[0.0], [1.0], [2.0], [3.0]], [[10.0], [11.0], [12.0], [13.0]]]],
            &device(),
        );
        let sequence: Vec<f32> = reshaper.to_sequence(map).to_data().to_vec().unwrap();

        // Timestep 0 holds columns 0 and 1, each with both channels.
        assert_eq!(
            sequence,
            vec![0.0, 10.0, 1.0, 11.0, 2.0, 12.0, 3.0, 13.0]
        );
        assert_eq!(reshaper.timesteps(), 2);
        assert_eq!(reshaper.features(), 4);
    }

    #[test]
    fn test_recurrent_stack_merge_widths() {
        let stack = RecurrentStack::<TestBackend>::new(
            8,
            6,
            small_config().norm_settings(),
            &device(),
        );

        let outputs = stack.forward_layers(Tensor::ones([2, 8, 8], &device()));

        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].dims(), [2, 8, 6]);
        assert_eq!(outputs[1].dims(), [2, 8, 12]);
        assert_eq!(stack.output_size(), 12);
    }

    #[test]
    fn test_crnn_logits_shape() {
        let config = small_config();
        let network = Crnn::<TestBackend>::new(&config, &device()).unwrap();

        let logits = network.forward(Tensor::zeros([2, 64, 16, 1], &device()));

        assert_eq!(network.timesteps(), 8);
        assert_eq!(network.num_classes(), 6);
        assert_eq!(logits.dims(), [2, 8, 6]);
    }

    #[test]
    fn test_check_image_rejects_wrong_shape() {
        let network = Crnn::<TestBackend>::new(&small_config(), &device()).unwrap();

        let wrong = Tensor::<TestBackend, 4>::zeros([1, 16, 64, 1], &device());
        let result = network.check_image(&wrong);

        assert!(matches!(
            result,
            Err(ModelError::InvalidInput {
                name: IMAGE_INPUT,
                ..
            })
        ));
        assert!(
            network
                .check_image(&Tensor::zeros([3, 64, 16, 1], &device()))
                .is_ok()
        );
    }

    #[test]
    fn test_invalid_config_fails_before_allocation() {
        let result = Crnn::<TestBackend>::new(&small_config().timesteps(7), &device());

        assert!(matches!(result, Err(ModelError::InvalidGraph(_))));
    }
}
