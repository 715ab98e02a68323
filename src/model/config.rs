//! Model configuration and static shape checking.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::ModelError;
use crate::layers::{ConvBlockConfig, MergeMode, NormSettings};

/// Output depth, kernel size and pooling of each convolution stage.
///
/// Pools are `[width, height]`: the 2×2 pools shrink both axes, the 1×2 pools
/// only the height so the width can become the time axis.
const CONV_STACK: [(usize, usize, Option<[usize; 2]>); 7] = [
    (64, 3, Some([2, 2])),
    (128, 3, Some([2, 2])),
    (256, 3, None),
    (256, 3, Some([1, 2])),
    (512, 3, None),
    (512, 3, Some([1, 2])),
    (512, 2, None),
];

/// Merge applied after each bidirectional layer, in stacking order.
pub const RECURRENT_MERGES: [MergeMode; 2] = [MergeMode::Add, MergeMode::Concat];

/// Configuration of the recognition network.
///
/// The defaults describe a 256×64 grayscale input, seven-character labels over
/// 54 classes (plus the CTC blank) and 32 output timesteps, of which the first
/// two are dropped before the loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Image width; this axis becomes the time axis.
    pub image_width: usize,
    /// Image height.
    pub image_height: usize,
    /// Fixed length of the label sequence.
    pub label_length: usize,
    /// Number of character classes, excluding the blank.
    pub num_classes: usize,
    /// Number of timesteps the feature map is reshaped into.
    pub timesteps: usize,
    /// Leading timesteps dropped before the CTC loss.
    pub discarded_timesteps: usize,
    /// Width of the per-timestep projection feeding the recurrent stack.
    pub dense_units: usize,
    /// Hidden width of each LSTM direction.
    pub rnn_units: usize,
    pub batch_norm_epsilon: f64,
    /// Burn-style momentum (weight of the new batch statistic).
    pub batch_norm_momentum: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            image_width: 256,
            image_height: 64,
            label_length: 7,
            num_classes: 54,
            timesteps: 32,
            discarded_timesteps: 2,
            dense_units: 64,
            rnn_units: 256,
            batch_norm_epsilon: 1e-3,
            batch_norm_momentum: 0.01,
        }
    }
}

impl ModelConfig {
    /// Creates a new ModelConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the image size as `(width, height)`.
    pub fn image_size(mut self, width: usize, height: usize) -> Self {
        self.image_width = width;
        self.image_height = height;
        self
    }

    /// Sets the fixed label length.
    pub fn label_length(mut self, length: usize) -> Self {
        self.label_length = length;
        self
    }

    /// Sets the number of character classes (blank excluded).
    pub fn num_classes(mut self, num_classes: usize) -> Self {
        self.num_classes = num_classes;
        self
    }

    /// Sets the number of output timesteps.
    pub fn timesteps(mut self, timesteps: usize) -> Self {
        self.timesteps = timesteps;
        self
    }

    /// Sets how many leading timesteps the loss ignores.
    pub fn discarded_timesteps(mut self, discarded: usize) -> Self {
        self.discarded_timesteps = discarded;
        self
    }

    /// Sets the projection width before the recurrent stack.
    pub fn dense_units(mut self, units: usize) -> Self {
        self.dense_units = units;
        self
    }

    /// Sets the hidden width of each LSTM direction.
    pub fn rnn_units(mut self, units: usize) -> Self {
        self.rnn_units = units;
        self
    }

    /// Number of output classes including the blank.
    pub fn output_classes(&self) -> usize {
        self.num_classes + 1
    }

    /// Index of the CTC blank: the last class.
    pub fn blank_index(&self) -> usize {
        self.num_classes
    }

    /// Timesteps that reach the CTC loss.
    pub fn effective_timesteps(&self) -> usize {
        self.timesteps.saturating_sub(self.discarded_timesteps)
    }

    pub fn norm_settings(&self) -> NormSettings {
        NormSettings {
            epsilon: self.batch_norm_epsilon,
            momentum: self.batch_norm_momentum,
        }
    }

    /// Convolution stages, in order, starting from a single input channel.
    pub fn conv_stack(&self) -> Vec<ConvBlockConfig> {
        let mut in_channels = 1;
        CONV_STACK
            .iter()
            .map(|&(out_channels, kernel, pool)| {
                let mut block = ConvBlockConfig::new(in_channels, out_channels, kernel);
                if let Some(pool) = pool {
                    block = block.with_pool(pool);
                }
                in_channels = out_channels;
                block
            })
            .collect()
    }

    /// Width of the recurrent stack output fed to the classifier.
    pub fn recurrent_output_size(&self) -> usize {
        RECURRENT_MERGES
            .last()
            .map(|merge| merge.output_size(self.rnn_units))
            .unwrap_or(self.rnn_units)
    }

    /// Checks the configuration and returns the resulting geometry.
    ///
    /// Fails if any size is zero, if the feature map cannot be split into
    /// `timesteps` equal steps, or if the loss would see fewer timesteps than
    /// a label needs.
    pub fn validate(&self) -> Result<SequenceGeometry, ModelError> {
        let sizes = [
            ("image_width", self.image_width),
            ("image_height", self.image_height),
            ("label_length", self.label_length),
            ("num_classes", self.num_classes),
            ("timesteps", self.timesteps),
            ("dense_units", self.dense_units),
            ("rnn_units", self.rnn_units),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, size)| *size == 0) {
            return Err(ModelError::InvalidLayerConfig {
                message: format!("{name} must be greater than zero"),
            });
        }

        let [width, height, channels] = self.feature_map_shape();
        if width == 0 || height == 0 {
            return Err(ModelError::InvalidLayerConfig {
                message: format!(
                    "image {}x{} is too small for the convolution stack",
                    self.image_width, self.image_height
                ),
            });
        }

        let flattened = width * height * channels;
        if flattened % self.timesteps != 0 {
            return Err(ModelError::InvalidGraph(format!(
                "feature map {width}x{height}x{channels} ({flattened} values) cannot be \
                 reshaped into {} timesteps",
                self.timesteps
            )));
        }

        if self.discarded_timesteps >= self.timesteps {
            return Err(ModelError::InvalidLayerConfig {
                message: format!(
                    "cannot discard {} of {} timesteps",
                    self.discarded_timesteps, self.timesteps
                ),
            });
        }

        if self.label_length > self.effective_timesteps() {
            return Err(ModelError::ShapeMismatch {
                expected: self.effective_timesteps(),
                actual: self.label_length,
            });
        }

        Ok(SequenceGeometry {
            feature_map: [width, height, channels],
            timesteps: self.timesteps,
            features: flattened / self.timesteps,
        })
    }

    /// `[width, height, channels]` of the final convolution output.
    pub fn feature_map_shape(&self) -> [usize; 3] {
        let mut size = [self.image_width, self.image_height];
        let mut channels = 1;
        for block in self.conv_stack() {
            size = block.output_size(size);
            channels = block.out_channels;
        }
        [size[0], size[1], channels]
    }

    /// Per-example output shape and trainable parameter count of every stage.
    pub fn summary(&self) -> Result<Vec<LayerSummary>, ModelError> {
        let geometry = self.validate()?;
        let mut layers = Vec::new();

        let mut size = [self.image_width, self.image_height];
        let mut pool_index = 0;
        for (index, block) in self.conv_stack().iter().enumerate() {
            let conv_params = block.kernel * block.kernel * block.in_channels * block.out_channels
                + block.out_channels;
            let norm_params = 2 * block.out_channels;
            layers.push(LayerSummary::new(
                format!("conv{}", index + 1),
                vec![size[0], size[1], block.out_channels],
                conv_params + norm_params,
            ));

            if block.pool.is_some() {
                pool_index += 1;
                size = block.output_size(size);
                layers.push(LayerSummary::new(
                    format!("max{pool_index}"),
                    vec![size[0], size[1], block.out_channels],
                    0,
                ));
            }
        }

        let t = geometry.timesteps;
        layers.push(LayerSummary::new("reshape", vec![t, geometry.features], 0));
        layers.push(LayerSummary::new(
            "dense1",
            vec![t, self.dense_units],
            geometry.features * self.dense_units + self.dense_units,
        ));

        let mut input_size = self.dense_units;
        for (index, merge) in RECURRENT_MERGES.iter().enumerate() {
            let name = format!("lstm{}", index + 1);
            let lstm_params = lstm_params(input_size, self.rnn_units);
            let merged = merge.output_size(self.rnn_units);

            layers.push(LayerSummary::new(
                name.clone(),
                vec![t, self.rnn_units],
                lstm_params,
            ));
            layers.push(LayerSummary::new(
                format!("{name}_b"),
                vec![t, self.rnn_units],
                lstm_params,
            ));
            layers.push(LayerSummary::new(
                format!("{name}_merged"),
                vec![t, merged],
                2 * merged,
            ));
            input_size = merged;
        }

        let classes = self.output_classes();
        layers.push(LayerSummary::new(
            "dense2",
            vec![t, classes],
            input_size * classes + classes,
        ));
        layers.push(LayerSummary::new("softmax", vec![t, classes], 0));

        Ok(layers)
    }

    /// Total trainable parameters of the network.
    ///
    /// Batch-norm running statistics are not trainable and are not counted.
    pub fn trainable_params(&self) -> Result<usize, ModelError> {
        Ok(self.summary()?.iter().map(|layer| layer.params).sum())
    }

    /// Parses a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes the configuration to pretty JSON.
    pub fn to_json(&self) -> Result<String, ModelError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Loads a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

fn lstm_params(input_size: usize, hidden_size: usize) -> usize {
    4 * (hidden_size * (input_size + hidden_size) + hidden_size)
}

/// Shape of the spatial-to-temporal reshape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceGeometry {
    /// `[width, height, channels]` of the final convolution output.
    pub feature_map: [usize; 3],
    pub timesteps: usize,
    /// Features per timestep after flattening.
    pub features: usize,
}

/// One row of [`ModelConfig::summary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerSummary {
    pub name: String,
    /// Output shape without the batch axis.
    pub output_shape: Vec<usize>,
    /// Trainable parameters.
    pub params: usize,
}

impl LayerSummary {
    fn new(name: impl Into<String>, output_shape: Vec<usize>, params: usize) -> Self {
        Self {
            name: name.into(),
            output_shape,
            params,
        }
    }
}
