//! CTC loss head.

use burn::module::Module;
use burn::nn::loss::{CTCLoss, CTCLossConfig, Reduction};
use burn::tensor::{Int, Tensor, backend::Backend};

use crate::errors::ModelError;
use crate::model::ModelConfig;

/// Name of the label input.
pub const LABELS_INPUT: &str = "the_labels";
/// Name of the per-example input length.
pub const INPUT_LENGTH_INPUT: &str = "input_length";
/// Name of the per-example label length.
pub const LABEL_LENGTH_INPUT: &str = "label_length";

/// CTC loss over the class distribution with its leading timesteps removed.
///
/// The first outputs of the recurrent stack are unreliable, so the loss only
/// sees timesteps `discarded..timesteps`. The blank is the last class.
#[derive(Module, Clone, Debug)]
pub struct CtcLossHead {
    ctc: CTCLoss,
    discarded_timesteps: usize,
    num_classes: usize,
    label_length: usize,
}

impl CtcLossHead {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            ctc: CTCLossConfig::new()
                .with_blank(config.blank_index())
                .init(),
            discarded_timesteps: config.discarded_timesteps,
            num_classes: config.num_classes,
            label_length: config.label_length,
        }
    }

    pub fn discarded_timesteps(&self) -> usize {
        self.discarded_timesteps
    }

    /// Per-example CTC loss, shape `[batch]`.
    ///
    /// - `log_probs`: `[batch, timesteps, classes]` log-probabilities
    /// - `labels`: `[batch, label_length]` class indices, padded past each
    ///   example's `label_length`
    /// - `input_lengths`, `label_lengths`: `[batch]`
    pub fn forward<B: Backend>(
        &self,
        log_probs: Tensor<B, 3>,
        labels: Tensor<B, 2, Int>,
        input_lengths: Tensor<B, 1, Int>,
        label_lengths: Tensor<B, 1, Int>,
    ) -> Result<Tensor<B, 1>, ModelError> {
        let effective = self.validate(&log_probs, &labels, &input_lengths, &label_lengths)?;
        let log_probs = self.truncate(log_probs, effective);
        Ok(self
            .ctc
            .forward(log_probs, labels, input_lengths, label_lengths))
    }

    /// Batch-mean of the per-example loss, each divided by its label length.
    pub fn forward_mean<B: Backend>(
        &self,
        log_probs: Tensor<B, 3>,
        labels: Tensor<B, 2, Int>,
        input_lengths: Tensor<B, 1, Int>,
        label_lengths: Tensor<B, 1, Int>,
    ) -> Result<Tensor<B, 1>, ModelError> {
        let effective = self.validate(&log_probs, &labels, &input_lengths, &label_lengths)?;
        let log_probs = self.truncate(log_probs, effective);
        Ok(self.ctc.forward_with_reduction(
            log_probs,
            labels,
            input_lengths,
            label_lengths,
            Reduction::Mean,
        ))
    }

    /// Drops the leading timesteps and goes time-major:
    /// `[batch, timesteps, classes]` -> `[effective, batch, classes]`.
    fn truncate<B: Backend>(&self, log_probs: Tensor<B, 3>, effective: usize) -> Tensor<B, 3> {
        log_probs
            .narrow(1, self.discarded_timesteps, effective)
            .swap_dims(0, 1)
    }

    /// Checks shapes and length values, returning the number of timesteps
    /// left after truncation.
    fn validate<B: Backend>(
        &self,
        log_probs: &Tensor<B, 3>,
        labels: &Tensor<B, 2, Int>,
        input_lengths: &Tensor<B, 1, Int>,
        label_lengths: &Tensor<B, 1, Int>,
    ) -> Result<usize, ModelError> {
        let [batch_size, timesteps, classes] = log_probs.dims();
        if timesteps <= self.discarded_timesteps {
            return Err(ModelError::ShapeMismatch {
                expected: self.discarded_timesteps + 1,
                actual: timesteps,
            });
        }
        if classes != self.num_classes + 1 {
            return Err(ModelError::ShapeMismatch {
                expected: self.num_classes + 1,
                actual: classes,
            });
        }
        let effective = timesteps - self.discarded_timesteps;

        let [label_batch, label_width] = labels.dims();
        if label_batch != batch_size || label_width != self.label_length {
            return Err(ModelError::invalid_input(
                LABELS_INPUT,
                format!(
                    "expected [{batch_size}, {}], got {:?}",
                    self.label_length,
                    labels.dims()
                ),
            ));
        }
        check_batch(INPUT_LENGTH_INPUT, input_lengths, batch_size)?;
        check_batch(LABEL_LENGTH_INPUT, label_lengths, batch_size)?;

        let input_values = int_values(input_lengths);
        if let Some(bad) = input_values
            .iter()
            .find(|&&len| len < 1 || len as usize > effective)
        {
            return Err(ModelError::invalid_input(
                INPUT_LENGTH_INPUT,
                format!("{bad} is outside 1..={effective}"),
            ));
        }

        let label_values = int_values(label_lengths);
        if let Some(bad) = label_values
            .iter()
            .find(|&&len| len < 0 || len as usize > self.label_length)
        {
            return Err(ModelError::invalid_input(
                LABEL_LENGTH_INPUT,
                format!("{bad} is outside 0..={}", self.label_length),
            ));
        }

        // A label cannot be emitted in fewer steps than it has characters.
        if let Some((row, (input, label))) = input_values
            .iter()
            .zip(&label_values)
            .enumerate()
            .find(|(_, (input, label))| input < label)
        {
            return Err(ModelError::invalid_input(
                INPUT_LENGTH_INPUT,
                format!("{input} in example {row} is shorter than its label length {label}"),
            ));
        }

        let label_classes = int_values(labels);
        for (row, &len) in label_values.iter().enumerate() {
            let start = row * self.label_length;
            let used = &label_classes[start..start + len as usize];
            if let Some(bad) = used
                .iter()
                .find(|&&class| class < 0 || class as usize >= self.num_classes)
            {
                return Err(ModelError::invalid_input(
                    LABELS_INPUT,
                    format!(
                        "class {bad} in example {row} is outside 0..{}",
                        self.num_classes
                    ),
                ));
            }
        }

        Ok(effective)
    }
}

fn check_batch<B: Backend>(
    name: &'static str,
    lengths: &Tensor<B, 1, Int>,
    batch_size: usize,
) -> Result<(), ModelError> {
    let [len] = lengths.dims();
    if len != batch_size {
        return Err(ModelError::invalid_input(
            name,
            format!("expected {batch_size} values, got {len}"),
        ));
    }
    Ok(())
}

fn int_values<B: Backend, const D: usize>(tensor: &Tensor<B, D, Int>) -> Vec<i64> {
    tensor.to_data().iter::<i64>().collect()
}
