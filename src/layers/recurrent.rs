//! LSTM layers and the bidirectional wrapper used by the recurrent stack.

use crate::layers::he_normal;
use burn::module::{Module, Param};
use burn::nn::{Linear, LinearConfig};
use burn::tensor::activation;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// Single-timestep LSTM cell.
///
/// Gate biases start at zero; the forget gate is offset by a constant 1.
///
/// Gates are laid out as input, forget, candidate, output:
/// - i = σ(W_i x + U_i h + b_i)
/// - f = σ(W_f x + U_f h + b_f + 1)
/// - g = tanh(W_g x + U_g h + b_g)
/// - o = σ(W_o x + U_o h + b_o)
/// - c' = f * c + i * g
/// - h' = o * tanh(c')
#[derive(Module, Debug)]
pub struct LstmCell<B: Backend> {
    input_size: usize,
    hidden_size: usize,
    input_map: Linear<B>,     // input → 4 * hidden_size (zero bias, he_normal)
    recurrent_map: Linear<B>, // hidden → 4 * hidden_size (no bias)
}

impl<B: Backend> LstmCell<B> {
    pub fn new(input_size: usize, hidden_size: usize, device: &B::Device) -> Self {
        let mut input_map = LinearConfig::new(input_size, 4 * hidden_size)
            .with_bias(true)
            .with_initializer(he_normal())
            .init(device);
        input_map.bias = Some(Param::from_tensor(Tensor::zeros(
            [4 * hidden_size],
            device,
        )));

        let recurrent_map = LinearConfig::new(hidden_size, 4 * hidden_size)
            .with_bias(false)
            .init(device);

        Self {
            input_size,
            hidden_size,
            input_map,
            recurrent_map,
        }
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Advances the cell by one timestep.
    ///
    /// `input` is `[batch, input_size]`, `states` is `(hidden, cell)`, each
    /// `[batch, hidden_size]`. Returns the new `(hidden, cell)`.
    pub fn forward(
        &self,
        input: Tensor<B, 2>,
        states: (Tensor<B, 2>, Tensor<B, 2>),
    ) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let (hidden_state, cell_state) = states;

        let z = self.input_map.forward(input) + self.recurrent_map.forward(hidden_state);

        let chunks = z.chunk(4, 1);
        let input_gate = activation::sigmoid(chunks[0].clone());
        let forget_gate = activation::sigmoid(chunks[1].clone() + 1.0);
        let candidate = chunks[2].clone().tanh();
        let output_gate = activation::sigmoid(chunks[3].clone());

        let new_cell = cell_state * forget_gate + candidate * input_gate;
        let new_hidden = new_cell.clone().tanh() * output_gate;

        (new_hidden, new_cell)
    }
}

/// LSTM over a batch-first sequence, returning the full output sequence.
#[derive(Module, Debug)]
pub struct Lstm<B: Backend> {
    cell: LstmCell<B>,
    go_backwards: bool,
}

impl<B: Backend> Lstm<B> {
    pub fn new(input_size: usize, hidden_size: usize, device: &B::Device) -> Self {
        Self {
            cell: LstmCell::new(input_size, hidden_size, device),
            go_backwards: false,
        }
    }

    /// Processes the sequence from the last timestep to the first.
    ///
    /// Outputs are emitted in processing order, so output step 0 belongs to
    /// the last input step.
    pub fn with_go_backwards(mut self, go_backwards: bool) -> Self {
        self.go_backwards = go_backwards;
        self
    }

    pub fn go_backwards(&self) -> bool {
        self.go_backwards
    }

    pub fn hidden_size(&self) -> usize {
        self.cell.hidden_size()
    }

    /// `input` is `[batch, seq_len, input_size]`; returns
    /// `[batch, seq_len, hidden_size]`.
    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let device = input.device();
        let [batch_size, seq_len, input_size] = input.dims();
        let hidden_size = self.cell.hidden_size();

        let input = if self.go_backwards {
            input.flip([1])
        } else {
            input
        };

        let mut hidden = Tensor::<B, 2>::zeros([batch_size, hidden_size], &device);
        let mut cell = Tensor::<B, 2>::zeros([batch_size, hidden_size], &device);
        let mut outputs: Vec<Tensor<B, 2>> = Vec::with_capacity(seq_len);

        for t in 0..seq_len {
            let step_input = input
                .clone()
                .narrow(1, t, 1)
                .reshape([batch_size, input_size]);

            (hidden, cell) = self.cell.forward(step_input, (hidden, cell));
            outputs.push(hidden.clone());
        }

        Tensor::stack(outputs, 1)
    }
}

/// How the forward and backward passes of a [`Bidirectional`] layer combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    /// Element-wise sum; output width equals the hidden width.
    #[default]
    Add,
    /// Feature-axis concatenation; output width is twice the hidden width.
    Concat,
}

impl MergeMode {
    pub fn output_size(&self, hidden_size: usize) -> usize {
        match self {
            MergeMode::Add => hidden_size,
            MergeMode::Concat => 2 * hidden_size,
        }
    }

    pub fn to_id(&self) -> u8 {
        match self {
            MergeMode::Add => 0,
            MergeMode::Concat => 1,
        }
    }

    pub fn from_id(id: u8) -> Self {
        match id {
            1 => MergeMode::Concat,
            _ => MergeMode::Add,
        }
    }
}

/// Two LSTMs over the same sequence in opposite time directions.
///
/// The backward output is flipped back into forward time order before the
/// merge, so timestep `t` of both halves refers to input timestep `t`.
#[derive(Module, Debug)]
pub struct Bidirectional<B: Backend> {
    forward_pass: Lstm<B>,
    backward_pass: Lstm<B>,
    merge_id: u8,
}

impl<B: Backend> Bidirectional<B> {
    pub fn new(
        input_size: usize,
        hidden_size: usize,
        merge: MergeMode,
        device: &B::Device,
    ) -> Self {
        Self {
            forward_pass: Lstm::new(input_size, hidden_size, device),
            backward_pass: Lstm::new(input_size, hidden_size, device).with_go_backwards(true),
            merge_id: merge.to_id(),
        }
    }

    pub fn merge_mode(&self) -> MergeMode {
        MergeMode::from_id(self.merge_id)
    }

    pub fn output_size(&self) -> usize {
        self.merge_mode().output_size(self.forward_pass.hidden_size())
    }

    /// Runs both directions and returns their outputs in forward time order,
    /// before merging.
    pub fn forward_directions(&self, input: Tensor<B, 3>) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let forward = self.forward_pass.forward(input.clone());
        let backward = self.backward_pass.forward(input).flip([1]);
        (forward, backward)
    }

    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let (forward, backward) = self.forward_directions(input);

        match self.merge_mode() {
            MergeMode::Add => forward + backward,
            MergeMode::Concat => Tensor::cat(vec![forward, backward], 2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    fn device() -> <TestBackend as burn::tensor::backend::BackendTypes>::Device {
        Default::default()
    }

    fn max_abs_diff(a: Tensor<TestBackend, 3>, b: Tensor<TestBackend, 3>) -> f32 {
        (a - b).abs().max().into_scalar()
    }

    #[test]
    fn test_lstm_cell_forward_shapes() {
        let device = device();
        let cell = LstmCell::<TestBackend>::new(20, 50, &device);

        let input = Tensor::<TestBackend, 2>::zeros([4, 20], &device);
        let h = Tensor::<TestBackend, 2>::zeros([4, 50], &device);
        let c = Tensor::<TestBackend, 2>::zeros([4, 50], &device);
        let (new_h, new_c) = cell.forward(input, (h, c));

        assert_eq!(cell.input_size(), 20);
        assert_eq!(cell.hidden_size(), 50);
        assert_eq!(new_h.dims(), [4, 50]);
        assert_eq!(new_c.dims(), [4, 50]);
    }

    #[test]
    fn test_lstm_cell_zero_input_and_state_stay_zero() {
        let device = device();
        let cell = LstmCell::<TestBackend>::new(10, 20, &device);

        let (new_h, new_c) = cell.forward(
            Tensor::zeros([2, 10], &device),
            (
                Tensor::zeros([2, 20], &device),
                Tensor::zeros([2, 20], &device),
            ),
        );

        assert_eq!(new_c.abs().max().into_scalar(), 0.0);
        assert_eq!(new_h.abs().max().into_scalar(), 0.0);
    }

    #[test]
    fn test_lstm_cell_forget_gate_starts_at_sigmoid_one() {
        // Zero input and hidden state leave only the forget offset:
        // c' = sigmoid(1) * c and h' = 0.5 * tanh(c').
        let device = device();
        let cell = LstmCell::<TestBackend>::new(3, 4, &device);

        let (new_h, new_c) = cell.forward(
            Tensor::zeros([1, 3], &device),
            (
                Tensor::zeros([1, 4], &device),
                Tensor::ones([1, 4], &device) * 2.0,
            ),
        );

        let forget = 1.0 / (1.0 + (-1.0f32).exp());
        let cell_values: Vec<f32> = new_c.to_data().to_vec().unwrap();
        let hidden_values: Vec<f32> = new_h.to_data().to_vec().unwrap();
        for (c, h) in cell_values.iter().zip(&hidden_values) {
            assert!((c - 2.0 * forget).abs() < 1e-5);
            assert!((h - 0.5 * (2.0 * forget).tanh()).abs() < 1e-5);
        }
    }

    #[test]
    fn test_lstm_returns_full_sequence() {
        let device = device();
        let lstm = Lstm::<TestBackend>::new(6, 9, &device);

        let output = lstm.forward(Tensor::zeros([3, 11, 6], &device));

        assert_eq!(output.dims(), [3, 11, 9]);
        assert!(!lstm.go_backwards());
    }

    #[test]
    fn test_go_backwards_processes_reversed_sequence() {
        let device = device();
        let lstm = Lstm::<TestBackend>::new(4, 5, &device);
        let input =
            Tensor::<TestBackend, 3>::random([2, 6, 4], Distribution::Uniform(-1.0, 1.0), &device);

        let expected = lstm.forward(input.clone().flip([1]));
        let lstm = lstm.with_go_backwards(true);
        let actual = lstm.forward(input);

        assert!(max_abs_diff(actual, expected) < 1e-6);
    }

    #[test]
    fn test_additive_merge_keeps_hidden_width() {
        let device = device();
        let layer = Bidirectional::<TestBackend>::new(8, 16, MergeMode::Add, &device);

        let output = layer.forward(Tensor::ones([2, 5, 8], &device));

        assert_eq!(layer.merge_mode(), MergeMode::Add);
        assert_eq!(layer.output_size(), 16);
        assert_eq!(output.dims(), [2, 5, 16]);
    }

    #[test]
    fn test_concat_merge_doubles_hidden_width() {
        let device = device();
        let layer = Bidirectional::<TestBackend>::new(8, 16, MergeMode::Concat, &device);

        let output = layer.forward(Tensor::ones([2, 5, 8], &device));

        assert_eq!(layer.merge_mode(), MergeMode::Concat);
        assert_eq!(layer.output_size(), 32);
        assert_eq!(output.dims(), [2, 5, 32]);
    }

    #[test]
    fn test_merge_combines_directions_in_forward_time_order() {
        let device = device();
        let layer = Bidirectional::<TestBackend>::new(3, 4, MergeMode::Add, &device);
        let input =
            Tensor::<TestBackend, 3>::random([1, 7, 3], Distribution::Uniform(-1.0, 1.0), &device);

        let (forward, backward) = layer.forward_directions(input.clone());
        let merged = layer.forward(input);

        assert!(max_abs_diff(merged, forward + backward) < 1e-6);
    }

    #[test]
    fn test_backward_direction_last_step_sees_only_last_input() {
        // After flipping back, the backward output at the final timestep has
        // consumed exactly one input step: the final one.
        let device = device();
        let layer = Bidirectional::<TestBackend>::new(3, 4, MergeMode::Concat, &device);
        let input =
            Tensor::<TestBackend, 3>::random([1, 5, 3], Distribution::Uniform(-1.0, 1.0), &device);

        let (_, backward) = layer.forward_directions(input.clone());
        let last_step = layer.backward_pass.forward(input.narrow(1, 4, 1));

        assert!(max_abs_diff(backward.narrow(1, 4, 1), last_step) < 1e-6);
    }
}
