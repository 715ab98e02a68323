//! Training-side pieces of the model: the CTC loss head and its named inputs.

mod loss;

pub use loss::{CtcLossHead, INPUT_LENGTH_INPUT, LABEL_LENGTH_INPUT, LABELS_INPUT};
