use serde::{Serialize, Deserialize};

use crate::error::{NeutorchError, Result};
use crate::loss::{BceLoss, MseLoss};
use crate::volume::Chunk;

/// Selects which loss function the training loop uses.
///
/// - `BinaryCrossEntropy` — on raw logits; predictions are `sigmoid(output)`.
/// - `Mse`                — Mean-squared error on raw outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LossType {
    #[default]
    BinaryCrossEntropy,
    Mse,
}

impl LossType {
    pub fn loss(&self, predicted: &[f64], expected: &[f64]) -> f64 {
        match self {
            LossType::BinaryCrossEntropy => BceLoss::loss(predicted, expected),
            LossType::Mse => MseLoss::loss(predicted, expected),
        }
    }

    pub fn derivative(&self, predicted: &[f64], expected: &[f64]) -> Vec<f64> {
        match self {
            LossType::BinaryCrossEntropy => BceLoss::derivative(predicted, expected),
            LossType::Mse => MseLoss::derivative(predicted, expected),
        }
    }

    /// Loss over every channel and voxel, with the gradient per output channel.
    pub fn evaluate(&self, output: &[Chunk<f64>], target: &[Chunk<f64>]) -> Result<(f64, Vec<Chunk<f64>>)> {
        if output.len() != target.len() || output.iter().zip(target).any(|(o, t)| o.shape() != t.shape()) {
            return Err(NeutorchError::ShapeMismatch {
                context: "LossType::evaluate",
                expected: vec![target.len()],
                actual: vec![output.len()],
            });
        }
        let predicted: Vec<f64> = output.iter().flat_map(|c| c.data().iter().copied()).collect();
        let expected: Vec<f64> = target.iter().flat_map(|c| c.data().iter().copied()).collect();
        let loss = self.loss(&predicted, &expected);

        let mut grad = self.derivative(&predicted, &expected).into_iter();
        let mut grads = Vec::with_capacity(output.len());
        for o in output {
            grads.push(Chunk::from_vec(o.shape(), grad.by_ref().take(o.len()).collect())?);
        }
        Ok((loss, grads))
    }
}
