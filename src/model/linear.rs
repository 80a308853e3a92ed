use rand::RngCore;
use serde::{Serialize, Deserialize};

use crate::error::{NeutorchError, Result};
use crate::math::matrix::Matrix;
use crate::model::{Context, Module, Param};

/// Fully connected projection `y = xW + b`.
///
/// `weight` is `in × out`, so each input row (token) maps to an output row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Linear {
    pub weight: Param,
    pub bias: Option<Param>,
    #[serde(skip)]
    cached_input: Option<Matrix>,
}

impl Linear {
    pub fn new(in_features: usize, out_features: usize, bias: bool, rng: &mut dyn RngCore) -> Linear {
        Linear {
            weight: Param::new(Matrix::xavier(in_features, out_features, rng)),
            bias: bias.then(|| Param::new(Matrix::zeros(1, out_features))),
            cached_input: None,
        }
    }

    pub fn in_features(&self) -> usize {
        self.weight.value.rows
    }

    pub fn out_features(&self) -> usize {
        self.weight.value.cols
    }
}

impl Module for Linear {
    fn forward(&mut self, input: &Matrix, _ctx: &mut Context<'_>) -> Result<Matrix> {
        if input.cols != self.in_features() {
            return Err(NeutorchError::ShapeMismatch {
                context: "Linear::forward",
                expected: vec![input.rows, self.in_features()],
                actual: input.shape().to_vec(),
            });
        }
        let mut out = input.matmul(&self.weight.value)?;
        if let Some(bias) = &self.bias {
            out = out.add_row_broadcast(&bias.value)?;
        }
        self.cached_input = Some(input.clone());
        Ok(out)
    }

    fn backward(&mut self, grad_output: &Matrix) -> Result<Matrix> {
        let input = self.cached_input.as_ref().ok_or(NeutorchError::NotInitialized("Linear"))?;
        if grad_output.rows != input.rows || grad_output.cols != self.out_features() {
            return Err(NeutorchError::ShapeMismatch {
                context: "Linear::backward",
                expected: vec![input.rows, self.out_features()],
                actual: grad_output.shape().to_vec(),
            });
        }
        self.weight.accumulate(&input.transpose().matmul(grad_output)?)?;
        if let Some(bias) = &mut self.bias {
            bias.accumulate(&grad_output.sum_rows())?;
        }
        grad_output.matmul(&self.weight.value.transpose())
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut params = vec![&mut self.weight];
        if let Some(bias) = &mut self.bias {
            params.push(bias);
        }
        params
    }
}
