use serde::{Serialize, Deserialize};

use crate::error::{NeutorchError, Result};
use crate::math::matrix::Matrix;
use crate::model::{Context, Module, Param};

/// Normalizes each token over its features, then applies a learnable
/// affine transform: `y = (x - mean) / sqrt(var + eps) * gamma + beta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerNorm {
    pub gamma: Param,
    pub beta: Param,
    eps: f64,
    #[serde(skip)]
    cache: Option<(Matrix, Vec<f64>)>,
}

impl LayerNorm {
    pub fn new(dim: usize) -> LayerNorm {
        LayerNorm {
            gamma: Param::new(Matrix::filled(1, dim, 1.0)),
            beta: Param::new(Matrix::zeros(1, dim)),
            eps: 1e-5,
            cache: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.gamma.value.cols
    }
}

impl Module for LayerNorm {
    fn forward(&mut self, input: &Matrix, _ctx: &mut Context<'_>) -> Result<Matrix> {
        let dim = self.dim();
        if input.cols != dim {
            return Err(NeutorchError::ShapeMismatch {
                context: "LayerNorm::forward",
                expected: vec![input.rows, dim],
                actual: input.shape().to_vec(),
            });
        }
        let mut x_hat = Matrix::zeros(input.rows, dim);
        let mut inv_std = Vec::with_capacity(input.rows);
        let mut out = Matrix::zeros(input.rows, dim);

        for i in 0..input.rows {
            let row = input.row(i);
            let mean = row.iter().sum::<f64>() / dim as f64;
            let var = row.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / dim as f64;
            let s = 1.0 / (var + self.eps).sqrt();
            inv_std.push(s);
            for j in 0..dim {
                let n = (row[j] - mean) * s;
                x_hat.set(i, j, n);
                out.set(i, j, n * self.gamma.value.data[j] + self.beta.value.data[j]);
            }
        }

        self.cache = Some((x_hat, inv_std));
        Ok(out)
    }

    fn backward(&mut self, grad_output: &Matrix) -> Result<Matrix> {
        let (x_hat, inv_std) = self.cache.as_ref().ok_or(NeutorchError::NotInitialized("LayerNorm"))?;
        if grad_output.shape() != x_hat.shape() {
            return Err(NeutorchError::ShapeMismatch {
                context: "LayerNorm::backward",
                expected: x_hat.shape().to_vec(),
                actual: grad_output.shape().to_vec(),
            });
        }
        let dim = x_hat.cols;
        let n = dim as f64;

        self.gamma.accumulate(&grad_output.hadamard(x_hat)?.sum_rows())?;
        self.beta.accumulate(&grad_output.sum_rows())?;

        let mut grad_input = Matrix::zeros(x_hat.rows, dim);
        for i in 0..x_hat.rows {
            let g = grad_output.row(i);
            let xh = x_hat.row(i);
            let dxh: Vec<f64> = g.iter().zip(&self.gamma.value.data).map(|(g, w)| g * w).collect();
            let mean_dxh = dxh.iter().sum::<f64>() / n;
            let mean_dxh_xh = dxh.iter().zip(xh).map(|(d, x)| d * x).sum::<f64>() / n;
            for j in 0..dim {
                grad_input.set(i, j, inv_std[i] * (dxh[j] - mean_dxh - xh[j] * mean_dxh_xh));
            }
        }
        Ok(grad_input)
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        vec![&mut self.gamma, &mut self.beta]
    }
}
