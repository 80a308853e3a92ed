use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::error::{NeutorchError, Result};
use crate::math::matrix::Matrix;
use crate::model::{Context, Module};

/// Inverted dropout: kept activations are scaled by `1 / (1 - p)` during
/// training so evaluation needs no rescaling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dropout {
    pub p: f64,
    #[serde(skip)]
    mask: Option<Matrix>,
}

impl Dropout {
    pub fn new(p: f64) -> Dropout {
        Dropout { p, mask: None }
    }
}

impl Module for Dropout {
    fn forward(&mut self, input: &Matrix, ctx: &mut Context<'_>) -> Result<Matrix> {
        if !ctx.is_training() || self.p <= 0.0 {
            self.mask = None;
            return Ok(input.clone());
        }
        let keep = 1.0 / (1.0 - self.p);
        let mut mask = Matrix::zeros(input.rows, input.cols);
        for m in &mut mask.data {
            *m = if ctx.rng.gen::<f64>() < self.p { 0.0 } else { keep };
        }
        let out = input.hadamard(&mask)?;
        self.mask = Some(mask);
        Ok(out)
    }

    fn backward(&mut self, grad_output: &Matrix) -> Result<Matrix> {
        match &self.mask {
            Some(mask) => grad_output.hadamard(mask).map_err(|_| NeutorchError::ShapeMismatch {
                context: "Dropout::backward",
                expected: mask.shape().to_vec(),
                actual: grad_output.shape().to_vec(),
            }),
            None => Ok(grad_output.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_eval_is_identity() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut d = Dropout::new(0.5);
        let x = Matrix::filled(3, 3, 2.0);
        assert_eq!(d.forward(&x, &mut Context::eval(&mut rng)).unwrap(), x);
        assert_eq!(d.backward(&x).unwrap(), x);
    }

    #[test]
    fn test_train_drops_and_rescales() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut d = Dropout::new(0.5);
        let x = Matrix::filled(20, 20, 1.0);
        let y = d.forward(&x, &mut Context::train(&mut rng)).unwrap();
        assert!(y.data.iter().all(|&v| v == 0.0 || v == 2.0));
        let kept = y.data.iter().filter(|&&v| v > 0.0).count();
        assert!(kept > 100 && kept < 300);

        // The same mask gates the gradient.
        let g = d.backward(&Matrix::filled(20, 20, 1.0)).unwrap();
        assert_eq!(g, y);
    }
}
