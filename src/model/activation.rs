use serde::{Serialize, Deserialize};

use crate::activation::ActivationFunction;
use crate::error::{NeutorchError, Result};
use crate::math::matrix::Matrix;
use crate::model::{Context, Module};

/// Element-wise activation layer. Caches the pre-activation input so the
/// derivative is evaluated at `z`, not at `f(z)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activation {
    pub function: ActivationFunction,
    #[serde(skip)]
    pre_activation: Option<Matrix>,
}

impl Activation {
    pub fn new(function: ActivationFunction) -> Activation {
        Activation { function, pre_activation: None }
    }
}

impl Module for Activation {
    fn forward(&mut self, input: &Matrix, _ctx: &mut Context<'_>) -> Result<Matrix> {
        let f = self.function;
        self.pre_activation = Some(input.clone());
        Ok(input.map(|x| f.function(x)))
    }

    fn backward(&mut self, grad_output: &Matrix) -> Result<Matrix> {
        let z = self.pre_activation.as_ref().ok_or(NeutorchError::NotInitialized("Activation"))?;
        let f = self.function;
        grad_output.hadamard(&z.map(|x| f.derivative(x)))
    }
}
