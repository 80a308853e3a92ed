use rand::RngCore;
use serde::{Serialize, Deserialize};

use crate::activation::ActivationFunction;
use crate::error::Result;
use crate::math::matrix::Matrix;
use crate::model::{Activation, Context, Dropout, Linear, Module, Param};

/// Token-wise MLP: Linear → activation → Dropout → Linear → Dropout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedForward {
    fc1: Linear,
    act: Activation,
    drop1: Dropout,
    fc2: Linear,
    drop2: Dropout,
}

impl FeedForward {
    pub fn new(
        dim: usize,
        hidden_dim: usize,
        dropout: f64,
        activation: ActivationFunction,
        rng: &mut dyn RngCore,
    ) -> FeedForward {
        FeedForward {
            fc1: Linear::new(dim, hidden_dim, true, rng),
            act: Activation::new(activation),
            drop1: Dropout::new(dropout),
            fc2: Linear::new(hidden_dim, dim, true, rng),
            drop2: Dropout::new(dropout),
        }
    }
}

impl Module for FeedForward {
    fn forward(&mut self, input: &Matrix, ctx: &mut Context<'_>) -> Result<Matrix> {
        let h = self.fc1.forward(input, ctx)?;
        let h = self.act.forward(&h, ctx)?;
        let h = self.drop1.forward(&h, ctx)?;
        let h = self.fc2.forward(&h, ctx)?;
        self.drop2.forward(&h, ctx)
    }

    fn backward(&mut self, grad_output: &Matrix) -> Result<Matrix> {
        let g = self.drop2.backward(grad_output)?;
        let g = self.fc2.backward(&g)?;
        let g = self.drop1.backward(&g)?;
        let g = self.act.backward(&g)?;
        self.fc1.backward(&g)
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut params = self.fc1.params_mut();
        params.extend(self.fc2.params_mut());
        params
    }
}
