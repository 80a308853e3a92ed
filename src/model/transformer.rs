use rand::RngCore;
use serde::{Serialize, Deserialize};

use crate::activation::ActivationFunction;
use crate::error::Result;
use crate::math::matrix::Matrix;
use crate::model::{Attention, Context, FeedForward, LayerNorm, Module, Param};

/// Pre-norm residual block: `x + Attn(LN(x))`, then `x + FF(LN(x))`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformerBlock {
    norm1: LayerNorm,
    attn: Attention,
    norm2: LayerNorm,
    ff: FeedForward,
}

impl TransformerBlock {
    pub fn new(
        dim: usize,
        heads: usize,
        dim_head: usize,
        mlp_dim: usize,
        dropout: f64,
        activation: ActivationFunction,
        rng: &mut dyn RngCore,
    ) -> TransformerBlock {
        TransformerBlock {
            norm1: LayerNorm::new(dim),
            attn: Attention::new(dim, heads, dim_head, dropout, rng),
            norm2: LayerNorm::new(dim),
            ff: FeedForward::new(dim, mlp_dim, dropout, activation, rng),
        }
    }
}

impl Module for TransformerBlock {
    fn forward(&mut self, input: &Matrix, ctx: &mut Context<'_>) -> Result<Matrix> {
        let h = self.norm1.forward(input, ctx)?;
        let x = input.clone() + self.attn.forward(&h, ctx)?;
        let h = self.norm2.forward(&x, ctx)?;
        Ok(x.clone() + self.ff.forward(&h, ctx)?)
    }

    fn backward(&mut self, grad_output: &Matrix) -> Result<Matrix> {
        let g = self.ff.backward(grad_output)?;
        let grad_mid = grad_output.clone() + self.norm2.backward(&g)?;
        let g = self.attn.backward(&grad_mid)?;
        Ok(grad_mid.clone() + self.norm1.backward(&g)?)
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut params = self.norm1.params_mut();
        params.extend(self.attn.params_mut());
        params.extend(self.norm2.params_mut());
        params.extend(self.ff.params_mut());
        params
    }
}

/// A stack of `depth` transformer blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transformer {
    blocks: Vec<TransformerBlock>,
}

impl Transformer {
    pub fn new(
        dim: usize,
        depth: usize,
        heads: usize,
        dim_head: usize,
        mlp_dim: usize,
        dropout: f64,
        activation: ActivationFunction,
        rng: &mut dyn RngCore,
    ) -> Transformer {
        let blocks = (0..depth)
            .map(|_| TransformerBlock::new(dim, heads, dim_head, mlp_dim, dropout, activation, rng))
            .collect();
        Transformer { blocks }
    }
}

impl Module for Transformer {
    fn forward(&mut self, input: &Matrix, ctx: &mut Context<'_>) -> Result<Matrix> {
        let mut x = input.clone();
        for block in &mut self.blocks {
            x = block.forward(&x, ctx)?;
        }
        Ok(x)
    }

    fn backward(&mut self, grad_output: &Matrix) -> Result<Matrix> {
        let mut g = grad_output.clone();
        for block in self.blocks.iter_mut().rev() {
            g = block.backward(&g)?;
        }
        Ok(g)
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        self.blocks.iter_mut().flat_map(|b| b.params_mut()).collect()
    }
}
