//! A 3D Vision Transformer with hand-written backpropagation.
//!
//! Every component works on `tokens × features` matrices and implements
//! [`Module`]: `forward` caches what `backward` needs, `backward` returns
//! the gradient with respect to its input and accumulates parameter
//! gradients into each [`Param`].

pub mod param;
pub mod linear;
pub mod layer_norm;
pub mod dropout;
pub mod activation;
pub mod feed_forward;
pub mod attention;
pub mod transformer;
pub mod embedding;
pub mod vit;

use rand::RngCore;

use crate::error::Result;
use crate::math::matrix::Matrix;

pub use param::Param;
pub use linear::Linear;
pub use layer_norm::LayerNorm;
pub use dropout::Dropout;
pub use activation::Activation;
pub use feed_forward::FeedForward;
pub use attention::Attention;
pub use transformer::{Transformer, TransformerBlock};
pub use embedding::{PositionalEmbedding, PosEmbeddingKind};
pub use vit::{ViT, ViTConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// Per-call state threaded through a forward pass.
pub struct Context<'a> {
    pub mode: Mode,
    pub rng: &'a mut dyn RngCore,
}

impl<'a> Context<'a> {
    pub fn train(rng: &'a mut dyn RngCore) -> Self {
        Context { mode: Mode::Train, rng }
    }

    pub fn eval(rng: &'a mut dyn RngCore) -> Self {
        Context { mode: Mode::Eval, rng }
    }

    pub fn is_training(&self) -> bool {
        self.mode == Mode::Train
    }
}

pub trait Module {
    fn forward(&mut self, input: &Matrix, ctx: &mut Context<'_>) -> Result<Matrix>;

    /// Gradient w.r.t. the last forward input; parameter gradients are accumulated.
    fn backward(&mut self, grad_output: &Matrix) -> Result<Matrix>;

    fn params_mut(&mut self) -> Vec<&mut Param> {
        Vec::new()
    }
}
