use rand::RngCore;
use serde::{Serialize, Deserialize};

use crate::error::{NeutorchError, Result};
use crate::math::matrix::Matrix;
use crate::model::{Context, Dropout, Linear, Module, Param};

/// Multi-head scaled dot-product self-attention over tokens.
///
/// `to_qkv` projects each token to queries, keys and values for all heads at
/// once (no bias). When a single head already has the model width the
/// output projection is skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attention {
    heads: usize,
    dim_head: usize,
    scale: f64,
    to_qkv: Linear,
    to_out: Option<(Linear, Dropout)>,
    #[serde(skip)]
    cache: Option<AttentionCache>,
}

#[derive(Debug, Clone)]
struct AttentionCache {
    q: Matrix,
    k: Matrix,
    v: Matrix,
    /// Softmax weights, one `n × n` matrix per head.
    attn: Vec<Matrix>,
}

/// Row-wise softmax with max subtraction.
fn softmax_rows(scores: &Matrix) -> Matrix {
    let mut out = scores.clone();
    for i in 0..out.rows {
        let row = out.row_mut(i);
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mut total = 0.0;
        for v in row.iter_mut() {
            *v = (*v - max).exp();
            total += *v;
        }
        for v in row.iter_mut() {
            *v /= total;
        }
    }
    out
}

/// Gradient through a row softmax: `dS = A ⊙ (dA - rowsum(dA ⊙ A))`.
fn softmax_rows_backward(attn: &Matrix, grad: &Matrix) -> Matrix {
    let mut out = Matrix::zeros(attn.rows, attn.cols);
    for i in 0..attn.rows {
        let a = attn.row(i);
        let g = grad.row(i);
        let dot: f64 = a.iter().zip(g).map(|(a, g)| a * g).sum();
        for (o, (a, g)) in out.row_mut(i).iter_mut().zip(a.iter().zip(g)) {
            *o = a * (g - dot);
        }
    }
    out
}

impl Attention {
    pub fn new(dim: usize, heads: usize, dim_head: usize, dropout: f64, rng: &mut dyn RngCore) -> Attention {
        let inner = heads * dim_head;
        let project_out = !(heads == 1 && dim_head == dim);
        Attention {
            heads,
            dim_head,
            scale: (dim_head as f64).powf(-0.5),
            to_qkv: Linear::new(dim, inner * 3, false, rng),
            to_out: project_out.then(|| (Linear::new(inner, dim, true, rng), Dropout::new(dropout))),
            cache: None,
        }
    }

    fn inner_dim(&self) -> usize {
        self.heads * self.dim_head
    }

    /// Softmax weights of the last forward pass, one matrix per head.
    pub fn attention_maps(&self) -> Option<&[Matrix]> {
        self.cache.as_ref().map(|c| c.attn.as_slice())
    }
}

impl Module for Attention {
    fn forward(&mut self, input: &Matrix, ctx: &mut Context<'_>) -> Result<Matrix> {
        let inner = self.inner_dim();
        let dh = self.dim_head;
        let qkv = self.to_qkv.forward(input, ctx)?;
        let q = qkv.slice_cols(0, inner);
        let k = qkv.slice_cols(inner, inner);
        let v = qkv.slice_cols(2 * inner, inner);

        let mut out = Matrix::zeros(input.rows, inner);
        let mut attn = Vec::with_capacity(self.heads);
        for h in 0..self.heads {
            let qh = q.slice_cols(h * dh, dh);
            let kh = k.slice_cols(h * dh, dh);
            let vh = v.slice_cols(h * dh, dh);
            let a = softmax_rows(&qh.matmul(&kh.transpose())?.scale(self.scale));
            out.set_cols(h * dh, &a.matmul(&vh)?);
            attn.push(a);
        }
        self.cache = Some(AttentionCache { q, k, v, attn });

        match &mut self.to_out {
            Some((linear, dropout)) => {
                let y = linear.forward(&out, ctx)?;
                dropout.forward(&y, ctx)
            }
            None => Ok(out),
        }
    }

    fn backward(&mut self, grad_output: &Matrix) -> Result<Matrix> {
        let grad_out = match &mut self.to_out {
            Some((linear, dropout)) => {
                let g = dropout.backward(grad_output)?;
                linear.backward(&g)?
            }
            None => grad_output.clone(),
        };

        let inner = self.inner_dim();
        let dh = self.dim_head;
        let cache = self.cache.as_ref().ok_or(NeutorchError::NotInitialized("Attention"))?;
        if grad_out.shape() != [cache.q.rows, inner] {
            return Err(NeutorchError::ShapeMismatch {
                context: "Attention::backward",
                expected: vec![cache.q.rows, inner],
                actual: grad_out.shape().to_vec(),
            });
        }

        let n = cache.q.rows;
        let mut grad_qkv = Matrix::zeros(n, 3 * inner);
        for h in 0..self.heads {
            let qh = cache.q.slice_cols(h * dh, dh);
            let kh = cache.k.slice_cols(h * dh, dh);
            let vh = cache.v.slice_cols(h * dh, dh);
            let a = &cache.attn[h];
            let d_oh = grad_out.slice_cols(h * dh, dh);

            let d_a = d_oh.matmul(&vh.transpose())?;
            let d_vh = a.transpose().matmul(&d_oh)?;
            let d_s = softmax_rows_backward(a, &d_a).scale(self.scale);
            let d_qh = d_s.matmul(&kh)?;
            let d_kh = d_s.transpose().matmul(&qh)?;

            grad_qkv.set_cols(h * dh, &d_qh);
            grad_qkv.set_cols(inner + h * dh, &d_kh);
            grad_qkv.set_cols(2 * inner + h * dh, &d_vh);
        }
        self.to_qkv.backward(&grad_qkv)
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut params = self.to_qkv.params_mut();
        if let Some((linear, _)) = &mut self.to_out {
            params.extend(linear.params_mut());
        }
        params
    }
}
