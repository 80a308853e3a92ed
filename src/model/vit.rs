use rand::RngCore;
use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::activation::ActivationFunction;
use crate::error::{NeutorchError, Result};
use crate::math::matrix::Matrix;
use crate::model::{
    Context, Dropout, Linear, Module, Param, PosEmbeddingKind, PositionalEmbedding, Transformer,
};
use crate::volume::Chunk;

/// Architecture of a [`ViT`]. Stored alongside weights in every checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViTConfig {
    /// Token size `[pz, py, px]` in voxels.
    pub patch_size: [usize; 3],
    pub in_channels: usize,
    pub out_channels: usize,
    pub patch_emb_dim: usize,
    pub depth: usize,
    pub heads: usize,
    pub dim_head: usize,
    pub mlp_dim: usize,
    pub pos_embedding: PosEmbeddingKind,
    pub activation: ActivationFunction,
    pub dropout: f64,
    pub emb_dropout: f64,
    /// Tokens per input; required by `learned` positional embeddings.
    pub num_tokens: Option<usize>,
}

impl Default for ViTConfig {
    fn default() -> Self {
        ViTConfig {
            patch_size: [4, 8, 8],
            in_channels: 1,
            out_channels: 3,
            patch_emb_dim: 128,
            depth: 4,
            heads: 4,
            dim_head: 64,
            mlp_dim: 256,
            pos_embedding: PosEmbeddingKind::None,
            activation: ActivationFunction::Gelu,
            dropout: 0.0,
            emb_dropout: 0.0,
            num_tokens: None,
        }
    }
}

impl ViTConfig {
    pub fn validate(&self) -> Result<()> {
        if self.patch_size.iter().any(|&p| p == 0) {
            return Err(NeutorchError::config("model.patch_size", "every axis must be positive"));
        }
        for (field, value) in [
            ("model.in_channels", self.in_channels),
            ("model.out_channels", self.out_channels),
            ("model.patch_emb_dim", self.patch_emb_dim),
            ("model.heads", self.heads),
            ("model.dim_head", self.dim_head),
            ("model.mlp_dim", self.mlp_dim),
        ] {
            if value == 0 {
                return Err(NeutorchError::config(field, "must be positive"));
            }
        }
        for (field, p) in [("model.dropout", self.dropout), ("model.emb_dropout", self.emb_dropout)] {
            if !(0.0..1.0).contains(&p) {
                return Err(NeutorchError::config(field, format!("must be in [0, 1), got {}", p)));
            }
        }
        if self.pos_embedding == PosEmbeddingKind::Cpe {
            return Err(NeutorchError::config(
                "model.pos_embedding",
                "CPE is not supported; use none, global, sin or learned",
            ));
        }
        if self.pos_embedding == PosEmbeddingKind::Learned && self.num_tokens.is_none() {
            return Err(NeutorchError::config(
                "model.pos_embedding",
                "`learned` needs a fixed token count",
            ));
        }
        Ok(())
    }

    /// Values per input token: `in_channels · pz · py · px`.
    pub fn patch_dim_in(&self) -> usize {
        self.in_channels * self.patch_size.iter().product::<usize>()
    }

    pub fn patch_dim_out(&self) -> usize {
        self.out_channels * self.patch_size.iter().product::<usize>()
    }

    /// Token grid for a volume, failing if the shape is not a multiple of the patch size.
    pub fn token_grid(&self, shape: [usize; 3]) -> Result<[usize; 3]> {
        if (0..3).any(|a| shape[a] == 0 || shape[a] % self.patch_size[a] != 0) {
            return Err(NeutorchError::ShapeMismatch {
                context: "ViT token grid (volume must be a multiple of patch_size)",
                expected: self.patch_size.to_vec(),
                actual: shape.to_vec(),
            });
        }
        Ok([
            shape[0] / self.patch_size[0],
            shape[1] / self.patch_size[1],
            shape[2] / self.patch_size[2],
        ])
    }
}

/// Splits channels of shape `[Z, Y, X]` into non-overlapping `patch_size`
/// tokens. Tokens are ordered z-major over the grid; each token is laid out
/// as `(c, pz, py, px)`.
pub fn patchify(channels: &[Chunk<f64>], patch_size: [usize; 3]) -> Result<Matrix> {
    let shape = channels.first().map(|c| c.shape()).ok_or_else(|| NeutorchError::ShapeMismatch {
        context: "patchify (no channels)",
        expected: vec![1],
        actual: vec![0],
    })?;
    if let Some(bad) = channels.iter().find(|c| c.shape() != shape) {
        return Err(NeutorchError::ShapeMismatch {
            context: "patchify (channel shapes differ)",
            expected: shape.to_vec(),
            actual: bad.shape().to_vec(),
        });
    }
    let [pz, py, px] = patch_size;
    if (0..3).any(|a| shape[a] % patch_size[a] != 0) {
        return Err(NeutorchError::ShapeMismatch {
            context: "patchify (volume must be a multiple of patch_size)",
            expected: patch_size.to_vec(),
            actual: shape.to_vec(),
        });
    }
    let grid = [shape[0] / pz, shape[1] / py, shape[2] / px];
    let token_len = channels.len() * pz * py * px;
    let mut tokens = Matrix::zeros(grid.iter().product(), token_len);

    let mut t = 0;
    for gz in 0..grid[0] {
        for gy in 0..grid[1] {
            for gx in 0..grid[2] {
                let row = tokens.row_mut(t);
                let mut i = 0;
                for chunk in channels {
                    for dz in 0..pz {
                        for dy in 0..py {
                            for dx in 0..px {
                                row[i] = chunk.get(gz * pz + dz, gy * py + dy, gx * px + dx);
                                i += 1;
                            }
                        }
                    }
                }
                t += 1;
            }
        }
    }
    Ok(tokens)
}

/// Inverse of [`patchify`].
pub fn unpatchify(
    tokens: &Matrix,
    channels: usize,
    shape: [usize; 3],
    patch_size: [usize; 3],
) -> Result<Vec<Chunk<f64>>> {
    let [pz, py, px] = patch_size;
    let grid = [shape[0] / pz, shape[1] / py, shape[2] / px];
    let expected = [grid.iter().product::<usize>(), channels * pz * py * px];
    if tokens.shape() != expected {
        return Err(NeutorchError::ShapeMismatch {
            context: "unpatchify",
            expected: expected.to_vec(),
            actual: tokens.shape().to_vec(),
        });
    }
    let mut out = vec![Chunk::new(shape, 0.0); channels];

    let mut t = 0;
    for gz in 0..grid[0] {
        for gy in 0..grid[1] {
            for gx in 0..grid[2] {
                let row = tokens.row(t);
                let mut i = 0;
                for chunk in out.iter_mut() {
                    for dz in 0..pz {
                        for dy in 0..py {
                            for dx in 0..px {
                                chunk.set(gz * pz + dz, gy * py + dy, gx * px + dx, row[i]);
                                i += 1;
                            }
                        }
                    }
                }
                t += 1;
            }
        }
    }
    Ok(out)
}

/// 3D Vision Transformer producing a dense per-voxel output.
///
/// Input channels are cut into tokens, embedded, passed through the
/// transformer and projected back to `out_channels` voxel values per token.
/// The output has the input's spatial shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViT {
    config: ViTConfig,
    embed_patch: Linear,
    pos_embedding: PositionalEmbedding,
    dropout: Dropout,
    transformer: Transformer,
    unembed_patch: Linear,
    #[serde(skip)]
    input_shape: Option<[usize; 3]>,
}

impl ViT {
    pub fn new(config: ViTConfig, rng: &mut dyn RngCore) -> Result<ViT> {
        config.validate()?;
        let dim = config.patch_emb_dim;
        Ok(ViT {
            embed_patch: Linear::new(config.patch_dim_in(), dim, true, rng),
            pos_embedding: PositionalEmbedding::new(config.pos_embedding, dim, config.num_tokens)?,
            dropout: Dropout::new(config.emb_dropout),
            transformer: Transformer::new(
                dim,
                config.depth,
                config.heads,
                config.dim_head,
                config.mlp_dim,
                config.dropout,
                config.activation,
                rng,
            ),
            unembed_patch: Linear::new(dim, config.patch_dim_out(), true, rng),
            config,
            input_shape: None,
        })
    }

    pub fn config(&self) -> &ViTConfig {
        &self.config
    }

    pub fn num_parameters(&mut self) -> usize {
        self.params_mut().iter().map(|p| p.len()).sum()
    }

    /// Dense forward pass over `in_channels` volumes of equal shape.
    pub fn forward(&mut self, input: &[Chunk<f64>], ctx: &mut Context<'_>) -> Result<Vec<Chunk<f64>>> {
        if input.len() != self.config.in_channels {
            return Err(NeutorchError::ShapeMismatch {
                context: "ViT::forward (input channels)",
                expected: vec![self.config.in_channels],
                actual: vec![input.len()],
            });
        }
        let shape = input[0].shape();
        self.config.token_grid(shape)?;
        let tokens = patchify(input, self.config.patch_size)?;
        let out = self.forward_tokens(&tokens, ctx)?;
        self.input_shape = Some(shape);
        unpatchify(&out, self.config.out_channels, shape, self.config.patch_size)
    }

    pub fn forward_tokens(&mut self, tokens: &Matrix, ctx: &mut Context<'_>) -> Result<Matrix> {
        let x = self.embed_patch.forward(tokens, ctx)?;
        debug!(tokens = x.rows, dim = x.cols, "post patch embedding");
        let x = self.pos_embedding.forward(&x, ctx)?;
        let x = self.dropout.forward(&x, ctx)?;
        let x = self.transformer.forward(&x, ctx)?;
        self.unembed_patch.forward(&x, ctx)
    }

    /// Backpropagates per-channel output gradients from the last `forward`.
    pub fn backward(&mut self, grad_output: &[Chunk<f64>]) -> Result<()> {
        let shape = self.input_shape.ok_or(NeutorchError::NotInitialized("ViT"))?;
        if grad_output.len() != self.config.out_channels || grad_output.iter().any(|g| g.shape() != shape) {
            return Err(NeutorchError::ShapeMismatch {
                context: "ViT::backward",
                expected: vec![self.config.out_channels, shape[0], shape[1], shape[2]],
                actual: vec![
                    grad_output.len(),
                    grad_output.first().map_or(0, |g| g.shape()[0]),
                    grad_output.first().map_or(0, |g| g.shape()[1]),
                    grad_output.first().map_or(0, |g| g.shape()[2]),
                ],
            });
        }
        let grad_tokens = patchify(grad_output, self.config.patch_size)?;
        self.backward_tokens(&grad_tokens)?;
        Ok(())
    }

    pub fn backward_tokens(&mut self, grad_output: &Matrix) -> Result<Matrix> {
        let g = self.unembed_patch.backward(grad_output)?;
        let g = self.transformer.backward(&g)?;
        let g = self.dropout.backward(&g)?;
        let g = self.pos_embedding.backward(&g)?;
        self.embed_patch.backward(&g)
    }

    pub fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut params = self.embed_patch.params_mut();
        params.extend(self.pos_embedding.params_mut());
        params.extend(self.transformer.params_mut());
        params.extend(self.unembed_patch.params_mut());
        params
    }

    pub fn zero_grad(&mut self) {
        for p in self.params_mut() {
            p.zero_grad();
        }
    }

    pub fn scale_grad(&mut self, factor: f64) {
        for p in self.params_mut() {
            p.scale_grad(factor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    pub(crate) fn tiny_config() -> ViTConfig {
        ViTConfig {
            patch_size: [1, 2, 2],
            in_channels: 1,
            out_channels: 3,
            patch_emb_dim: 8,
            depth: 2,
            heads: 2,
            dim_head: 4,
            mlp_dim: 16,
            pos_embedding: PosEmbeddingKind::Sin,
            activation: ActivationFunction::Gelu,
            dropout: 0.0,
            emb_dropout: 0.0,
            num_tokens: None,
        }
    }

    fn ramp(shape: [usize; 3]) -> Chunk<f64> {
        let n: usize = shape.iter().product();
        Chunk::from_vec(shape, (0..n).map(|i| i as f64).collect()).unwrap()
    }

    #[test]
    fn test_patchify_layout() {
        let c = ramp([2, 2, 4]);
        let tokens = patchify(&[c.clone()], [1, 2, 2]).unwrap();
        assert_eq!(tokens.shape(), [4, 4]);
        // Token 1 is grid (0, 0, 1): x in 2..4 of section 0.
        assert_eq!(tokens.row(1), &[2.0, 3.0, 6.0, 7.0]);
        let back = unpatchify(&tokens, 1, [2, 2, 4], [1, 2, 2]).unwrap();
        assert_eq!(back[0], c);
    }

    #[test]
    fn test_patchify_channel_major_tokens() {
        let a = ramp([1, 1, 2]);
        let b = a.map(|v| v + 10.0);
        let tokens = patchify(&[a, b], [1, 1, 2]).unwrap();
        assert_eq!(tokens.row(0), &[0.0, 1.0, 10.0, 11.0]);
    }

    #[test]
    fn test_forward_preserves_spatial_shape() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut vit = ViT::new(tiny_config(), &mut rng).unwrap();
        let input = vec![ramp([2, 4, 4]).map(|v| v / 32.0)];
        let out = vit.forward(&input, &mut Context::eval(&mut rng)).unwrap();
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|c| c.shape() == [2, 4, 4]));
    }

    #[test]
    fn test_forward_rejects_indivisible_input() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut vit = ViT::new(tiny_config(), &mut rng).unwrap();
        let input = vec![ramp([2, 3, 4])];
        assert!(vit.forward(&input, &mut Context::eval(&mut rng)).is_err());
    }

    #[test]
    fn test_learned_embedding_checks_token_count() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut cfg = tiny_config();
        cfg.pos_embedding = PosEmbeddingKind::Learned;
        assert!(ViT::new(cfg.clone(), &mut rng).is_err());

        cfg.num_tokens = Some(8);
        let mut vit = ViT::new(cfg, &mut rng).unwrap();
        assert!(vit.forward(&[ramp([2, 4, 4])], &mut Context::eval(&mut rng)).is_ok());
        assert!(vit.forward(&[ramp([1, 4, 4])], &mut Context::eval(&mut rng)).is_err());
    }

    #[test]
    fn test_serde_round_trip_keeps_outputs() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut vit = ViT::new(tiny_config(), &mut rng).unwrap();
        let input = vec![ramp([1, 2, 2]).map(|v| v / 4.0)];
        let before = vit.forward(&input, &mut Context::eval(&mut rng)).unwrap();

        let json = serde_json::to_string(&vit).unwrap();
        let mut loaded: ViT = serde_json::from_str(&json).unwrap();
        let after = loaded.forward(&input, &mut Context::eval(&mut rng)).unwrap();
        for (a, b) in before.iter().zip(&after) {
            for (x, y) in a.data().iter().zip(b.data()) {
                assert!((x - y).abs() < 1e-12);
            }
        }
        assert_eq!(loaded.config(), vit.config());
    }

    #[test]
    fn test_backward_requires_forward() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut vit = ViT::new(tiny_config(), &mut rng).unwrap();
        let grad = vec![Chunk::new([1, 2, 2], 0.0); 3];
        assert!(matches!(vit.backward(&grad), Err(NeutorchError::NotInitialized(_))));
    }
}
