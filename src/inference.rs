use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use crate::activation::sigmoid;
use crate::error::{NeutorchError, Result};
use crate::model::{Context, ViT};
use crate::volume::Chunk;

/// Block origins covering `[0, len)`; the last block is flush with the far edge.
fn block_starts(len: usize, block: usize) -> Vec<usize> {
    let mut starts: Vec<usize> = (0..len.saturating_sub(block)).step_by(block).collect();
    starts.push(len - block);
    starts.dedup();
    starts
}

/// Runs `model` over `image` block by block and returns per-channel
/// probabilities. Blocks overlap only at the far faces, where the outputs
/// are averaged.
pub fn predict_volume(model: &mut ViT, image: &Chunk<f64>, patch_size: [usize; 3]) -> Result<Vec<Chunk<f64>>> {
    let shape = image.shape();
    if (0..3).any(|a| patch_size[a] == 0 || shape[a] < patch_size[a]) {
        return Err(NeutorchError::ShapeMismatch {
            context: "predict_volume (volume smaller than patch)",
            expected: patch_size.to_vec(),
            actual: shape.to_vec(),
        });
    }
    let channels = model.config().out_channels;
    let mut sum = vec![Chunk::new(shape, 0.0); channels];
    let mut count = Chunk::new(shape, 0u32);
    // Eval mode never draws from it.
    let mut rng = StdRng::seed_from_u64(0);

    let zs = block_starts(shape[0], patch_size[0]);
    let ys = block_starts(shape[1], patch_size[1]);
    let xs = block_starts(shape[2], patch_size[2]);
    debug!(blocks = zs.len() * ys.len() * xs.len(), "predicting volume");

    for &z in &zs {
        for &y in &ys {
            for &x in &xs {
                let block = image.crop([z, y, x], patch_size)?;
                let output = model.forward(&[block], &mut Context::eval(&mut rng))?;
                for dz in 0..patch_size[0] {
                    for dy in 0..patch_size[1] {
                        for dx in 0..patch_size[2] {
                            let (gz, gy, gx) = (z + dz, y + dy, x + dx);
                            for (acc, out) in sum.iter_mut().zip(&output) {
                                let v = acc.get(gz, gy, gx) + sigmoid(out.get(dz, dy, dx));
                                acc.set(gz, gy, gx, v);
                            }
                            count.set(gz, gy, gx, count.get(gz, gy, gx) + 1);
                        }
                    }
                }
            }
        }
    }

    for acc in &mut sum {
        for (v, &n) in acc.data_mut().iter_mut().zip(count.data()) {
            *v /= n as f64;
        }
    }
    Ok(sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ViTConfig;

    #[test]
    fn test_block_starts_align_last_block() {
        assert_eq!(block_starts(10, 4), vec![0, 4, 6]);
        assert_eq!(block_starts(8, 4), vec![0, 4]);
        assert_eq!(block_starts(4, 4), vec![0]);
    }

    #[test]
    fn test_prediction_covers_volume_with_probabilities() {
        let config = ViTConfig {
            patch_size: [1, 2, 2],
            out_channels: 3,
            patch_emb_dim: 4,
            depth: 1,
            heads: 1,
            dim_head: 4,
            mlp_dim: 8,
            ..ViTConfig::default()
        };
        let mut model = ViT::new(config, &mut StdRng::seed_from_u64(3)).unwrap();
        let image = Chunk::new([3, 6, 5], 0.5);
        let out = predict_volume(&mut model, &image, [2, 4, 4]).unwrap();
        assert_eq!(out.len(), 3);
        for c in &out {
            assert_eq!(c.shape(), [3, 6, 5]);
            assert!(c.data().iter().all(|&v| v > 0.0 && v < 1.0));
        }
    }

    #[test]
    fn test_volume_smaller_than_patch() {
        let mut model = ViT::new(ViTConfig::default(), &mut StdRng::seed_from_u64(3)).unwrap();
        let image = Chunk::new([2, 8, 8], 0.0);
        assert!(predict_volume(&mut model, &image, [4, 8, 8]).is_err());
    }
}
