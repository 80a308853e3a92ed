use serde::{Serialize, Deserialize};

use crate::error::{NeutorchError, Result};
use crate::math::matrix::Matrix;
use crate::model::{Context, Module, Param};

/// Positional embedding choice as written in experiment files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PosEmbeddingKind {
    #[default]
    #[serde(rename = "none")]
    None,
    /// One learned vector shared by every token.
    #[serde(rename = "global")]
    Global,
    /// Fixed sine/cosine table.
    #[serde(rename = "sin")]
    Sin,
    /// One learned vector per token position.
    #[serde(rename = "learned")]
    Learned,
    /// Conditional positional encoding. Recognised but not supported.
    #[serde(rename = "CPE", alias = "cpe")]
    Cpe,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PositionalEmbedding {
    None,
    Global(Param),
    Sin,
    Learned(Param),
}

impl PositionalEmbedding {
    pub fn new(kind: PosEmbeddingKind, dim: usize, num_tokens: Option<usize>) -> Result<Self> {
        match kind {
            PosEmbeddingKind::None => Ok(PositionalEmbedding::None),
            PosEmbeddingKind::Global => Ok(PositionalEmbedding::Global(Param::new(Matrix::zeros(1, dim)))),
            PosEmbeddingKind::Sin => Ok(PositionalEmbedding::Sin),
            PosEmbeddingKind::Learned => {
                let n = num_tokens.ok_or_else(|| {
                    NeutorchError::config("model.pos_embedding", "`learned` needs a fixed token count")
                })?;
                Ok(PositionalEmbedding::Learned(Param::new(Matrix::zeros(n, dim))))
            }
            PosEmbeddingKind::Cpe => Err(NeutorchError::config(
                "model.pos_embedding",
                "CPE is not supported; use none, global, sin or learned",
            )),
        }
    }
}

/// `PE[pos, 2i] = sin(pos / 10000^(2i/d))`, `PE[pos, 2i+1] = cos(...)`.
pub fn sinusoidal_table(num_tokens: usize, dim: usize) -> Matrix {
    let mut table = Matrix::zeros(num_tokens, dim);
    for pos in 0..num_tokens {
        for j in 0..dim {
            let pair = (j / 2) * 2;
            let angle = pos as f64 / 10000f64.powf(pair as f64 / dim as f64);
            table.set(pos, j, if j % 2 == 0 { angle.sin() } else { angle.cos() });
        }
    }
    table
}

impl Module for PositionalEmbedding {
    fn forward(&mut self, input: &Matrix, _ctx: &mut Context<'_>) -> Result<Matrix> {
        match self {
            PositionalEmbedding::None => Ok(input.clone()),
            PositionalEmbedding::Global(p) => input.add_row_broadcast(&p.value),
            PositionalEmbedding::Sin => Ok(input.clone() + sinusoidal_table(input.rows, input.cols)),
            PositionalEmbedding::Learned(p) => {
                if p.value.shape() != input.shape() {
                    return Err(NeutorchError::ShapeMismatch {
                        context: "PositionalEmbedding::forward (learned)",
                        expected: p.value.shape().to_vec(),
                        actual: input.shape().to_vec(),
                    });
                }
                Ok(input.clone() + p.value.clone())
            }
        }
    }

    fn backward(&mut self, grad_output: &Matrix) -> Result<Matrix> {
        match self {
            PositionalEmbedding::Global(p) => p.accumulate(&grad_output.sum_rows())?,
            PositionalEmbedding::Learned(p) => p.accumulate(grad_output)?,
            PositionalEmbedding::None | PositionalEmbedding::Sin => {}
        }
        Ok(grad_output.clone())
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        match self {
            PositionalEmbedding::Global(p) | PositionalEmbedding::Learned(p) => vec![p],
            PositionalEmbedding::None | PositionalEmbedding::Sin => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_kind_names() {
        let k: PosEmbeddingKind = serde_json::from_str("\"sin\"").unwrap();
        assert_eq!(k, PosEmbeddingKind::Sin);
        let k: PosEmbeddingKind = serde_json::from_str("\"CPE\"").unwrap();
        assert_eq!(k, PosEmbeddingKind::Cpe);
    }

    #[test]
    fn test_cpe_and_unsized_learned_rejected() {
        assert!(PositionalEmbedding::new(PosEmbeddingKind::Cpe, 8, Some(4)).is_err());
        assert!(PositionalEmbedding::new(PosEmbeddingKind::Learned, 8, None).is_err());
    }

    #[test]
    fn test_sinusoidal_first_row() {
        let t = sinusoidal_table(3, 4);
        assert_eq!(t.row(0), &[0.0, 1.0, 0.0, 1.0]);
        assert!((t.get(1, 0) - 1f64.sin()).abs() < 1e-12);
    }

    #[test]
    fn test_global_gradient_sums_tokens() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut pe = PositionalEmbedding::new(PosEmbeddingKind::Global, 2, None).unwrap();
        pe.forward(&Matrix::zeros(3, 2), &mut Context::train(&mut rng)).unwrap();
        pe.backward(&Matrix::filled(3, 2, 1.0)).unwrap();
        let params = pe.params_mut();
        assert_eq!(params.len(), 1);
        assert_eq!(params.into_iter().next().unwrap().grad().data, vec![3.0, 3.0]);
    }
}
