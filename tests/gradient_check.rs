//! Finite-difference checks of the hand-written backward passes.

use neutorch::model::{Context, PosEmbeddingKind, ViT, ViTConfig};
use neutorch::{ActivationFunction, Chunk, LossType};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const H: f64 = 1e-5;

fn config(pos_embedding: PosEmbeddingKind, heads: usize, num_tokens: Option<usize>) -> ViTConfig {
    ViTConfig {
        patch_size: [1, 2, 2],
        in_channels: 1,
        out_channels: 3,
        patch_emb_dim: 6,
        depth: 2,
        heads,
        dim_head: if heads == 1 { 6 } else { 3 },
        mlp_dim: 10,
        pos_embedding,
        activation: ActivationFunction::Gelu,
        dropout: 0.0,
        emb_dropout: 0.0,
        num_tokens,
    }
}

fn random_chunk(shape: [usize; 3], rng: &mut StdRng) -> Chunk<f64> {
    let n: usize = shape.iter().product();
    Chunk::from_vec(shape, (0..n).map(|_| rng.gen::<f64>()).collect()).unwrap()
}

fn loss_of(model: &mut ViT, input: &[Chunk<f64>], target: &[Chunk<f64>], loss: LossType) -> f64 {
    let mut rng = StdRng::seed_from_u64(0);
    let out = model.forward(input, &mut Context::eval(&mut rng)).unwrap();
    loss.evaluate(&out, target).unwrap().0
}

fn check(mut model: ViT, loss: LossType, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let shape = [2, 4, 4];
    let input = vec![random_chunk(shape, &mut rng)];
    let target: Vec<Chunk<f64>> = (0..3)
        .map(|_| random_chunk(shape, &mut rng).map(|v| if v > 0.5 { 1.0 } else { 0.0 }))
        .collect();

    model.zero_grad();
    let out = model.forward(&input, &mut Context::eval(&mut rng)).unwrap();
    let (_, grad) = loss.evaluate(&out, &target).unwrap();
    model.backward(&grad).unwrap();
    let analytic: Vec<Vec<f64>> = model
        .params_mut()
        .into_iter()
        .map(|p| p.grad().data.clone())
        .collect();

    for (p, grads) in analytic.iter().enumerate() {
        let picks = [0, grads.len() / 2, grads.len() - 1];
        for &i in &picks {
            model.params_mut()[p].value.data[i] += H;
            let plus = loss_of(&mut model, &input, &target, loss);
            model.params_mut()[p].value.data[i] -= 2.0 * H;
            let minus = loss_of(&mut model, &input, &target, loss);
            model.params_mut()[p].value.data[i] += H;

            let numeric = (plus - minus) / (2.0 * H);
            let a = grads[i];
            assert!(
                (a - numeric).abs() <= 1e-6 + 1e-3 * (a.abs() + numeric.abs()),
                "param {} entry {}: analytic {} vs numeric {}",
                p,
                i,
                a,
                numeric
            );
        }
    }
}

#[test]
fn vit_gradients_match_finite_differences_mse_sin() {
    let mut rng = StdRng::seed_from_u64(11);
    let model = ViT::new(config(PosEmbeddingKind::Sin, 2, None), &mut rng).unwrap();
    check(model, LossType::Mse, 1);
}

#[test]
fn vit_gradients_match_finite_differences_bce_learned() {
    let mut rng = StdRng::seed_from_u64(12);
    let model = ViT::new(config(PosEmbeddingKind::Learned, 2, Some(8)), &mut rng).unwrap();
    check(model, LossType::BinaryCrossEntropy, 2);
}

#[test]
fn vit_gradients_match_finite_differences_single_head_global() {
    let mut rng = StdRng::seed_from_u64(13);
    let model = ViT::new(config(PosEmbeddingKind::Global, 1, None), &mut rng).unwrap();
    check(model, LossType::BinaryCrossEntropy, 3);
}
