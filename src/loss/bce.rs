use crate::activation::sigmoid;

/// Binary cross-entropy computed on logits.
pub struct BceLoss;

impl BceLoss {
    /// Scalar BCE: mean(max(z, 0) − z·y + ln(1 + e^−|z|))
    pub fn loss(logits: &[f64], expected: &[f64]) -> f64 {
        let n = logits.len() as f64;
        logits.iter().zip(expected.iter())
            .map(|(z, y)| z.max(0.0) - z * y + (-z.abs()).exp().ln_1p())
            .sum::<f64>() / n
    }

    /// Per-logit gradient: (σ(z) − y) / n
    pub fn derivative(logits: &[f64], expected: &[f64]) -> Vec<f64> {
        let n = logits.len() as f64;
        logits.iter().zip(expected.iter())
            .map(|(z, y)| (sigmoid(*z) - y) / n)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_probability_form() {
        let z = [-2.0, 0.0, 3.0];
        let y = [0.0, 1.0, 1.0];
        let naive: f64 = z.iter().zip(&y)
            .map(|(z, y): (&f64, &f64)| {
                let p = sigmoid(*z);
                -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
            })
            .sum::<f64>() / 3.0;
        assert!((BceLoss::loss(&z, &y) - naive).abs() < 1e-12);
    }

    #[test]
    fn test_large_logits_stay_finite() {
        let l = BceLoss::loss(&[1000.0, -1000.0], &[0.0, 1.0]);
        assert!((l - 1000.0).abs() < 1e-9);
        let g = BceLoss::derivative(&[1000.0, -1000.0], &[0.0, 1.0]);
        assert_eq!(g, vec![0.5, -0.5]);
    }
}
