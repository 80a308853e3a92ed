use crate::error::Result;
use crate::model::Param;
use crate::optim::Optimizer;

pub struct Sgd {
    pub learning_rate: f64,
}

impl Sgd {
    pub fn new(learning_rate: f64) -> Sgd {
        Sgd { learning_rate }
    }
}

impl Optimizer for Sgd {
    /// `w ← w − lr · ∇w` for every parameter.
    fn step(&mut self, params: &mut [&mut Param]) -> Result<()> {
        for p in params.iter_mut() {
            let (value, grad) = p.value_and_grad();
            for (w, g) in value.data.iter_mut().zip(&grad.data) {
                *w -= self.learning_rate * g;
            }
        }
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Matrix;

    #[test]
    fn test_step_moves_against_gradient() {
        let mut p = Param::new(Matrix::filled(1, 2, 1.0));
        p.accumulate(&Matrix::from_rows(vec![vec![2.0, -4.0]])).unwrap();
        let mut sgd = Sgd::new(0.5);
        sgd.step(&mut [&mut p]).unwrap();
        assert_eq!(p.value.data, vec![0.0, 3.0]);
    }
}
