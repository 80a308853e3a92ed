use serde::{Serialize, Deserialize};

use crate::error::{NeutorchError, Result};
use crate::math::matrix::Matrix;

/// A trainable matrix and its accumulated gradient.
///
/// Gradients are not serialized; a freshly loaded parameter allocates its
/// gradient on first use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub value: Matrix,
    #[serde(skip)]
    grad: Matrix,
}

impl Param {
    pub fn new(value: Matrix) -> Param {
        let grad = Matrix::zeros(value.rows, value.cols);
        Param { value, grad }
    }

    pub fn len(&self) -> usize {
        self.value.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.data.is_empty()
    }

    fn ensure_grad(&mut self) {
        if self.grad.shape() != self.value.shape() {
            self.grad = Matrix::zeros(self.value.rows, self.value.cols);
        }
    }

    pub fn grad(&mut self) -> &Matrix {
        self.ensure_grad();
        &self.grad
    }

    /// Adds `g` to the gradient.
    pub fn accumulate(&mut self, g: &Matrix) -> Result<()> {
        self.ensure_grad();
        if g.shape() != self.value.shape() {
            return Err(NeutorchError::ShapeMismatch {
                context: "Param::accumulate",
                expected: self.value.shape().to_vec(),
                actual: g.shape().to_vec(),
            });
        }
        self.grad.add_assign(g)
    }

    pub fn zero_grad(&mut self) {
        self.ensure_grad();
        self.grad.data.iter_mut().for_each(|g| *g = 0.0);
    }

    pub fn scale_grad(&mut self, factor: f64) {
        self.ensure_grad();
        self.grad.data.iter_mut().for_each(|g| *g *= factor);
    }

    /// Value and gradient together, for optimizer updates.
    pub fn value_and_grad(&mut self) -> (&mut Matrix, &Matrix) {
        self.ensure_grad();
        (&mut self.value, &self.grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulate_and_zero() {
        let mut p = Param::new(Matrix::zeros(1, 2));
        p.accumulate(&Matrix::from_rows(vec![vec![1.0, 2.0]])).unwrap();
        p.accumulate(&Matrix::from_rows(vec![vec![1.0, 2.0]])).unwrap();
        assert_eq!(p.grad().data, vec![2.0, 4.0]);
        p.scale_grad(0.5);
        assert_eq!(p.grad().data, vec![1.0, 2.0]);
        p.zero_grad();
        assert_eq!(p.grad().data, vec![0.0, 0.0]);
    }

    #[test]
    fn test_grad_is_rebuilt_after_deserialize() {
        let p = Param::new(Matrix::filled(2, 2, 1.5));
        let json = serde_json::to_string(&p).unwrap();
        let mut back: Param = serde_json::from_str(&json).unwrap();
        assert_eq!(back.value, p.value);
        assert_eq!(back.grad().shape(), [2, 2]);
    }

    #[test]
    fn test_accumulate_shape_mismatch() {
        let mut p = Param::new(Matrix::zeros(2, 2));
        assert!(p.accumulate(&Matrix::zeros(1, 2)).is_err());
    }
}
