use rand::{Rng, RngCore};
use serde::{Serialize, Deserialize};
use std::f64::consts::PI;
use std::ops::{Add, Sub, Mul};

use crate::error::{NeutorchError, Result};

/// Dense row-major matrix. In the model every matrix is `tokens × features`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

/// Samples a single value from N(0, 1) using the Box-Muller transform.
pub fn sample_standard_normal(rng: &mut dyn RngCore) -> f64 {
    // Both uniforms in (0, 1] to avoid log(0).
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = 1.0 - rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Matrix {
        Matrix::filled(rows, cols, 0.0)
    }

    pub fn filled(rows: usize, cols: usize, value: f64) -> Matrix {
        Matrix { rows, cols, data: vec![value; rows * cols] }
    }

    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> Result<Matrix> {
        if data.len() != rows * cols {
            return Err(NeutorchError::ShapeMismatch {
                context: "Matrix::from_vec",
                expected: vec![rows * cols],
                actual: vec![data.len()],
            });
        }
        Ok(Matrix { rows, cols, data })
    }

    /// Builds a matrix from equal-length rows. Panics on ragged input.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Matrix {
        let n = rows.len();
        let cols = rows.first().map_or(0, |r| r.len());
        let mut data = Vec::with_capacity(n * cols);
        for row in rows {
            assert_eq!(row.len(), cols, "Matrix::from_rows: ragged rows");
            data.extend(row);
        }
        Matrix { rows: n, cols, data }
    }

    fn normal(rows: usize, cols: usize, std_dev: f64, rng: &mut dyn RngCore) -> Matrix {
        let data = (0..rows * cols)
            .map(|_| sample_standard_normal(rng) * std_dev)
            .collect();
        Matrix { rows, cols, data }
    }

    /// He initialization: samples from N(0, sqrt(2 / fan_in)).
    pub fn he(rows: usize, cols: usize, rng: &mut dyn RngCore) -> Matrix {
        Matrix::normal(rows, cols, (2.0 / rows.max(1) as f64).sqrt(), rng)
    }

    /// Xavier (Glorot) initialization: samples from N(0, sqrt(2 / (fan_in + fan_out))).
    ///
    /// Weights are stored `fan_in × fan_out`. Used for every linear projection in the transformer, which is
    /// followed by LayerNorm, GELU or nothing at all.
    pub fn xavier(rows: usize, cols: usize, rng: &mut dyn RngCore) -> Matrix {
        Matrix::normal(rows, cols, (2.0 / (rows + cols).max(1) as f64).sqrt(), rng)
    }

    pub fn shape(&self) -> [usize; 2] {
        [self.rows, self.cols]
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.cols + col] = value;
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn row_mut(&mut self, row: usize) -> &mut [f64] {
        let cols = self.cols;
        &mut self.data[row * cols..(row + 1) * cols]
    }

    pub fn transpose(&self) -> Matrix {
        let mut res = Matrix::zeros(self.cols, self.rows);
        for i in 0..self.rows {
            for j in 0..self.cols {
                res.data[j * self.rows + i] = self.data[i * self.cols + j];
            }
        }
        res
    }

    pub fn map<F>(&self, functor: F) -> Matrix
    where
        F: Fn(f64) -> f64,
    {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|&x| functor(x)).collect(),
        }
    }

    pub fn scale(&self, factor: f64) -> Matrix {
        self.map(|x| x * factor)
    }

    /// Element-wise (Hadamard) product of two same-shape matrices.
    pub fn hadamard(&self, other: &Matrix) -> Result<Matrix> {
        self.check_same_shape(other, "Matrix::hadamard")?;
        Ok(Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().zip(&other.data).map(|(a, b)| a * b).collect(),
        })
    }

    /// Checked matrix product `self · rhs`.
    pub fn matmul(&self, rhs: &Matrix) -> Result<Matrix> {
        if self.cols != rhs.rows {
            return Err(NeutorchError::ShapeMismatch {
                context: "Matrix::matmul",
                expected: vec![self.cols, rhs.cols],
                actual: vec![rhs.rows, rhs.cols],
            });
        }
        let mut res = Matrix::zeros(self.rows, rhs.cols);
        // i-k-j order keeps the inner loop on contiguous rows of both operands.
        for i in 0..self.rows {
            let out = &mut res.data[i * rhs.cols..(i + 1) * rhs.cols];
            for k in 0..self.cols {
                let a = self.data[i * self.cols + k];
                if a == 0.0 {
                    continue;
                }
                let rhs_row = &rhs.data[k * rhs.cols..(k + 1) * rhs.cols];
                for (o, b) in out.iter_mut().zip(rhs_row) {
                    *o += a * b;
                }
            }
        }
        Ok(res)
    }

    /// Adds a `1 × cols` row to every row.
    pub fn add_row_broadcast(&self, row: &Matrix) -> Result<Matrix> {
        if row.rows != 1 || row.cols != self.cols {
            return Err(NeutorchError::ShapeMismatch {
                context: "Matrix::add_row_broadcast",
                expected: vec![1, self.cols],
                actual: vec![row.rows, row.cols],
            });
        }
        let mut res = self.clone();
        for i in 0..res.rows {
            for (x, b) in res.row_mut(i).iter_mut().zip(&row.data) {
                *x += b;
            }
        }
        Ok(res)
    }

    /// Column sums as a `1 × cols` matrix.
    pub fn sum_rows(&self) -> Matrix {
        let mut res = Matrix::zeros(1, self.cols);
        for i in 0..self.rows {
            for (acc, x) in res.data.iter_mut().zip(self.row(i)) {
                *acc += x;
            }
        }
        res
    }

    /// In-place `self += other`.
    pub fn add_assign(&mut self, other: &Matrix) -> Result<()> {
        self.check_same_shape(other, "Matrix::add_assign")?;
        for (a, b) in self.data.iter_mut().zip(&other.data) {
            *a += b;
        }
        Ok(())
    }

    /// Copies columns `[start, start + len)` into a new matrix.
    pub fn slice_cols(&self, start: usize, len: usize) -> Matrix {
        assert!(start + len <= self.cols, "Matrix::slice_cols out of range");
        let mut res = Matrix::zeros(self.rows, len);
        for i in 0..self.rows {
            res.row_mut(i).copy_from_slice(&self.row(i)[start..start + len]);
        }
        res
    }

    /// Writes `block` into columns starting at `start`.
    pub fn set_cols(&mut self, start: usize, block: &Matrix) {
        assert_eq!(block.rows, self.rows, "Matrix::set_cols row mismatch");
        assert!(start + block.cols <= self.cols, "Matrix::set_cols out of range");
        for i in 0..self.rows {
            let cols = block.cols;
            self.row_mut(i)[start..start + cols].copy_from_slice(block.row(i));
        }
    }

    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f64>() / self.data.len() as f64
    }

    fn check_same_shape(&self, other: &Matrix, context: &'static str) -> Result<()> {
        if self.rows != other.rows || self.cols != other.cols {
            return Err(NeutorchError::ShapeMismatch {
                context,
                expected: vec![self.rows, self.cols],
                actual: vec![other.rows, other.cols],
            });
        }
        Ok(())
    }
}

impl Default for Matrix {
    fn default() -> Self {
        Matrix { rows: 0, cols: 0, data: vec![] }
    }
}

impl Add for Matrix {
    type Output = Matrix;

    fn add(mut self, rhs: Self) -> Self::Output {
        if self.rows != rhs.rows || self.cols != rhs.cols {
            panic!("Matrices are of incorrect sizes")
        }
        for (a, b) in self.data.iter_mut().zip(&rhs.data) {
            *a += b;
        }
        self
    }
}

impl Sub for Matrix {
    type Output = Matrix;

    fn sub(mut self, rhs: Self) -> Self::Output {
        if self.rows != rhs.rows || self.cols != rhs.cols {
            panic!("Matrices are of incorrect sizes")
        }
        for (a, b) in self.data.iter_mut().zip(&rhs.data) {
            *a -= b;
        }
        self
    }
}

impl Mul for Matrix {
    type Output = Matrix;

    fn mul(self, rhs: Self) -> Self::Output {
        match self.matmul(&rhs) {
            Ok(m) => m,
            Err(_) => panic!("Matrices are of incorrect sizes"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_matmul() {
        let a = Matrix::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        let b = Matrix::from_rows(vec![vec![5.0], vec![6.0]]);
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.shape(), [2, 1]);
        assert_eq!(c.data, vec![17.0, 39.0]);
    }

    #[test]
    fn test_matmul_shape_mismatch() {
        let a = Matrix::zeros(2, 3);
        let b = Matrix::zeros(2, 3);
        assert!(a.matmul(&b).is_err());
    }

    #[test]
    fn test_transpose() {
        let a = Matrix::from_rows(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
        let t = a.transpose();
        assert_eq!(t.shape(), [3, 2]);
        assert_eq!(t.get(2, 1), 6.0);
        assert_eq!(t.get(0, 1), 4.0);
    }

    #[test]
    fn test_broadcast_and_sum_rows() {
        let a = Matrix::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        let b = Matrix::from_rows(vec![vec![10.0, 20.0]]);
        let c = a.add_row_broadcast(&b).unwrap();
        assert_eq!(c.data, vec![11.0, 22.0, 13.0, 24.0]);
        assert_eq!(a.sum_rows().data, vec![4.0, 6.0]);
    }

    #[test]
    fn test_slice_and_set_cols() {
        let a = Matrix::from_rows(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
        let s = a.slice_cols(1, 2);
        assert_eq!(s.data, vec![2.0, 3.0, 5.0, 6.0]);

        let mut z = Matrix::zeros(2, 3);
        z.set_cols(1, &s);
        assert_eq!(z.data, vec![0.0, 2.0, 3.0, 0.0, 5.0, 6.0]);
    }

    #[test]
    fn test_xavier_statistics() {
        let mut rng = StdRng::seed_from_u64(7);
        let w = Matrix::xavier(200, 200, &mut rng);
        let mean = w.mean();
        let var = w.data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / w.data.len() as f64;
        assert!(mean.abs() < 0.01);
        // Expected variance 2 / 400.
        assert!((var - 0.005).abs() < 0.001);
    }

    #[test]
    fn test_default_is_empty() {
        let m = Matrix::default();
        assert_eq!(m.shape(), [0, 0]);
        assert!(m.data.is_empty());
    }

    #[test]
    fn test_he_statistics() {
        let mut rng = StdRng::seed_from_u64(11);
        let w = Matrix::he(100, 400, &mut rng);
        let mean = w.mean();
        let var = w.data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / w.data.len() as f64;
        assert!(mean.abs() < 0.01);
        // Expected variance 2 / 100.
        assert!((var - 0.02).abs() < 0.002);
    }

    #[test]
    #[should_panic]
    fn test_add_panics_on_mismatch() {
        let _ = Matrix::zeros(2, 2) + Matrix::zeros(3, 2);
    }
}
