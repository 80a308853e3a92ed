use serde::{Serialize, Deserialize};

use crate::error::{NeutorchError, Result};

/// A dense 3D array in `[z, y, x]` order, z-major.
///
/// EM volumes are anisotropic: z indexes sections, y and x are in-plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk<T> {
    shape: [usize; 3],
    data: Vec<T>,
}

impl<T: Copy> Chunk<T> {
    pub fn new(shape: [usize; 3], fill: T) -> Chunk<T> {
        Chunk { shape, data: vec![fill; shape.iter().product()] }
    }

    pub fn from_vec(shape: [usize; 3], data: Vec<T>) -> Result<Chunk<T>> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(NeutorchError::ShapeMismatch {
                context: "Chunk::from_vec",
                expected: vec![expected],
                actual: vec![data.len()],
            });
        }
        Ok(Chunk { shape, data })
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    #[inline]
    pub fn index(&self, z: usize, y: usize, x: usize) -> usize {
        (z * self.shape[1] + y) * self.shape[2] + x
    }

    #[inline]
    pub fn get(&self, z: usize, y: usize, x: usize) -> T {
        self.data[self.index(z, y, x)]
    }

    #[inline]
    pub fn set(&mut self, z: usize, y: usize, x: usize, value: T) {
        let i = self.index(z, y, x);
        self.data[i] = value;
    }

    fn section_len(&self) -> usize {
        self.shape[1] * self.shape[2]
    }

    /// One z section as a row-major `y × x` slice.
    pub fn section(&self, z: usize) -> &[T] {
        let n = self.section_len();
        &self.data[z * n..(z + 1) * n]
    }

    pub fn section_mut(&mut self, z: usize) -> &mut [T] {
        let n = self.section_len();
        &mut self.data[z * n..(z + 1) * n]
    }

    /// Copies the box `[start, start + size)` into a new chunk.
    pub fn crop(&self, start: [usize; 3], size: [usize; 3]) -> Result<Chunk<T>> {
        if (0..3).any(|a| start[a] + size[a] > self.shape[a]) {
            return Err(NeutorchError::OutOfBounds { start, size, shape: self.shape });
        }
        let mut data = Vec::with_capacity(size.iter().product());
        for z in start[0]..start[0] + size[0] {
            for y in start[1]..start[1] + size[1] {
                let begin = self.index(z, y, start[2]);
                data.extend_from_slice(&self.data[begin..begin + size[2]]);
            }
        }
        Ok(Chunk { shape: size, data })
    }

    /// Reverses the chunk along `axis` (0 = z, 1 = y, 2 = x).
    pub fn flip(&self, axis: usize) -> Chunk<T> {
        assert!(axis < 3, "Chunk::flip axis must be 0, 1 or 2");
        let [sz, sy, sx] = self.shape;
        let mut data = Vec::with_capacity(self.data.len());
        for z in 0..sz {
            for y in 0..sy {
                for x in 0..sx {
                    let (zz, yy, xx) = match axis {
                        0 => (sz - 1 - z, y, x),
                        1 => (z, sy - 1 - y, x),
                        _ => (z, y, sx - 1 - x),
                    };
                    data.push(self.get(zz, yy, xx));
                }
            }
        }
        Chunk { shape: self.shape, data }
    }

    /// Swaps the two in-plane axes.
    pub fn transpose_yx(&self) -> Chunk<T> {
        let [sz, sy, sx] = self.shape;
        let mut data = Vec::with_capacity(self.data.len());
        for z in 0..sz {
            for x in 0..sx {
                for y in 0..sy {
                    data.push(self.get(z, y, x));
                }
            }
        }
        Chunk { shape: [sz, sx, sy], data }
    }

    pub fn map<U, F>(&self, f: F) -> Chunk<U>
    where
        F: Fn(T) -> U,
    {
        Chunk {
            shape: self.shape,
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    pub fn count_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(T) -> bool,
    {
        self.data.iter().filter(|&&v| predicate(v)).count()
    }
}

impl Chunk<f64> {
    pub fn min(&self) -> f64 {
        self.data.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn max(&self) -> f64 {
        self.data.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f64>() / self.data.len() as f64
    }

    pub fn clamp(&mut self, lo: f64, hi: f64) {
        for v in &mut self.data {
            *v = v.clamp(lo, hi);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(shape: [usize; 3]) -> Chunk<u32> {
        let n: usize = shape.iter().product();
        Chunk::from_vec(shape, (0..n as u32).collect()).unwrap()
    }

    #[test]
    fn test_indexing_is_z_major() {
        let c = ramp([2, 3, 4]);
        assert_eq!(c.get(0, 0, 1), 1);
        assert_eq!(c.get(0, 1, 0), 4);
        assert_eq!(c.get(1, 0, 0), 12);
        assert_eq!(c.section(1)[0], 12);
    }

    #[test]
    fn test_crop() {
        let c = ramp([4, 4, 4]);
        let sub = c.crop([1, 2, 3], [2, 2, 1]).unwrap();
        assert_eq!(sub.shape(), [2, 2, 1]);
        assert_eq!(sub.get(0, 0, 0), c.get(1, 2, 3));
        assert_eq!(sub.get(1, 1, 0), c.get(2, 3, 3));
    }

    #[test]
    fn test_crop_out_of_bounds() {
        let c = ramp([4, 4, 4]);
        assert!(matches!(
            c.crop([3, 0, 0], [2, 1, 1]),
            Err(NeutorchError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_flip_each_axis() {
        let c = ramp([2, 3, 4]);
        assert_eq!(c.flip(0).get(0, 1, 2), c.get(1, 1, 2));
        assert_eq!(c.flip(1).get(1, 0, 2), c.get(1, 2, 2));
        assert_eq!(c.flip(2).get(1, 1, 0), c.get(1, 1, 3));
        assert_eq!(c.flip(2).flip(2), c);
    }

    #[test]
    fn test_transpose_yx() {
        let c = ramp([2, 3, 4]);
        let t = c.transpose_yx();
        assert_eq!(t.shape(), [2, 4, 3]);
        assert_eq!(t.get(1, 3, 2), c.get(1, 2, 3));
    }

    #[test]
    fn test_from_vec_rejects_wrong_length() {
        assert!(Chunk::from_vec([2, 2, 2], vec![0u8; 7]).is_err());
    }

    #[test]
    fn test_float_statistics() {
        let mut c = Chunk::from_vec([1, 1, 4], vec![-1.0, 0.5, 1.0, 2.5]).unwrap();
        assert_eq!(c.min(), -1.0);
        assert_eq!(c.max(), 2.5);
        assert!((c.mean() - 0.75).abs() < 1e-12);
        c.clamp(0.0, 1.0);
        assert_eq!(c.data(), &[0.0, 0.5, 1.0, 1.0]);
    }
}
