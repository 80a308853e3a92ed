use crate::dataset::target::TargetKind;
use crate::error::{NeutorchError, Result};
use crate::volume::Chunk;

/// Voxels to drop at each face: `[z0, y0, x0, z1, y1, x1]`.
pub type ShrinkSize = [usize; 6];

/// A training sample: image and label sub-volumes of the same shape.
///
/// Spatial transforms that are skipped still owe their shrink, which is
/// collected in `delayed_shrink_size` and cropped once at the end so that
/// every patch leaves the pipeline with the same size.
#[derive(Debug, Clone)]
pub struct Patch {
    pub image: Chunk<f64>,
    pub label: Chunk<u32>,
    pub delayed_shrink_size: ShrinkSize,
}

impl Patch {
    pub fn new(image: Chunk<f64>, label: Chunk<u32>) -> Result<Patch> {
        if image.shape() != label.shape() {
            return Err(NeutorchError::ShapeMismatch {
                context: "Patch::new",
                expected: image.shape().to_vec(),
                actual: label.shape().to_vec(),
            });
        }
        Ok(Patch { image, label, delayed_shrink_size: [0; 6] })
    }

    pub fn shape(&self) -> [usize; 3] {
        self.image.shape()
    }

    pub fn accumulate_delayed_shrink_size(&mut self, shrink: ShrinkSize) {
        for (acc, s) in self.delayed_shrink_size.iter_mut().zip(shrink) {
            *acc += s;
        }
    }

    /// Crops image and label by the accumulated shrink and resets it.
    pub fn apply_delayed_shrink_size(&mut self) -> Result<()> {
        let s = self.delayed_shrink_size;
        if s == [0; 6] {
            return Ok(());
        }
        let shape = self.shape();
        let mut size = [0; 3];
        for a in 0..3 {
            size[a] = shape[a]
                .checked_sub(s[a] + s[a + 3])
                .filter(|&n| n > 0)
                .ok_or(NeutorchError::OutOfBounds {
                    start: [s[0], s[1], s[2]],
                    size: [s[0] + s[3], s[1] + s[4], s[2] + s[5]],
                    shape,
                })?;
        }
        let start = [s[0], s[1], s[2]];
        self.image = self.image.crop(start, size)?;
        self.label = self.label.crop(start, size)?;
        self.delayed_shrink_size = [0; 6];
        Ok(())
    }

    /// Swaps the start and end shrink of `axis`; used when the patch is flipped.
    pub(crate) fn mirror_delayed_shrink(&mut self, axis: usize) {
        self.delayed_shrink_size.swap(axis, axis + 3);
    }

    /// Swaps the y and x shrink entries; used when the patch is transposed.
    pub(crate) fn transpose_delayed_shrink(&mut self) {
        self.delayed_shrink_size.swap(1, 2);
        self.delayed_shrink_size.swap(4, 5);
    }

    /// Model input channels. The raw image is the single input channel.
    pub fn input(&self) -> Vec<Chunk<f64>> {
        vec![self.image.clone()]
    }

    pub fn target(&self, kind: TargetKind) -> Vec<Chunk<f64>> {
        kind.compute(&self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch(shape: [usize; 3]) -> Patch {
        let n: usize = shape.iter().product();
        let image = Chunk::from_vec(shape, (0..n).map(|i| i as f64).collect()).unwrap();
        let label = Chunk::from_vec(shape, (0..n as u32).collect()).unwrap();
        Patch::new(image, label).unwrap()
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let image = Chunk::new([2, 2, 2], 0.0);
        let label = Chunk::new([2, 2, 3], 0u32);
        assert!(Patch::new(image, label).is_err());
    }

    #[test]
    fn test_apply_delayed_shrink_crops_both() {
        let mut p = patch([4, 6, 6]);
        let corner = p.image.get(1, 2, 1);
        p.accumulate_delayed_shrink_size([1, 1, 0, 0, 1, 0]);
        p.accumulate_delayed_shrink_size([0, 1, 1, 1, 0, 2]);
        p.apply_delayed_shrink_size().unwrap();

        assert_eq!(p.shape(), [2, 3, 3]);
        assert_eq!(p.label.shape(), [2, 3, 3]);
        assert_eq!(p.image.get(0, 0, 0), corner);
        assert_eq!(p.delayed_shrink_size, [0; 6]);
    }

    #[test]
    fn test_shrink_larger_than_patch_fails() {
        let mut p = patch([2, 2, 2]);
        p.accumulate_delayed_shrink_size([1, 0, 0, 1, 0, 0]);
        assert!(p.apply_delayed_shrink_size().is_err());
    }

    #[test]
    fn test_mirror_and_transpose_shrink() {
        let mut p = patch([2, 2, 2]);
        p.accumulate_delayed_shrink_size([1, 2, 3, 4, 5, 6]);
        p.mirror_delayed_shrink(0);
        assert_eq!(p.delayed_shrink_size, [4, 2, 3, 1, 5, 6]);
        p.transpose_delayed_shrink();
        assert_eq!(p.delayed_shrink_size, [4, 3, 2, 1, 6, 5]);
    }
}
