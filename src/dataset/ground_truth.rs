use std::fmt;

use rand::{Rng, RngCore};

use crate::dataset::patch::Patch;
use crate::error::{NeutorchError, Result};
use crate::volume::Chunk;

/// An annotated EM volume that training patches are sampled from.
#[derive(Debug, Clone)]
pub struct GroundTruthVolume {
    image: Chunk<f64>,
    label: Chunk<u32>,
    patch_size: [usize; 3],
}

impl GroundTruthVolume {
    pub fn new(image: Chunk<f64>, label: Chunk<u32>, patch_size: [usize; 3]) -> Result<Self> {
        if image.shape() != label.shape() {
            return Err(NeutorchError::ShapeMismatch {
                context: "GroundTruthVolume::new (image vs label)",
                expected: image.shape().to_vec(),
                actual: label.shape().to_vec(),
            });
        }
        let shape = image.shape();
        if (0..3).any(|a| patch_size[a] == 0 || patch_size[a] > shape[a]) {
            return Err(NeutorchError::ShapeMismatch {
                context: "GroundTruthVolume::new (patch larger than volume)",
                expected: patch_size.to_vec(),
                actual: shape.to_vec(),
            });
        }
        Ok(GroundTruthVolume { image, label, patch_size })
    }

    pub fn shape(&self) -> [usize; 3] {
        self.image.shape()
    }

    pub fn patch_size(&self) -> [usize; 3] {
        self.patch_size
    }

    pub fn image(&self) -> &Chunk<f64> {
        &self.image
    }

    pub fn label(&self) -> &Chunk<u32> {
        &self.label
    }

    /// Crops a patch at a uniformly random position that fits in the volume.
    pub fn random_patch(&self, rng: &mut dyn RngCore) -> Result<Patch> {
        let shape = self.shape();
        let mut start = [0; 3];
        for a in 0..3 {
            start[a] = rng.gen_range(0..=shape[a] - self.patch_size[a]);
        }
        self.patch_at(start)
    }

    pub fn patch_at(&self, start: [usize; 3]) -> Result<Patch> {
        let image = self.image.crop(start, self.patch_size)?;
        let label = self.label.crop(start, self.patch_size)?;
        Patch::new(image, label)
    }
}

impl fmt::Display for GroundTruthVolume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GroundTruthVolume(shape: {:?}, patch_size: {:?})",
            self.shape(),
            self.patch_size
        )
    }
}
