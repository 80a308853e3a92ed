use std::path::Path;

use rand::seq::SliceRandom;
use rand::RngCore;
use tracing::info;

use crate::config::DatasetConfig;
use crate::dataset::ground_truth::GroundTruthVolume;
use crate::dataset::patch::{Patch, ShrinkSize};
use crate::dataset::transform::{default_pipeline, identity_pipeline, Compose, Transform};
use crate::error::{NeutorchError, Result};
use crate::volume::{read_image_stack, read_label_stack, Chunk};

/// Sampling size that leaves `patch_size` after `shrink` is cropped.
pub fn sample_size(patch_size: [usize; 3], shrink: ShrinkSize) -> [usize; 3] {
    [
        patch_size[0] + shrink[0] + shrink[3],
        patch_size[1] + shrink[1] + shrink[4],
        patch_size[2] + shrink[2] + shrink[5],
    ]
}

/// Ground-truth volumes split into training and validation sets, plus the
/// augmentation pipeline every sampled patch goes through.
#[derive(Debug)]
pub struct SegmentationDataset {
    training: Vec<GroundTruthVolume>,
    validation: Vec<GroundTruthVolume>,
    patch_size: [usize; 3],
    transform: Compose,
}

impl SegmentationDataset {
    /// The first `max(1, round(n · (1 − ratio)))` volumes validate; the rest train.
    pub fn new(
        volumes: Vec<(Chunk<f64>, Chunk<u32>)>,
        training_split_ratio: f64,
        patch_size: [usize; 3],
        transform: Compose,
    ) -> Result<SegmentationDataset> {
        if !(training_split_ratio > 0.5 && training_split_ratio < 1.0) {
            return Err(NeutorchError::config(
                "dataset.training_split_ratio",
                format!("must be in (0.5, 1), got {}", training_split_ratio),
            ));
        }
        if volumes.len() < 2 {
            return Err(NeutorchError::config(
                "dataset.volumes",
                format!("need at least 2 volumes to split, got {}", volumes.len()),
            ));
        }
        let n = volumes.len();
        let num_validation = ((n as f64 * (1.0 - training_split_ratio)).round() as usize).clamp(1, n - 1);

        let sampled = sample_size(patch_size, transform.shrink_size());
        let mut gts = Vec::with_capacity(n);
        for (image, label) in volumes {
            gts.push(GroundTruthVolume::new(image, label, sampled)?);
        }
        let training = gts.split_off(num_validation);
        let validation = gts;

        Ok(SegmentationDataset { training, validation, patch_size, transform })
    }

    /// Loads every volume listed in `config` and picks the pipeline.
    pub fn from_config(config: &DatasetConfig, base_dir: &Path) -> Result<SegmentationDataset> {
        let mut volumes = Vec::with_capacity(config.volumes.len());
        for paths in &config.volumes {
            let image = read_image_stack(&base_dir.join(&paths.image))?;
            let label = read_label_stack(&base_dir.join(&paths.label))?;
            info!(
                image = %paths.image.display(),
                shape = ?image.shape(),
                "loaded volume"
            );
            volumes.push((image, label));
        }
        let transform = if config.augment { default_pipeline()? } else { identity_pipeline()? };
        SegmentationDataset::new(
            volumes,
            config.training_split_ratio,
            config.patch_size.dims(),
            transform,
        )
    }

    pub fn patch_size(&self) -> [usize; 3] {
        self.patch_size
    }

    pub fn training_volumes(&self) -> &[GroundTruthVolume] {
        &self.training
    }

    pub fn validation_volumes(&self) -> &[GroundTruthVolume] {
        &self.validation
    }

    pub fn transform(&self) -> &Compose {
        &self.transform
    }

    pub fn random_training_patch(&self, rng: &mut dyn RngCore) -> Result<Patch> {
        self.sample_from(&self.training, rng)
    }

    pub fn random_validation_patch(&self, rng: &mut dyn RngCore) -> Result<Patch> {
        self.sample_from(&self.validation, rng)
    }

    fn sample_from(&self, volumes: &[GroundTruthVolume], rng: &mut dyn RngCore) -> Result<Patch> {
        let volume = volumes.choose(rng).ok_or_else(|| {
            NeutorchError::config("dataset.volumes", "no volumes to sample from")
        })?;
        let mut patch = volume.random_patch(rng)?;
        self.transform.apply(&mut patch, rng)?;
        patch.apply_delayed_shrink_size()?;
        if patch.shape() != self.patch_size {
            return Err(NeutorchError::PatchShape {
                expected: self.patch_size,
                actual: patch.shape(),
            });
        }
        Ok(patch)
    }
}
