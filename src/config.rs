use std::fs;
use std::path::{Path, PathBuf};

use serde::{Serialize, Deserialize};

use crate::dataset::TargetKind;
use crate::error::{NeutorchError, Result};
use crate::loss::LossType;
use crate::model::{PosEmbeddingKind, ViTConfig};
use crate::optim::OptimizerKind;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// One annotated volume: a directory of image slices and one of label slices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumePaths {
    pub image: PathBuf,
    pub label: PathBuf,
}

/// Patch size as written in the file: a single integer for a cube, or `[z, y, x]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatchSize {
    Cube(usize),
    Shape([usize; 3]),
}

impl PatchSize {
    pub fn dims(&self) -> [usize; 3] {
        match *self {
            PatchSize::Cube(n) => [n, n, n],
            PatchSize::Shape(s) => s,
        }
    }
}

impl Default for PatchSize {
    fn default() -> Self {
        PatchSize::Shape([16, 64, 64])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub volumes: Vec<VolumePaths>,
    /// Fraction of volumes used for training; the rest validate.
    pub training_split_ratio: f64,
    pub patch_size: PatchSize,
    pub target: TargetKind,
    /// `false` replaces the augmentation pipeline with normalisation only.
    pub augment: bool,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        DatasetConfig {
            volumes: Vec::new(),
            training_split_ratio: 0.9,
            patch_size: PatchSize::default(),
            target: TargetKind::default(),
            augment: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    pub iterations: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub optimizer: OptimizerKind,
    pub loss: LossType,
    pub log_interval: usize,
    pub validation_interval: usize,
    pub validation_patches: usize,
    pub checkpoint_interval: usize,
    pub output_dir: PathBuf,
    pub seed: Option<u64>,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        TrainingSettings {
            iterations: 10_000,
            batch_size: 1,
            learning_rate: 1e-3,
            optimizer: OptimizerKind::Adam,
            loss: LossType::BinaryCrossEntropy,
            log_interval: 10,
            validation_interval: 100,
            validation_patches: 4,
            checkpoint_interval: 1000,
            output_dir: PathBuf::from("checkpoints"),
            seed: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Experiment file
// ---------------------------------------------------------------------------

/// A complete experiment: what to sample, what to build, how to train.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub dataset: DatasetConfig,
    pub model: ViTConfig,
    pub training: TrainingSettings,
}

impl ExperimentConfig {
    /// Reads, resolves and validates a TOML experiment file.
    pub fn load(path: &Path) -> Result<ExperimentConfig> {
        let text = fs::read_to_string(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        ExperimentConfig::from_toml_str(&text, base_dir)
    }

    /// Parses `text`, resolving relative paths against `base_dir`.
    pub fn from_toml_str(text: &str, base_dir: &Path) -> Result<ExperimentConfig> {
        let mut config: ExperimentConfig = toml::from_str(text)?;
        config.resolve(base_dir);
        config.validate()?;
        Ok(config)
    }

    fn resolve(&mut self, base_dir: &Path) {
        let join = |p: &PathBuf| if p.is_relative() { base_dir.join(p) } else { p.clone() };
        for v in &mut self.dataset.volumes {
            v.image = join(&v.image);
            v.label = join(&v.label);
        }
        self.training.output_dir = join(&self.training.output_dir);

        // Channels follow the data, not the file.
        self.model.in_channels = 1;
        self.model.out_channels = self.dataset.target.channels();
        if self.model.pos_embedding == PosEmbeddingKind::Learned && self.model.num_tokens.is_none() {
            let patch = self.dataset.patch_size.dims();
            if (0..3).all(|a| self.model.patch_size[a] > 0 && patch[a] % self.model.patch_size[a] == 0) {
                self.model.num_tokens =
                    Some((0..3).map(|a| patch[a] / self.model.patch_size[a]).product());
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let ds = &self.dataset;
        if ds.volumes.len() < 2 {
            return Err(NeutorchError::config(
                "dataset.volumes",
                format!("need at least 2 volumes to split, got {}", ds.volumes.len()),
            ));
        }
        if !(ds.training_split_ratio > 0.5 && ds.training_split_ratio < 1.0) {
            return Err(NeutorchError::config(
                "dataset.training_split_ratio",
                format!("must be in (0.5, 1), got {}", ds.training_split_ratio),
            ));
        }
        let patch = ds.patch_size.dims();
        if patch.iter().any(|&p| p == 0) {
            return Err(NeutorchError::config("dataset.patch_size", "every axis must be positive"));
        }
        self.model.validate()?;
        if (0..3).any(|a| patch[a] % self.model.patch_size[a] != 0) {
            return Err(NeutorchError::config(
                "dataset.patch_size",
                format!(
                    "{:?} is not a multiple of model.patch_size {:?}",
                    patch, self.model.patch_size
                ),
            ));
        }

        let tr = &self.training;
        for (field, value) in [
            ("training.iterations", tr.iterations),
            ("training.batch_size", tr.batch_size),
            ("training.log_interval", tr.log_interval),
            ("training.validation_interval", tr.validation_interval),
            ("training.validation_patches", tr.validation_patches),
            ("training.checkpoint_interval", tr.checkpoint_interval),
        ] {
            if value == 0 {
                return Err(NeutorchError::config(field, "must be at least 1"));
            }
        }
        if !(tr.learning_rate > 0.0 && tr.learning_rate.is_finite()) {
            return Err(NeutorchError::config(
                "training.learning_rate",
                format!("must be positive, got {}", tr.learning_rate),
            ));
        }
        Ok(())
    }
}
