use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Serialize, Deserialize};

use crate::dataset::TargetKind;
use crate::error::Result;
use crate::model::ViT;

/// A trained model and the iteration it was saved at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub iteration: usize,
    /// What the output channels mean.
    #[serde(default)]
    pub target: TargetKind,
    /// Patch size the model was trained on; the default block size for prediction.
    #[serde(default)]
    pub patch_size: Option<[usize; 3]>,
    pub model: ViT,
}

/// Same layout as [`Checkpoint`], borrowing the model so saving does not clone it.
#[derive(Serialize)]
struct CheckpointRef<'a> {
    iteration: usize,
    target: TargetKind,
    patch_size: Option<[usize; 3]>,
    model: &'a ViT,
}

pub fn checkpoint_path(dir: &Path, iteration: usize) -> PathBuf {
    dir.join(format!("model_{:08}.json", iteration))
}

/// Writes `output_dir/model_{iteration:08}.json` and returns its path.
pub fn save_checkpoint(
    model: &ViT,
    iteration: usize,
    target: TargetKind,
    patch_size: Option<[usize; 3]>,
    dir: &Path,
) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = checkpoint_path(dir, iteration);
    let writer = BufWriter::new(fs::File::create(&path)?);
    serde_json::to_writer_pretty(writer, &CheckpointRef { iteration, target, patch_size, model })?;
    Ok(path)
}

impl Checkpoint {
    /// Deserializes a checkpoint previously written by `save_checkpoint`.
    pub fn load_json(path: &Path) -> Result<Checkpoint> {
        let reader = BufReader::new(fs::File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

/// The checkpoint with the highest iteration in `dir`, if any.
pub fn latest_checkpoint(dir: &Path) -> Result<Option<PathBuf>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let mut best: Option<(usize, PathBuf)> = None;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let iteration = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix("model_"))
            .and_then(|n| n.strip_suffix(".json"))
            .and_then(|n| n.parse::<usize>().ok());
        if let Some(it) = iteration {
            if best.as_ref().map_or(true, |(b, _)| it > *b) {
                best = Some((it, path));
            }
        }
    }
    Ok(best.map(|(_, p)| p))
}
