//! Patch augmentation.
//!
//! Every transform runs with its own probability. Spatial transforms may
//! consume voxels at the patch faces (their shrink size); when one is
//! skipped the same amount is queued on the patch as delayed shrink so the
//! final patch size does not depend on which transforms actually ran.

pub mod compose;
pub mod intensity;
pub mod spatial;

use std::fmt;

use rand::{Rng, RngCore};

use crate::dataset::patch::{Patch, ShrinkSize};
use crate::error::{NeutorchError, Result};

pub use compose::{Compose, OneOf, default_pipeline, identity_pipeline};
pub use intensity::{
    AdjustBrightness, AdjustContrast, BlackBox, Gamma, GaussianBlur2D, Noise, NormalizeTo01,
};
pub use spatial::{DropSection, Flip, MissAlignment, Perspective2D, Transpose};

/// Default probability for augmentations that are not explicitly configured.
pub const DEFAULT_PROBABILITY: f64 = 0.5;

pub trait Transform: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Chance in (0, 1] that `apply` runs the transform.
    fn probability(&self) -> f64;

    /// Voxels consumed at `[z0, y0, x0, z1, y1, x1]`. Zero for intensity transforms.
    fn shrink_size(&self) -> ShrinkSize {
        [0; 6]
    }

    /// Rejects parameter values the transform cannot run with.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Unconditionally transforms the patch.
    fn transform(&self, patch: &mut Patch, rng: &mut dyn RngCore) -> Result<()>;

    /// Transforms with `probability`; otherwise queues the shrink as delayed.
    fn apply(&self, patch: &mut Patch, rng: &mut dyn RngCore) -> Result<()> {
        if rng.gen::<f64>() < self.probability() {
            self.transform(patch, rng)
        } else {
            patch.accumulate_delayed_shrink_size(self.shrink_size());
            Ok(())
        }
    }
}

pub(crate) fn validate_probability(name: &str, probability: f64) -> Result<()> {
    if probability > 0.0 && probability <= 1.0 {
        Ok(())
    } else {
        Err(NeutorchError::config(
            format!("{}.probability", name),
            format!("must be in (0, 1], got {}", probability),
        ))
    }
}

/// Error for a transform parameter outside its valid range.
pub(crate) fn invalid_parameter(name: &str, field: &str, message: String) -> NeutorchError {
    NeutorchError::config(format!("{}.{}", name, field), message)
}
