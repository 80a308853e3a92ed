use rand::seq::SliceRandom;
use rand::RngCore;

use crate::dataset::patch::{Patch, ShrinkSize};
use crate::dataset::transform::intensity::{
    AdjustBrightness, AdjustContrast, BlackBox, Gamma, GaussianBlur2D, Noise, NormalizeTo01,
};
use crate::dataset::transform::spatial::{Flip, MissAlignment, Perspective2D, Transpose};
use crate::dataset::transform::{validate_probability, Transform};
use crate::error::{NeutorchError, Result};

/// Applies each member in order. Shrink size is the sum over members.
#[derive(Debug)]
pub struct Compose {
    transforms: Vec<Box<dyn Transform>>,
    shrink_size: ShrinkSize,
}

impl Compose {
    pub fn new(transforms: Vec<Box<dyn Transform>>) -> Result<Compose> {
        let mut shrink_size = [0; 6];
        for t in &transforms {
            validate_probability(t.name(), t.probability())?;
            t.validate()?;
            for (acc, s) in shrink_size.iter_mut().zip(t.shrink_size()) {
                *acc += s;
            }
        }
        Ok(Compose { transforms, shrink_size })
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.transforms.iter().map(|t| t.name()).collect()
    }
}

impl Transform for Compose {
    fn name(&self) -> &'static str {
        "Compose"
    }

    fn probability(&self) -> f64 {
        1.0
    }

    fn shrink_size(&self) -> ShrinkSize {
        self.shrink_size
    }

    fn transform(&self, patch: &mut Patch, rng: &mut dyn RngCore) -> Result<()> {
        for t in &self.transforms {
            t.apply(patch, rng)?;
        }
        Ok(())
    }
}

/// Applies one uniformly chosen member. Shrink size is the element-wise
/// max over members; a member that shrinks less leaves the difference as
/// delayed shrink.
#[derive(Debug)]
pub struct OneOf {
    transforms: Vec<Box<dyn Transform>>,
    probability: f64,
    shrink_size: ShrinkSize,
}

impl OneOf {
    pub fn new(transforms: Vec<Box<dyn Transform>>, probability: f64) -> Result<OneOf> {
        validate_probability("OneOf", probability)?;
        if transforms.is_empty() {
            return Err(NeutorchError::config("OneOf", "needs at least one transform"));
        }
        let mut shrink_size = [0; 6];
        for t in &transforms {
            validate_probability(t.name(), t.probability())?;
            t.validate()?;
            for (acc, s) in shrink_size.iter_mut().zip(t.shrink_size()) {
                *acc = (*acc).max(s);
            }
        }
        Ok(OneOf { transforms, probability, shrink_size })
    }
}

impl Transform for OneOf {
    fn name(&self) -> &'static str {
        "OneOf"
    }

    fn probability(&self) -> f64 {
        self.probability
    }

    fn shrink_size(&self) -> ShrinkSize {
        self.shrink_size
    }

    fn transform(&self, patch: &mut Patch, rng: &mut dyn RngCore) -> Result<()> {
        let Some(chosen) = self.transforms.choose(rng) else {
            return Ok(());
        };
        chosen.apply(patch, rng)?;
        let own = chosen.shrink_size();
        let mut shortfall = [0; 6];
        for i in 0..6 {
            shortfall[i] = self.shrink_size[i] - own[i];
        }
        patch.accumulate_delayed_shrink_size(shortfall);
        Ok(())
    }
}

/// The augmentation pipeline used for EM segmentation training.
pub fn default_pipeline() -> Result<Compose> {
    let noise_or_blur: Box<dyn Transform> = Box::new(OneOf::new(
        vec![Box::new(Noise::default()), Box::new(GaussianBlur2D::default())],
        1.0,
    )?);
    Compose::new(vec![
        Box::new(NormalizeTo01 { probability: 1.0 }),
        Box::new(AdjustBrightness::default()),
        Box::new(AdjustContrast::default()),
        Box::new(Gamma::default()),
        noise_or_blur,
        Box::new(BlackBox::default()),
        Box::new(Perspective2D::default()),
        Box::new(Flip::default()),
        Box::new(Transpose::default()),
        Box::new(MissAlignment::default()),
    ])
}

/// Normalisation only; used when augmentation is switched off.
pub fn identity_pipeline() -> Result<Compose> {
    Compose::new(vec![Box::new(NormalizeTo01::default())])
}
