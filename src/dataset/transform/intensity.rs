//! Transforms that only touch image intensities. Labels are left alone and
//! the image is kept in `[0, 1]`.

use rand::{Rng, RngCore};

use crate::dataset::patch::Patch;
use crate::dataset::transform::{invalid_parameter, Transform, DEFAULT_PROBABILITY};
use crate::error::Result;
use crate::math::sample_standard_normal;

/// Brings 8-bit intensities into `[0, 1]`.
#[derive(Debug, Clone)]
pub struct NormalizeTo01 {
    pub probability: f64,
}

impl Default for NormalizeTo01 {
    fn default() -> Self {
        NormalizeTo01 { probability: 1.0 }
    }
}

impl Transform for NormalizeTo01 {
    fn name(&self) -> &'static str {
        "NormalizeTo01"
    }

    fn probability(&self) -> f64 {
        self.probability
    }

    fn transform(&self, patch: &mut Patch, _rng: &mut dyn RngCore) -> Result<()> {
        if patch.image.max() > 1.0 {
            for v in patch.image.data_mut() {
                *v /= 255.0;
            }
        }
        patch.image.clamp(0.0, 1.0);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AdjustBrightness {
    pub probability: f64,
    pub min_factor: f64,
    pub max_factor: f64,
}

impl Default for AdjustBrightness {
    fn default() -> Self {
        AdjustBrightness { probability: DEFAULT_PROBABILITY, min_factor: 0.05, max_factor: 0.3 }
    }
}

impl Transform for AdjustBrightness {
    fn name(&self) -> &'static str {
        "AdjustBrightness"
    }

    fn probability(&self) -> f64 {
        self.probability
    }

    fn validate(&self) -> Result<()> {
        let (lo, hi) = (self.min_factor, self.max_factor);
        if !(lo.is_finite() && hi.is_finite() && 0.0 <= lo && lo <= hi) {
            return Err(invalid_parameter(
                self.name(),
                "min_factor/max_factor",
                format!("need 0 <= min <= max, got {} and {}", lo, hi),
            ));
        }
        Ok(())
    }

    fn transform(&self, patch: &mut Patch, rng: &mut dyn RngCore) -> Result<()> {
        let max_factor = self.max_factor.clamp(0.0, 2.0);
        let min_factor = self.min_factor.min(max_factor);
        let shift = rng.gen_range(-0.5..=0.5) * rng.gen_range(min_factor..=max_factor);
        for v in patch.image.data_mut() {
            *v += shift;
        }
        patch.image.clamp(0.0, 1.0);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AdjustContrast {
    pub probability: f64,
    pub factor_range: (f64, f64),
}

impl Default for AdjustContrast {
    fn default() -> Self {
        AdjustContrast { probability: DEFAULT_PROBABILITY, factor_range: (0.05, 2.0) }
    }
}

impl Transform for AdjustContrast {
    fn name(&self) -> &'static str {
        "AdjustContrast"
    }

    fn probability(&self) -> f64 {
        self.probability
    }

    fn validate(&self) -> Result<()> {
        let (lo, hi) = self.factor_range;
        if !(lo.is_finite() && hi.is_finite() && 0.0 < lo && lo <= hi) {
            return Err(invalid_parameter(
                self.name(),
                "factor_range",
                format!("need 0 < low <= high, got ({}, {})", lo, hi),
            ));
        }
        Ok(())
    }

    fn transform(&self, patch: &mut Patch, rng: &mut dyn RngCore) -> Result<()> {
        let (lo, hi) = self.factor_range;
        let factor = rng.gen_range(lo.min(hi)..=hi.max(lo));
        for v in patch.image.data_mut() {
            *v *= factor;
        }
        patch.image.clamp(0.0, 1.0);
        Ok(())
    }
}

/// Random gamma correction with exponent `2^U(-1, 1)`.
#[derive(Debug, Clone)]
pub struct Gamma {
    pub probability: f64,
}

impl Default for Gamma {
    fn default() -> Self {
        Gamma { probability: DEFAULT_PROBABILITY }
    }
}

impl Transform for Gamma {
    fn name(&self) -> &'static str {
        "Gamma"
    }

    fn probability(&self) -> f64 {
        self.probability
    }

    fn transform(&self, patch: &mut Patch, rng: &mut dyn RngCore) -> Result<()> {
        let exponent = 2f64.powf(rng.gen_range(-1.0..=1.0));
        for v in patch.image.data_mut() {
            *v = v.max(0.0).powf(exponent);
        }
        patch.image.clamp(0.0, 1.0);
        Ok(())
    }
}

/// Additive Gaussian noise with variance drawn from `U(0.01, max_variance)`.
#[derive(Debug, Clone)]
pub struct Noise {
    pub probability: f64,
    pub max_variance: f64,
}

impl Default for Noise {
    fn default() -> Self {
        Noise { probability: DEFAULT_PROBABILITY, max_variance: 0.02 }
    }
}

impl Transform for Noise {
    fn name(&self) -> &'static str {
        "Noise"
    }

    fn probability(&self) -> f64 {
        self.probability
    }

    fn validate(&self) -> Result<()> {
        if !(self.max_variance.is_finite() && self.max_variance > 0.0) {
            return Err(invalid_parameter(
                self.name(),
                "max_variance",
                format!("must be positive, got {}", self.max_variance),
            ));
        }
        Ok(())
    }

    fn transform(&self, patch: &mut Patch, rng: &mut dyn RngCore) -> Result<()> {
        let lo = 0.01f64.min(self.max_variance);
        let std_dev = rng.gen_range(lo..=self.max_variance).sqrt();
        for v in patch.image.data_mut() {
            *v += sample_standard_normal(rng) * std_dev;
        }
        patch.image.clamp(0.0, 1.0);
        Ok(())
    }
}

/// Section-wise Gaussian blur; sigma is drawn from `U(0.2, sigma)`.
#[derive(Debug, Clone)]
pub struct GaussianBlur2D {
    pub probability: f64,
    pub sigma: f64,
}

impl Default for GaussianBlur2D {
    fn default() -> Self {
        GaussianBlur2D { probability: DEFAULT_PROBABILITY, sigma: 1.5 }
    }
}

impl Transform for GaussianBlur2D {
    fn name(&self) -> &'static str {
        "GaussianBlur2D"
    }

    fn probability(&self) -> f64 {
        self.probability
    }

    fn validate(&self) -> Result<()> {
        if !(self.sigma.is_finite() && self.sigma > 0.0) {
            return Err(invalid_parameter(
                self.name(),
                "sigma",
                format!("must be positive, got {}", self.sigma),
            ));
        }
        Ok(())
    }

    fn transform(&self, patch: &mut Patch, rng: &mut dyn RngCore) -> Result<()> {
        let sigma = rng.gen_range(0.2f64.min(self.sigma)..=self.sigma);
        let kernel = gaussian_kernel(sigma);
        let [sz, sy, sx] = patch.shape();
        for z in 0..sz {
            blur_section(patch.image.section_mut(z), sy, sx, &kernel);
        }
        Ok(())
    }
}

/// Normalised 1D Gaussian with radius `ceil(3σ)`.
fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (3.0 * sigma).ceil() as i64;
    let weights: Vec<f64> = (-radius..=radius)
        .map(|i| (-(i * i) as f64 / (2.0 * sigma * sigma)).exp())
        .collect();
    let total: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}

/// Mirror index into `[0, n)`, repeating the edge sample (`d c b a | a b c d | d c b a`).
fn reflect(mut i: i64, n: usize) -> usize {
    let n = n as i64;
    loop {
        if i < 0 {
            i = -i - 1;
        } else if i >= n {
            i = 2 * n - i - 1;
        } else {
            return i as usize;
        }
    }
}

fn blur_section(section: &mut [f64], rows: usize, cols: usize, kernel: &[f64]) {
    let radius = (kernel.len() / 2) as i64;
    let mut tmp = vec![0.0; section.len()];

    // Along x.
    for y in 0..rows {
        for x in 0..cols {
            tmp[y * cols + x] = kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * section[y * cols + reflect(x as i64 + k as i64 - radius, cols)])
                .sum();
        }
    }
    // Along y.
    for y in 0..rows {
        for x in 0..cols {
            section[y * cols + x] = kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * tmp[reflect(y as i64 + k as i64 - radius, rows) * cols + x])
                .sum();
        }
    }
}

/// Paints up to `max_box_num` boxes of pure black or white into the image.
#[derive(Debug, Clone)]
pub struct BlackBox {
    pub probability: f64,
    pub max_box_size: [usize; 3],
    pub max_box_num: usize,
}

impl Default for BlackBox {
    fn default() -> Self {
        BlackBox { probability: DEFAULT_PROBABILITY, max_box_size: [8, 8, 8], max_box_num: 3 }
    }
}

impl Transform for BlackBox {
    fn name(&self) -> &'static str {
        "BlackBox"
    }

    fn probability(&self) -> f64 {
        self.probability
    }

    fn transform(&self, patch: &mut Patch, rng: &mut dyn RngCore) -> Result<()> {
        let shape = patch.shape();
        let boxes = rng.gen_range(1..=self.max_box_num.max(1));
        for _ in 0..boxes {
            let mut start = [0; 3];
            let mut size = [0; 3];
            for a in 0..3 {
                size[a] = rng.gen_range(1..=self.max_box_size[a].clamp(1, shape[a]));
                start[a] = rng.gen_range(0..=shape[a] - size[a]);
            }
            let value = if rng.gen_bool(0.5) { 0.0 } else { 1.0 };
            for z in start[0]..start[0] + size[0] {
                for y in start[1]..start[1] + size[1] {
                    for x in start[2]..start[2] + size[2] {
                        patch.image.set(z, y, x, value);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::Chunk;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn patch_with(image: Vec<f64>, shape: [usize; 3]) -> Patch {
        let label = Chunk::new(shape, 1u32);
        Patch::new(Chunk::from_vec(shape, image).unwrap(), label).unwrap()
    }

    fn gradient_patch() -> Patch {
        let shape = [2, 8, 8];
        let n: usize = shape.iter().product();
        patch_with((0..n).map(|i| i as f64 / n as f64).collect(), shape)
    }

    #[test]
    fn test_normalize_scales_eight_bit() {
        let mut p = patch_with(vec![0.0, 127.5, 255.0, 300.0], [1, 2, 2]);
        let mut rng = StdRng::seed_from_u64(0);
        NormalizeTo01::default().transform(&mut p, &mut rng).unwrap();
        assert_eq!(p.image.data(), &[0.0, 0.5, 1.0, 1.0]);
    }

    #[test]
    fn test_intensity_transforms_stay_in_unit_range() {
        let transforms: Vec<Box<dyn Transform>> = vec![
            Box::new(AdjustBrightness::default()),
            Box::new(AdjustContrast::default()),
            Box::new(Gamma::default()),
            Box::new(Noise::default()),
            Box::new(GaussianBlur2D::default()),
            Box::new(BlackBox::default()),
        ];
        let mut rng = StdRng::seed_from_u64(11);
        for t in &transforms {
            for _ in 0..10 {
                let mut p = gradient_patch();
                let label_before = p.label.clone();
                t.transform(&mut p, &mut rng).unwrap();
                assert!(p.image.min() >= 0.0 && p.image.max() <= 1.0, "{}", t.name());
                assert_eq!(p.label, label_before, "{} touched the label", t.name());
                assert_eq!(p.shape(), [2, 8, 8]);
            }
        }
    }

    #[test]
    fn test_blur_preserves_constant_image() {
        let mut p = patch_with(vec![0.4; 2 * 5 * 5], [2, 5, 5]);
        let mut rng = StdRng::seed_from_u64(2);
        GaussianBlur2D::default().transform(&mut p, &mut rng).unwrap();
        assert!(p.image.data().iter().all(|v| (v - 0.4).abs() < 1e-9));
    }

    #[test]
    fn test_blur_smooths_an_impulse() {
        let mut image = vec![0.0; 9 * 9];
        image[4 * 9 + 4] = 1.0;
        let mut p = patch_with(image, [1, 9, 9]);
        let mut rng = StdRng::seed_from_u64(5);
        GaussianBlur2D { probability: 1.0, sigma: 1.0 }.transform(&mut p, &mut rng).unwrap();
        let total: f64 = p.image.data().iter().sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert!(p.image.get(0, 4, 4) < 1.0);
        assert!(p.image.get(0, 4, 5) > 0.0);
    }

    #[test]
    fn test_reflect() {
        assert_eq!(reflect(-1, 4), 0);
        assert_eq!(reflect(-2, 4), 1);
        assert_eq!(reflect(4, 4), 3);
        assert_eq!(reflect(5, 4), 2);
        assert_eq!(reflect(-3, 1), 0);
    }

    #[test]
    fn test_black_box_writes_extremes() {
        let mut p = patch_with(vec![0.5; 4 * 16 * 16], [4, 16, 16]);
        let mut rng = StdRng::seed_from_u64(9);
        BlackBox::default().transform(&mut p, &mut rng).unwrap();
        let painted = p.image.count_where(|v| v == 0.0 || v == 1.0);
        assert!(painted > 0);
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        assert!(Noise { probability: 1.0, max_variance: -0.1 }.validate().is_err());
        assert!(GaussianBlur2D { probability: 1.0, sigma: 0.0 }.validate().is_err());
        assert!(AdjustContrast { probability: 1.0, factor_range: (f64::NAN, 1.0) }.validate().is_err());
        assert!(AdjustContrast { probability: 1.0, factor_range: (2.0, 0.5) }.validate().is_err());
        assert!(AdjustBrightness { probability: 1.0, min_factor: 0.5, max_factor: 0.1 }.validate().is_err());
        assert!(Noise::default().validate().is_ok());
        assert!(GaussianBlur2D::default().validate().is_ok());
        assert!(AdjustContrast::default().validate().is_ok());
        assert!(AdjustBrightness::default().validate().is_ok());
    }

    #[test]
    fn test_compose_checks_parameters() {
        use crate::dataset::transform::{Compose, OneOf};

        let err = Compose::new(vec![Box::new(Noise { probability: 1.0, max_variance: -1.0 })]).unwrap_err();
        assert!(err.to_string().contains("Noise.max_variance"), "{}", err);
        assert!(OneOf::new(vec![Box::new(GaussianBlur2D { probability: 1.0, sigma: 0.0 })], 1.0).is_err());
    }
}
