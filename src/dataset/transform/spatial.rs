//! Transforms that move voxels. Image and label always move together.

use rand::seq::index::sample;
use rand::{Rng, RngCore};
use tracing::debug;

use crate::dataset::patch::{Patch, ShrinkSize};
use crate::dataset::transform::{Transform, DEFAULT_PROBABILITY};
use crate::error::Result;
use crate::volume::Chunk;

/// Mirrors the patch along 1 to 3 distinct random axes.
#[derive(Debug, Clone)]
pub struct Flip {
    pub probability: f64,
}

impl Default for Flip {
    fn default() -> Self {
        Flip { probability: DEFAULT_PROBABILITY }
    }
}

impl Transform for Flip {
    fn name(&self) -> &'static str {
        "Flip"
    }

    fn probability(&self) -> f64 {
        self.probability
    }

    fn transform(&self, patch: &mut Patch, rng: &mut dyn RngCore) -> Result<()> {
        let axis_num = rng.gen_range(1..=3);
        for axis in sample(rng, 3, axis_num).into_iter() {
            patch.image = patch.image.flip(axis);
            patch.label = patch.label.flip(axis);
            // The pending crop follows the voxels it belongs to.
            patch.mirror_delayed_shrink(axis);
        }
        Ok(())
    }
}

/// Swaps the in-plane axes. Sections must be square; z is never transposed
/// because EM resolution is anisotropic.
#[derive(Debug, Clone)]
pub struct Transpose {
    pub probability: f64,
}

impl Default for Transpose {
    fn default() -> Self {
        Transpose { probability: DEFAULT_PROBABILITY }
    }
}

impl Transform for Transpose {
    fn name(&self) -> &'static str {
        "Transpose"
    }

    fn probability(&self) -> f64 {
        self.probability
    }

    fn transform(&self, patch: &mut Patch, _rng: &mut dyn RngCore) -> Result<()> {
        let [_, sy, sx] = patch.shape();
        if sy != sx {
            debug!(sy, sx, "skipping transpose of non-square sections");
            return Ok(());
        }
        patch.image = patch.image.transpose_yx();
        patch.label = patch.label.transpose_yx();
        patch.transpose_delayed_shrink();
        Ok(())
    }
}

/// Per-section perspective distortion.
///
/// Each section is resampled from a quad whose corners are pulled inward by
/// up to `corner_ratio` of the section size, so the output never reads
/// outside the input and the patch size is unchanged.
#[derive(Debug, Clone)]
pub struct Perspective2D {
    pub probability: f64,
    pub corner_ratio: f64,
}

impl Default for Perspective2D {
    fn default() -> Self {
        Perspective2D { probability: DEFAULT_PROBABILITY, corner_ratio: 0.2 }
    }
}

impl Transform for Perspective2D {
    fn name(&self) -> &'static str {
        "Perspective2D"
    }

    fn probability(&self) -> f64 {
        self.probability
    }

    fn transform(&self, patch: &mut Patch, rng: &mut dyn RngCore) -> Result<()> {
        let [sz, sy, sx] = patch.shape();
        if sy < 2 || sx < 2 {
            return Ok(());
        }
        let (w, h) = ((sx - 1) as f64, (sy - 1) as f64);
        let max_dx = self.corner_ratio.clamp(0.0, 0.49) * w;
        let max_dy = self.corner_ratio.clamp(0.0, 0.49) * h;

        for z in 0..sz {
            let dst = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];
            let mut src = dst;
            let signs = [(1.0, 1.0), (-1.0, 1.0), (-1.0, -1.0), (1.0, -1.0)];
            for (corner, (sx_sign, sy_sign)) in src.iter_mut().zip(signs) {
                corner.0 += sx_sign * rng.gen_range(0.0..=max_dx);
                corner.1 += sy_sign * rng.gen_range(0.0..=max_dy);
            }
            let Some(homography) = solve_homography(&dst, &src) else {
                debug!(z, "degenerate perspective quad, section left unchanged");
                continue;
            };

            let image = patch.image.section(z).to_vec();
            let label = patch.label.section(z).to_vec();
            let out_image = patch.image.section_mut(z);
            for y in 0..sy {
                for x in 0..sx {
                    let (u, v) = project(&homography, x as f64, y as f64);
                    let (u, v) = (u.clamp(0.0, w), v.clamp(0.0, h));
                    out_image[y * sx + x] = bilinear(&image, sy, sx, u, v);
                }
            }
            let out_label = patch.label.section_mut(z);
            for y in 0..sy {
                for x in 0..sx {
                    let (u, v) = project(&homography, x as f64, y as f64);
                    let (u, v) = (u.clamp(0.0, w).round() as usize, v.clamp(0.0, h).round() as usize);
                    out_label[y * sx + x] = label[v * sx + u];
                }
            }
        }
        Ok(())
    }
}

fn project(h: &[f64; 8], x: f64, y: f64) -> (f64, f64) {
    let d = h[6] * x + h[7] * y + 1.0;
    ((h[0] * x + h[1] * y + h[2]) / d, (h[3] * x + h[4] * y + h[5]) / d)
}

fn bilinear(section: &[f64], rows: usize, cols: usize, u: f64, v: f64) -> f64 {
    let x0 = u.floor() as usize;
    let y0 = v.floor() as usize;
    let x1 = (x0 + 1).min(cols - 1);
    let y1 = (y0 + 1).min(rows - 1);
    let (fx, fy) = (u - x0 as f64, v - y0 as f64);
    let at = |y: usize, x: usize| section[y * cols + x];
    (1.0 - fy) * ((1.0 - fx) * at(y0, x0) + fx * at(y0, x1))
        + fy * ((1.0 - fx) * at(y1, x0) + fx * at(y1, x1))
}

/// Solves for the 8 homography coefficients mapping each `from` point to
/// the matching `to` point. Returns `None` for a singular system.
fn solve_homography(from: &[(f64, f64); 4], to: &[(f64, f64); 4]) -> Option<[f64; 8]> {
    let mut a = [[0.0f64; 9]; 8];
    for (i, (&(x, y), &(u, v))) in from.iter().zip(to.iter()).enumerate() {
        a[2 * i] = [x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y, u];
        a[2 * i + 1] = [0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y, v];
    }

    // Gaussian elimination with partial pivoting on the augmented matrix.
    for col in 0..8 {
        let pivot = (col..8).max_by(|&p, &q| a[p][col].abs().total_cmp(&a[q][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        for row in 0..8 {
            if row == col {
                continue;
            }
            let factor = a[row][col] / a[col][col];
            if factor != 0.0 {
                for k in col..9 {
                    a[row][k] -= factor * a[col][k];
                }
            }
        }
    }

    let mut h = [0.0; 8];
    for (i, coef) in h.iter_mut().enumerate() {
        *coef = a[i][8] / a[i][i];
    }
    Some(h)
}

/// Simulates section misalignment: every section from a random z onward is
/// shifted in-plane by up to `max_displacement` voxels, then the borders
/// exposed by the shift are cropped.
#[derive(Debug, Clone)]
pub struct MissAlignment {
    pub probability: f64,
    pub max_displacement: usize,
}

impl Default for MissAlignment {
    fn default() -> Self {
        MissAlignment { probability: DEFAULT_PROBABILITY, max_displacement: 2 }
    }
}

impl MissAlignment {
    fn shift<T: Copy + Default>(chunk: &Chunk<T>, from_z: usize, d: usize, dy: i64, dx: i64) -> Result<Chunk<T>> {
        let [sz, sy, sx] = chunk.shape();
        let (oy, ox) = (sy - 2 * d, sx - 2 * d);
        let mut data = Vec::with_capacity(sz * oy * ox);
        for z in 0..sz {
            let (sy_off, sx_off) = if z >= from_z { (dy, dx) } else { (0, 0) };
            for y in 0..oy {
                for x in 0..ox {
                    let yy = (y as i64 + d as i64 + sy_off) as usize;
                    let xx = (x as i64 + d as i64 + sx_off) as usize;
                    data.push(chunk.get(z, yy, xx));
                }
            }
        }
        Chunk::from_vec([sz, oy, ox], data)
    }
}

impl Transform for MissAlignment {
    fn name(&self) -> &'static str {
        "MissAlignment"
    }

    fn probability(&self) -> f64 {
        self.probability
    }

    fn shrink_size(&self) -> ShrinkSize {
        let d = self.max_displacement;
        [0, d, d, 0, d, d]
    }

    fn transform(&self, patch: &mut Patch, rng: &mut dyn RngCore) -> Result<()> {
        let d = self.max_displacement;
        let [sz, sy, sx] = patch.shape();
        if sz < 2 || sy <= 2 * d || sx <= 2 * d {
            // Too small to misalign; still consume the promised border.
            patch.accumulate_delayed_shrink_size(self.shrink_size());
            return Ok(());
        }
        let from_z = rng.gen_range(1..sz);
        let di = d as i64;
        let dy = rng.gen_range(-di..=di);
        let dx = rng.gen_range(-di..=di);
        patch.image = Self::shift(&patch.image, from_z, d, dy, dx)?;
        patch.label = Self::shift(&patch.label, from_z, d, dy, dx)?;
        Ok(())
    }
}

/// Replaces one interior image section with a copy of the section before
/// it, as happens when a section is lost during acquisition.
#[derive(Debug, Clone)]
pub struct DropSection {
    pub probability: f64,
}

impl Default for DropSection {
    fn default() -> Self {
        DropSection { probability: DEFAULT_PROBABILITY }
    }
}

impl Transform for DropSection {
    fn name(&self) -> &'static str {
        "DropSection"
    }

    fn probability(&self) -> f64 {
        self.probability
    }

    fn transform(&self, patch: &mut Patch, rng: &mut dyn RngCore) -> Result<()> {
        let [sz, _, _] = patch.shape();
        if sz < 3 {
            return Ok(());
        }
        let z = rng.gen_range(1..sz - 1);
        let previous = patch.image.section(z - 1).to_vec();
        patch.image.section_mut(z).copy_from_slice(&previous);
        Ok(())
    }
}
