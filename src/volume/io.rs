//! Slice-stack volume I/O.
//!
//! A volume on disk is a directory holding one grayscale image per z
//! section. Sections are ordered by file name, so zero-padded names
//! (`0000.png`, `0001.png`, ...) are expected.

use std::fs;
use std::path::{Path, PathBuf};

use image::{DynamicImage, GenericImageView, ImageBuffer, Luma};
use tracing::debug;

use crate::error::{NeutorchError, Result};
use crate::volume::chunk::Chunk;

const SLICE_EXTENSIONS: [&str; 5] = ["png", "tif", "tiff", "bmp", "PNG"];

/// Sorted list of slice files in `dir`.
fn list_slices(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(NeutorchError::Volume {
            path: dir.display().to_string(),
            message: "not a directory".into(),
        });
    }
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map_or(false, |e| SLICE_EXTENSIONS.contains(&e))
        })
        .collect();
    files.sort();
    if files.is_empty() {
        return Err(NeutorchError::Volume {
            path: dir.display().to_string(),
            message: "no image slices found".into(),
        });
    }
    Ok(files)
}

fn open_slice(path: &Path) -> Result<DynamicImage> {
    image::open(path).map_err(|source| NeutorchError::Image {
        path: path.display().to_string(),
        source,
    })
}

/// Reads every slice with `decode`, checking all sections share one size.
fn read_stack<T: Copy>(
    dir: &Path,
    decode: impl Fn(&DynamicImage) -> Vec<T>,
) -> Result<Chunk<T>> {
    let files = list_slices(dir)?;
    let mut section_shape: Option<(u32, u32)> = None;
    let mut data = Vec::new();

    for file in &files {
        let img = open_slice(file)?;
        let (w, h) = img.dimensions();
        match section_shape {
            None => section_shape = Some((w, h)),
            Some(expected) if expected != (w, h) => {
                return Err(NeutorchError::Volume {
                    path: file.display().to_string(),
                    message: format!(
                        "slice is {}x{}, expected {}x{} like the first slice",
                        w, h, expected.0, expected.1
                    ),
                });
            }
            Some(_) => {}
        }
        data.extend(decode(&img));
    }

    let (w, h) = section_shape.unwrap_or((0, 0));
    debug!(dir = %dir.display(), sections = files.len(), width = w, height = h, "read slice stack");
    Chunk::from_vec([files.len(), h as usize, w as usize], data)
}

/// Reads a grayscale image stack, normalised to `[0, 1]` by bit depth.
pub fn read_image_stack(dir: impl AsRef<Path>) -> Result<Chunk<f64>> {
    read_stack(dir.as_ref(), |img| match img {
        DynamicImage::ImageLuma16(buf) => {
            buf.pixels().map(|p| p.0[0] as f64 / 65535.0).collect()
        }
        _ => img.to_luma8().pixels().map(|p| p.0[0] as f64 / 255.0).collect(),
    })
}

/// Reads a segmentation stack; pixel values are segment ids, 0 is background.
pub fn read_label_stack(dir: impl AsRef<Path>) -> Result<Chunk<u32>> {
    read_stack(dir.as_ref(), |img| match img {
        DynamicImage::ImageLuma8(buf) => buf.pixels().map(|p| p.0[0] as u32).collect(),
        _ => img.to_luma16().pixels().map(|p| p.0[0] as u32).collect(),
    })
}

fn slice_path(dir: &Path, z: usize) -> PathBuf {
    dir.join(format!("{:04}.png", z))
}

/// Writes a `[0, 1]` volume as 8-bit PNG slices. Values outside the range are clamped.
pub fn write_image_stack(chunk: &Chunk<f64>, dir: impl AsRef<Path>) -> Result<()> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let [sz, sy, sx] = chunk.shape();
    for z in 0..sz {
        let pixels: Vec<u8> = chunk
            .section(z)
            .iter()
            .map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect();
        let path = slice_path(dir, z);
        let buf = ImageBuffer::<Luma<u8>, Vec<u8>>::from_raw(sx as u32, sy as u32, pixels)
            .ok_or_else(|| NeutorchError::Volume {
                path: path.display().to_string(),
                message: "section buffer has the wrong length".into(),
            })?;
        buf.save(&path).map_err(|source| NeutorchError::Image {
            path: path.display().to_string(),
            source,
        })?;
    }
    Ok(())
}

/// Writes a label volume as 16-bit PNG slices.
pub fn write_label_stack(chunk: &Chunk<u32>, dir: impl AsRef<Path>) -> Result<()> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let [sz, sy, sx] = chunk.shape();
    for z in 0..sz {
        let path = slice_path(dir, z);
        let mut pixels = Vec::with_capacity(sy * sx);
        for &id in chunk.section(z) {
            let id = u16::try_from(id).map_err(|_| NeutorchError::Volume {
                path: path.display().to_string(),
                message: format!("segment id {} does not fit in a 16-bit slice", id),
            })?;
            pixels.push(id);
        }
        let buf = ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(sx as u32, sy as u32, pixels)
            .ok_or_else(|| NeutorchError::Volume {
                path: path.display().to_string(),
                message: "section buffer has the wrong length".into(),
            })?;
        buf.save(&path).map_err(|source| NeutorchError::Image {
            path: path.display().to_string(),
            source,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_stack_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<f64> = (0..2 * 3 * 4).map(|i| i as f64 / 23.0).collect();
        let chunk = Chunk::from_vec([2, 3, 4], data).unwrap();

        write_image_stack(&chunk, dir.path()).unwrap();
        let back = read_image_stack(dir.path()).unwrap();

        assert_eq!(back.shape(), [2, 3, 4]);
        for (a, b) in chunk.data().iter().zip(back.data()) {
            assert!((a - b).abs() <= 0.5 / 255.0 + 1e-9);
        }
    }

    #[test]
    fn test_label_ids_survive_sixteen_bits() {
        let dir = tempfile::tempdir().unwrap();
        let chunk = Chunk::from_vec([1, 2, 2], vec![0, 1, 300, 65535]).unwrap();
        write_label_stack(&chunk, dir.path()).unwrap();
        let back = read_label_stack(dir.path()).unwrap();
        assert_eq!(back, chunk);
    }

    #[test]
    fn test_label_id_too_large() {
        let dir = tempfile::tempdir().unwrap();
        let chunk = Chunk::from_vec([1, 1, 1], vec![70_000]).unwrap();
        assert!(write_label_stack(&chunk, dir.path()).is_err());
    }

    #[test]
    fn test_empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_image_stack(dir.path()),
            Err(NeutorchError::Volume { .. })
        ));
    }

    #[test]
    fn test_mismatched_slice_sizes() {
        let dir = tempfile::tempdir().unwrap();
        write_image_stack(&Chunk::new([1, 2, 2], 0.5), dir.path()).unwrap();
        ImageBuffer::<Luma<u8>, Vec<u8>>::from_raw(3, 3, vec![0; 9])
            .unwrap()
            .save(dir.path().join("0001.png"))
            .unwrap();
        assert!(read_image_stack(dir.path()).is_err());
    }
}
