//! # Patch Extraction
//!
//! Turns grayscale images into a [`PatchBatch`]: `p × p` windows are sampled
//! at random positions, flattened row-major and stored one per column.

use crate::error::InputError;
use crate::matrix::{PatchBatch, Scalar};
use ndarray::{s, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum PatchError {
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Patch size {patch_size} does not fit image {index} ({height}x{width})")]
    PatchTooLarge {
        patch_size: usize,
        index: usize,
        height: usize,
        width: usize,
    },
    #[error("No images to sample patches from")]
    NoImages,
    #[error(transparent)]
    Input(#[from] InputError),
}

/// Loads an image as a `height × width` matrix of intensities in `[0, 1]`.
pub fn load_grayscale<P: AsRef<Path>>(path: P) -> Result<Array2<Scalar>, PatchError> {
    let img = image::open(path.as_ref())?.to_luma8();
    let (width, height) = img.dimensions();
    let pixels = Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
        img.get_pixel(x as u32, y as u32).0[0] as Scalar / 255.0
    });
    log::debug!("loaded {} ({}x{})", path.as_ref().display(), height, width);
    Ok(pixels)
}

/// Samples `count` random `patch_size × patch_size` patches.
///
/// Each patch picks an image uniformly, then a top-left corner uniformly among
/// the positions where the window fits. The result is reproducible from `seed`.
pub fn sample_patches(
    images: &[Array2<Scalar>],
    patch_size: usize,
    count: usize,
    seed: u64,
) -> Result<PatchBatch, PatchError> {
    if images.is_empty() {
        return Err(PatchError::NoImages);
    }
    if patch_size == 0 {
        return Err(InputError::EmptyDimension { what: "patch size" }.into());
    }
    for (index, image) in images.iter().enumerate() {
        let (height, width) = image.dim();
        if patch_size > height || patch_size > width {
            return Err(PatchError::PatchTooLarge {
                patch_size,
                index,
                height,
                width,
            });
        }
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = Array2::zeros((patch_size * patch_size, count));
    for mut column in data.axis_iter_mut(Axis(1)) {
        let image = &images[rng.gen_range(0..images.len())];
        let (height, width) = image.dim();
        let top = rng.gen_range(0..=height - patch_size);
        let left = rng.gen_range(0..=width - patch_size);
        let window = image.slice(s![top..top + patch_size, left..left + patch_size]);
        // Logical iteration order of a 2-D view is row-major.
        for (dst, src) in column.iter_mut().zip(window.iter()) {
            *dst = *src;
        }
    }
    Ok(PatchBatch::new(data)?)
}

/// Subtracts each patch's mean intensity from its pixels.
pub fn remove_dc(batch: &PatchBatch) -> Result<PatchBatch, PatchError> {
    let mut data = batch.data().clone();
    for mut column in data.axis_iter_mut(Axis(1)) {
        let mean = column.mean().unwrap_or(0.0);
        column -= mean;
    }
    Ok(PatchBatch::new(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ramp(height: usize, width: usize) -> Array2<Scalar> {
        Array2::from_shape_fn((height, width), |(y, x)| (y * width + x) as Scalar)
    }

    #[test]
    fn patches_are_row_major_windows() {
        let image = ramp(6, 9);
        let batch = sample_patches(&[image], 3, 20, 4).unwrap();
        assert_eq!(batch.patch_dim(), 9);
        assert_eq!(batch.num_patches(), 20);
        for i in 0..batch.num_patches() {
            let patch = batch.patch(i);
            let origin = patch[0];
            for r in 0..3 {
                for c in 0..3 {
                    assert_eq!(patch[r * 3 + c], origin + (r * 9 + c) as Scalar);
                }
            }
        }
    }

    #[test]
    fn sampling_is_seeded() {
        let images = [ramp(10, 10), ramp(8, 12)];
        let a = sample_patches(&images, 4, 15, 9).unwrap();
        let b = sample_patches(&images, 4, 15, 9).unwrap();
        let c = sample_patches(&images, 4, 15, 10).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn oversized_patch_and_empty_input_fail() {
        assert!(matches!(sample_patches(&[], 2, 1, 0), Err(PatchError::NoImages)));
        let err = sample_patches(&[ramp(8, 8), ramp(3, 8)], 4, 1, 0).unwrap_err();
        assert!(matches!(err, PatchError::PatchTooLarge { index: 1, height: 3, .. }));
    }

    #[test]
    fn remove_dc_centres_every_patch() {
        let batch = sample_patches(&[ramp(7, 7)], 3, 5, 1).unwrap();
        let centred = remove_dc(&batch).unwrap();
        for i in 0..centred.num_patches() {
            assert_abs_diff_eq!(centred.patch(i).sum(), 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn grayscale_png_loads_into_unit_range() {
        let path = std::env::temp_dir().join(format!("sparsedict-gray-{}.png", std::process::id()));
        let img = image::GrayImage::from_fn(3, 2, |x, y| image::Luma([(x * 100 + y * 55) as u8]));
        img.save(&path).unwrap();
        let pixels = load_grayscale(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(pixels.dim(), (2, 3));
        assert_abs_diff_eq!(pixels[[0, 0]], 0.0);
        assert_abs_diff_eq!(pixels[[1, 2]], 255.0 / 255.0);
    }
}
