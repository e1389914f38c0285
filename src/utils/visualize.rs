//! # Dictionary Visualization
//!
//! Tiles the columns of a `p² × M` matrix (usually the atoms) into one image
//! with a one-pixel border, and writes it out as an 8-bit grayscale PNG.

use crate::matrix::Scalar;
use ndarray::{s, Array2, ArrayView2, Axis};
use std::path::Path;

/// Value of the border pixels and of unused cells.
const BACKGROUND: Scalar = -1.0;
const BORDER: usize = 1;

#[derive(thiserror::Error, Debug)]
pub enum VisualizeError {
    #[error("Column length {0} is not a perfect square")]
    NotSquare(usize),
    #[error("Nothing to display: the matrix has no columns")]
    Empty,
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Side length `p` with `p * p == len`, if there is one.
fn square_side(len: usize) -> Option<usize> {
    let side = (len as f64).sqrt().round() as usize;
    (side * side == len).then_some(side)
}

/// Grid shape `(rows, cols)` for `count` tiles. `rows = None` (or zero) picks
/// a near-square layout.
pub fn grid_shape(count: usize, rows: Option<usize>) -> (usize, usize) {
    let rows = match rows {
        Some(rows) if rows > 0 => rows,
        _ => (count as f64).sqrt().ceil() as usize,
    }
    .max(1);
    (rows, count.div_ceil(rows))
}

/// Builds the display grid. Each column is scaled so its largest absolute
/// value becomes 1 (all-zero columns stay zero) and placed row by row.
pub fn display_grid(features: ArrayView2<'_, Scalar>, rows: Option<usize>) -> Result<Array2<Scalar>, VisualizeError> {
    let (len, count) = features.dim();
    if count == 0 {
        return Err(VisualizeError::Empty);
    }
    let side = square_side(len).filter(|&p| p > 0).ok_or(VisualizeError::NotSquare(len))?;
    let (rows, cols) = grid_shape(count, rows);

    let mut grid = Array2::from_elem(
        (BORDER + rows * (side + BORDER), BORDER + cols * (side + BORDER)),
        BACKGROUND,
    );
    for (i, column) in features.axis_iter(Axis(1)).enumerate() {
        let peak = column.iter().fold(0.0, |m: Scalar, v| m.max(v.abs()));
        let scale = if peak > 0.0 { 1.0 / peak } else { 1.0 };
        let top = BORDER + (i / cols) * (side + BORDER);
        let left = BORDER + (i % cols) * (side + BORDER);
        let mut tile = grid.slice_mut(s![top..top + side, left..left + side]);
        for (dst, src) in tile.iter_mut().zip(column.iter()) {
            *dst = src * scale;
        }
    }
    Ok(grid)
}

/// Writes a grid to `path`, mapping `[-1, 1]` linearly onto `[0, 255]`.
/// The format follows the file extension.
pub fn save_grid_png<P: AsRef<Path>>(grid: &Array2<Scalar>, path: P) -> Result<(), VisualizeError> {
    let (height, width) = grid.dim();
    let img = image::GrayImage::from_fn(width as u32, height as u32, |x, y| {
        let value = grid[[y as usize, x as usize]].clamp(-1.0, 1.0);
        image::Luma([((value + 1.0) * 127.5).round() as u8])
    });
    img.save(path.as_ref())?;
    log::info!("wrote {}x{} grid to {}", height, width, path.as_ref().display());
    Ok(())
}
